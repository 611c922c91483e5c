//! File-backed environment persistence.
//!
//! Environments live under `<root>/.azure/<name>/.env` as `KEY="value"` lines,
//! read back with `dotenv`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::environment::Environment;
use crate::error::{EnvError, EnvResult};

const STATE_DIR: &str = ".azure";
const ENV_FILE: &str = ".env";

/// Loads and saves environments below a project root.
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    root: PathBuf,
}

impl EnvironmentStore {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: project_root.into(),
        }
    }

    /// Directory holding the state of one environment.
    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.root.join(STATE_DIR).join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.env_dir(name).join(ENV_FILE).is_file()
    }

    /// Load a previously saved environment.
    pub fn load(&self, name: &str) -> EnvResult<Environment> {
        validate_name(name)?;
        let path = self.env_dir(name).join(ENV_FILE);
        if !path.is_file() {
            return Err(EnvError::NotFound(name.to_string()));
        }

        debug!("Loading environment from {:?}", path);
        let values = parse(&path)?;

        Ok(Environment::ephemeral_with_values(name, values))
    }

    /// Load an environment, or start a fresh one if it was never saved.
    pub fn load_or_create(&self, name: &str) -> EnvResult<Environment> {
        match self.load(name) {
            Ok(env) => Ok(env),
            Err(EnvError::NotFound(_)) => {
                info!("Creating new environment '{}'", name);
                Ok(Environment::ephemeral(name))
            }
            Err(e) => Err(e),
        }
    }

    /// Persist an environment, replacing any previous file.
    pub fn save(&self, env: &Environment) -> EnvResult<()> {
        validate_name(env.name())?;
        let dir = self.env_dir(env.name());
        fs::create_dir_all(&dir)?;

        let mut content = String::new();
        for (key, value) in env.values() {
            content.push_str(key);
            content.push_str("=\"");
            content.push_str(&escape(value));
            content.push_str("\"\n");
        }

        let path = dir.join(ENV_FILE);
        debug!("Saving environment to {:?}", path);
        fs::write(path, content)?;
        Ok(())
    }
}

fn validate_name(name: &str) -> EnvResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && name != "."
        && name != "..";

    if valid {
        Ok(())
    } else {
        Err(EnvError::InvalidName(name.to_string()))
    }
}

/// Inverse of the dotenv double-quote rules, so `$` is never expanded on load.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn parse(path: &Path) -> EnvResult<Vec<(String, String)>> {
    let err = |e: dotenv::Error| match e {
        dotenv::Error::Io(io) => EnvError::Io(io),
        other => EnvError::Parse {
            file: path.display().to_string(),
            message: other.to_string(),
        },
    };

    dotenv::from_path_iter(path)
        .map_err(err)?
        .map(|item| item.map_err(err))
        .collect()
}
