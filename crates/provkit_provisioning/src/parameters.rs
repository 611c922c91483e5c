//! `${VAR}` substitution for parameter and variable files.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use provkit_env::Environment;

fn reference_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Whether `text` still contains a `${VAR}` reference.
pub(crate) fn has_reference(text: &str) -> bool {
    reference_pattern().is_some_and(|pattern| pattern.is_match(text))
}

/// Text after substitution and the variables that were not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substituted {
    pub text: String,
    pub missing: Vec<String>,
}

/// Replace `${VAR}` references in a JSON document with environment values.
///
/// Values are escaped for a JSON string context. Unset variables become
/// empty strings and are reported in [`Substituted::missing`].
pub fn substitute_json(text: &str, env: &Environment) -> Substituted {
    let mut missing = Vec::new();
    let Some(pattern) = reference_pattern() else {
        return Substituted {
            text: text.to_string(),
            missing,
        };
    };
    let text = pattern
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            match env.lookup(name) {
                Some(value) => escape_json(value),
                None => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    String::new()
                }
            }
        })
        .into_owned();

    Substituted { text, missing }
}

fn escape_json(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
