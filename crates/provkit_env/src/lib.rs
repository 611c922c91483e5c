//! # provkit_env
//!
//! Named environments for provkit.
//!
//! An environment is a named set of string key/value pairs identifying one
//! deployment target (subscription, location, resource group, deployment
//! outputs). Provisioning reads the well-known keys and callers write the
//! results of a deploy or destroy back into it.
//!
//! ```rust
//! use provkit_env::{Environment, keys};
//!
//! let mut env = Environment::ephemeral("dev");
//! env.set_location("eastus2");
//! assert_eq!(env.location(), Some("eastus2"));
//! assert_eq!(env.get(keys::ENV_NAME), "dev");
//! ```

pub mod environment;
pub mod error;
pub mod store;

pub use environment::{env_key, keys, Environment};
pub use error::{EnvError, EnvResult};
pub use store::EnvironmentStore;
