//! Credential resolution for the query and catalog services.

use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use shared_utils::config::ConfigError;
use shared_utils::env::get_env_var;

use crate::errors::Result;

pub const ENV_ACCESS_KEY_ID: &str = "SIGNALS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "SIGNALS_SECRET_ACCESS_KEY";

/// How outgoing service calls authenticate.
#[derive(Debug)]
pub enum Credentials {
    /// Rely on whatever identity the runtime environment provides.
    Ambient,
    /// Static key pair read from the environment (`--local`).
    Static {
        access_key_id: SecretString,
        secret_access_key: SecretString,
    },
}

impl Credentials {
    /// Reads the static key pair when `local` is set, otherwise uses the ambient role.
    pub fn resolve(local: bool) -> Result<Self> {
        if !local {
            return Ok(Self::Ambient);
        }
        let read = |name| get_env_var(name).map_err(ConfigError::from);
        let access_key_id = SecretString::new(read(ENV_ACCESS_KEY_ID)?.into());
        let secret_access_key = SecretString::new(read(ENV_SECRET_ACCESS_KEY)?.into());
        Ok(Self::Static {
            access_key_id,
            secret_access_key,
        })
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Ambient => "ambient",
            Self::Static { .. } => "local",
        }
    }

    /// Attaches the key pair as basic auth; ambient requests are sent unchanged.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Ambient => request,
            Self::Static {
                access_key_id,
                secret_access_key,
            } => request.basic_auth(
                access_key_id.expose_secret(),
                Some(secret_access_key.expose_secret()),
            ),
        }
    }
}
