use std::str::FromStr;

use thiserror::Error;

use crate::config::ConfigError;

/// An environment variable required by the application is not set.
#[derive(Debug, Error)]
#[error("Missing environment variable: {0}")]
pub struct MissingEnvVarError(pub String);

/// Reads an environment variable, returning a structured error if it's missing.
///
/// This is a thin wrapper around `std::env::var` that provides a more
/// ergonomic and specific error type for missing variables.
///
/// # Arguments
/// * `name` - The name of the environment variable to read.
pub fn get_env_var(name: &str) -> Result<String, MissingEnvVarError> {
    std::env::var(name).map_err(|_| MissingEnvVarError(name.to_string()))
}

/// Reads and parses an optional environment variable.
///
/// Returns `Ok(None)` when the variable is unset or empty, and an
/// [`ConfigError::InvalidValue`] when it is set but does not parse as `T`.
pub fn parse_env_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn missing_var_names_the_variable() {
        // SAFETY: serialised with the other env tests in this module.
        unsafe { std::env::remove_var("SHARED_UTILS_TEST_MISSING") };
        let err = get_env_var("SHARED_UTILS_TEST_MISSING").unwrap_err();
        assert_eq!(err.to_string(), "Missing environment variable: SHARED_UTILS_TEST_MISSING");
    }

    #[test]
    #[serial]
    fn parse_env_var_handles_unset_valid_and_invalid() {
        unsafe { std::env::remove_var("SHARED_UTILS_TEST_NUM") };
        assert_eq!(parse_env_var::<usize>("SHARED_UTILS_TEST_NUM").unwrap(), None);

        unsafe { std::env::set_var("SHARED_UTILS_TEST_NUM", " 42 ") };
        assert_eq!(parse_env_var::<usize>("SHARED_UTILS_TEST_NUM").unwrap(), Some(42));

        unsafe { std::env::set_var("SHARED_UTILS_TEST_NUM", "forty-two") };
        let err = parse_env_var::<usize>("SHARED_UTILS_TEST_NUM").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "SHARED_UTILS_TEST_NUM"));

        unsafe { std::env::remove_var("SHARED_UTILS_TEST_NUM") };
    }
}
