use std::env;

use crate::NewsdeskError;

/// API key or token read from the environment. `Debug` never prints the value.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Read a non-empty secret from the named environment variable.
pub fn require_env(var: &str) -> Result<SecretValue, NewsdeskError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(NewsdeskError::MissingSecret(var.to_string())),
    }
}
