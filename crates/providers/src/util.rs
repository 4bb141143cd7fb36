//! Shared utility functions for the LLM provider adapter.

use rae_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::External`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::External(e.to_string())
    }
}

/// Resolve the provider's bearer service token from the environment
/// variable named by `config.llm.api_key_env`. spec.md §6 names one
/// `service_token` read this way — no keychain, no plaintext config
/// field, no multi-provider credential rotation.
pub fn resolve_api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var).map_err(|_| {
        Error::Unauthorized(format!(
            "environment variable '{env_var}' not set or not valid UTF-8"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_reads_env_var() {
        let var_name = "RAE_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let result = resolve_api_key(var_name).unwrap();
        assert_eq!(result, "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_missing_var_is_unauthorized() {
        let err = resolve_api_key("RAE_TEST_NONEXISTENT_VAR_8888").unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
        assert!(err.to_string().contains("RAE_TEST_NONEXISTENT_VAR_8888"));
    }
}
