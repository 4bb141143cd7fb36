//! Public ID generation: `<prefix>_<alnum>`, where the suffix is a
//! cryptographically random, dense, lowercase-alphanumeric string.

use rand::Rng;

pub const DEFAULT_SUFFIX_LEN: usize = 24;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a public ID with the given prefix and suffix length (the
/// spec requires a length of at least 16; callers of the typed
/// constructors below get `DEFAULT_SUFFIX_LEN`).
pub fn generate(prefix: &str, suffix_len: usize) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..suffix_len)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect();
    format!("{prefix}_{suffix}")
}

macro_rules! public_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(generate($prefix, DEFAULT_SUFFIX_LEN))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Wrap an already-generated or externally-supplied ID string
            /// without re-validating its prefix; used when round-tripping
            /// through storage.
            pub fn from_raw(value: impl Into<String>) -> Self {
                Self(value.into())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }
    };
}

public_id!(ResponseId, "resp");
public_id!(ConversationId, "conv");
public_id!(ItemId, "msg");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_has_requested_length_and_prefix() {
        let id = generate("resp", 20);
        assert!(id.starts_with("resp_"));
        assert_eq!(id.len(), "resp_".len() + 20);
    }

    #[test]
    fn generate_is_alphanumeric_lowercase() {
        let id = generate("conv", 32);
        let suffix = id.strip_prefix("conv_").unwrap();
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn typed_ids_carry_the_right_prefix() {
        assert!(ResponseId::new().as_str().starts_with("resp_"));
        assert!(ConversationId::new().as_str().starts_with("conv_"));
        assert!(ItemId::new().as_str().starts_with("msg_"));
    }

    #[test]
    fn default_suffix_length_meets_the_minimum_of_16() {
        assert!(DEFAULT_SUFFIX_LEN >= 16);
    }

    #[test]
    fn two_generated_ids_differ() {
        assert_ne!(ResponseId::new(), ResponseId::new());
    }
}
