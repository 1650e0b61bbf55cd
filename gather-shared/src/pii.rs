use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Personal data that must never reach log output.
///
/// `Debug` and `Display` print a fixed mask. Serialization writes the real
/// value, so API responses stay usable while `tracing::info!("{:?}", ..)`
/// cannot leak it.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Masked<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

/// Keeps the first `visible` characters of a credential and masks the rest.
pub fn redact(secret: &str, visible: usize) -> String {
    let shown: String = secret.chars().take(visible).collect();
    if shown.len() == secret.len() {
        return "*".repeat(shown.chars().count());
    }
    format!("{}****", shown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_value_in_debug_but_serializes_it() {
        let email = Masked("ada@example.com".to_string());

        assert_eq!(format!("{:?}", email), "********");
        assert_eq!(email.to_string(), "********");
        assert_eq!(serde_json::to_string(&email).unwrap(), "\"ada@example.com\"");
    }

    #[test]
    fn test_redact_keeps_prefix_only() {
        assert_eq!(redact("RSVP-abcdef123456", 5), "RSVP-****");
        assert_eq!(redact("abc", 5), "***");
    }
}
