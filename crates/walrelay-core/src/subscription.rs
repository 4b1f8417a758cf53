use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_IDENTIFIER_LEN: usize = 63;

/// Names a CDC session to the upstream: the replication slot to read from and
/// the publication that selects its tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionIdentity {
    pub slot_name: String,
    pub publication_name: String,
}

impl SubscriptionIdentity {
    pub fn new(slot_name: impl Into<String>, publication_name: impl Into<String>) -> Result<Self> {
        let identity = Self {
            slot_name: slot_name.into(),
            publication_name: publication_name.into(),
        };
        validate_identifier(&identity.slot_name)?;
        validate_identifier(&identity.publication_name)?;
        Ok(identity)
    }
}

impl std::fmt::Display for SubscriptionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.slot_name, self.publication_name)
    }
}

/// Slot names may only contain lower case letters, digits and underscores.
///
/// The same rule is applied to publication names so both can be embedded in
/// replication commands without quoting surprises.
pub fn validate_identifier(value: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidIdentifier {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(invalid("may only contain lower case letters, digits and underscores"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identity() {
        let identity = SubscriptionIdentity::new("outbox_slot", "outbox_pub").unwrap();
        assert_eq!(identity.to_string(), "outbox_slot/outbox_pub");
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        assert!(SubscriptionIdentity::new("", "outbox_pub").is_err());
        assert!(SubscriptionIdentity::new("Outbox", "outbox_pub").is_err());
        assert!(SubscriptionIdentity::new("outbox_slot", "pub; drop").is_err());
        assert!(SubscriptionIdentity::new("a".repeat(64), "outbox_pub").is_err());
        assert!(SubscriptionIdentity::new("a".repeat(63), "outbox_pub").is_ok());
    }
}
