use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One provider credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub secret: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    /// Kept in the file's `blacklist` map, not inline
    #[serde(skip)]
    pub blacklisted_until: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl ApiKeyRecord {
    pub fn new(id: &str, secret: &str, label: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            label: label.map(str::to_string),
            secret: secret.to_string(),
            enabled: true,
            created_at: now,
            blacklisted_until: None,
        }
    }

    pub fn is_blacklisted(&self, now: DateTime<Utc>) -> bool {
        self.blacklisted_until.is_some_and(|until| until > now)
    }

    /// Enabled and not cooling down
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_blacklisted(now)
    }
}

/// Key as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedKey {
    pub id: String,
    pub label: Option<String>,
    pub masked: String,
    pub enabled: bool,
    pub is_default: bool,
    /// Seconds left on the cooldown, if any
    pub cooldown_secs: Option<i64>,
}

/// Show the first and last few characters of a secret
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let (head, tail) = match chars.len() {
        0 => return String::new(),
        n if n <= 4 => return "*".repeat(n),
        n if n < 10 => (2, 2),
        _ => (5, 4),
    };
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{}...{}", start, end)
}

/// On-disk layout of the credential file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct CredentialFile {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub default: Option<String>,
    pub keys: Vec<ApiKeyRecord>,
    #[serde(default)]
    pub rr_index: usize,
    #[serde(default)]
    pub blacklist: BTreeMap<String, DateTime<Utc>>,
}

fn current_version() -> u32 {
    2
}

/// Earlier JSON layout: secrets keyed by id plus a separate order list
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LegacyKeyMap {
    pub keys: HashMap<String, String>,
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub rr_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("AIzaSyABCDEFGHIJ1234"), "AIzaS...1234");
        assert_eq!(mask_secret("abcdefgh"), "ab...gh");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret(""), "");
    }

    #[test]
    fn test_usable_respects_blacklist_and_enabled() {
        let now = Utc::now();
        let mut key = ApiKeyRecord::new("a", "secret-value", None, now);
        assert!(key.is_usable(now));

        key.blacklisted_until = Some(now + chrono::Duration::seconds(60));
        assert!(!key.is_usable(now));
        assert!(key.is_usable(now + chrono::Duration::seconds(61)));

        key.blacklisted_until = None;
        key.enabled = false;
        assert!(!key.is_usable(now));
    }
}
