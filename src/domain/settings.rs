use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::app::PagewatchError;
use crate::domain::MediaKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Text,
    Html,
}

impl MessageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageFormat::Text => "text",
            MessageFormat::Html => "html",
        }
    }
}

impl FromStr for MessageFormat {
    type Err = PagewatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(MessageFormat::Text),
            "html" => Ok(MessageFormat::Html),
            other => Err(PagewatchError::Validation(format!(
                "Invalid message format: {}. Use text or html",
                other
            ))),
        }
    }
}

/// Per-user rules deciding which discovered resources get delivered.
///
/// Empty rules accept everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRules {
    /// If non-empty, only these extensions pass.
    pub allow_extensions: Vec<String>,
    pub deny_extensions: Vec<String>,
    /// If non-empty, only these kinds pass.
    pub kinds: Vec<MediaKind>,
    /// If non-empty, the URL must contain at least one of these.
    pub keywords: Vec<String>,
    /// Upper bound on deliverable size for this user, in bytes.
    pub max_size_hint: Option<u64>,
}

impl FilterRules {
    pub fn is_empty(&self) -> bool {
        self.allow_extensions.is_empty()
            && self.deny_extensions.is_empty()
            && self.kinds.is_empty()
            && self.keywords.is_empty()
            && self.max_size_hint.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: i64,
    pub format: MessageFormat,
    pub filters: FilterRules,
}

impl NotificationSettings {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("HTML".parse::<MessageFormat>().unwrap(), MessageFormat::Html);
        assert_eq!(" text ".parse::<MessageFormat>().unwrap(), MessageFormat::Text);
        assert!("markdown".parse::<MessageFormat>().is_err());
    }

    #[test]
    fn test_default_rules_empty() {
        assert!(FilterRules::default().is_empty());
    }

    #[test]
    fn test_rules_deserialize_partial() {
        let rules: FilterRules = serde_json::from_str(r#"{"deny_extensions":["gif"]}"#).unwrap();
        assert_eq!(rules.deny_extensions, vec!["gif"]);
        assert!(rules.kinds.is_empty());
        assert!(!rules.is_empty());
    }
}
