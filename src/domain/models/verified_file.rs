//! Verified filesystem effects.
//!
//! A `VerifiedFileEvent` is only ever constructed after the reality verifier
//! has confirmed the effect on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The confirmed filesystem action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Update,
    Delete,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of best-effort quality checks run on created/updated files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCheck {
    /// Content decodes as UTF-8 without replacement
    Utf8Clean,
    /// Syntactic oracle for the file type accepted the content
    SyntaxValid,
    /// Body is more than whitespace and boilerplate
    NonEmptyBody,
}

impl QualityCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8Clean => "utf8_clean",
            Self::SyntaxValid => "syntax_valid",
            Self::NonEmptyBody => "non_empty_body",
        }
    }
}

/// A confirmed filesystem side effect attributable to a task and step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFileEvent {
    pub task_id: Uuid,
    pub step_index: u32,
    /// Repo-relative path
    pub path: String,
    pub action: FileAction,
    /// Byte size after the action; 0 for deletes
    pub byte_size: u64,
    pub checks_passed: Vec<QualityCheck>,
    pub quality_warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in [FileAction::Create, FileAction::Update, FileAction::Delete] {
            assert_eq!(FileAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(FileAction::from_str("rename"), None);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let event = VerifiedFileEvent {
            task_id: Uuid::new_v4(),
            step_index: 1,
            path: "app/health.py".to_string(),
            action: FileAction::Create,
            byte_size: 120,
            checks_passed: vec![QualityCheck::Utf8Clean, QualityCheck::SyntaxValid],
            quality_warnings: vec![],
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "create");
        assert_eq!(json["checks_passed"][0], "utf8_clean");
    }
}
