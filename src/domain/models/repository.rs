//! Registered target repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A repository registered as a target for tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    /// Absolute filesystem path
    pub path: String,
    /// Display name
    pub name: String,
    /// Detected project type ("rust", "python", "node", "go")
    pub project_type: Option<String>,
    /// Detected framework ("axum", "fastapi", "react", ...)
    pub framework: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(path: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            name: name.into(),
            project_type: None,
            framework: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A node in the repository file tree returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    /// Repo-relative path
    pub path: String,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}
