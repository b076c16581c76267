//! Environment variable records

use serde::{Deserialize, Serialize};

/// A user-defined environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub key: String,

    /// Stored value, possibly still encrypted
    #[serde(default)]
    pub value: String,

    /// Decrypted value, preferred over `value` when present
    #[serde(default)]
    pub real_value: Option<String>,

    #[serde(default = "default_true")]
    pub is_buildtime: bool,

    #[serde(default = "default_true")]
    pub is_runtime: bool,

    /// No shell interpolation
    #[serde(default)]
    pub is_literal: bool,

    #[serde(default)]
    pub is_multiline: bool,

    /// Only used by pull request deployments
    #[serde(default)]
    pub is_preview: bool,

    /// Insertion order
    #[serde(default)]
    pub order: u32,
}

fn default_true() -> bool {
    true
}

impl EnvironmentVariable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            real_value: None,
            is_buildtime: true,
            is_runtime: true,
            is_literal: false,
            is_multiline: false,
            is_preview: false,
            order: 0,
        }
    }

    /// The effective value of the variable
    pub fn resolved_value(&self) -> &str {
        self.real_value.as_deref().unwrap_or(&self.value)
    }
}
