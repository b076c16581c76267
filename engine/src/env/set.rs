//! Ordered environment variable set

use std::collections::BTreeMap;

use crate::env::escape;

/// How a value is quoted when written to a shell or `.env` file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// Double quotes, `$VAR` references expand
    Interpolated,
    /// Single quotes, the value is taken verbatim
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    pub quoting: Quoting,
}

impl EnvVar {
    /// Shell-escaped value
    pub fn escaped(&self) -> String {
        escape::escape_value(&self.value, self.quoting)
    }

    /// Whether the value references a `SERVICE_*` variable
    pub fn references_service(&self) -> bool {
        self.value.contains("$SERVICE_") || self.value.contains("${SERVICE_")
    }
}

/// Variables in insertion order; inserting an existing key overrides its
/// value in place
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSet {
    vars: Vec<EnvVar>,
}

impl EnvSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert_var(EnvVar {
            key: key.into(),
            value: value.into(),
            quoting: Quoting::Interpolated,
        });
    }

    pub fn insert_literal(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert_var(EnvVar {
            key: key.into(),
            value: value.into(),
            quoting: Quoting::Literal,
        });
    }

    pub fn insert_var(&mut self, var: EnvVar) {
        match self.vars.iter_mut().find(|v| v.key == var.key) {
            Some(existing) => *existing = var,
            None => self.vars.push(var),
        }
    }

    /// Overlay `other` on top of this set
    pub fn extend(&mut self, other: &EnvSet) {
        for var in &other.vars {
            self.insert_var(var.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|v| v.key == key)
            .map(|v| v.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.iter().any(|v| v.key == key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvVar> {
        self.vars.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.vars.iter().map(|v| v.key.clone()).collect()
    }

    /// Alphabetical order by key
    pub fn sort_by_key(&mut self) {
        self.vars.sort_by(|a, b| a.key.cmp(&b.key));
    }

    /// Stable partition moving variables that reference `SERVICE_*` after
    /// the others
    pub fn order_service_references_last(&mut self) {
        let (plain, dependent): (Vec<EnvVar>, Vec<EnvVar>) = std::mem::take(&mut self.vars)
            .into_iter()
            .partition(|v| !v.references_service());
        self.vars = plain;
        self.vars.extend(dependent);
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .map(|v| (v.key.clone(), v.value.clone()))
            .collect()
    }

    /// `.env` file contents, one `KEY=escaped` line per variable
    pub fn render_dotenv(&self) -> String {
        let mut out = String::new();
        for var in &self.vars {
            out.push_str(&var.key);
            out.push('=');
            out.push_str(&var.escaped());
            out.push('\n');
        }
        out
    }
}
