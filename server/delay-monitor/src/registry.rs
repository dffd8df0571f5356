//! Source registry: the fixed id -> display-name mapping handed over at startup.
//!
//! Discovery (which sources belong to a run) happens outside this crate; the
//! registry only loads the already-filtered mapping.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::MonitorError;

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
  sources: BTreeMap<String, String>,
}

impl SourceRegistry {
  pub fn new<I, K, V>(entries: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      sources: entries
        .into_iter()
        .map(|(id, name)| (id.into(), name.into()))
        .collect(),
    }
  }

  /// Load a JSON object of `{"<id>": "<display name>"}`.
  pub fn from_json_file(path: &Path) -> Result<Self, MonitorError> {
    let raw = std::fs::read_to_string(path)?;
    Self::from_json_str(&raw)
  }

  pub fn from_json_str(raw: &str) -> Result<Self, MonitorError> {
    let sources: BTreeMap<String, String> = serde_json::from_str(raw)?;
    if sources.keys().any(|id| id.trim().is_empty()) {
      return Err(MonitorError::config("sources", "source id must not be empty"));
    }
    Ok(Self { sources })
  }

  pub fn len(&self) -> usize {
    self.sources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sources.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.sources.contains_key(id)
  }

  pub fn name(&self, id: &str) -> Option<&str> {
    self.sources.get(id).map(String::as_str)
  }

  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.sources.keys().map(String::as_str)
  }

  /// `(id, display name)` pairs in registry order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.sources.iter().map(|(id, name)| (id.as_str(), name.as_str()))
  }
}

/// File-name-safe form of a display name: runs of `<>:"/\|?*` become `_`.
pub fn sanitize_name(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  let mut in_run = false;
  for ch in name.chars() {
    if matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
      if !in_run {
        out.push('_');
      }
      in_run = true;
    } else {
      in_run = false;
      out.push(ch);
    }
  }
  out.trim().to_string()
}
