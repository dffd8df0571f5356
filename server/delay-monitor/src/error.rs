//! Structured error types for the delay monitor.
//!
//! Every variant here is fatal to a run. Record faults (an event without an
//! identity) and policy drops never surface as errors; see `admission`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
  #[error("connect: {0}")]
  Connect(String),

  #[error("transport: {0}")]
  Transport(String),

  #[error("decode: {0}")]
  Decode(String),

  #[error("timestamp: {value:?}: {reason}")]
  Timestamp { value: String, reason: String },

  #[error("config: {field}: {reason}")]
  Config { field: String, reason: String },

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl MonitorError {
  pub fn config(field: &str, reason: &str) -> Self {
    Self::Config {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn timestamp(value: &str, reason: impl Into<String>) -> Self {
    Self::Timestamp {
      value: value.to_string(),
      reason: reason.into(),
    }
  }

  pub fn decode(msg: impl Into<String>) -> Self {
    Self::Decode(msg.into())
  }

  pub fn transport(msg: impl Into<String>) -> Self {
    Self::Transport(msg.into())
  }
}
