//! The contract between the dispatcher and content-type plugins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::unit::{ContentUnit, Options};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// What one handler call reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerReport {
    pub status: bool,

    /// Units actually changed.
    pub chgcnt: usize,

    /// The handler wants a reboot regardless of options.
    #[serde(default)]
    pub reboot_requested: bool,

    #[serde(default)]
    pub details: Value,
}

impl HandlerReport {
    pub fn succeeded(chgcnt: usize, details: Value) -> Self {
        Self {
            status: true,
            chgcnt,
            reboot_requested: false,
            details,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: false,
            chgcnt: 0,
            reboot_requested: false,
            details: serde_json::json!({ "message": message.into() }),
        }
    }

    pub fn requesting_reboot(mut self) -> Self {
        self.reboot_requested = true;
        self
    }
}

/// A content-type plugin.
///
/// One instance serves one type id. Errors are caught by the dispatcher and
/// recorded in the report; they never abort a batch.
#[async_trait]
pub trait ContentHandler: Send + Sync {
    async fn install(
        &self,
        units: &[ContentUnit],
        options: &Options,
    ) -> Result<HandlerReport, HandlerError>;

    async fn update(
        &self,
        units: &[ContentUnit],
        options: &Options,
    ) -> Result<HandlerReport, HandlerError>;

    async fn uninstall(
        &self,
        units: &[ContentUnit],
        options: &Options,
    ) -> Result<HandlerReport, HandlerError>;

    /// Report installed state. Must not change anything.
    async fn profile(&self) -> Result<HandlerReport, HandlerError>;

    /// Issue a reboot. Only the system handler needs this.
    async fn reboot(&self, _options: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Unsupported("reboot"))
    }
}
