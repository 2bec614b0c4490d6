use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::handler::HandlerReport;

/// Whether a reboot was issued as part of a dispatch call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebootStatus {
    pub scheduled: bool,
    #[serde(default)]
    pub details: Value,
}

/// Aggregated outcome of one dispatch call.
///
/// `status` is the AND of every group's status, `chgcnt` the sum. `details`
/// is keyed by type id so partial failures stay visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub status: bool,
    pub chgcnt: usize,
    pub reboot: RebootStatus,
    pub details: BTreeMap<String, HandlerReport>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            status: true,
            chgcnt: 0,
            reboot: RebootStatus::default(),
            details: BTreeMap::new(),
        }
    }
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one group's outcome in.
    pub fn merge(&mut self, type_id: impl Into<String>, part: HandlerReport) {
        self.status &= part.status;
        self.chgcnt += part.chgcnt;
        self.details.insert(type_id.into(), part);
    }

    /// Some handler asked for a reboot on its own.
    pub fn reboot_requested(&self) -> bool {
        self.details.values().any(|d| d.reboot_requested)
    }
}
