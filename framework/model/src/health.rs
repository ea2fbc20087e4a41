use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::TIME_FORMAT;
use crate::fields;

/// Status recorded for a host with no reported errors.
pub const SUCCESS_STATUS: &str = "Success";

/// One entry of a host's daily health history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatusEntry {
    pub time: String,
    pub status: Vec<String>,
}

impl HealthStatusEntry {
    pub fn new(at: DateTime<Utc>, status: Vec<String>) -> Self {
        Self {
            time: at.format(TIME_FORMAT).to_string(),
            status,
        }
    }

    /// Length of the status list rendered as `[a, b]`.
    ///
    /// Two status lists are considered the same when their rendered lengths match.
    pub fn rendered_len(&self) -> usize {
        rendered_len(&self.status)
    }
}

/// Length in UTF-16 units of `status` rendered as `[a, b]`, without quotes.
pub fn rendered_len(status: &[String]) -> usize {
    let items: usize = status.iter().map(|item| item.encode_utf16().count()).sum();
    let separators = status.len().saturating_sub(1) * ", ".len();
    "[]".len() + items + separators
}

/// The `data` of a daily health document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthData {
    #[serde(rename = "UnHealthyEventCount", default)]
    pub unhealthy_event_count: i64,
    #[serde(rename = "healthStatus", default)]
    pub health_status: Vec<HealthStatusEntry>,
}

impl HealthData {
    /// Read the health data of a stored document, tolerating a missing or partial `data`.
    pub fn from_document(document: &Value) -> Self {
        document
            .get(fields::DATA)
            .cloned()
            .and_then(|data| serde_json::from_value(data).ok())
            .unwrap_or_default()
    }

    pub fn last_entry(&self) -> Option<&HealthStatusEntry> {
        self.health_status.last()
    }
}
