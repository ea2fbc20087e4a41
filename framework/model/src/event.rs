use std::collections::BTreeMap;

use chrono::{DateTime, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::category;
use crate::fields;

/// `yyyy-MM-dd`, the format of `createdOn.date` and of every date window bound.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// `HH:mm:ss`, the format of `createdOn.time` and of health status entries.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// When an event happened and when it was last written.
///
/// `unixMs`, `mongoDate` and `lastUpdatedOn` are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOn {
    pub date: String,
    pub time: String,
    pub unix_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_on: Option<i64>,
}

impl CreatedOn {
    /// A creation stamp for `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            date: now.format(DATE_FORMAT).to_string(),
            time: now.format(TIME_FORMAT).to_string(),
            unix_ms: now.timestamp_millis(),
            mongo_date: None,
            last_updated_on: None,
        }
    }

    /// Stamp the write time and derive `mongoDate` from `unixMs`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated_on = Some(now.timestamp_millis());
        self.mongo_date = Some(self.unix_ms);
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.unix_ms).single()
    }
}

/// An event as stored in the events collection.
///
/// Fields the reporter does not interpret are carried through unchanged in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDocument {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub lifecycle: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<CreatedOn>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventDocument {
    /// Fill in the timestamps: a missing `createdOn` is built from `now`, `lastUpdatedOn` is
    /// always `now` and `mongoDate` follows `unixMs`.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        let created_on = self.created_on.get_or_insert_with(|| CreatedOn::at(now));
        created_on.touch(now);
    }

    /// Set `expiresAt` unless the category is kept forever.
    ///
    /// Production events are retained for two years, everything else for one.
    pub fn apply_retention(&mut self, now: DateTime<Utc>) {
        if category::never_expires(&self.category) {
            self.expires_at = None;
            return;
        }

        let months = if self.lifecycle.eq_ignore_ascii_case("prod") {
            24
        } else {
            12
        };
        self.expires_at = now
            .checked_add_months(Months::new(months))
            .map(|at| at.timestamp_millis());
    }

    pub fn date(&self) -> Option<&str> {
        self.created_on.as_ref().map(|c| c.date.as_str())
    }

    pub fn payload(&self) -> EventPayload {
        EventPayload::decode(&self.category, &self.data)
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// A per-service entry of a daily summary report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

/// The host description sent with health and host reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadbalancer_url: Option<String>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl VmReport {
    /// The load balancer url, if one is set and non-empty.
    pub fn loadbalancer(&self) -> Option<&str> {
        self.loadbalancer_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// The payload of a `/csap/health` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthPayload {
    pub healthy: bool,
    /// Error messages keyed by host. `None` when the event carries no `errors` object at all.
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    pub vm: Option<VmReport>,
}

impl HealthPayload {
    /// Whether the event reports a problem, which is decided by the presence of `errors`.
    pub fn has_errors(&self) -> bool {
        self.errors.is_some()
    }

    /// The status list recorded for `host`: its errors, or `["Success"]` when healthy.
    pub fn status_for(&self, host: &str) -> Vec<String> {
        match &self.errors {
            Some(errors) => errors.get(host).cloned().unwrap_or_default(),
            None => vec![crate::health::SUCCESS_STATUS.to_string()],
        }
    }
}

/// An event's `data`, decoded once according to its category.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// `data.summary` is a list of per-service summaries.
    ServiceSummaries(Vec<ServiceSummary>),
    /// `data.summary` is a single summary object.
    Summary(Map<String, Value>),
    Health(HealthPayload),
    Vm(VmReport),
    /// Raw samples or catalog of a `/csap/metrics` event.
    Metrics(Value),
    /// A plain text payload wrapped as `{csapText}`.
    Text(String),
    Opaque(Value),
}

impl EventPayload {
    pub fn decode(category: &str, data: &Value) -> Self {
        if category.starts_with("/csap/metrics") {
            return EventPayload::Metrics(data.clone());
        }
        if category.starts_with("/csap/health") {
            return EventPayload::Health(decode_health(data));
        }

        if let Some(summary) = data.get(fields::SUMMARY) {
            match summary {
                Value::Array(_) => {
                    if let Ok(summaries) = serde_json::from_value(summary.clone()) {
                        return EventPayload::ServiceSummaries(summaries);
                    }
                }
                Value::Object(map) => return EventPayload::Summary(map.clone()),
                _ => {}
            }
        }
        if let Some(vm) = data.get(fields::VM).and_then(decode_vm) {
            return EventPayload::Vm(vm);
        }
        if let Some(text) = data.get(fields::CSAP_TEXT).and_then(Value::as_str) {
            return EventPayload::Text(text.to_string());
        }

        EventPayload::Opaque(data.clone())
    }

    pub fn as_health(&self) -> Option<&HealthPayload> {
        match self {
            EventPayload::Health(health) => Some(health),
            _ => None,
        }
    }
}

fn decode_vm(vm: &Value) -> Option<VmReport> {
    vm.is_object()
        .then(|| serde_json::from_value(vm.clone()).ok())
        .flatten()
}

fn decode_health(data: &Value) -> HealthPayload {
    let errors = data
        .get(fields::ERRORS)
        .and_then(Value::as_object)
        .map(|errors| {
            errors
                .iter()
                .map(|(host, messages)| {
                    let messages = match messages {
                        Value::Array(items) => items
                            .iter()
                            .map(|m| match m {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect(),
                        Value::String(s) => vec![s.clone()],
                        _ => Vec::new(),
                    };
                    (host.clone(), messages)
                })
                .collect::<BTreeMap<_, _>>()
        });

    let healthy = data
        .get(fields::HEALTHY)
        .and_then(Value::as_bool)
        .unwrap_or(errors.is_none());

    HealthPayload {
        healthy,
        errors,
        vm: data.get(fields::VM).and_then(decode_vm),
    }
}
