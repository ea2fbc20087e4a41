use crate::fields;

pub const HEALTH_REPORT: &str = "/csap/reports/health";
pub const HOST_DAILY_REPORT: &str = "/csap/reports/host/daily";
pub const OS_PROCESS_DAILY_REPORT: &str = "/csap/reports/os-process/daily";
pub const GLOBAL_DAILY_REPORT: &str = "/csap/reports/global/daily";
pub const MODEL_SUMMARY: &str = "/csap/reports/model/summary";
pub const EXCEPTION_PAYLOAD: &str = "/csap/exception/payload";
pub const METRICS_ATTRIBUTES: &str = "/csap/metrics/host/attributes";
pub const METRICS_DATA: &str = "/csap/metrics/host/data";
pub const LOW_MEMORY: &str = "/csap/system/memory/low";

const SETTINGS_PREFIX: &str = "/csap/settings";
const METRICS_PREFIX: &str = "/csap/metrics";
const HEALTH_PREFIX: &str = "/csap/health";
const REPORTS_PREFIX: &str = "/csap/reports";
const UI_ACCESS_PREFIX: &str = "/csap/ui/access/";
const SERVICE_JOB_PREFIX: &str = "/csap/system/service/";
const SERVICE_JOB_SUFFIX: &str = "/job";

/// Where an ingested event is written, decided once from its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRoute {
    /// Metrics catalog: the payload goes to the attributes collection, the event is inserted.
    MetricsAttributes,
    /// Metrics samples: the payload goes to the data collection, the event is upserted.
    MetricsData,
    /// A `/csap/metrics` category that is neither attributes nor data.
    MetricsUnknown,
    /// Upserted, then fed to the health state machine.
    Health,
    /// At most one document per category/host/day; repeats bump `counter`.
    Upsert,
    /// Always a new document.
    Insert,
}

impl CategoryRoute {
    pub fn for_category(category: &str) -> Self {
        if category.starts_with(METRICS_PREFIX) {
            if category.ends_with("attributes") {
                CategoryRoute::MetricsAttributes
            } else if category.ends_with("data") {
                CategoryRoute::MetricsData
            } else {
                CategoryRoute::MetricsUnknown
            }
        } else if category.starts_with(HEALTH_PREFIX) {
            CategoryRoute::Health
        } else if category.eq_ignore_ascii_case(LOW_MEMORY)
            || is_user_access(category)
            || category.starts_with(REPORTS_PREFIX)
            || is_service_job(category)
        {
            CategoryRoute::Upsert
        } else {
            CategoryRoute::Insert
        }
    }
}

/// Per-user access events, excluding the session `begin`/`end` markers.
fn is_user_access(category: &str) -> bool {
    category.starts_with(UI_ACCESS_PREFIX)
        && !category.starts_with("/csap/ui/access/begin")
        && !category.starts_with("/csap/ui/access/end")
}

/// `/csap/system/service/<name>/job`
fn is_service_job(category: &str) -> bool {
    category
        .strip_prefix(SERVICE_JOB_PREFIX)
        .and_then(|rest| rest.strip_suffix(SERVICE_JOB_SUFFIX))
        .is_some_and(|name| !name.is_empty())
}

/// Settings documents are kept forever.
pub fn never_expires(category: &str) -> bool {
    category.starts_with(SETTINGS_PREFIX)
}

/// Whether the upsert key of this category includes the host.
pub fn upsert_keyed_by_host(category: &str) -> bool {
    !(category.eq_ignore_ascii_case(GLOBAL_DAILY_REPORT) || category.starts_with(UI_ACCESS_PREFIX))
}

/// Whether the upsert key of this category includes the creation date.
pub fn upsert_keyed_by_date(category: &str) -> bool {
    !category.starts_with(UI_ACCESS_PREFIX)
}

/// The path holding the metrics of a report category.
///
/// Health reports keep their counters directly under `data`; every other report keeps a list of
/// per-service summaries under `data.summary`.
pub fn report_path(category: &str) -> &'static str {
    if category.eq_ignore_ascii_case(HEALTH_REPORT) {
        fields::DATA
    } else {
        fields::DATA_SUMMARY
    }
}
