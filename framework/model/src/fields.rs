//! Document field names.
//!
//! Every pipeline, filter and update refers to fields through these constants so that the stage
//! builders cannot drift apart.

pub const ID: &str = "_id";
pub const APP_ID: &str = "appId";
pub const PROJECT: &str = "project";
pub const LIFECYCLE: &str = "lifecycle";
pub const CATEGORY: &str = "category";
pub const HOST: &str = "host";
pub const SUMMARY: &str = "summary";
pub const COUNTER: &str = "counter";
pub const EXPIRES_AT: &str = "expiresAt";
pub const DATA_KEY: &str = "dataKey";
pub const REVISION: &str = "revision";

pub const CREATED_ON: &str = "createdOn";
pub const DATE: &str = "date";
pub const TIME: &str = "time";
pub const UNIX_MS: &str = "unixMs";
pub const MONGO_DATE: &str = "mongoDate";
pub const LAST_UPDATED_ON: &str = "lastUpdatedOn";
pub const CREATED_ON_DATE: &str = "createdOn.date";
pub const CREATED_ON_MONGO_DATE: &str = "createdOn.mongoDate";
pub const CREATED_ON_LAST_UPDATED: &str = "createdOn.lastUpdatedOn";

pub const DATA: &str = "data";
pub const DATA_SUMMARY: &str = "data.summary";
pub const SERVICE_NAME: &str = "serviceName";
pub const NUMBER_OF_SAMPLES: &str = "numberOfSamples";
pub const COUNT_CSAP_MEAN: &str = "countCsapMean";
pub const TOTAL: &str = "total";
pub const TOP_CPU: &str = "topCpu";
pub const CSAP_TEXT: &str = "csapText";

pub const HEALTHY: &str = "Healthy";
pub const ERRORS: &str = "errors";
pub const VM: &str = "vm";
pub const LOADBALANCER_URL: &str = "loadbalancerUrl";
pub const HEALTH_STATUS: &str = "healthStatus";
pub const STATUS: &str = "status";
pub const UNHEALTHY_EVENT_COUNT: &str = "UnHealthyEventCount";
pub const UNHEALTHY_COUNT: &str = "UnHealthyCount";

pub const ATTRIBUTES: &str = "attributes";
pub const HOST_NAME: &str = "hostName";
pub const COLLECTION_ID: &str = "id";
pub const ATTRIBUTES_HOST_NAME: &str = "attributes.hostName";
pub const ATTRIBUTES_ID: &str = "attributes.id";
pub const GRAPHS: &str = "graphs";
pub const SERVICES_AVAILABLE: &str = "servicesAvailable";
pub const SERVICES_REQUESTED: &str = "servicesRequested";
pub const TIME_STAMP: &str = "timeStamp";
pub const NUM_DAYS_AVAILABLE: &str = "numDaysAvailable";
pub const PACKAGES: &str = "packages";
pub const METRICS: &str = "metrics";

/// Prefix `field` with `$`, turning a field name into a field reference inside an expression.
pub fn reference(field: &str) -> String {
    format!("${field}")
}

/// Join a parent path and a field name with a `.`.
pub fn path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

/// Path of a field inside a group's compound `_id`.
pub fn group_key(field: &str) -> String {
    path(ID, field)
}
