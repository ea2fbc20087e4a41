//! Attribute summary pipelines, and the lookups that decide which attributes they aggregate.

use serde_json::Value;
use trends_model::category;
use trends_model::fields::{self, group_key, path};
use trends_model::query::non_blank;

use super::{Accumulator, Expr, FindQuery, Filter, Group, Pipeline, Projection, Stage};
use crate::clock::Clock;
use crate::normalize;

/// Service whose attributes describe a summary report when no service is requested.
pub const DEFAULT_ATTRIBUTES_SERVICE: &str = "csap-agent";

/// Scope of a summary or detail report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryQuery {
    pub app_id: Option<String>,
    pub project: Option<String>,
    pub lifecycle: Option<String>,
    pub category: String,
    pub host: Option<String>,
    pub service: Option<String>,
    pub num_days: u32,
    pub date_offset: i32,
}

impl SummaryQuery {
    fn filter(&self, clock: &Clock) -> Filter {
        let mut filter = normalize::scope_filter(
            self.app_id.as_deref(),
            self.project.as_deref(),
            self.lifecycle.as_deref(),
            Some(self.category.as_str()),
        );
        if let Some(host) = non_blank(self.host.as_deref()) {
            filter = filter.and(Filter::eq(fields::HOST, host));
        }
        filter.and(normalize::date_window(clock, self.num_days, self.date_offset))
    }
}

/// Group on `_id` and accumulate each attribute key: `*Avg` keys are averaged, the rest summed.
fn accumulate_keys(
    mut group: Group,
    mut projection: Projection,
    source: &str,
    keys: &[String],
) -> (Group, Projection) {
    for key in keys {
        if key.eq_ignore_ascii_case(fields::SERVICE_NAME) {
            continue;
        }
        let value = Expr::field(path(source, key));
        let accumulator = if key.ends_with("Avg") {
            Accumulator::Avg(value)
        } else {
            Accumulator::Sum(value)
        };
        group = group.accumulate(key, accumulator);
        projection = projection.include(key);
    }
    (group, projection)
}

/// Per service totals over the window. With `per_host`, one row per service and host.
pub fn service_summary(
    query: &SummaryQuery,
    clock: &Clock,
    keys: &[String],
    per_host: bool,
) -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline
        .push(Stage::Match(query.filter(clock)))
        .push(Stage::Unwind(fields::DATA_SUMMARY.to_string()));
    if let Some(service) = non_blank(query.service.as_deref()) {
        pipeline.push(Stage::Match(Filter::eq(
            path(fields::DATA_SUMMARY, fields::SERVICE_NAME),
            service,
        )));
    }

    let mut group = Group::new()
        .key(fields::SERVICE_NAME, &path(fields::DATA_SUMMARY, fields::SERVICE_NAME))
        .key(fields::APP_ID, fields::APP_ID)
        .key(fields::PROJECT, fields::PROJECT)
        .key(fields::LIFECYCLE, fields::LIFECYCLE);
    let mut projection = Projection::new()
        .rename(fields::APP_ID, &group_key(fields::APP_ID))
        .rename(fields::LIFECYCLE, &group_key(fields::LIFECYCLE))
        .rename(fields::PROJECT, &group_key(fields::PROJECT))
        .rename(fields::SERVICE_NAME, &group_key(fields::SERVICE_NAME));
    if per_host {
        group = group.key(fields::HOST, fields::HOST);
        projection = projection.rename(fields::HOST, &group_key(fields::HOST));
    }

    let (group, projection) = accumulate_keys(group, projection, fields::DATA_SUMMARY, keys);
    pipeline
        .push(Stage::Group(group))
        .push(Stage::Project(projection.without_id()));

    log::debug!("Summary pipeline: {}", pipeline.to_json());
    pipeline
}

/// Per host totals of the host daily reports over the window.
pub fn host_summary(query: &SummaryQuery, clock: &Clock, keys: &[String]) -> Pipeline {
    let group = [fields::APP_ID, fields::PROJECT, fields::LIFECYCLE, fields::HOST]
        .into_iter()
        .fold(Group::new(), |group, key| group.key(key, key));
    let projection = Projection::new()
        .rename(fields::HOST_NAME, &group_key(fields::HOST))
        .rename(fields::APP_ID, &group_key(fields::APP_ID))
        .rename(fields::LIFECYCLE, &group_key(fields::LIFECYCLE))
        .rename(fields::PROJECT, &group_key(fields::PROJECT));
    let (group, projection) = accumulate_keys(group, projection, fields::DATA_SUMMARY, keys);

    let mut pipeline = Pipeline::new();
    pipeline
        .push(Stage::Match(query.filter(clock)))
        .push(Stage::Group(group))
        .push(Stage::Project(projection.without_id()));
    pipeline
}

/// The latest uploaded report of a category, holding `service` when one is given.
pub fn latest_report(query: &SummaryQuery, service: Option<&str>) -> FindQuery {
    let mut filter = normalize::scope_filter(
        query.app_id.as_deref(),
        query.project.as_deref(),
        query.lifecycle.as_deref(),
        Some(query.category.as_str()),
    );
    if let Some(service) = non_blank(service) {
        filter = filter.and(Filter::elem_match(
            fields::DATA_SUMMARY,
            Filter::eq(fields::SERVICE_NAME, service),
        ));
    }
    FindQuery::new(filter)
        .sort(fields::CREATED_ON_LAST_UPDATED, -1)
        .limit(1)
}

/// The attribute keys of an uploaded report.
///
/// A summary list yields the keys of the entry for `service`, or of its first entry when no
/// service is given. A single summary object yields its own keys.
pub fn report_keys(document: &Value, service: Option<&str>) -> Option<Vec<String>> {
    let summary = document.get(fields::DATA)?.get(fields::SUMMARY)?;
    let entry = match summary {
        Value::Array(entries) => match non_blank(service) {
            None => entries.first()?,
            Some(service) => entries.iter().find(|entry| {
                entry
                    .get(fields::SERVICE_NAME)
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.eq_ignore_ascii_case(service))
            })?,
        },
        Value::Object(_) => summary,
        _ => return None,
    };
    entry
        .as_object()
        .map(|entry| entry.keys().cloned().collect())
}

/// Services on `host` today, busiest first by `topCpu`.
pub fn top_services(host: &str, clock: &Clock) -> Pipeline {
    let filter = Filter::eq(fields::HOST, host)
        .and(Filter::eq(fields::CREATED_ON_DATE, clock.date_string(0)))
        .and(Filter::eq(fields::CATEGORY, category::OS_PROCESS_DAILY_REPORT));

    let mut pipeline = Pipeline::new();
    pipeline
        .push(Stage::Match(filter))
        .push(Stage::Unwind(fields::DATA_SUMMARY.to_string()))
        .push(Stage::sort_by(&path(fields::DATA_SUMMARY, fields::TOP_CPU), -1))
        .push(Stage::Group(
            Group::new()
                .key(fields::ID, fields::ID)
                .push(TOP_SERVICES, &path(fields::DATA_SUMMARY, fields::SERVICE_NAME)),
        ));
    pipeline
}

/// Output field of [top_services].
pub const TOP_SERVICES: &str = "topServices";

/// The oldest document matching `filter`, used to count the days of data available.
pub fn earliest_document(filter: Filter) -> FindQuery {
    FindQuery::new(filter)
        .sort(fields::CREATED_ON_DATE, 1)
        .limit(1)
        .project(&[fields::CREATED_ON])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn clock() -> Clock {
        Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
    }

    #[test]
    fn average_keys_use_avg() {
        let query = SummaryQuery {
            category: category::OS_PROCESS_DAILY_REPORT.to_string(),
            service: Some("billing".to_string()),
            num_days: 1,
            ..Default::default()
        };
        let keys = ["serviceName", "topCpu", "threadCountAvg"].map(String::from);

        let rendered = service_summary(&query, &clock(), &keys, false).to_json();

        assert_eq!(json!({"$match": {"data.summary.serviceName": "billing"}}), rendered[2]);
        let group = &rendered[3]["$group"];
        assert_eq!(json!({"$sum": "$data.summary.topCpu"}), group["topCpu"]);
        assert_eq!(json!({"$avg": "$data.summary.threadCountAvg"}), group["threadCountAvg"]);
        assert!(group.get("serviceName").is_none());
        assert_eq!(json!("$_id.serviceName"), rendered[4]["$project"]["serviceName"]);
    }

    #[test]
    fn keys_from_list_or_object() {
        let listed = json!({"data": {"summary": [
            {"serviceName": "csap-agent", "topCpu": 1},
            {"serviceName": "billing", "topCpu": 2, "threadCount": 3}
        ]}});
        assert_eq!(
            Some(vec!["serviceName".to_string(), "topCpu".to_string()]),
            report_keys(&listed, None)
        );
        assert_eq!(
            Some(vec![
                "serviceName".to_string(),
                "topCpu".to_string(),
                "threadCount".to_string()
            ]),
            report_keys(&listed, Some("Billing"))
        );
        assert_eq!(None, report_keys(&listed, Some("search")));

        let single = json!({"data": {"summary": {"totalUsrCpu": 1, "numberOfSamples": 2}}});
        assert_eq!(
            Some(vec!["totalUsrCpu".to_string(), "numberOfSamples".to_string()]),
            report_keys(&single, None)
        );
    }

    #[test]
    fn host_summary_renames_host() {
        let query = SummaryQuery {
            category: category::HOST_DAILY_REPORT.to_string(),
            num_days: 1,
            ..Default::default()
        };
        let rendered = host_summary(&query, &clock(), &["cpuAvg".to_string()]).to_json();
        assert_eq!(json!("$_id.host"), rendered[2]["$project"]["hostName"]);
        assert_eq!(json!({"$avg": "$data.summary.cpuAvg"}), rendered[1]["$group"]["cpuAvg"]);
    }
}
