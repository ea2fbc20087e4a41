//! Turns optional request parameters into canonical store filters.
//!
//! A blank parameter adds no clause: it widens the query rather than matching nothing.

use chrono::{DateTime, Duration, Utc};
use trends_model::category;
use trends_model::fields;
use trends_model::query::{non_blank, ServiceFilter, TrendingQuery};

use crate::clock::Clock;
use crate::pipeline::filter::{exclusive, inclusive, Filter};

/// Equality clauses for whichever of `appId`, `project`, `lifecycle` and `category` are given.
pub fn scope_filter(
    app_id: Option<&str>,
    project: Option<&str>,
    lifecycle: Option<&str>,
    category: Option<&str>,
) -> Filter {
    [
        (fields::APP_ID, app_id),
        (fields::PROJECT, project),
        (fields::LIFECYCLE, lifecycle),
        (fields::CATEGORY, category),
    ]
    .into_iter()
    .filter_map(|(field, value)| non_blank(value).map(|value| Filter::eq(field, value)))
    .fold(Filter::all(), Filter::and)
}

/// Days `(today - offset - days, today - offset]` on `createdOn.date`.
pub fn date_window(clock: &Clock, day_count: u32, date_offset: i32) -> Filter {
    let offset = i64::from(date_offset);
    Filter::range(
        fields::CREATED_ON_DATE,
        Some(exclusive(clock.date_string(offset + i64::from(day_count)))),
        Some(inclusive(clock.date_string(offset))),
    )
}

/// Documents whose summary list holds at least one of the requested services.
pub fn service_filter(services: &ServiceFilter) -> Option<Filter> {
    if services.is_empty() {
        return None;
    }
    Some(Filter::elem_match(
        fields::DATA_SUMMARY,
        Filter::any_of(fields::SERVICE_NAME, services.names().iter().cloned()),
    ))
}

/// Restrict to an allow-list of hosts. An empty list restricts nothing.
pub fn hosts_filter(hosts: &[String]) -> Option<Filter> {
    if hosts.is_empty() {
        return None;
    }
    Some(Filter::is_in(
        fields::HOST,
        hosts.iter().cloned().map(Into::into).collect(),
    ))
}

/// Scope, category and date window of a trending query, without the service clause.
pub fn scoped_window(query: &TrendingQuery, clock: &Clock) -> Filter {
    scope_filter(
        query.app_id.as_deref(),
        query.project.as_deref(),
        query.lifecycle.as_deref(),
        Some(query.category.as_str()),
    )
    .and(date_window(clock, query.day_count(), query.date_offset))
}

/// The complete match of a trending query: scope, category, date window and services.
pub fn trending_filter(query: &TrendingQuery, clock: &Clock) -> Filter {
    let filter = scoped_window(query, clock);

    match service_filter(&query.services) {
        Some(services) if category::report_path(&query.category) == fields::DATA_SUMMARY => {
            filter.and(services)
        }
        _ => filter,
    }
}

/// The key of a one-per-day document: the category, plus host and `createdOn.date` unless the
/// category is keyed without them.
pub fn daily_key(category: &str, host: &str, date: &str) -> Filter {
    let mut filter = Filter::eq(fields::CATEGORY, category);
    if category::upsert_keyed_by_host(category) {
        filter = filter.and(Filter::eq(fields::HOST, host));
    }
    if category::upsert_keyed_by_date(category) {
        filter = filter.and(Filter::eq(fields::CREATED_ON_DATE, date));
    }
    filter
}

/// The `lastUpdatedOn` range of a metrics graph request, both ends inclusive.
///
/// Non-positive offsets count back from now. Positive offsets select whole days: either the
/// `num_days` days ending `offset` days ago, or with `show_days_from` the `num_days` days
/// starting `offset` days ago.
pub fn metrics_window(
    now: DateTime<Utc>,
    num_days: u32,
    offset: i32,
    show_days_from: bool,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let days = i64::from(num_days);
    let offset = i64::from(offset);

    if offset <= 0 {
        return (now - Duration::days(days + offset), now - Duration::days(offset));
    }

    let (from, to) = if show_days_from {
        (offset, offset - days)
    } else {
        (offset + days - 1, offset - 1)
    };
    (
        midnight(now - Duration::days(from)),
        midnight(now - Duration::days(to)),
    )
}

fn midnight(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|m| m.and_utc())
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn clock() -> Clock {
        Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
    }

    #[test]
    fn blank_fields_are_wildcards() {
        let filter = scope_filter(Some("app"), Some("  "), None, Some("/csap/reports/health"));
        assert_eq!(
            json!({"$and": [{"appId": "app"}, {"category": "/csap/reports/health"}]}),
            filter.to_json()
        );
        assert_eq!(Filter::all(), scope_filter(None, None, Some(""), None));
    }

    #[test]
    fn window_covers_previous_days() {
        assert_eq!(
            json!({"createdOn.date": {"$gt": "2024-03-03", "$lte": "2024-03-05"}}),
            date_window(&clock(), 2, 0).to_json()
        );
        assert_eq!(
            json!({"createdOn.date": {"$gt": "2024-02-27", "$lte": "2024-03-04"}}),
            date_window(&clock(), 6, 1).to_json()
        );
    }

    #[test]
    fn services_only_for_summary_categories() {
        let mut query = TrendingQuery::new("/csap/reports/health");
        query.services = ServiceFilter::parse(Some("billing"));
        let rendered = trending_filter(&query, &clock()).to_json().to_string();
        assert!(!rendered.contains("$elemMatch"));

        query.category = "/csap/reports/os-process/daily".to_string();
        let rendered = trending_filter(&query, &clock()).to_json().to_string();
        assert!(rendered.contains("$elemMatch"));
    }

    #[test]
    fn host_allow_list() {
        assert_eq!(None, hosts_filter(&[]));
        assert_eq!(
            Some(json!({"host": {"$in": ["h1", "h2"]}})),
            hosts_filter(&["h1".to_string(), "h2".to_string()]).map(|f| f.to_json())
        );
    }

    #[test]
    fn daily_keys_per_category() {
        assert_eq!(
            json!({"$and": [
                {"category": "/csap/reports/health"},
                {"host": "h1"},
                {"createdOn.date": "2024-03-05"}
            ]}),
            daily_key("/csap/reports/health", "h1", "2024-03-05").to_json()
        );
        assert_eq!(
            json!({"$and": [
                {"category": "/csap/reports/global/daily"},
                {"createdOn.date": "2024-03-05"}
            ]}),
            daily_key("/csap/reports/global/daily", "h1", "2024-03-05").to_json()
        );
        assert_eq!(
            json!({"category": "/csap/ui/access/someone"}),
            daily_key("/csap/ui/access/someone", "h1", "2024-03-05").to_json()
        );
    }

    #[test]
    fn metrics_windows() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();

        let (from, to) = metrics_window(now, 1, 0, false);
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(), from);
        assert_eq!(now, to);

        let (from, to) = metrics_window(now, 2, 3, true);
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(), from);
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(), to);

        let (from, to) = metrics_window(now, 2, 3, false);
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), from);
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap(), to);
    }
}
