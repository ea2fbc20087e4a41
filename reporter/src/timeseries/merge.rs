use serde_json::{Map, Value};
use trends_model::fields;
use trends_model::metrics::MetricsDataDocument;

use super::GraphData;

/// Attribute arrays whose length did not match `timeStamp` and were repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mismatches {
    pub repaired: usize,
    pub last_attribute: Option<String>,
}

impl Mismatches {
    pub fn is_empty(&self) -> bool {
        self.repaired == 0
    }

    fn record(&mut self, attribute: &str) {
        self.repaired += 1;
        self.last_attribute = Some(attribute.to_string());
    }

    pub fn log(&self, host: &str, collection_id: &str) {
        if !self.is_empty() {
            log::warn!(
                "Mismatched data for {host}, {collection_id}: {} arrays padded, last mismatch in {}",
                self.repaired,
                self.last_attribute.as_deref().unwrap_or_default()
            );
        }
    }
}

/// The arrays of `names` in `data`, each made as long as `data.timeStamp`.
///
/// Short or missing arrays are padded with 0 and long ones truncated. Every repair is counted
/// in `mismatches`.
pub fn aligned_series(
    data: &Map<String, Value>,
    names: &[String],
    mismatches: &mut Mismatches,
) -> Vec<(String, Vec<Value>)> {
    let expected = data
        .get(fields::TIME_STAMP)
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    names
        .iter()
        .map(|name| {
            let mut values = data
                .get(name)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if values.len() != expected {
                mismatches.record(name);
                values.resize(expected, Value::from(0));
            }
            (name.clone(), values)
        })
        .collect()
}

/// The result of merging the documents of a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    pub data: GraphData,
    pub mismatches: Mismatches,
    /// `createdOn.mongoDate` of the first document, the most recently updated one.
    pub latest_mongo_date: Option<i64>,
}

/// Append each document's arrays in the order the documents are given.
///
/// Documents come newest first and are not re-sorted, so a multi-day series runs from the latest
/// day back. Each document is aligned on its own `timeStamp` before it is appended, which keeps
/// every merged array as long as the merged `timeStamp`.
pub fn merge_documents(
    documents: impl IntoIterator<Item = MetricsDataDocument>,
    names: &[String],
    capacity: usize,
) -> Merged {
    let mut merged = Merged::default();

    for document in documents {
        if merged.latest_mongo_date.is_none() {
            merged.latest_mongo_date = document.mongo_date();
        }
        for (name, values) in aligned_series(&document.data, names, &mut merged.mismatches) {
            let series = merged
                .data
                .entry(name)
                .or_insert_with(|| Value::Array(Vec::with_capacity(capacity)));
            if let Value::Array(series) = series {
                series.extend(values);
            }
        }
    }

    merged
}

/// Put `latest` in front of the matching merged series. Attributes that were not merged are
/// ignored.
pub fn prepend(data: &mut GraphData, latest: Vec<(String, Vec<Value>)>) {
    for (name, mut values) in latest {
        if let Some(Value::Array(series)) = data.get_mut(&name) {
            values.append(series);
            *series = values;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn document(mongo_date: i64, data: Value) -> anyhow::Result<MetricsDataDocument> {
        Ok(serde_json::from_value(json!({
            "attributes": {"hostName": "h1", "id": "host_30"},
            "createdOn": {"date": "2024-03-05", "time": "10:00:00", "unixMs": mongo_date, "mongoDate": mongo_date},
            "data": data
        }))?)
    }

    #[test]
    fn appends_in_cursor_order() -> anyhow::Result<()> {
        let documents = vec![
            document(2, json!({"timeStamp": [3, 4], "usrCpu": [30, 40]}))?,
            document(1, json!({"timeStamp": [1, 2], "usrCpu": [10, 20]}))?,
        ];

        let merged = merge_documents(documents, &names(&["timeStamp", "usrCpu"]), 4);

        assert_eq!(json!([3, 4, 1, 2]), merged.data["timeStamp"]);
        assert_eq!(json!([30, 40, 10, 20]), merged.data["usrCpu"]);
        assert_eq!(Some(2), merged.latest_mongo_date);
        assert!(merged.mismatches.is_empty());
        Ok(())
    }

    #[test]
    fn repairs_every_array_to_the_time_stamps() -> anyhow::Result<()> {
        let documents = vec![
            document(2, json!({"timeStamp": [1, 2, 3], "usrCpu": [1], "sysCpu": [1, 2, 3, 4]}))?,
            document(1, json!({"timeStamp": [4, 5], "usrCpu": [4, 5], "sysCpu": [4, 5]}))?,
        ];

        let merged = merge_documents(
            documents,
            &names(&["timeStamp", "usrCpu", "sysCpu", "load"]),
            8,
        );

        for (name, series) in &merged.data {
            assert_eq!(5, series.as_array().map_or(0, Vec::len), "{name}");
        }
        assert_eq!(json!([1, 0, 0, 4, 5]), merged.data["usrCpu"]);
        assert_eq!(json!([0, 0, 0, 0, 0]), merged.data["load"]);
        assert_eq!(4, merged.mismatches.repaired);
        assert_eq!(Some("load".to_string()), merged.mismatches.last_attribute);
        Ok(())
    }

    #[test]
    fn latest_goes_first() {
        let mut data = GraphData::new();
        data.insert("timeStamp".to_string(), json!([2, 1]));
        prepend(
            &mut data,
            vec![
                ("timeStamp".to_string(), vec![json!(4), json!(3)]),
                ("unknown".to_string(), vec![json!(9)]),
            ],
        );
        assert_eq!(json!([4, 3, 2, 1]), data["timeStamp"]);
        assert!(data.get("unknown").is_none());
    }
}
