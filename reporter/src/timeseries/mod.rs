//! Display-ready series from the per-day metrics documents.
//!
//! [merge] stitches the documents of a window into one array per attribute, [padding] splices
//! the freshest fine-grained samples in front and [sample] reduces the result to a bounded number
//! of points.

pub mod merge;
pub mod padding;
pub mod sample;

use serde_json::{Map, Value};

pub use merge::{merge_documents, Merged, Mismatches};
pub use padding::{pad_latest, PaddingOutcome, PaddingRequest};
pub use sample::{bucket_sample, reduce_using_samples, Reduction};

/// Attribute name to its samples, one JSON array per attribute.
pub type GraphData = Map<String, Value>;

/// Apply `sample` to every series of `data`.
pub fn map_series(data: &mut GraphData, sample: impl Fn(&[Value]) -> Vec<Value>) {
    for series in data.values_mut() {
        if let Value::Array(values) = series {
            *values = sample(values);
        }
    }
}
