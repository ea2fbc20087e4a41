use serde_json::Value;

/// How the points of one downsampling interval become one output point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// The last point of the interval.
    PassThrough,
    /// The mean of the interval, rounded to 2 decimals.
    Average,
    /// The integer sum of the interval.
    Total,
}

/// Reduce `values` to at most `requested` points.
///
/// The interval is `round(len / requested)`, at least 1. A point is emitted at the end of every
/// interval and always for the final value, and the output never holds more than `requested`
/// points: whatever does not fit folds into the final one. A non-positive `requested` keeps every
/// point.
pub fn reduce_using_samples(values: &[Value], requested: i64, reduction: Reduction) -> Vec<Value> {
    let (interval, limit) = match usize::try_from(requested) {
        Ok(requested) if requested > 0 => (
            ((values.len() as f64 / requested as f64).round() as usize).max(1),
            requested,
        ),
        _ => (1, usize::MAX),
    };

    let mut reduced = Vec::with_capacity(values.len().min(limit));
    let mut sum = 0.0;
    let mut total = 0_i64;
    let mut count = 0_usize;

    for (index, current) in values.iter().enumerate() {
        let is_final = index + 1 == values.len();
        count += 1;
        match reduction {
            Reduction::Average => sum += current.as_f64().unwrap_or_default(),
            Reduction::Total => total += as_integer(current),
            Reduction::PassThrough => {}
        }

        let interval_done = count % interval == 0 && reduced.len() + 1 < limit;
        if !(interval_done || is_final) {
            continue;
        }

        reduced.push(match reduction {
            Reduction::Total => Value::from(total),
            Reduction::Average => Value::from(round_2(sum / count as f64)),
            Reduction::PassThrough => current.clone(),
        });
        sum = 0.0;
        total = 0;
        count = 0;
    }

    reduced
}

fn as_integer(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .unwrap_or_default()
}

fn round_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Keep `size` consecutive points, skip `spacing`, and repeat.
pub fn bucket_sample(values: &[Value], size: usize, spacing: usize) -> Vec<Value> {
    let mut sampled = Vec::new();
    let mut start = 0;
    let mut end = size as i64 - 1;
    let mut in_bucket = false;

    for (index, value) in values.iter().enumerate() {
        if index >= start && (index as i64) <= end {
            in_bucket = true;
            sampled.push(value.clone());
        } else if in_bucket {
            start = index + spacing;
            end = (index + spacing + size) as i64 - 1;
            in_bucket = false;
        }
    }

    sampled
}
