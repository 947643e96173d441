//! Pure aggregation helpers over filter points.
//!
//! Nothing here reads the clock: every time-dependent function takes
//! `now` from the caller.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{FilterPoint, MEDIAN_FILTER, Pair};

/// Partitions points by pair.
///
/// Buckets appear in the order in which their pair first shows up in
/// the input; points keep their relative order inside a bucket.
pub fn group_by_pair(points: &[FilterPoint]) -> Vec<(Pair, Vec<FilterPoint>)> {
    let mut index: HashMap<&Pair, usize> = HashMap::new();
    let mut groups: Vec<(Pair, Vec<FilterPoint>)> = Vec::new();

    for point in points {
        let slot = *index.entry(&point.pair).or_insert_with(|| {
            groups.push((point.pair.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(point.clone());
    }

    groups
}

/// Values in input order.
pub fn values(points: &[FilterPoint]) -> Vec<f64> {
    points.iter().map(|p| p.value).collect()
}

/// One median point per pair, in first-appearance order.
///
/// Output points carry the zero time; the caller stamps them with the
/// evaluation time.
pub fn median(points: &[FilterPoint]) -> Vec<FilterPoint> {
    group_by_pair(points)
        .into_iter()
        .filter_map(|(pair, bucket)| {
            let value = median_value(values(&bucket))?;
            Some(FilterPoint {
                pair,
                value,
                time: DateTime::<Utc>::default(),
                name: MEDIAN_FILTER.to_string(),
            })
        })
        .collect()
}

fn median_value(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Drops every point strictly older than `now - tolerance_seconds`.
///
/// Returns the retained points (input order) and how many were removed.
/// A point exactly at the cutoff is retained.
pub fn remove_older_than(
    points: Vec<FilterPoint>,
    tolerance_seconds: i64,
    now: DateTime<Utc>,
) -> (Vec<FilterPoint>, usize) {
    let cutoff = TimeDelta::try_seconds(tolerance_seconds)
        .and_then(|tolerance| now.checked_sub_signed(tolerance))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let before = points.len();
    let retained: Vec<FilterPoint> = points.into_iter().filter(|p| p.time >= cutoff).collect();
    let removed = before - retained.len();

    (retained, removed)
}

/// Latest time across the points; the zero time for an empty input.
pub fn latest_timestamp(points: &[FilterPoint]) -> DateTime<Utc> {
    points.iter().map(|p| p.time).max().unwrap_or_default()
}
