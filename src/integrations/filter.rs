//! Activity filter policy: only distance-bearing activities are worth syncing.

use serde_json::Value;

/// Keep activities whose `distance` is a number greater than zero, preserving order.
pub fn retain_distance_bearing(activities: Vec<Value>) -> Vec<Value> {
    activities.into_iter().filter(has_positive_distance).collect()
}

fn has_positive_distance(activity: &Value) -> bool {
    activity
        .get("distance")
        .and_then(Value::as_f64)
        .is_some_and(|distance| distance > 0.0)
}
