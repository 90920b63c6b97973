//! Route handlers, grouped by resource.

pub mod agents;
pub mod alerts;
pub mod cost;
pub mod events;
pub mod health;
pub mod keys;
pub mod metrics;
pub mod pricing;
pub mod projects;
pub mod tasks;

use chrono::{DateTime, Utc};

use loophive_core::parse_ts;

/// Parse an optional `since`/`until` query value leniently.
pub(crate) fn parse_time_param(value: Option<&str>) -> Option<DateTime<Utc>> {
    value.and_then(parse_ts)
}

/// Parse a comma-separated filter value into typed items, dropping
/// anything unparseable (mirrors a tolerant SQL `IN` list).
pub(crate) fn parse_csv<T: std::str::FromStr>(value: Option<&str>) -> Option<Vec<T>> {
    let items: Vec<T> = value?
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Clamp a caller-supplied page limit.
pub(crate) fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, 200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loophive_core::EventType;

    #[test]
    fn test_parse_csv_event_types() {
        let types: Option<Vec<EventType>> = parse_csv(Some("task_started, task_failed"));
        assert_eq!(
            types.unwrap(),
            vec![EventType::TaskStarted, EventType::TaskFailed]
        );
        let none: Option<Vec<EventType>> = parse_csv(Some("bogus"));
        assert!(none.is_none());
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 50), 50);
        assert_eq!(clamp_limit(Some(0), 50), 1);
        assert_eq!(clamp_limit(Some(1000), 50), 200);
        assert_eq!(clamp_limit(Some(25), 50), 25);
    }
}
