//! Formatted output helpers for console commands.
//!
//! Provides the container table, event feed and counters, plus
//! human-readable age formatting.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use labnet_common::error::LabError;
use labnet_runtime::coordinator::ControlPlaneStats;
use labnet_runtime::events::LabEvent;
use labnet_runtime::registry::ContainerRecord;

/// Formats a duration in seconds as a short age ("45s", "12m", "3h", "2d").
#[must_use]
pub fn format_age(seconds: i64) -> String {
    const MINUTE: i64 = 60;
    const HOUR: i64 = MINUTE * 60;
    const DAY: i64 = HOUR * 24;

    let seconds = seconds.max(0);
    if seconds >= DAY {
        format!("{}d", seconds / DAY)
    } else if seconds >= HOUR {
        format!("{}h", seconds / HOUR)
    } else if seconds >= MINUTE {
        format!("{}m", seconds / MINUTE)
    } else {
        format!("{seconds}s")
    }
}

/// Renders tracked containers as a table.
#[must_use]
pub fn format_records(records: &[ContainerRecord], now: DateTime<Utc>) -> String {
    if records.is_empty() {
        return "No containers tracked.".to_string();
    }
    let mut out = format!(
        "{:<14} {:<28} {:<15} {:<12} {:<6} {}",
        "CONTAINER ID", "NAME", "ADDRESS", "STATUS", "AGE", "IMAGE"
    );
    for r in records {
        let _ = write!(
            out,
            "\n{:<14} {:<28} {:<15} {:<12} {:<6} {}",
            r.id.short(),
            r.name,
            r.address.to_string(),
            r.status.to_string(),
            format_age((now - r.created_at).num_seconds()),
            r.image
        );
    }
    out
}

/// Renders the event feed, oldest first.
#[must_use]
pub fn format_events(events: &[LabEvent]) -> String {
    if events.is_empty() {
        return "No events yet.".to_string();
    }
    events
        .iter()
        .map(|e| {
            format!(
                "{} {:<10} {}",
                e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                e.kind.to_string(),
                e.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the counters.
#[must_use]
pub fn format_stats(stats: &ControlPlaneStats) -> String {
    format!(
        "containers: {}\naddresses:  {}/{} assigned",
        stats.tracked, stats.addresses_assigned, stats.address_capacity
    )
}

/// Renders a successful deployment.
#[must_use]
pub fn format_deployed(record: &ContainerRecord) -> String {
    let mut out = format!(
        "Deployed {} ({}) at {}",
        record.name,
        record.id.short(),
        record.address
    );
    if let Some(url) = &record.access_url {
        let _ = write!(out, "\n  {url}");
    }
    out
}

/// Renders an error with its category.
#[must_use]
pub fn format_error(error: &LabError) -> String {
    format!("error [{}]: {error}", error.category())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use chrono::TimeZone;
    use labnet_common::types::{ContainerId, ContainerStatus};
    use labnet_runtime::events::EventKind;

    use super::*;

    fn record() -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::new("4f2a9c0e1b7d5a3c8e6f0a1b2c3d4e5f"),
            name: "web".into(),
            image: "nginx:alpine".into(),
            address: Ipv4Addr::new(172, 20, 0, 2),
            network: "lab-network".into(),
            status: ContainerStatus::Running,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            exposed_ports: vec!["80/tcp".into()],
            access_url: Some("http://172.20.0.2".into()),
        }
    }

    #[test]
    fn format_age_picks_largest_unit() {
        assert_eq!(format_age(45), "45s");
        assert_eq!(format_age(12 * 60 + 5), "12m");
        assert_eq!(format_age(3 * 3600), "3h");
        assert_eq!(format_age(2 * 86_400 + 1), "2d");
        assert_eq!(format_age(-5), "0s");
    }

    #[test]
    fn records_table_uses_short_ids() {
        let now = Utc.timestamp_opt(1_700_000_090, 0).unwrap();
        let table = format_records(&[record()], now);
        let row = table.lines().nth(1).unwrap();
        assert!(row.starts_with("4f2a9c0e1b7d "));
        assert!(row.contains("172.20.0.2"));
        assert!(row.contains("1m"));
    }

    #[test]
    fn empty_tables_say_so() {
        assert_eq!(format_records(&[], Utc::now()), "No containers tracked.");
        assert_eq!(format_events(&[]), "No events yet.");
    }

    #[test]
    fn events_show_kind() {
        let event = LabEvent {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            kind: EventKind::Deployment,
            message: "Deployed web".into(),
        };
        assert_eq!(
            format_events(&[event]),
            "2023-11-14 22:13:20 deployment Deployed web"
        );
    }

    #[test]
    fn deployed_includes_access_url() {
        let text = format_deployed(&record());
        assert!(text.contains("http://172.20.0.2"));
    }

    #[test]
    fn errors_show_category() {
        let err = LabError::PoolExhausted { capacity: 5 };
        assert!(format_error(&err).starts_with("error [exhausted]"));
    }
}
