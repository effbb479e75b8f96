use serde::{Deserialize, Serialize};

use crate::phase::WorkflowPhase;

/// An externally-sourced issue and its current workflow phase.
///
/// `id` comes from the originating tracker and is never generated locally.
/// `source_project` and `source_data` are opaque to the state machine;
/// refreshing them must never touch `phase`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: String,
    pub source_project: String,
    pub source_data: serde_json::Value,
    pub phase: WorkflowPhase,
    pub created_at: String,
    pub updated_at: String,
}

impl Issue {
    /// Best-effort human title extracted from the opaque source payload.
    pub fn title(&self) -> &str {
        self.source_data
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.id)
    }
}

/// RFC 3339 timestamp with fixed six-digit subseconds.
///
/// The well-known formatter trims trailing subsecond zeros, which breaks
/// lexicographic TEXT ordering within a second ("..:20Z" sorts after
/// "..:20.5Z"). `updated_at` ordering in the store relies on these strings
/// comparing in time order.
pub fn now_rfc3339() -> String {
    format_rfc3339(time::OffsetDateTime::now_utc())
}

fn format_rfc3339(t: time::OffsetDateTime) -> String {
    let format = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    t.format(&format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_falls_back_to_id() {
        let issue = Issue {
            id: "42".into(),
            source_project: "web".into(),
            source_data: serde_json::json!({}),
            phase: WorkflowPhase::Pending,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        assert_eq!(issue.title(), "42");
    }

    #[test]
    fn title_reads_source_data() {
        let issue = Issue {
            id: "42".into(),
            source_project: "web".into(),
            source_data: serde_json::json!({"title": "TypeError in checkout"}),
            phase: WorkflowPhase::Pending,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        assert_eq!(issue.title(), "TypeError in checkout");
    }

    #[test]
    fn now_rfc3339_parses_back() {
        let ts = now_rfc3339();
        assert!(time::OffsetDateTime::parse(
            &ts,
            &time::format_description::well_known::Rfc3339
        )
        .is_ok());
    }

    #[test]
    fn timestamps_sort_lexicographically_within_a_second() {
        use time::macros::datetime;
        let on_the_second = format_rfc3339(datetime!(2023-11-14 22:13:20 UTC));
        let half_past = format_rfc3339(datetime!(2023-11-14 22:13:20.5 UTC));
        assert_eq!(on_the_second, "2023-11-14T22:13:20.000000Z");
        assert_eq!(half_past, "2023-11-14T22:13:20.500000Z");
        assert!(on_the_second < half_past);
    }
}
