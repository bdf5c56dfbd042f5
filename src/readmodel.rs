//! Dashboard read model.
//!
//! Pure consumer of the synced table: fetch everything, filter client
//! side, and compute display aggregates. The only write path here is the
//! one-shot export of a reshaped subset into a training table.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::models::ProfileRow;
use crate::sync::ProfileSink;

/// Client-side filters applied after the full fetch.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub campaign: Option<String>,
}

impl RowFilter {
    pub fn matches(&self, row: &ProfileRow) -> bool {
        if self.from.is_some() || self.to.is_some() {
            let updated = match DateTime::parse_from_rfc3339(&row.last_updated) {
                Ok(updated) => updated.with_timezone(&Utc),
                // Rows with an unparseable timestamp only survive an
                // unconstrained filter.
                Err(_) => return false,
            };
            if self.from.is_some_and(|from| updated < from) {
                return false;
            }
            if self.to.is_some_and(|to| updated > to) {
                return false;
            }
        }
        if let Some(campaign) = &self.campaign {
            if row.data.utm.utm_campaign.as_deref() != Some(campaign.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, rows: Vec<ProfileRow>) -> Vec<ProfileRow> {
        rows.into_iter().filter(|row| self.matches(row)).collect()
    }
}

/// Aggregates the dashboard renders.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardStats {
    pub total_visitors: usize,
    pub lead_count: usize,
    pub avg_time_sec: u64,
    pub avg_scroll_percent: u32,
    /// Traffic source label -> visitor count.
    pub sources: BTreeMap<String, usize>,
}

pub fn dashboard_stats(rows: &[ProfileRow]) -> DashboardStats {
    if rows.is_empty() {
        return DashboardStats::default();
    }
    let total_visitors = rows.len();
    let lead_count = rows.iter().filter(|row| row.data.is_lead).count();
    let total_time: u64 = rows.iter().map(|row| row.data.total_time_sec).sum();
    let total_scroll: u64 = rows
        .iter()
        .map(|row| row.data.max_scroll_depth_percent as u64)
        .sum();

    let mut sources = BTreeMap::new();
    for row in rows {
        let label = if row.data.traffic_source_type.is_empty() {
            "Unknown".to_string()
        } else {
            row.data.traffic_source_type.clone()
        };
        *sources.entry(label).or_insert(0) += 1;
    }

    DashboardStats {
        total_visitors,
        lead_count,
        avg_time_sec: (total_time as f64 / total_visitors as f64).round() as u64,
        avg_scroll_percent: (total_scroll as f64 / total_visitors as f64).round() as u32,
        sources,
    }
}

/// Fetches everything from the profile table and applies the filters.
pub async fn fetch_rows(
    sink: &dyn ProfileSink,
    table: &str,
    filter: &RowFilter,
) -> Result<Vec<ProfileRow>> {
    let rows = sink.select_all(table).await?;
    Ok(filter.apply(rows))
}

/// Flattens one profile row into the shape the training table expects.
fn training_row(row: &ProfileRow) -> serde_json::Value {
    let data = &row.data;
    json!({
        "user_id": row.user_id,
        "is_lead": data.is_lead,
        "total_time_sec": data.total_time_sec,
        "total_sessions_count": data.total_sessions_count,
        "visit_frequency_per_week": data.visit_frequency_per_week,
        "max_scroll_depth_percent": data.max_scroll_depth_percent,
        "rage_click_count": data.rage_click_count,
        "focus_time_percent": data.focus_time_percent,
        "mouse_velocity_px_sec": data.mouse_velocity_px_sec,
        "fields_filled_count": data.fields_filled_count,
        "traffic_source_type": data.traffic_source_type,
        "utm_campaign": data.utm.utm_campaign,
    })
}

/// One-shot batch transform: copies a filtered, reshaped subset of the
/// profile table into a second table for downstream model training.
/// Returns the number of exported rows.
pub async fn export_training_rows(
    sink: &dyn ProfileSink,
    source_table: &str,
    target_table: &str,
    filter: &RowFilter,
) -> Result<usize> {
    let rows = fetch_rows(sink, source_table, filter).await?;
    let reshaped: Vec<_> = rows.iter().map(training_row).collect();
    sink.insert_rows(target_table, &reshaped).await?;
    Ok(reshaped.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MemorySink;
    use chrono::TimeZone;

    fn row(user_id: &str, time_sec: u64, scroll: u32, lead: bool, updated: &str) -> ProfileRow {
        let mut row = ProfileRow {
            user_id: user_id.into(),
            last_updated: updated.into(),
            ..ProfileRow::default()
        };
        row.data.total_time_sec = time_sec;
        row.data.max_scroll_depth_percent = scroll;
        row.data.is_lead = lead;
        row.data.traffic_source_type = "Direct".into();
        row
    }

    #[test]
    fn stats_over_a_small_set() {
        let rows = vec![
            row("a", 120, 80, true, "2024-06-01T10:00:00Z"),
            row("b", 30, 20, false, "2024-06-02T10:00:00Z"),
            row("c", 60, 50, false, "2024-06-03T10:00:00Z"),
        ];
        let stats = dashboard_stats(&rows);
        assert_eq!(stats.total_visitors, 3);
        assert_eq!(stats.lead_count, 1);
        assert_eq!(stats.avg_time_sec, 70);
        assert_eq!(stats.avg_scroll_percent, 50);
        assert_eq!(stats.sources["Direct"], 3);
    }

    #[test]
    fn empty_set_yields_zeroes() {
        let stats = dashboard_stats(&[]);
        assert_eq!(stats.total_visitors, 0);
        assert_eq!(stats.avg_time_sec, 0);
    }

    #[test]
    fn date_and_campaign_filters() {
        let mut campaign_row = row("a", 10, 10, false, "2024-06-02T10:00:00Z");
        campaign_row.data.utm.utm_campaign = Some("spring".into());
        let rows = vec![
            campaign_row,
            row("b", 10, 10, false, "2024-05-01T10:00:00Z"),
            row("c", 10, 10, false, "2024-06-10T10:00:00Z"),
        ];

        let filter = RowFilter {
            from: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap()),
            campaign: None,
        };
        let in_range = filter.apply(rows.clone());
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].user_id, "a");

        let filter = RowFilter {
            campaign: Some("spring".into()),
            ..RowFilter::default()
        };
        let campaign_only = filter.apply(rows);
        assert_eq!(campaign_only.len(), 1);
        assert_eq!(campaign_only[0].user_id, "a");
    }

    #[tokio::test]
    async fn export_reshapes_into_second_table() {
        let sink = MemorySink::new();
        sink.seed(vec![
            row("a", 120, 80, true, "2024-06-01T10:00:00Z"),
            row("b", 30, 20, false, "2024-06-02T10:00:00Z"),
        ]);

        let exported =
            export_training_rows(&sink, "analytics", "training", &RowFilter::default())
                .await
                .unwrap();
        assert_eq!(exported, 2);

        let inserted = sink.inserted_rows();
        assert_eq!(inserted.len(), 2);
        let lead = inserted
            .iter()
            .find(|value| value["user_id"] == "a")
            .unwrap();
        assert_eq!(lead["is_lead"], true);
        assert_eq!(lead["total_time_sec"], 120);
    }
}
