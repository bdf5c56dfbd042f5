use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{DeviceFacts, OrderedSet, UtmParams};

/// The `data` JSON blob of an upstream row: derived metrics plus the
/// device/UTM context frozen at page load. Field names are the wire
/// contract and must stay stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileData {
    #[serde(flatten)]
    pub device: DeviceFacts,
    #[serde(flatten)]
    pub utm: UtmParams,

    pub ym_client_id: Option<String>,
    pub yandex_goals: String,
    pub is_lead: bool,
    pub traffic_source_type: String,
    pub entry_url: String,
    pub page_title: String,

    pub total_time_sec: u64,
    pub total_sessions_count: u64,
    pub days_since_first_visit: i64,
    pub days_since_last_visit: i64,
    pub visit_frequency_per_week: f64,

    pub rage_click_count: u32,
    pub tab_switch_count: u32,
    pub focus_time_percent: u32,
    pub hover_hesitation_sec: u64,
    pub mouse_velocity_px_sec: u64,
    pub text_selection_count: u32,
    pub text_copied_count: u32,
    pub last_interaction_element: Option<String>,
    pub max_scroll_depth_percent: u32,
    pub scroll_direction_changes: u32,
    /// Always 0 upstream; kept for row-shape compatibility.
    pub scroll_speed_avg: u32,
    pub form_start_time_sec: Option<u64>,
    pub fields_filled_count: usize,
    pub form_data: BTreeMap<String, String>,
}

/// One denormalized profile row, upserted with `user_id` as the unique key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileRow {
    pub user_id: String,
    /// sessionId -> foreground seconds, the full history for this visitor.
    pub sessions_history: BTreeMap<String, u64>,
    /// Comma-joined distinct event names.
    pub event_name: String,
    /// Comma-joined goal identifiers (mirrors `data.yandex_goals`).
    pub yandex_metrika: String,
    pub data: ProfileData,
    /// ISO-8601 timestamp of this write.
    pub last_updated: String,
}

impl ProfileRow {
    /// Distinct event names parsed back from the joined wire form.
    pub fn events(&self) -> OrderedSet {
        self.event_name
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }
}
