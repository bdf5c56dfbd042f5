use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::OrderedSet;

/// In-page behavioral counters.
///
/// Reset on every page load and accumulated for the lifetime of the tab;
/// flushed into the synced payload but never persisted, so a reload loses
/// these while identity and session time survive through storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorSnapshot {
    pub rage_clicks: u32,
    pub tab_switches: u32,
    pub tab_hidden_ms: i64,
    pub hover_hesitation_ms: i64,
    pub max_scroll_depth_percent: u32,
    pub scroll_direction_changes: u32,
    pub mouse_distance_px: f64,
    /// Total time covered by mouse-move samples; denominator for velocity.
    pub mouse_sample_ms: i64,
    pub text_copied_count: u32,
    pub text_selection_count: u32,
    /// Seconds from page load until the first form field got focus.
    pub form_start_time_sec: Option<u64>,
    pub fields_filled: OrderedSet,
    /// Field name -> captured value, masked for sensitive types.
    pub form_data: BTreeMap<String, String>,
    /// Descriptor of the last element the pointer rested on, recorded when
    /// the tab goes hidden (a proxy for where the visitor left).
    pub last_interaction_element: Option<String>,
}

impl BehaviorSnapshot {
    pub fn hover_hesitation_sec(&self) -> u64 {
        (self.hover_hesitation_ms as f64 / 1000.0).round() as u64
    }
}
