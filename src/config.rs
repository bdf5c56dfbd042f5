use serde::{Deserialize, Serialize};

/// Runtime configuration for the tracker.
///
/// Every field has a default; an embedding page can deserialize a partial
/// JSON object and get the rest filled in. The backend endpoint and
/// credential default to empty, which disables all writes (fail closed)
/// without affecting local tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Base URL of the Supabase project, e.g. `https://xyz.supabase.co`.
    pub supabase_url: String,
    /// Service/anon API key used for both `apikey` and bearer auth.
    pub api_key: String,
    /// Target table for profile upserts.
    pub table_name: String,
    /// Minimum foreground seconds a first-time visitor must accumulate
    /// before the first write is allowed.
    pub min_session_duration_secs: u64,
    /// Idle gap after which the next activity starts a new session.
    pub session_timeout_ms: i64,
    /// Minimum gap between successful writes (forced syncs bypass this).
    pub sync_interval_ms: i64,
    /// When true, sync failures and key diagnostics are logged.
    pub debug: bool,
    /// Optional external analytics counter id. When absent the goal relay
    /// still forwards calls but no client-id lookup is attempted.
    pub metrika_id: Option<String>,
    /// Goal identifiers that mark the visitor as a lead and force an
    /// immediate sync when observed.
    pub lead_goal_ids: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            api_key: String::new(),
            table_name: "analytics".into(),
            min_session_duration_secs: 10,
            session_timeout_ms: 20 * 60 * 1000,
            sync_interval_ms: 10_000,
            debug: false,
            metrika_id: None,
            lead_goal_ids: vec!["REG_SEND_FINAL".into(), "281047303".into()],
        }
    }
}

impl TrackerConfig {
    /// Whether enough is configured to attempt backend writes.
    pub fn sink_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.api_key.is_empty()
    }

    pub fn is_lead_goal(&self, goal_id: &str) -> bool {
        self.lead_goal_ids.iter().any(|id| id == goal_id)
    }
}
