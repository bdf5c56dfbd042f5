use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{BehaviorSnapshot, PageContext, ProfileData, ProfileRow, VisitorState};

use super::metrics;

/// Materializes the full upstream row from the current state, behavioral
/// counters, and the frozen page context. Pure: everything time-dependent
/// comes through `now`.
pub fn build_profile_row(
    state: &VisitorState,
    behavior: &BehaviorSnapshot,
    context: &PageContext,
    now: DateTime<Utc>,
) -> ProfileRow {
    let now_ms = now.timestamp_millis();
    let total_time_sec = state.total_time_sec();

    let data = ProfileData {
        device: context.device.clone(),
        utm: context.utm.clone(),
        ym_client_id: state.goal_client_id.clone(),
        yandex_goals: state.goals.joined(),
        is_lead: state.is_lead,
        traffic_source_type: context.traffic_source().as_str().to_string(),
        entry_url: context.entry_url.clone(),
        page_title: context.page_title.clone(),
        total_time_sec,
        total_sessions_count: state.total_visits,
        days_since_first_visit: metrics::days_since(now_ms, state.first_visit_ms),
        days_since_last_visit: metrics::days_since(now_ms, state.last_visit_ms),
        visit_frequency_per_week: metrics::visit_frequency_per_week(
            state.total_visits,
            now_ms,
            state.first_visit_ms,
        ),
        rage_click_count: behavior.rage_clicks,
        tab_switch_count: behavior.tab_switches,
        focus_time_percent: metrics::focus_time_percent(total_time_sec, behavior.tab_hidden_ms),
        hover_hesitation_sec: behavior.hover_hesitation_sec(),
        mouse_velocity_px_sec: metrics::mouse_velocity_px_sec(
            behavior.mouse_distance_px,
            behavior.mouse_sample_ms,
        ),
        text_selection_count: behavior.text_selection_count,
        text_copied_count: behavior.text_copied_count,
        last_interaction_element: behavior.last_interaction_element.clone(),
        max_scroll_depth_percent: behavior.max_scroll_depth_percent,
        scroll_direction_changes: behavior.scroll_direction_changes,
        scroll_speed_avg: 0,
        form_start_time_sec: behavior.form_start_time_sec,
        fields_filled_count: behavior.fields_filled.len(),
        form_data: behavior.form_data.clone(),
    };

    ProfileRow {
        user_id: state.user_id.clone(),
        sessions_history: state.sessions.clone(),
        event_name: state.events.joined(),
        yandex_metrika: state.goals.joined(),
        data,
        last_updated: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}
