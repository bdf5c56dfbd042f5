use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Insertion-ordered set of unique strings.
///
/// In-memory fields like events and goals need set semantics, but they are
/// persisted and shipped upstream as plain lists, so this keeps a `Vec`
/// underneath and serializes transparently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedSet(Vec<String>);

impl OrderedSet {
    pub fn insert(&mut self, value: &str) -> bool {
        if self.0.iter().any(|existing| existing == value) {
            return false;
        }
        self.0.push(value.to_string());
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|existing| existing == value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Comma-joined form used by the upstream row.
    pub fn joined(&self) -> String {
        self.0.join(", ")
    }
}

impl<S: Into<String>> FromIterator<S> for OrderedSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = OrderedSet::default();
        for value in iter {
            let value = value.into();
            if !set.contains(&value) {
                set.0.push(value);
            }
        }
        set
    }
}

/// Durable per-visitor state, persisted as one JSON document.
///
/// The `sessions` map grows one entry per historical session and is never
/// pruned; retention is an open issue upstream, so the map is left
/// unbounded here to keep synced rows compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitorState {
    pub user_id: String,
    pub current_session_id: Option<String>,
    /// sessionId -> accumulated foreground seconds.
    pub sessions: BTreeMap<String, u64>,
    pub events: OrderedSet,
    pub goals: OrderedSet,
    pub last_activity_ms: i64,
    pub has_synced: bool,
    pub first_visit_ms: i64,
    pub last_visit_ms: i64,
    pub total_visits: u64,
    pub goal_client_id: Option<String>,
    pub is_lead: bool,
}

impl Default for VisitorState {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            current_session_id: None,
            sessions: BTreeMap::new(),
            events: OrderedSet::default(),
            goals: OrderedSet::default(),
            last_activity_ms: 0,
            has_synced: false,
            first_visit_ms: 0,
            last_visit_ms: 0,
            total_visits: 0,
            goal_client_id: None,
            is_lead: false,
        }
    }
}

impl VisitorState {
    pub fn new(user_id: String, now_ms: i64) -> Self {
        Self {
            user_id,
            last_activity_ms: now_ms,
            first_visit_ms: now_ms,
            last_visit_ms: now_ms,
            ..Self::default()
        }
    }

    /// Ensures a live session: mints a new one when none is current or the
    /// idle timeout has elapsed since the last activity. Always refreshes
    /// `last_activity_ms`, so calling twice in the same tick is idempotent.
    /// Returns the minted session id, if any.
    pub fn reconcile_session(&mut self, now_ms: i64, idle_timeout_ms: i64) -> Option<String> {
        let expired = now_ms - self.last_activity_ms > idle_timeout_ms;
        let minted = if self.current_session_id.is_none() || expired {
            let session_id = Uuid::new_v4().to_string();
            self.sessions.insert(session_id.clone(), 0);
            self.current_session_id = Some(session_id.clone());
            self.last_visit_ms = now_ms;
            Some(session_id)
        } else {
            None
        };
        self.last_activity_ms = now_ms;
        minted
    }

    /// One foreground second elapsed. The caller is responsible for only
    /// invoking this while the page is visible.
    pub fn tick(&mut self, now_ms: i64) {
        if let Some(session_id) = &self.current_session_id {
            *self.sessions.entry(session_id.clone()).or_insert(0) += 1;
            self.last_activity_ms = now_ms;
        }
    }

    pub fn track_event(&mut self, name: &str) {
        self.events.insert(name);
    }

    pub fn record_goal(&mut self, goal_id: &str) {
        self.goals.insert(goal_id);
    }

    /// Lifetime foreground seconds across every historical session.
    pub fn total_time_sec(&self) -> u64 {
        self.sessions.values().sum()
    }

    /// Foreground seconds accumulated by the current session.
    pub fn current_session_secs(&self) -> u64 {
        self.current_session_id
            .as_ref()
            .and_then(|id| self.sessions.get(id))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE_TIMEOUT_MS: i64 = 1_200_000;

    #[test]
    fn ordered_set_dedupes_and_keeps_order() {
        let mut set = OrderedSet::default();
        assert!(set.insert("page_view"));
        assert!(set.insert("click"));
        assert!(!set.insert("page_view"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.joined(), "page_view, click");
    }

    #[test]
    fn ordered_set_round_trips_as_list() {
        let set: OrderedSet = ["a", "b", "a"].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        let back: OrderedSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn reconcile_mints_first_session() {
        let mut state = VisitorState::new("u".into(), 1_000);
        let minted = state.reconcile_session(1_000, IDLE_TIMEOUT_MS);
        assert!(minted.is_some());
        assert_eq!(state.current_session_id, minted);
        assert_eq!(state.sessions.len(), 1);
    }

    #[test]
    fn reconcile_respects_idle_boundary() {
        let mut state = VisitorState::new("u".into(), 0);
        let first = state.reconcile_session(0, IDLE_TIMEOUT_MS).unwrap();

        // Just inside the timeout: session survives.
        assert!(state
            .reconcile_session(IDLE_TIMEOUT_MS - 1, IDLE_TIMEOUT_MS)
            .is_none());
        assert_eq!(state.current_session_id.as_deref(), Some(first.as_str()));

        // Just past the timeout (measured from the refreshed activity).
        let later = (IDLE_TIMEOUT_MS - 1) + IDLE_TIMEOUT_MS + 1;
        let second = state.reconcile_session(later, IDLE_TIMEOUT_MS).unwrap();
        assert_ne!(second, first);
        assert_eq!(state.sessions.len(), 2);
        assert_eq!(state.last_visit_ms, later);
    }

    #[test]
    fn reconcile_is_idempotent_within_a_tick() {
        let mut state = VisitorState::new("u".into(), 0);
        state.reconcile_session(0, IDLE_TIMEOUT_MS);
        let current = state.current_session_id.clone();
        state.reconcile_session(0, IDLE_TIMEOUT_MS);
        assert_eq!(state.current_session_id, current);
        assert_eq!(state.sessions.len(), 1);
    }

    #[test]
    fn tick_accumulates_current_session_only() {
        let mut state = VisitorState::new("u".into(), 0);
        state.reconcile_session(0, IDLE_TIMEOUT_MS);
        for second in 1..=5 {
            state.tick(second * 1_000);
        }
        assert_eq!(state.current_session_secs(), 5);
        assert_eq!(state.total_time_sec(), 5);
        assert_eq!(state.last_activity_ms, 5_000);
    }

    #[test]
    fn tick_without_session_is_a_no_op() {
        let mut state = VisitorState::new("u".into(), 0);
        state.tick(1_000);
        assert_eq!(state.total_time_sec(), 0);
    }

    #[test]
    fn total_time_spans_all_sessions() {
        let mut state = VisitorState::new("u".into(), 0);
        state.reconcile_session(0, IDLE_TIMEOUT_MS);
        state.tick(1_000);
        state.tick(2_000);
        state.reconcile_session(10_000_000, IDLE_TIMEOUT_MS);
        state.tick(10_001_000);
        assert_eq!(state.total_time_sec(), 3);
        assert_eq!(state.current_session_secs(), 1);
    }
}
