use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::models::{BehaviorSnapshot, PageContext, ProfileRow, VisitorState};
use crate::sensing::{BehaviorSensors, InputEvent};
use crate::storage::{StateStorage, STORE_KEY, UID_KEY};
use crate::sync::{build_profile_row, SyncGate};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// The per-tab tracking core: durable visitor/session state, behavioral
/// sensors, and the sync gate, driven by injected timestamps.
///
/// The engine never touches the network; the controller asks it whether a
/// write is due and performs the upsert itself. Storage failures degrade
/// to in-memory operation and are never surfaced to the embedder.
pub struct TrackerEngine {
    config: TrackerConfig,
    context: PageContext,
    storage: Arc<dyn StateStorage>,
    state: VisitorState,
    sensors: BehaviorSensors,
    gate: SyncGate,
}

impl TrackerEngine {
    /// Loads or creates identity and state, reconciles the session, and
    /// records the page view. Infallible: any storage problem falls back
    /// to a fresh in-memory state.
    pub fn start(
        config: TrackerConfig,
        context: PageContext,
        storage: Arc<dyn StateStorage>,
        now: DateTime<Utc>,
    ) -> Self {
        let now_ms = now.timestamp_millis();

        let user_id = match storage.get(UID_KEY) {
            Ok(Some(uid)) if !uid.trim().is_empty() => uid.trim().to_string(),
            other => {
                if let Err(err) = &other {
                    log_warn!("identity storage unreadable, minting ephemeral id: {err:#}");
                }
                let uid = Uuid::new_v4().to_string();
                if let Err(err) = storage.set(UID_KEY, &uid) {
                    log_warn!("failed to persist visitor id: {err:#}");
                }
                uid
            }
        };

        let mut state = match storage.get(STORE_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<VisitorState>(&raw).unwrap_or_else(|err| {
                log_warn!("stored state is malformed, starting fresh: {err}");
                VisitorState::new(user_id.clone(), now_ms)
            }),
            Ok(None) => VisitorState::new(user_id.clone(), now_ms),
            Err(err) => {
                log_warn!("state storage unreadable, starting fresh: {err:#}");
                VisitorState::new(user_id.clone(), now_ms)
            }
        };

        // The identifier key is authoritative even when the state document
        // disagrees (e.g. a partially cleared store).
        state.user_id = user_id;
        if state.first_visit_ms == 0 {
            state.first_visit_ms = now_ms;
        }
        if state.last_visit_ms == 0 {
            state.last_visit_ms = now_ms;
        }
        if state.last_activity_ms == 0 {
            state.last_activity_ms = now_ms;
        }

        // No session carried over from storage means this load starts a
        // visit; the reconcile below will also mint the session itself.
        if state.current_session_id.is_none() {
            state.total_visits += 1;
        }

        let gate = SyncGate::new(state.has_synced);

        let mut engine = Self {
            config,
            context,
            storage,
            state,
            sensors: BehaviorSensors::new(now),
            gate,
        };
        if engine.reconcile_session(now) {
            log_info!("new session {:?}", engine.state.current_session_id);
        }
        engine.state.track_event("page_view");
        engine.persist();
        engine
    }

    pub fn state(&self) -> &VisitorState {
        &self.state
    }

    pub fn behavior(&self) -> &BehaviorSnapshot {
        self.sensors.snapshot()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_hidden(&self) -> bool {
        self.sensors.is_hidden()
    }

    /// Ensures a live session per the idle timeout. Returns true when a
    /// new session was minted.
    pub fn reconcile_session(&mut self, now: DateTime<Utc>) -> bool {
        let minted = self
            .state
            .reconcile_session(now.timestamp_millis(), self.config.session_timeout_ms)
            .is_some();
        if minted {
            self.persist();
        }
        minted
    }

    /// One foreground second. Returns true when the gate clears a write
    /// for this tick. A no-op while the tab is hidden.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        if self.sensors.is_hidden() {
            return false;
        }
        self.reconcile_session(now);
        self.state.tick(now.timestamp_millis());
        self.persist();
        self.should_sync(now, false)
    }

    /// Folds a raw input event. Returns true when the event demands an
    /// immediate sync (conversion-adjacent signals).
    pub fn observe(&mut self, event: InputEvent, now: DateTime<Utc>) -> bool {
        let outcome = self.sensors.observe(event, now);
        if let Some(name) = outcome.track {
            self.state.track_event(name);
            self.persist();
        }
        outcome.force_sync
    }

    pub fn track_event(&mut self, name: &str) {
        self.state.track_event(name);
        self.persist();
    }

    /// Records an observed goal. A designated lead goal latches `is_lead`
    /// permanently; returns true when the write must bypass the throttle.
    pub fn record_goal(&mut self, goal_id: &str, _now: DateTime<Utc>) -> bool {
        self.state.record_goal(goal_id);
        self.state.track_event("yandex_goal");
        let is_lead_goal = self.config.is_lead_goal(goal_id);
        if is_lead_goal && !self.state.is_lead {
            self.state.is_lead = true;
            self.state.track_event("conversion_lead");
            log_info!("lead goal observed: {goal_id}");
        }
        self.persist();
        is_lead_goal
    }

    /// External analytics client id, recorded once it becomes available.
    pub fn set_goal_client_id(&mut self, client_id: &str) {
        if self.state.goal_client_id.is_none() {
            self.state.goal_client_id = Some(client_id.to_string());
            self.persist();
        }
    }

    /// Whether a teardown flush should write at all: returning visitors
    /// always, first-time visits only once past the minimum duration. The
    /// throttle is irrelevant at teardown, but the bounce rule still holds
    /// so short first visits never reach the backend.
    pub fn flush_eligible(&self) -> bool {
        self.gate.has_ever_synced()
            || self.state.current_session_secs() >= self.config.min_session_duration_secs
    }

    pub fn should_sync(&self, now: DateTime<Utc>, forced: bool) -> bool {
        self.gate.should_sync(
            now.timestamp_millis(),
            self.state.current_session_secs(),
            self.config.min_session_duration_secs,
            self.config.sync_interval_ms,
            forced,
        )
    }

    pub fn build_row(&self, now: DateTime<Utc>) -> ProfileRow {
        build_profile_row(&self.state, self.sensors.snapshot(), &self.context, now)
    }

    /// Called after a successful upstream write.
    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.gate.record_success(now.timestamp_millis());
        self.state.has_synced = true;
        self.persist();
    }

    /// Best-effort durable write of the state document. Quota and IO
    /// failures are swallowed; the engine keeps running in memory.
    fn persist(&self) {
        let serialized = match serde_json::to_string(&self.state) {
            Ok(serialized) => serialized,
            Err(err) => {
                log_warn!("failed to serialize visitor state: {err}");
                return;
            }
        };
        if let Err(err) = self.storage.set(STORE_KEY, &serialized) {
            log_warn!("failed to persist visitor state: {err:#}");
        }
    }
}
