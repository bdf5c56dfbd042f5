/// Decides, each foreground tick, whether a snapshot write is due.
///
/// Two-branch entry rule: returning visitors (anyone who has ever synced,
/// carried across reloads) sync immediately, while first-time visits must
/// accumulate a minimum of foreground seconds first. That keeps short
/// bounce traffic out of the backend without delaying known profiles.
///
/// On top of the entry rule sits a throttle: once a write has succeeded
/// this page load, further writes wait out the sync interval. Forced
/// causes (lead goals, form submissions) bypass both.
#[derive(Debug, Clone)]
pub struct SyncGate {
    has_ever_synced: bool,
    synced_this_page: bool,
    last_sync_ms: Option<i64>,
}

impl SyncGate {
    pub fn new(has_synced_before: bool) -> Self {
        Self {
            has_ever_synced: has_synced_before,
            synced_this_page: false,
            last_sync_ms: None,
        }
    }

    pub fn has_ever_synced(&self) -> bool {
        self.has_ever_synced
    }

    pub fn should_sync(
        &self,
        now_ms: i64,
        current_session_secs: u64,
        min_session_secs: u64,
        sync_interval_ms: i64,
        forced: bool,
    ) -> bool {
        if forced {
            return true;
        }
        if !self.has_ever_synced && current_session_secs < min_session_secs {
            return false;
        }
        match (self.synced_this_page, self.last_sync_ms) {
            (true, Some(last)) if now_ms - last < sync_interval_ms => false,
            _ => true,
        }
    }

    /// Records a successful upstream write. Failed writes leave the gate
    /// untouched so the next eligible tick retries naturally.
    pub fn record_success(&mut self, now_ms: i64) {
        self.has_ever_synced = true;
        self.synced_this_page = true;
        self.last_sync_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_SECS: u64 = 10;
    const INTERVAL_MS: i64 = 10_000;

    #[test]
    fn first_time_visitor_waits_for_minimum_duration() {
        let gate = SyncGate::new(false);
        assert!(!gate.should_sync(5_000, 5, MIN_SECS, INTERVAL_MS, false));
        assert!(gate.should_sync(10_000, 10, MIN_SECS, INTERVAL_MS, false));
    }

    #[test]
    fn returning_visitor_syncs_immediately() {
        let gate = SyncGate::new(true);
        assert!(gate.should_sync(0, 0, MIN_SECS, INTERVAL_MS, false));
    }

    #[test]
    fn throttle_holds_between_successes() {
        let mut gate = SyncGate::new(false);
        assert!(gate.should_sync(10_000, 10, MIN_SECS, INTERVAL_MS, false));
        gate.record_success(10_000);
        assert!(!gate.should_sync(15_000, 15, MIN_SECS, INTERVAL_MS, false));
        assert!(gate.should_sync(20_000, 20, MIN_SECS, INTERVAL_MS, false));
    }

    #[test]
    fn forced_sync_bypasses_everything() {
        let mut gate = SyncGate::new(false);
        gate.record_success(10_000);
        // 1ms after a success, zero accumulated seconds: still allowed.
        assert!(gate.should_sync(10_001, 0, MIN_SECS, INTERVAL_MS, true));
    }

    #[test]
    fn failure_leaves_gate_open() {
        let gate = SyncGate::new(false);
        // A failed write never calls record_success, so the very next tick
        // is eligible again.
        assert!(gate.should_sync(10_000, 10, MIN_SECS, INTERVAL_MS, false));
        assert!(gate.should_sync(11_000, 11, MIN_SECS, INTERVAL_MS, false));
    }

    #[test]
    fn success_latches_has_ever_synced() {
        let mut gate = SyncGate::new(false);
        assert!(!gate.has_ever_synced());
        gate.record_success(1_000);
        assert!(gate.has_ever_synced());
    }
}
