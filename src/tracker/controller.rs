use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::goals::GoalNotice;
use crate::models::PageContext;
use crate::sensing::InputEvent;
use crate::storage::StateStorage;
use crate::sync::ProfileSink;

use super::TrackerEngine;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Drives the [`TrackerEngine`] on a 1-second ticker and performs the
/// gated upstream writes.
///
/// Input events and goal notices arrive over unbounded channels so the
/// embedding page never blocks. Writes run as detached tasks: a pending
/// write does not stall ticks, and overlapping writes are tolerated by
/// the sink's upsert-by-key contract.
pub struct TrackerController {
    engine: Arc<Mutex<TrackerEngine>>,
    sink: Option<Arc<dyn ProfileSink>>,
    table_name: String,
    debug: bool,
    input_tx: mpsc::UnboundedSender<InputEvent>,
    goal_tx: mpsc::UnboundedSender<GoalNotice>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<InputEvent>>>,
    goal_rx: Mutex<Option<mpsc::UnboundedReceiver<GoalNotice>>>,
    cancel: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TrackerController {
    /// Builds the controller. With no endpoint/credential configured the
    /// sink stays `None` and the tracker runs locally without ever
    /// attempting a write (fail closed).
    pub fn new(
        config: TrackerConfig,
        context: PageContext,
        storage: Arc<dyn StateStorage>,
        sink: Option<Arc<dyn ProfileSink>>,
    ) -> Self {
        let table_name = config.table_name.clone();
        let debug = config.debug;
        if sink.is_none() {
            log_info!("no sink configured, running local-only");
        }
        if config.metrika_id.is_some() {
            log_info!("external goal integration enabled");
        }
        let engine = TrackerEngine::start(config, context, storage, Utc::now());

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (goal_tx, goal_rx) = mpsc::unbounded_channel();

        Self {
            engine: Arc::new(Mutex::new(engine)),
            sink,
            table_name,
            debug,
            input_tx,
            goal_tx,
            input_rx: Mutex::new(Some(input_rx)),
            goal_rx: Mutex::new(Some(goal_rx)),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Sender the embedding page pushes raw interaction events into.
    pub fn input_sender(&self) -> mpsc::UnboundedSender<InputEvent> {
        self.input_tx.clone()
    }

    /// Sender for the goal relay ([`crate::goals::GoalRelay`]).
    pub fn goal_sender(&self) -> mpsc::UnboundedSender<GoalNotice> {
        self.goal_tx.clone()
    }

    pub fn engine(&self) -> Arc<Mutex<TrackerEngine>> {
        Arc::clone(&self.engine)
    }

    /// Spawns the tick loop. Calling twice is an error.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            anyhow::bail!("tracker already running");
        }

        let input_rx = self
            .input_rx
            .lock()
            .await
            .take()
            .context("input receiver already taken")?;
        let goal_rx = self
            .goal_rx
            .lock()
            .await
            .take()
            .context("goal receiver already taken")?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.engine),
            self.sink.clone(),
            self.table_name.clone(),
            self.debug,
            input_rx,
            goal_rx,
            cancel.clone(),
        ));

        *self.cancel.lock().await = Some(cancel);
        *worker = Some(handle);
        Ok(())
    }

    /// Stops the loop and attempts one final flush. The flush is best
    /// effort: navigation-style teardown may abort it and the last few
    /// seconds of a session can stay unsynced.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.worker.lock().await.take() {
            handle.await.context("tracker loop failed to join")?;
        }
        if let Some(sink) = &self.sink {
            let now = Utc::now();
            let row = {
                let engine = self.engine.lock().await;
                // A bounce visit that never cleared the duration gate stays
                // out of the backend even at teardown.
                if !engine.flush_eligible() {
                    return Ok(());
                }
                engine.build_row(now)
            };
            match sink.upsert(&self.table_name, &row).await {
                Ok(()) => self.engine.lock().await.mark_synced(now),
                Err(err) => {
                    if self.debug {
                        log_warn!("final flush failed: {err:#}");
                    }
                }
            }
        }
        Ok(())
    }
}

async fn run_loop(
    engine: Arc<Mutex<TrackerEngine>>,
    sink: Option<Arc<dyn ProfileSink>>,
    table_name: String,
    debug: bool,
    mut input_rx: mpsc::UnboundedReceiver<InputEvent>,
    mut goal_rx: mpsc::UnboundedReceiver<GoalNotice>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it so a tick means
    // one elapsed second.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                let due = engine.lock().await.tick(now);
                if due {
                    spawn_sync(&engine, &sink, &table_name, debug);
                }
            }
            event = input_rx.recv() => {
                if let Some(event) = event {
                    let now = Utc::now();
                    let forced = engine.lock().await.observe(event, now);
                    if forced {
                        spawn_sync(&engine, &sink, &table_name, debug);
                    }
                }
            }
            notice = goal_rx.recv() => {
                if let Some(notice) = notice {
                    let now = Utc::now();
                    let forced = engine.lock().await.record_goal(&notice.goal_id, now);
                    if forced {
                        spawn_sync(&engine, &sink, &table_name, debug);
                    }
                }
            }
            _ = cancel.cancelled() => {
                log_info!("tracker loop shutting down");
                break;
            }
        }
    }
}

/// Fires an upstream write without holding up the tick loop. Failures
/// leave the gate untouched, so the next eligible tick retries with a
/// fresh snapshot; the throttle interval is the de facto retry delay.
fn spawn_sync(
    engine: &Arc<Mutex<TrackerEngine>>,
    sink: &Option<Arc<dyn ProfileSink>>,
    table_name: &str,
    debug: bool,
) {
    let Some(sink) = sink.clone() else {
        return;
    };
    let engine = Arc::clone(engine);
    let table_name = table_name.to_string();
    tokio::spawn(async move {
        let now = Utc::now();
        let row = engine.lock().await.build_row(now);
        match sink.upsert(&table_name, &row).await {
            Ok(()) => engine.lock().await.mark_synced(now),
            Err(err) => {
                if debug {
                    log_error!("sync failed: {err:#}");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceFacts, PageContext};
    use crate::storage::MemoryStorage;
    use crate::sync::MemorySink;

    fn controller_with_sink() -> (TrackerController, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let controller = TrackerController::new(
            TrackerConfig {
                supabase_url: "https://xyz.supabase.co".into(),
                api_key: "key".into(),
                ..TrackerConfig::default()
            },
            PageContext::capture("https://site.example/", "t", None, DeviceFacts::default()),
            Arc::new(MemoryStorage::new()),
            Some(Arc::clone(&sink) as Arc<dyn ProfileSink>),
        );
        (controller, sink)
    }

    #[tokio::test]
    async fn forced_event_syncs_through_the_loop() {
        let (controller, sink) = controller_with_sink();
        controller.start().await.unwrap();

        controller.input_sender().send(InputEvent::FormSubmit).unwrap();
        // The write runs as a detached task; give the runtime a moment.
        for _ in 0..50 {
            if sink.row_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.row_count(), 1);
        let row = sink.select_all("analytics").await.unwrap().remove(0);
        assert!(row.events().contains("form_submit"));

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn goal_notice_marks_lead_and_flushes() {
        let (controller, sink) = controller_with_sink();
        controller.start().await.unwrap();

        controller
            .goal_sender()
            .send(GoalNotice {
                goal_id: "REG_SEND_FINAL".into(),
            })
            .unwrap();
        for _ in 0..50 {
            if sink.row_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let row = sink.select_all("analytics").await.unwrap().remove(0);
        assert!(row.data.is_lead);
        assert!(row.yandex_metrika.contains("REG_SEND_FINAL"));

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_performs_a_final_flush_for_known_visitors() {
        let (controller, sink) = controller_with_sink();
        controller.start().await.unwrap();
        // Visitor has synced before, so teardown flushes the last snapshot.
        controller.engine().lock().await.mark_synced(Utc::now());
        controller.stop().await.unwrap();
        assert_eq!(sink.row_count(), 1);
        assert!(controller.engine().lock().await.state().has_synced);
    }

    #[tokio::test]
    async fn stop_skips_flush_for_bounce_visits() {
        let (controller, sink) = controller_with_sink();
        controller.start().await.unwrap();
        // First-time visitor, zero accumulated seconds: the duration gate
        // never cleared, and teardown must not write either.
        controller.stop().await.unwrap();
        assert_eq!(sink.row_count(), 0);
        assert!(!controller.engine().lock().await.state().has_synced);
    }

    #[tokio::test]
    async fn unconfigured_sink_never_writes() {
        let controller = TrackerController::new(
            TrackerConfig::default(),
            PageContext::capture("https://site.example/", "t", None, DeviceFacts::default()),
            Arc::new(MemoryStorage::new()),
            None,
        );
        controller.start().await.unwrap();
        controller.input_sender().send(InputEvent::FormSubmit).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.stop().await.unwrap();
        // Local state still advanced.
        assert!(controller
            .engine()
            .lock()
            .await
            .state()
            .events
            .contains("form_submit"));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (controller, _sink) = controller_with_sink();
        controller.start().await.unwrap();
        assert!(controller.start().await.is_err());
        controller.stop().await.unwrap();
    }
}
