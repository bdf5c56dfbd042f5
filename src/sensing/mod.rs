//! Behavioral input sensors.
//!
//! The embedding environment forwards raw interaction events; this module
//! folds them into a [`BehaviorSnapshot`]. The fold is pure with respect to
//! time: `now` is always injected, which keeps every threshold testable.

use chrono::{DateTime, Utc};

use crate::models::BehaviorSnapshot;

const RAGE_CLICK_WINDOW_MS: i64 = 300;
const RAGE_CLICK_RADIUS_PX: f64 = 20.0;
const HOVER_HESITATION_MIN_MS: i64 = 400;
const HOVER_HESITATION_MAX_MS: i64 = 8_000;
const MOUSE_SAMPLE_GAP_MS: i64 = 100;
const SCROLL_DIRECTION_THRESHOLD_PX: f64 = 50.0;
const SELECTION_DEBOUNCE_MS: i64 = 500;
const MAX_FIELD_VALUE_LEN: usize = 500;
const MAX_DESCRIPTOR_LEN: usize = 50;

/// One raw interaction event from the embedding page.
#[derive(Debug, Clone)]
pub enum InputEvent {
    Click {
        x: f64,
        y: f64,
        /// True when the target is an interactive element (link/button).
        interactive: bool,
        /// Free-form descriptor of the target (text, id, or class).
        target: Option<String>,
    },
    VisibilityChange {
        hidden: bool,
    },
    HoverEnter {
        interactive: bool,
        target: Option<String>,
    },
    HoverLeave {
        interactive: bool,
    },
    MouseMove {
        x: f64,
        y: f64,
    },
    Scroll {
        y: f64,
        page_height: f64,
        viewport_height: f64,
    },
    Copy,
    SelectionChange {
        collapsed: bool,
    },
    FieldFocus,
    FieldChange {
        name: Option<String>,
        id: Option<String>,
        placeholder: Option<String>,
        input_type: Option<String>,
        value: String,
    },
    FormSubmit,
}

/// What an observed event asks of the tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorOutcome {
    /// Event name to record in the visitor's event set.
    pub track: Option<&'static str>,
    /// Conversion-adjacent signal; the uploader must bypass the throttle.
    pub force_sync: bool,
}

/// Folds raw input events into behavioral counters.
pub struct BehaviorSensors {
    snapshot: BehaviorSnapshot,
    page_loaded_ms: i64,
    hidden: bool,
    hidden_since_ms: Option<i64>,
    hover_since_ms: Option<i64>,
    current_hover: Option<String>,
    last_click: Option<(i64, f64, f64)>,
    last_mouse: (f64, f64, i64),
    last_scroll_y: f64,
    last_scroll_dir: i8,
    selection_quiet_until_ms: i64,
}

impl BehaviorSensors {
    pub fn new(page_loaded_at: DateTime<Utc>) -> Self {
        let page_loaded_ms = page_loaded_at.timestamp_millis();
        Self {
            snapshot: BehaviorSnapshot::default(),
            page_loaded_ms,
            hidden: false,
            hidden_since_ms: None,
            hover_since_ms: None,
            current_hover: None,
            last_click: None,
            last_mouse: (0.0, 0.0, page_loaded_ms),
            last_scroll_y: 0.0,
            last_scroll_dir: 1,
            selection_quiet_until_ms: 0,
        }
    }

    pub fn snapshot(&self) -> &BehaviorSnapshot {
        &self.snapshot
    }

    /// True while the tab is backgrounded; the controller suppresses ticks
    /// for the duration.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn observe(&mut self, event: InputEvent, now: DateTime<Utc>) -> SensorOutcome {
        let now_ms = now.timestamp_millis();
        match event {
            InputEvent::Click {
                x,
                y,
                interactive,
                target,
            } => {
                if let Some((last_ms, last_x, last_y)) = self.last_click {
                    let dist = ((x - last_x).powi(2) + (y - last_y).powi(2)).sqrt();
                    if now_ms - last_ms < RAGE_CLICK_WINDOW_MS && dist < RAGE_CLICK_RADIUS_PX {
                        self.snapshot.rage_clicks += 1;
                    }
                }
                self.last_click = Some((now_ms, x, y));
                self.update_hover_descriptor(target);
                SensorOutcome {
                    track: interactive.then_some("click"),
                    force_sync: false,
                }
            }
            InputEvent::VisibilityChange { hidden } => {
                if hidden && !self.hidden {
                    self.snapshot.tab_switches += 1;
                    self.hidden_since_ms = Some(now_ms);
                    if self.current_hover.is_some() {
                        self.snapshot.last_interaction_element = self.current_hover.clone();
                    }
                } else if !hidden {
                    if let Some(since) = self.hidden_since_ms.take() {
                        self.snapshot.tab_hidden_ms += now_ms - since;
                    }
                }
                self.hidden = hidden;
                SensorOutcome::default()
            }
            InputEvent::HoverEnter {
                interactive,
                target,
            } => {
                if interactive {
                    self.hover_since_ms = Some(now_ms);
                }
                self.update_hover_descriptor(target);
                SensorOutcome::default()
            }
            InputEvent::HoverLeave { interactive } => {
                if interactive {
                    if let Some(since) = self.hover_since_ms.take() {
                        let span = now_ms - since;
                        if span > HOVER_HESITATION_MIN_MS && span < HOVER_HESITATION_MAX_MS {
                            self.snapshot.hover_hesitation_ms += span;
                        }
                    }
                }
                SensorOutcome::default()
            }
            InputEvent::MouseMove { x, y } => {
                let (last_x, last_y, last_ms) = self.last_mouse;
                let elapsed = now_ms - last_ms;
                if elapsed > MOUSE_SAMPLE_GAP_MS {
                    self.snapshot.mouse_distance_px +=
                        ((x - last_x).powi(2) + (y - last_y).powi(2)).sqrt();
                    self.snapshot.mouse_sample_ms += elapsed;
                    self.last_mouse = (x, y, now_ms);
                }
                SensorOutcome::default()
            }
            InputEvent::Scroll {
                y,
                page_height,
                viewport_height,
            } => {
                let dir: i8 = if y > self.last_scroll_y { 1 } else { -1 };
                if dir != self.last_scroll_dir
                    && (y - self.last_scroll_y).abs() > SCROLL_DIRECTION_THRESHOLD_PX
                {
                    self.snapshot.scroll_direction_changes += 1;
                    self.last_scroll_dir = dir;
                }
                let scrollable = page_height - viewport_height;
                if scrollable > 0.0 {
                    let percent = ((y / scrollable) * 100.0).round().clamp(0.0, 100.0) as u32;
                    if percent > self.snapshot.max_scroll_depth_percent {
                        self.snapshot.max_scroll_depth_percent = percent;
                    }
                }
                self.last_scroll_y = y;
                SensorOutcome::default()
            }
            InputEvent::Copy => {
                self.snapshot.text_copied_count += 1;
                SensorOutcome::default()
            }
            InputEvent::SelectionChange { collapsed } => {
                if !collapsed && now_ms >= self.selection_quiet_until_ms {
                    self.snapshot.text_selection_count += 1;
                    self.selection_quiet_until_ms = now_ms + SELECTION_DEBOUNCE_MS;
                }
                SensorOutcome::default()
            }
            InputEvent::FieldFocus => {
                if self.snapshot.form_start_time_sec.is_none() {
                    let secs = ((now_ms - self.page_loaded_ms) as f64 / 1000.0).round();
                    self.snapshot.form_start_time_sec = Some(secs.max(0.0) as u64);
                }
                SensorOutcome::default()
            }
            InputEvent::FieldChange {
                name,
                id,
                placeholder,
                input_type,
                value,
            } => {
                let field = name
                    .or(id)
                    .or(placeholder)
                    .filter(|f| !f.is_empty())
                    .unwrap_or_else(|| "unnamed_field".into());
                let masked = mask_field_value(&field, input_type.as_deref(), &value);
                self.snapshot.fields_filled.insert(&field);
                self.snapshot.form_data.insert(field, masked);
                SensorOutcome::default()
            }
            InputEvent::FormSubmit => SensorOutcome {
                track: Some("form_submit"),
                force_sync: true,
            },
        }
    }

    fn update_hover_descriptor(&mut self, target: Option<String>) {
        if let Some(raw) = target {
            let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            let trimmed: String = collapsed.chars().take(MAX_DESCRIPTOR_LEN).collect();
            let trimmed = trimmed.trim().to_string();
            if !trimmed.is_empty() {
                self.current_hover = Some(trimmed);
            }
        }
    }
}

/// Masks sensitive form values: passwords entirely, card-shaped numbers to
/// their last four digits; anything else is truncated to a sane length.
fn mask_field_value(field: &str, input_type: Option<&str>, value: &str) -> String {
    if input_type.is_some_and(|t| t.eq_ignore_ascii_case("password")) {
        return "***MASKED***".into();
    }
    let lower = field.to_lowercase();
    let card_like = lower.contains("card") || lower.contains("карт");
    let digits_only = !value.is_empty() && value.chars().all(|c| c.is_ascii_digit());
    if card_like && digits_only && (13..=19).contains(&value.len()) {
        return format!("****{}", &value[value.len() - 4..]);
    }
    if value.chars().count() > MAX_FIELD_VALUE_LEN {
        let head: String = value.chars().take(MAX_FIELD_VALUE_LEN).collect();
        return format!("{head}...");
    }
    value.to_string()
}
