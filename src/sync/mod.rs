mod gate;
mod metrics;
mod payload;
mod sink;

pub use gate::SyncGate;
pub use metrics::{
    days_since, focus_time_percent, mouse_velocity_px_sec, visit_frequency_per_week,
};
pub use payload::build_profile_row;
pub use sink::{MemorySink, ProfileSink, SupabaseSink};
