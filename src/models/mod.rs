mod behavior;
mod context;
mod profile;
mod state;

pub use behavior::BehaviorSnapshot;
pub use context::{DeviceFacts, PageContext, TrafficSource, UtmParams};
pub use profile::{ProfileData, ProfileRow};
pub use state::{OrderedSet, VisitorState};
