mod controller;
mod engine;

pub use controller::TrackerController;
pub use engine::TrackerEngine;
