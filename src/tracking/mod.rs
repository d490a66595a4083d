pub mod controller;
pub mod pipeline;
pub mod state;

pub use controller::TrackingController;
pub use pipeline::{CaptureOutcome, CapturePipeline};
pub use state::{CaptureContext, SessionHandle, TrackingState, TrackingStatus};
