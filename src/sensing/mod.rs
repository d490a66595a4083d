pub mod controller;
mod geo;
pub(crate) mod loop_worker;
pub mod simulated;
pub mod source;

pub use controller::SensingController;
pub use geo::haversine_m;
pub use simulated::SimulatedSource;
pub use source::{PermissionStatus, RawFix, SampleSource, SamplingRequest};
