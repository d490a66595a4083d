mod kalman;

pub use kalman::{CoordinateFilter, FilterState, NoiseConstants};
