pub mod pending;
pub mod sample;

pub use pending::PendingDelivery;
pub use sample::{
    validate_coordinates, validate_owner_id, LocationSample, NewSample, SampleValidationError,
};
