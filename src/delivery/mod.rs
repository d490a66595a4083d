mod agent;
mod collector;
mod payload;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{DeliveryAgent, DeliveryOutcome, DeliveryTicket, DrainReport};
pub use collector::{Collector, DeliveryError, HttpCollector};
pub use payload::CollectorPayload;
