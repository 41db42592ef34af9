pub mod endpoint;
pub mod prioritized;
pub mod transmission;
pub mod transmitter;

pub use endpoint::{EndpointTxScheduler, EndpointTxScheduling};
pub use prioritized::PrioritizedTxScheduler;
pub use transmission::Transmission;
pub use transmitter::Transmitter;
