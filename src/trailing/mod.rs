//! Trailing-stop executor (Component D, §4.D).

pub mod executor;
pub mod policy;
pub mod position;

pub use executor::{ProcessSummary, StopOrderBroker, TrailingExecutor};
pub use policy::StopPolicy;
pub use position::PositionState;
