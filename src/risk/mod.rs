//! Risk gate & session state (Component B, §4.B).

pub mod clock;
pub mod gate;
pub mod session;

pub use clock::{Clock, SystemClock};
pub use gate::{Decision, OrderContext, RiskGate, RuntimeOverrides};
pub use session::Session;
