//! Wire interface (§6/Component G): the event fan-out contract and the thin
//! HTTP/WS glue that exposes it. Everything a consumer outside this process
//! sees — the broadcast stream, the read-only REST surface — lives here.

pub mod events;
pub mod routes;

pub use events::{SequenceAllocator, WireEvent};
pub use routes::{router, WireState};
