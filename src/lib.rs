//! IBKR day-trading bridge library.
//!
//! Exposes the core components — session layer, risk gate, ensemble
//! scoring, trailing-stop executor, background loops, persistence, and the
//! wire interface — for use by `main` and by the integration tests. The
//! binary in `main.rs` wires these into a running `BridgeRuntime`.

pub mod background;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod ibkr;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod runtime;
pub mod trailing;
pub mod wire;

pub use config::Config;
pub use error::{BridgeError, BridgeResult};
pub use runtime::BridgeRuntime;
