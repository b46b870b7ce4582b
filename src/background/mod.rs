//! Background loops (Component E, §4.E): auto-eval, trailing tick, and the
//! tunnel monitor. Each runs on the general task pool, never on the broker
//! event loop (§5).

pub mod alert_pipeline;
pub mod auto_eval;
pub mod tunnel_monitor;
pub mod trailing_tick;

pub use alert_pipeline::AlertPipeline;
pub use auto_eval::{AutoEvalScheduler, DedupWindow};
pub use tunnel_monitor::{Incident, IncidentSeverity, TunnelMonitor, TunnelProbe, TunnelRestarter};
