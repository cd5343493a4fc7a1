//! C1–C3: clock/resource probe, memory-pressure bus, and metrics store.
//!
//! These three collaborate but are independently useful, so they're kept as
//! separate modules under one crate rather than three crates — none of them
//! is large enough to warrant its own `Cargo.toml`, and callers almost
//! always want all three together.

pub mod event_log;
pub mod pressure;
pub mod resource;
pub mod store;

pub use event_log::{EventLog, FileEventLog, InMemoryEventLog, RecoveryEvent};
pub use pressure::PressureBus;
pub use resource::{ResourceProbe, ResourceSample};
pub use store::{Alert, MetricsStore, Stats};
