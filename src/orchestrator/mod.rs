//! Liveness supervision: watchdog, lifecycle manager and inbound router.

pub mod lifecycle;
pub mod router;
pub mod watchdog;

pub use lifecycle::LifecycleManager;
pub use router::spawn_inbound_router;
pub use watchdog::{Watchdog, WatchdogAction, WatchdogSettings};
