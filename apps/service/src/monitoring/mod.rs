/// Monitoring engine module - probes endpoints on a schedule
///
/// This module is responsible for:
/// - Executing HTTP(S) and WebSocket probes
/// - Scheduling one execution loop per registered monitor
/// - Counting consecutive failures and raising alerts
pub mod alert;
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod types;

pub use alert::{AlertEvaluator, AlertOutcome};
pub use executor::ProbeDispatcher;
pub use scheduler::MonitorScheduler;
pub use types::{LoopState, MonitorDefinition, MonitorId, ProbeEvent, ProbeResult};
