pub mod analytics;
pub mod client;
pub mod mock;
pub mod probe;
pub mod scheduler;
pub mod wmo;
pub mod worker;

/// Fetch workers per process. Sized to keep the token bucket saturated
/// while individual requests wait on the network.
pub const WORKER_COUNT: usize = 50;
