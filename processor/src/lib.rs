pub mod consumer;
pub mod probe;
pub mod writer;

/// Stable consumer name. Pending entries are bound to it, so crash
/// recovery only works if every restart reuses the same name.
pub const CONSUMER_NAME: &str = "processor-1";
