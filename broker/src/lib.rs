pub mod connector;
pub mod queue;
pub mod rate_limit;
pub mod stream;

pub use connector::{create_pool, ping};
pub use queue::{CycleInfo, WorkQueue};
pub use rate_limit::RateLimiter;
pub use stream::{StreamConsumer, StreamEntry, StreamProducer};
