//! Health probe: the processor is healthy when its broker answers PING.

use async_trait::async_trait;
use common::api::HealthProbe;
use deadpool_redis::Pool;

pub struct BrokerProbe {
    pool: Pool,
}

impl BrokerProbe {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for BrokerProbe {
    async fn healthy(&self) -> bool {
        broker::ping(&self.pool).await.is_ok()
    }
}
