//! Shared daemon state: the pieces every tool and the shutdown orchestrator
//! need a handle to. Mirrors the teacher's `AppState` as the one shared,
//! `Arc`-wrapped bag handed to the router, generalized from the trading
//! daemon's bus/build/status fields to the core substrate's own pieces.

use std::sync::Arc;

use butler_buffer::DurableBuffer;
use butler_delivery::ChannelProvider;
use butler_delivery::DeliveryConfig;
use butler_egress_guard::EgressOwnershipFilter;
use butler_ratelimit::RateLimiter;
use butler_spawner::{SdkQuery, Spawner};
use sqlx::PgPool;

use crate::shutdown::AcceptingConnections;

pub struct AppState<Q: SdkQuery> {
    pub pool: PgPool,
    pub spawner: Arc<Spawner<Q>>,
    pub egress_filter: Arc<EgressOwnershipFilter>,
    pub accepting: Arc<AcceptingConnections>,
    /// Only populated on the messenger butler, which is the only one that
    /// ever takes `route.execute`'s synchronous delivery path (§4.F, §4.K).
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub delivery_provider: Option<Arc<dyn ChannelProvider>>,
    pub delivery_config: DeliveryConfig,
    /// Only populated on the switchboard, which is the only butler that owns
    /// the `ingest` tool and the durable buffer behind it (§4.E, §6).
    pub ingest_buffer: Option<Arc<DurableBuffer>>,
}

impl<Q: SdkQuery> AppState<Q> {
    pub fn butler_name(&self) -> &str {
        self.egress_filter.butler_name()
    }

    pub fn is_messenger(&self) -> bool {
        self.egress_filter.is_messenger()
    }
}
