use std::sync::Arc;

use gravgate_common::GatewayConfig;
use gravgate_pool::{CredentialPool, IdentityCache};
use gravgate_storage::LogBuffer;

use crate::keys::KeyStore;
use crate::upstream::UpstreamClient;

/// Everything a handler needs, owned in one place and passed by reference.
/// There are no module-level singletons anywhere in the gateway.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub pool: CredentialPool,
    pub keys: Arc<KeyStore>,
    pub identity: IdentityCache,
    pub upstream: Arc<dyn UpstreamClient>,
    pub logs: Arc<LogBuffer>,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        pool: CredentialPool,
        keys: Arc<KeyStore>,
        identity: IdentityCache,
        upstream: Arc<dyn UpstreamClient>,
        logs: Arc<LogBuffer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            pool,
            keys,
            identity,
            upstream,
            logs,
        })
    }
}
