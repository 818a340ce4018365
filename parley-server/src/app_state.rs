use std::{sync::Arc, time::Duration};

use shared::config::Config;

use crate::realtime::{dispatcher::EventDispatcher, registry::ConnectionRegistry};
use crate::services::{
    cache::{Cache, MemoryCache},
    identity::IdentityProvider,
    presence::PresenceTracker,
    thread_store::ThreadStore,
    unseen::UnseenAggregator,
};

/// Application state shared across all routes and the socket gateway.
///
/// The connection registry lives here, injected into handlers, never reached
/// through a global.
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Option<sqlx::PgPool>,
    pub store: Arc<dyn ThreadStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub cache: Arc<dyn Cache>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub presence: Arc<PresenceTracker>,
    pub unseen: Arc<UnseenAggregator>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("has_pool", &self.pool.is_some())
            .finish()
    }
}

impl AppState {
    /// Wires the engine components around a store and identity provider.
    pub fn build(
        config: Arc<Config>,
        pool: Option<sqlx::PgPool>,
        store: Arc<dyn ThreadStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Arc<Self> {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry)));
        let presence = Arc::new(PresenceTracker::new(
            Arc::clone(&store),
            config.chat.typing_window(),
        ));
        let unseen = Arc::new(UnseenAggregator::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Duration::from_secs(config.chat.unseen_ttl_secs),
        ));

        Arc::new(Self {
            config,
            pool,
            store,
            identity,
            cache,
            registry,
            dispatcher,
            presence,
            unseen,
        })
    }
}
