//! Shared fixtures for the in-crate test suite: a fully wired [`AppState`]
//! over the memory store and a static identity provider.

use std::sync::Arc;

use uuid::Uuid;

use shared::config::Config;
use shared::models::Thread;

use crate::app_state::AppState;
use crate::services::identity::{IdentityProvider, StaticIdentity};
use crate::services::thread_store::memory::MemoryThreadStore;
use crate::services::thread_store::{NewGuest, NewThread, ThreadStore};

pub(crate) const TEST_TOKEN: &str = "test-session-token";

pub(crate) struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryThreadStore>,
    pub member_id: Uuid,
    pub website_id: Uuid,
}

pub(crate) async fn harness() -> Harness {
    let config = Config::default();
    let store = Arc::new(MemoryThreadStore::new());
    let member_id = Uuid::new_v4();
    let website_id = store.register_website(member_id).await;

    let identity: Arc<dyn IdentityProvider> =
        Arc::new(StaticIdentity::new().with_token(TEST_TOKEN, member_id));

    let state = AppState::build(
        Arc::new(config),
        None,
        Arc::clone(&store) as Arc<dyn ThreadStore>,
        identity,
    );

    Harness {
        state,
        store,
        member_id,
        website_id,
    }
}

impl Harness {
    pub(crate) async fn open_thread(&self) -> Thread {
        self.store
            .create_thread(NewThread {
                website_id: self.website_id,
                member_id: self.member_id,
                guest: NewGuest {
                    name: Some("Visitor".into()),
                    ..NewGuest::default()
                },
            })
            .await
            .expect("memory store create_thread")
    }
}
