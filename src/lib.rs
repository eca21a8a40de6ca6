pub mod models {
    pub mod models;
}

pub mod core {
    pub mod db;
    pub mod errors;
    pub mod helpers;
    pub mod query_params;
    pub mod spin_store;
    pub mod store;
}

pub mod auth;
pub mod blobs;
pub mod config;
pub mod feed;
pub mod handlers;
pub mod ledger;
#[cfg(not(target_arch = "wasm32"))]
pub mod native;
pub mod router;
pub mod users;
pub mod visibility;

#[cfg(target_arch = "wasm32")]
use spin_sdk::http::{IntoResponse, Request};
#[cfg(target_arch = "wasm32")]
use spin_sdk::http_component;

#[cfg(target_arch = "wasm32")]
use crate::auth::IdentityEvents;
#[cfg(target_arch = "wasm32")]
use crate::core::spin_store::SpinKvStore;
#[cfg(target_arch = "wasm32")]
use crate::handlers::Services;

#[cfg(target_arch = "wasm32")]
#[http_component]
fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
    let store = SpinKvStore::open_default()?;
    if config::seed_demo() {
        crate::core::db::seed_demo_data(&store, &store)?;
    }

    let identity = IdentityEvents::new();
    let svc = Services {
        store: &store,
        blobs: &store,
        identity: &identity,
    };
    Ok(router::route(&svc, &req))
}
