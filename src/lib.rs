pub mod clock;
pub mod config;
pub mod estimation;
pub mod logging;
pub mod realtime;
pub mod response;
pub mod routes;
pub mod state;
pub mod store;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::AppState;
use crate::store::{Store, StoreError};

/// Build the full application router, connecting the store on the way.
pub async fn create_app(config: Config) -> Result<Router, StoreError> {
    let store = Store::connect(&config.database_url).await?;
    Ok(app_with_store(config, store))
}

/// Assemble the router around an already connected store.
pub fn app_with_store(config: Config, store: Store) -> Router {
    let state = AppState::new(config, store);
    routes::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
