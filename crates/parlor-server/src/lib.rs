pub mod config;
pub mod maintenance;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parlor_api::auth::{self, AppState, AppStateInner};
use parlor_api::middleware::{ClientAddr, MaybeSession};
use parlor_api::{handles, pages};
use parlor_auth::{CredentialManager, Mailer, RateGuard, SessionBinder};
use parlor_db::AccountStore;
use parlor_gateway::connection;
use parlor_gateway::dispatcher::Dispatcher;

use crate::config::Config;

/// Wire the shared services around one account store and mailer.
pub fn build_state(config: &Config, store: Arc<dyn AccountStore>, mailer: Arc<dyn Mailer>) -> AppState {
    let sessions = SessionBinder::new(
        store.clone(),
        &config.secret_key,
        chrono::Duration::hours(config.session_idle_hours),
    );
    let rate_guard = Arc::new(RateGuard::new());
    let dispatcher = Dispatcher::new(sessions.clone(), rate_guard.clone());

    Arc::new(AppStateInner {
        credentials: CredentialManager::new(store, mailer, &config.public_url),
        sessions,
        rate_guard,
        dispatcher,
        secure_cookies: config.secure_cookies(),
        trust_proxy: config.trust_proxy,
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::index))
        .route("/login", post(auth::login))
        .route("/verify/{token}", get(auth::verify))
        .route("/set_handle", get(handles::set_handle_form).post(handles::set_handle))
        .route("/chat", get(pages::chat))
        .route("/logout", get(auth::logout))
        .route("/health", get(pages::health))
        .route("/gateway", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    MaybeSession(session): MaybeSession,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, session, client))
}
