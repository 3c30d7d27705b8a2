use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use parlor_auth::Mailer;
use parlor_auth::mailer::{HttpMailer, LogMailer};
use parlor_db::{AccountStore, Database};
use parlor_server::config::Config;
use parlor_server::maintenance::{SWEEP_INTERVAL, run_maintenance_loop};
use parlor_server::{build_router, build_state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn AccountStore> = Arc::new(Database::open(&config.db_path)?);

    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(mail) => Arc::new(HttpMailer::new(
            mail.endpoint.clone(),
            mail.api_key.clone(),
            mail.from.clone(),
        )),
        None => {
            warn!("PARLOR_MAIL_ENDPOINT not set; login links will only be logged");
            Arc::new(LogMailer)
        }
    };

    let state = build_state(&config, store, mailer);

    tokio::spawn(run_maintenance_loop(
        state.rate_guard.clone(),
        state.sessions.clone(),
        state.dispatcher.clone(),
        SWEEP_INTERVAL,
    ));

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parlor listening on {} (public URL {})", addr, config.public_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
