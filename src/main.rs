mod clock;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod scheduling;
mod store;

use std::sync::Arc;

use crate::{
    clock::SystemClock,
    config::{Config, StorageBackend},
    models::AppState,
    scheduling::{
        events::{relay, ChannelEventSink, LogEventSink},
        window::ClinicTime,
        ServiceSettings,
    },
    store::{MemoryStore, PgStore},
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

/// Events buffered between the services and the log relay.
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let settings = ServiceSettings {
        commit_timeout: cfg.commit_timeout,
        clinic_time: ClinicTime::new(cfg.clinic_offset),
    };

    let (events, event_rx) = ChannelEventSink::with_capacity(EVENT_BUFFER);
    tokio::spawn(relay(event_rx, LogEventSink));
    let events = Arc::new(events);
    let clock = Arc::new(SystemClock);

    let state = match cfg.storage {
        StorageBackend::Postgres => {
            let pool = db::connect_pg(&cfg.database).await?;
            let store = Arc::new(PgStore::new(pool, cfg.commit_timeout));
            AppState::assemble(store, clock, events, settings)
        }
        StorageBackend::Memory => {
            tracing::warn!("STORAGE=memory: appointments are lost on restart");
            AppState::assemble(Arc::new(MemoryStore::new()), clock, events, settings)
        }
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(
        storage = ?cfg.storage,
        clinic_offset = %cfg.clinic_offset,
        "Listening on http://{}",
        cfg.bind_addr
    );
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
