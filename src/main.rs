use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use ticketbot::config::AppConfig;
use ticketbot::directory::UserDirectory;
use ticketbot::keywords::KeywordStore;
use ticketbot::lifecycle::Coordinator;
use ticketbot::server::{build_router, AppState};
use ticketbot::store::TicketStore;
use ticketbot::transport::HttpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env();
    info!("starting ticketbot on {}", config.bind_addr());

    let store = TicketStore::open(&config.data.db_path)?;
    let keywords = Arc::new(KeywordStore::load(&config.data.keywords_file));
    let directory = Arc::new(UserDirectory::load(&config.data.users_file));
    let transport = Arc::new(HttpTransport::new(config.gateway_url.clone()));

    let coordinator = Coordinator::new(store, transport, keywords, directory, &config);
    let state = Arc::new(AppState { coordinator });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
