use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use classment_server::config::Config;
use classment_server::email::Mailer;
use classment_server::state::AppState;
use classment_server::{db, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let pool = db::connect(&config).await.context("connecting to postgres")?;
    db::migrate(&pool).await.context("running migrations")?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .context("creating upload directory")?;

    let mailer = Mailer::new(&config.smtp).context("building smtp mailer")?;

    let addr = config.bind_addr;
    let state = AppState::new(config, pool, mailer);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "classment-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
