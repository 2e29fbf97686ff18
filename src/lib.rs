use std::{future::Future, str::FromStr, sync::Arc};

use axum::{extract::DefaultBodyLimit, routing, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod listing_view;
pub mod login_view;
pub mod manager;
pub mod new_listing_view;
pub mod telemetry;
pub mod uploads;
pub mod utils;

pub use config::Config;

use broadcast::Hub;
use manager::login_manager::LoginManager;

pub const SESSION_ID_KEY: &str = "sid";

pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub hub: Arc<Hub>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        Self {
            pool,
            config,
            hub: Arc::new(Hub::new()),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let upload_dir = state.config.upload_dir.clone();
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", routing::get(listing_view::index))
        .route(
            "/listings/new",
            routing::get(new_listing_view::new_listing).post(new_listing_view::try_new_listing),
        )
        .route("/listings/:id", routing::get(listing_view::detail))
        .route(
            "/login",
            routing::get(login_view::login).post(login_view::try_login),
        )
        .route(
            "/register",
            routing::get(login_view::register).post(login_view::try_register),
        )
        .route("/logout", routing::post(login_view::logout))
        .route("/healthz", routing::get(|| async { "ok" }))
        .nest("/api", api::router())
        .route("/ws", routing::get(api::ws::connect))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

pub struct Application {
    state: Arc<AppState>,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = connect(&config.database_url).await?;
        tracing::info!(database_url = %config.database_url, "database ready");

        if let Some(admin) = &config.admin {
            LoginManager::new(&pool)
                .ensure_admin(&admin.email, &admin.password)
                .await
                .map_err(|e| anyhow::anyhow!("bootstrap admin: {e}"))?;
        }
        tokio::fs::create_dir_all(&config.upload_dir).await?;

        Ok(Self {
            state: Arc::new(AppState::new(pool, config)),
        })
    }

    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let config = &self.state.config;
        let addr: std::net::SocketAddr = config.bind_addr().parse()?;
        let sweeper = broadcast::spawn_presence_sweeper(
            self.state.pool.clone(),
            self.state.hub.clone(),
            config.presence.clone(),
        );

        tracing::info!("listening on {addr}");
        let result = axum::Server::bind(&addr)
            .serve(build_router(self.state.clone()).into_make_service())
            .with_graceful_shutdown(shutdown)
            .await;

        sweeper.abort();
        self.state.pool.close().await;
        result.map_err(Into::into)
    }
}
