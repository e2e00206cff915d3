//! KZ Records Ingestion Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Operator (curl, admin UI)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /health  /admin/filters  /admin/quarantine/*  /stats   ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │               Background Services (tokio tasks)          ││
//! │  │  RecordScraper    BanReconciler    QuarantineEngine     ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL Repository    Checkpoint File               ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Global API (rate limited)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kz_records_core::{
    db::{BanRepository, QuarantineRepository, RecordRepository},
    routes,
    services::{GlobalApiClient, RecordSource, ScrapeStats},
    AdminService, AppState, BanReconciler, Config, Database, QuarantineEngine, RecordScraper,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kz_records_core=debug,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting KZ records ingestion core");

    let config = Arc::new(Config::from_env()?);
    tracing::info!(production = config.is_production(), "Configuration loaded");

    let state = match start_services(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            // 저장소 없이는 어떤 서브시스템도 시작하지 않음
            tracing::error!(error = %e, "storage unavailable, serving /health only");
            AppState::degraded(config.clone())
        }
    };

    let app = routes::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// DB 연결 → 마이그레이션 → 서비스 구성 및 백그라운드 task 시작
async fn start_services(config: Arc<Config>) -> anyhow::Result<AppState> {
    let db = Arc::new(Database::connect(&config.database_url, config.db_lock_timeout_ms).await?);
    tracing::info!("Database connected");

    db.run_migrations().await?;
    tracing::info!("Migrations completed");

    let records: Arc<dyn RecordRepository> = db.clone();
    let bans: Arc<dyn BanRepository> = db.clone();
    let quarantine: Arc<dyn QuarantineRepository> = db.clone();

    let reconciler = Arc::new(BanReconciler::new(config.reconciler.clone(), bans.clone()));
    let engine = Arc::new(QuarantineEngine::new(quarantine, config.filters_path.clone()));
    let mut admin = AdminService::new(engine).with_reconciler(reconciler.clone());

    if config.scraper.enabled {
        let source: Arc<dyn RecordSource> = Arc::new(GlobalApiClient::new(&config.remote)?);
        let scraper = Arc::new(
            RecordScraper::resume(
                config.scraper.clone(),
                source,
                records,
                bans,
                reconciler.clone(),
                Arc::new(ScrapeStats::new()),
            )
            .await?,
        );
        admin = admin.with_scraper(scraper.clone());
        tokio::spawn(scraper.run());
    } else {
        tracing::info!("Record scraper disabled");
    }

    if config.reconciler.enabled {
        tokio::spawn(reconciler.run());
    } else {
        tracing::info!("Ban reconciler disabled");
    }

    Ok(AppState::new(db, Arc::new(admin), config))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
