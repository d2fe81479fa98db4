use clap::Parser;
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursepay_core::cli::{Cli, Commands, DbCommands};
use coursepay_core::gateway::GatewayClient;
use coursepay_core::services::{
    sweeper, CheckoutSettings, DbActivationSink, SettlementService,
};
use coursepay_core::{cli, config, create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Cli::parse();
    let config = config::Config::from_env()?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Sweep => {
            let service = build_settlement_service(&config).await?;
            cli::handle_sweep(&service).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

async fn serve(config: config::Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let settlement = Arc::new(build_settlement_service_with_pool(&config, pool.clone())?);
    tracing::info!(
        "Gateway client initialized with URL: {}",
        config.gateway_base_url
    );

    // Background expiry sweep
    tokio::spawn(sweeper::run_sweeper(
        settlement.clone(),
        config.sweep_interval_secs,
    ));

    let app_state = AppState {
        db: pool,
        settlement,
    };

    let app = create_app(app_state).layer(cors_layer(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn build_settlement_service(config: &config::Config) -> anyhow::Result<SettlementService> {
    let pool = db::create_pool(config).await?;
    build_settlement_service_with_pool(config, pool)
}

fn build_settlement_service_with_pool(
    config: &config::Config,
    pool: sqlx::PgPool,
) -> anyhow::Result<SettlementService> {
    let gateway = GatewayClient::new(
        config.gateway_base_url.clone(),
        config.gateway_merchant_code.clone(),
        config.gateway_api_key.clone(),
        config.gateway_callback_secret.clone(),
    );

    let activation = Arc::new(DbActivationSink::new(pool.clone()));

    Ok(SettlementService::new(
        pool,
        gateway,
        config.fee_policy()?,
        activation,
        CheckoutSettings {
            invoice_prefix: config.invoice_prefix.clone(),
            return_url: config.checkout_return_url.clone(),
            callback_url: config.callback_url.clone(),
            payment_window: chrono::Duration::hours(config.payment_window_hours),
        },
    ))
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        None | Some("*") => CorsLayer::new().allow_origin(Any),
        Some(list) => {
            let origins: Vec<axum::http::HeaderValue> = list
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new().allow_origin(origins)
        }
    }
}
