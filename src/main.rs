use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maskgate::config::{self, Config};
use maskgate::models::credential::Plan;
use maskgate::store::credentials::{CredentialError, CredentialStore};
use maskgate::store::{RedisStore, StateStore};
use maskgate::{api, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Export spans over OTLP only when an endpoint is configured.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "maskgate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json_logs = std::env::var("MASKGATE_LOG_FORMAT").is_ok_and(|v| v == "json");

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "maskgate=debug,tower_http=debug".into()),
        ))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Key { command }) => {
            let store = connect_store(&cfg).await?;
            let credentials = CredentialStore::new(store, cfg.credential_ttl);
            handle_key_command(command, &credentials).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

async fn connect_store(cfg: &Config) -> anyhow::Result<Arc<dyn StateStore>> {
    tracing::info!("Connecting to Redis...");
    let store = RedisStore::connect(&cfg.redis_url, cfg.store_timeout).await?;
    store.ping().await?;
    tracing::info!("Connected to Redis");
    Ok(Arc::new(store))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    if cfg.admin_token.is_none() {
        tracing::warn!("MASKGATE_ADMIN_TOKEN is not set; paid plans cannot be issued over HTTP");
    }

    let store = connect_store(&cfg).await?;
    let state = Arc::new(AppState::new(store, cfg)?);
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("maskgate listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("maskgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}

async fn handle_key_command(
    cmd: cli::KeyCommands,
    credentials: &CredentialStore,
) -> anyhow::Result<()> {
    match cmd {
        cli::KeyCommands::Issue { plan } => {
            let plan: Plan = plan.parse().map_err(anyhow::Error::msg)?;
            let key = credentials.issue(plan).await?;
            println!(
                "API key issued:\n  Key:  {}\n  Plan: {}\n  Use:  X-API-Key: {}",
                key, plan, key
            );
        }
        cli::KeyCommands::Revoke { key } => match credentials.revoke(&key).await {
            Ok(()) => println!("API key revoked."),
            Err(CredentialError::NotFound) => println!("API key not found."),
            Err(e) => return Err(e.into()),
        },
        cli::KeyCommands::Describe { key } => match credentials.describe(&key).await {
            Ok(desc) => {
                let expires = desc
                    .expires_in
                    .map(|s| format!("{}d {}h", s / 86_400, (s % 86_400) / 3_600))
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<12} {}\n{:<12} {}\n{:<12} {}\n{:<12} {}\n{:<12} {}",
                    "ACTIVE", desc.record.active,
                    "PLAN", desc.record.plan,
                    "CREATED", desc.record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    "USAGE", desc.usage_count,
                    "EXPIRES IN", expires,
                );
            }
            Err(CredentialError::NotFound) => println!("API key not found."),
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}
