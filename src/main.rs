use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;
use windows_mdm_server::{AppState, Config, routes};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "server exited");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load_from(&config_path)?;
    config.create_storage_dirs()?;

    let state = AppState::with_config(config)?;

    // Generating a fresh identity can take a while, so get it out of the
    // way before the first device asks for one.
    let certificates = state.certificates.clone();
    let identity = tokio::task::spawn_blocking(move || certificates.identity()).await??;
    tracing::info!(
        subject = %identity.subject(),
        fingerprint = identity.fingerprint(),
        "identity ready"
    );

    let service = &state.config.service;
    let address = SocketAddr::new(service.bind_address, service.port);
    let tls = match (&service.tls_cert_path, &service.tls_key_path) {
        (Some(cert), Some(key)) => Some(RustlsConfig::from_pem_file(cert, key).await?),
        _ => None,
    };

    let app = routes::create_routes(state).into_make_service();
    match tls {
        Some(tls) => {
            tracing::info!(%address, "listening with TLS");
            axum_server::bind_rustls(address, tls).serve(app).await?;
        }
        None => {
            tracing::info!(%address, "listening without TLS");
            axum_server::bind(address).serve(app).await?;
        }
    }

    Ok(())
}
