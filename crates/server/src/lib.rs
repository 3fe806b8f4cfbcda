mod error;
pub mod logger;
mod tagging;

use std::{fmt::Write, net::SocketAddr, sync::Arc};

use axum::{Router, extract::State, routing::get};
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use ip_tagging::{FilterContext, FilterHandle, Runtime, StatsRegistry};
use tokio::net::TcpListener;

pub use crate::tagging::IpTaggingLayer;

pub(crate) type Result<T> = std::result::Result<T, error::Error>;

pub struct ServeConfig {
    pub listen_address: SocketAddr,
    pub config: Config,
}

pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> crate::Result<()> {
    let stats = StatsRegistry::default();

    // One immutable snapshot per configuration epoch; the handle allows a
    // future reload path to publish a replacement atomically.
    let filter = config.ip_tagging.enabled.then(|| {
        Arc::new(FilterHandle::new(FilterContext::new(
            &config.ip_tagging,
            Runtime::new(&config.runtime),
            stats.clone(),
        )))
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats_dump))
        .with_state(stats)
        .layer(IpTaggingLayer::new(config.server.client_ip.clone(), filter));

    let listener = TcpListener::bind(listen_address).await.map_err(error::Error::Bind)?;

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| error::Error::Tls(e.to_string()))?;

            log::info!("Listening on https://{listen_address}");

            let std_listener = listener.into_std().map_err(error::Error::Bind)?;

            axum_server::from_tcp_rustls(std_listener, rustls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(|e| error::Error::Server(std::io::Error::other(e)))?;
        }
        None => {
            log::info!("Listening on http://{listen_address}");

            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(error::Error::Server)?;
        }
    }

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

/// Plain-text dump of every counter, one `name: value` line, sorted by name.
async fn stats_dump(State(stats): State<StatsRegistry>) -> String {
    let mut output = String::new();

    for (name, value) in stats.snapshot() {
        let _ = writeln!(output, "{name}: {value}");
    }

    output
}
