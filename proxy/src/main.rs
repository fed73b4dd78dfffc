//! `payload-proxy` — the thin HTTP/2 front door and upstream client that
//! wire `payload-proxy-core`'s descriptor-driven rewriter to a real
//! connection, standing in for the generic L7 proxy fabric that would
//! normally own TLS termination and routing. Structured as thin plumbing
//! over `payload-proxy-core`: parse arguments, build the core's state
//! once, then hand off to the transport.

mod body;
mod service;
mod settings;
mod upstream;

use std::sync::Arc;

use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use payload_proxy_core::{
    BatchingCodec, DescriptorStore, IdentityCodec, IndexConfig, InMemoryExternalStore, InterceptionPipeline,
    PayloadCodec, PayloadFieldIndex,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::service::{CodecFactory, ProxyService};
use crate::settings::{CodecStrategy, Settings};
use crate::upstream::UpstreamClient;

#[derive(Parser, Debug)]
#[command(name = "payload-proxy", about = "Payload interception proxy for workflow gRPC calls")]
struct Cli {
    /// Optional TOML config file; environment variables (PAYLOAD_PROXY_*) always override it.
    #[arg(short = 'c', long = "config")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(&settings.log);

    let descriptor_bytes = std::fs::read(&settings.descriptor_file_path).map_err(|e| {
        format!(
            "failed to read descriptor file '{}': {e}",
            settings.descriptor_file_path.display()
        )
    })?;
    let store = DescriptorStore::load(&descriptor_bytes)?;
    let index = PayloadFieldIndex::build(
        &store,
        &IndexConfig {
            scan_package_prefix: settings.scan_package_prefix.clone(),
            exclude_indexed_attributes_container: settings.exclude_indexed_attributes_container,
            indexed_attributes_container_type: settings.indexed_attributes_container_type.clone(),
        },
    );
    let pipeline = Arc::new(InterceptionPipeline::new(store, index));

    if settings.exclude_indexed_attributes_container && settings.indexed_attributes_container_type.is_none() {
        warn!("exclude_indexed_attributes_container is set but indexed_attributes_container_type is empty; the exclusion will never match");
    }

    let codec_factory = build_codec_factory(settings.codec_strategy);
    let upstream = UpstreamClient::new(&settings.upstream_addr)?;
    let proxy_service = ProxyService::new(pipeline, codec_factory, upstream);

    let listener = TcpListener::bind(settings.listen_addr).await?;
    info!(addr = %settings.listen_addr, upstream = %settings.upstream_addr, "payload-proxy listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "failed to accept connection");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let hyper_service = TowerToHyperService::new(proxy_service.clone());

        tokio::spawn(async move {
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, hyper_service)
                .await
            {
                error!(error = %err, peer = %peer_addr, "connection error");
            }
        });
    }
}

/// Selects the concrete codec implementation per `codec-strategy`.
/// Each invocation builds a fresh per-call instance; the batching codec's
/// buffers and pending-resolution table must never be shared across calls,
/// only the external store handle behind it may be.
fn build_codec_factory(strategy: CodecStrategy) -> CodecFactory {
    match strategy {
        CodecStrategy::DefaultInlineTransform => {
            Arc::new(|| Box::new(IdentityCodec) as Box<dyn PayloadCodec + Sync>)
        }
        CodecStrategy::BatchedExternalStore => {
            let store = Arc::new(InMemoryExternalStore::default());
            Arc::new(move || {
                let store = Arc::clone(&store);
                Box::new(BatchingCodec::new(store)) as Box<dyn PayloadCodec + Sync>
            })
        }
    }
}

fn init_tracing(log: &settings::LogSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log.level.clone()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
