//! alveo-serve -- one model, one FPGA card, one RPC endpoint.
//!
//! Callers send flattened FP32 feature matrices; the service copies them into
//! the card's preallocated buffers, runs the kernel and returns the raw
//! results. Concurrent calls are collapsed onto the single card by
//! [`gate::ConcurrencyGate`].

pub mod accel;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod layout;
pub mod rpc;
pub mod server;
pub mod service;
pub mod status;
pub mod wire;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::accel::{open_device, AcceleratorSession, KernelImage};
use crate::config::{LoggingConfig, ServiceConfig};
use crate::gate::ConcurrencyGate;
use crate::server::InferenceServer;
use crate::service::InferenceService;

/// Install the global tracing subscriber. `RUST_LOG` overrides `logging.level`.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    if logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Open the card and build the request path. Any error here is fatal.
pub fn build_service(config: &ServiceConfig) -> Result<InferenceService> {
    let layout = config
        .model
        .tensor_layout()
        .context("invalid model tensor configuration")?;

    let capacity = config.accelerator.max_stream_capacity;
    if capacity == 0 || u32::try_from(capacity).is_err() {
        anyhow::bail!("max_stream_capacity must be between 1 and {}", u32::MAX);
    }

    // 1. Device
    let device = open_device(config.accelerator.selector()).context("no usable accelerator")?;

    // 2. Kernel image
    let image_path = match &config.accelerator.kernel_image {
        Some(path) => path.clone(),
        None => KernelImage::discover(
            &device.info().name,
            &config.accelerator.kernel_name,
            &config.accelerator.search_dirs,
        )
        .context("failed to locate kernel image")?,
    };
    let image = KernelImage::load(&image_path).context("failed to load kernel image")?;

    // 3. Buffers and kernel arguments
    let session = AcceleratorSession::with_device(
        device,
        &image,
        &config.accelerator.kernel_name,
        layout,
        capacity,
    )
    .context("failed to initialize accelerator session")?;

    // 4. Request path
    let gate = Arc::new(ConcurrencyGate::new(session));
    InferenceService::new(config.model.clone(), gate).context("invalid model configuration")
}

/// Start the service and run until Ctrl-C.
pub async fn serve(config: ServiceConfig) -> Result<()> {
    let service = Arc::new(build_service(&config)?);
    let server = InferenceServer::new(&config.network, Arc::clone(&service));
    let listener = server.bind().await?;

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!(
        submissions = service.gate().grants(),
        "inference server stopped"
    );
    Ok(())
}
