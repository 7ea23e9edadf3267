use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use alveo_serve::accel::Backend;
use alveo_serve::client::InferenceClient;
use alveo_serve::config::{LoggingConfig, ServiceConfig};
use alveo_serve::wire::DEFAULT_MAX_MESSAGE_SIZE;

#[derive(Parser)]
#[command(
    name = "alveo-serve",
    about = "Serve a single FPGA-accelerated model over RPC",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the accelerator and serve inference requests
    Serve {
        /// Kernel image (.xclbin); discovered from search_dirs when omitted
        kernel_image: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Listen address (overrides config)
        #[arg(long)]
        listen: Option<String>,

        /// Maximum examples per submission (overrides config)
        #[arg(long)]
        capacity: Option<usize>,

        /// Device backend (overrides config)
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },

    /// Query a running server for its model status
    Status {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:8081")]
        addr: String,
    },

    /// Send one inference request from a file of little-endian FP32 values
    Infer {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:8081")]
        addr: String,

        /// Raw input file
        #[arg(long)]
        input: PathBuf,

        /// Request id echoed in the reply
        #[arg(long, default_value = "0")]
        id: u64,

        /// Write the raw output bytes to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    ShowConfig {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            kernel_image,
            config,
            listen,
            capacity,
            backend,
        } => {
            let mut cfg = ServiceConfig::resolve(config.as_deref())?;
            if let Some(path) = kernel_image {
                cfg.accelerator.kernel_image = Some(path);
            }
            if let Some(addr) = listen {
                cfg.network.listen_address = addr;
            }
            if let Some(n) = capacity {
                cfg.accelerator.max_stream_capacity = n;
            }
            if let Some(b) = backend {
                cfg.accelerator.backend = b;
            }

            alveo_serve::init_tracing(&cfg.logging);
            tracing::info!(
                listen = %cfg.network.listen_address,
                model = %cfg.model.name,
                capacity = cfg.accelerator.max_stream_capacity,
                "starting alveo-serve"
            );
            alveo_serve::serve(cfg).await?;
        }
        Commands::Status { addr } => {
            alveo_serve::init_tracing(&quiet_logging());
            let mut client = InferenceClient::connect(&addr, DEFAULT_MAX_MESSAGE_SIZE).await?;
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Infer {
            addr,
            input,
            id,
            output,
        } => {
            alveo_serve::init_tracing(&quiet_logging());
            let raw = std::fs::read(&input)
                .with_context(|| format!("failed to read input file: {}", input.display()))?;
            let mut client = InferenceClient::connect(&addr, DEFAULT_MAX_MESSAGE_SIZE).await?;
            let resp = client.infer(id, raw).await?;

            println!("{}", serde_json::to_string_pretty(&resp.request_status)?);
            println!("{}", serde_json::to_string_pretty(&resp.meta_data)?);
            if let (Some(path), Some(raw_out)) = (output, resp.raw_output.first()) {
                std::fs::write(&path, raw_out.as_bytes())
                    .with_context(|| format!("failed to write output file: {}", path.display()))?;
                println!("wrote {} bytes to {}", raw_out.as_bytes().len(), path.display());
            }
        }
        Commands::ShowConfig { config } => {
            let cfg = ServiceConfig::resolve(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

fn quiet_logging() -> LoggingConfig {
    LoggingConfig {
        level: "warn".into(),
        json: false,
    }
}
