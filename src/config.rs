//! TOML configuration for the inference service.
//!
//! Layered the usual way: an explicit path, then `ALVEO_SERVE_CONFIG`, then
//! `/etc/alveo-serve/alveo-serve.toml`, then compiled-in defaults. Values are
//! read once at startup and never change afterwards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accel::{Backend, DeviceSelector};
use crate::layout::{DataType, LayoutError, TensorLayout};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "ALVEO_SERVE_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/alveo-serve/alveo-serve.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the service process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub accelerator: AcceleratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded service configuration");
        Ok(config)
    }

    /// Resolve the configuration for this process.
    ///
    /// An explicit path must load; the environment and system locations fall
    /// through to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback", CONFIG_ENV
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address and port of the RPC listener.
    pub listen_address: String,
    /// Largest frame accepted or sent, in bytes.
    pub max_message_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8081".to_string(),
            max_message_size: 1_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Description of the single deployed model, as reported by `GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// Advertised maximum batch size.
    pub max_batch_size: u32,
    pub input_name: String,
    pub input_dims: Vec<u64>,
    pub output_name: String,
    pub output_dims: Vec<u64>,
    pub data_type: DataType,
    /// Per-example output byte size written into every inference reply.
    ///
    /// Deployed clients expect 8 here even though one FP32 output is 4 bytes.
    pub output_batch_byte_size: u64,
    pub server_id: String,
    pub model_version: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "facile".to_string(),
            max_batch_size: 160_000,
            input_name: "input".to_string(),
            input_dims: vec![15],
            output_name: "output/BiasAdd".to_string(),
            output_dims: vec![1],
            data_type: DataType::Fp32,
            output_batch_byte_size: 8,
            server_id: "inference:0".to_string(),
            model_version: -1,
        }
    }
}

impl ModelConfig {
    /// Per-example buffer layout implied by the tensor dims.
    pub fn tensor_layout(&self) -> Result<TensorLayout, LayoutError> {
        let features = element_count(&self.input_name, &self.input_dims)?;
        let out_features = element_count(&self.output_name, &self.output_dims)?;
        TensorLayout::new(features, out_features, self.data_type)
    }
}

fn element_count(name: &str, dims: &[u64]) -> Result<usize, LayoutError> {
    dims.iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| LayoutError::TooManyElements(name.to_string()))
}

// ---------------------------------------------------------------------------
// Accelerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    pub backend: Backend,
    pub device_index: usize,
    /// Kernel image to load. Discovered by naming convention when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_image: Option<PathBuf>,
    pub kernel_name: String,
    /// Directories searched during discovery.
    pub search_dirs: Vec<PathBuf>,
    /// Examples the preallocated buffers hold per submission.
    pub max_stream_capacity: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Emulated,
            device_index: 0,
            kernel_image: None,
            kernel_name: "alveo_hls4ml".to_string(),
            search_dirs: vec![PathBuf::from("."), PathBuf::from("xclbin")],
            max_stream_capacity: 160_000,
        }
    }
}

impl AcceleratorConfig {
    pub fn selector(&self) -> DeviceSelector {
        DeviceSelector {
            backend: self.backend,
            index: self.device_index,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = ServiceConfig::default();

        assert_eq!(cfg.network.listen_address, "0.0.0.0:8081");
        assert_eq!(cfg.network.max_message_size, 1_000_000);

        assert_eq!(cfg.model.name, "facile");
        assert_eq!(cfg.model.max_batch_size, 160_000);
        assert_eq!(cfg.model.input_dims, vec![15]);
        assert_eq!(cfg.model.output_name, "output/BiasAdd");
        assert_eq!(cfg.model.output_batch_byte_size, 8);
        assert_eq!(cfg.model.model_version, -1);

        assert_eq!(cfg.accelerator.backend, Backend::Emulated);
        assert_eq!(cfg.accelerator.kernel_name, "alveo_hls4ml");
        assert!(cfg.accelerator.kernel_image.is_none());
        assert_eq!(cfg.accelerator.max_stream_capacity, 160_000);

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_default_layout() {
        let layout = ModelConfig::default().tensor_layout().unwrap();
        assert_eq!(layout.feature_count, 15);
        assert_eq!(layout.out_feature_count, 1);
        assert_eq!(layout.element_width, 4);
        assert_eq!(layout.input_stride(), 60);
    }

    #[test]
    fn test_oversized_dims_rejected() {
        let model = ModelConfig {
            input_dims: vec![u64::MAX, 2],
            ..ModelConfig::default()
        };
        assert_eq!(
            model.tensor_layout().unwrap_err(),
            LayoutError::TooManyElements("input".into())
        );

        let model = ModelConfig {
            output_dims: vec![1 << 40, 1 << 40],
            ..ModelConfig::default()
        };
        assert_eq!(
            model.tensor_layout().unwrap_err(),
            LayoutError::TooManyElements("output/BiasAdd".into())
        );

        let model = ModelConfig {
            input_dims: vec![3, 5],
            ..ModelConfig::default()
        };
        assert_eq!(model.tensor_layout().unwrap().feature_count, 15);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[network]
listen_address = "127.0.0.1:9000"
max_message_size = 4000000

[model]
name = "jets"
input_dims = [5, 3]
output_dims = [2]

[accelerator]
backend = "hardware"
device_index = 1
kernel_image = "/opt/xclbin/alveo_hls4ml.hw.xclbin"
max_stream_capacity = 4096

[logging]
level = "debug"
json = true
"#;

        let cfg: ServiceConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.network.listen_address, "127.0.0.1:9000");
        assert_eq!(cfg.network.max_message_size, 4_000_000);
        assert_eq!(cfg.model.name, "jets");
        assert_eq!(cfg.model.output_name, "output/BiasAdd");
        let layout = cfg.model.tensor_layout().unwrap();
        assert_eq!(layout.feature_count, 15);
        assert_eq!(layout.out_feature_count, 2);
        assert_eq!(cfg.accelerator.backend, Backend::Hardware);
        assert_eq!(cfg.accelerator.selector().index, 1);
        assert_eq!(
            cfg.accelerator.kernel_image,
            Some(PathBuf::from("/opt/xclbin/alveo_hls4ml.hw.xclbin"))
        );
        assert_eq!(cfg.accelerator.max_stream_capacity, 4096);
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: ServiceConfig = toml::from_str("").unwrap();
        let defaults = ServiceConfig::default();
        assert_eq!(cfg.network.listen_address, defaults.network.listen_address);
        assert_eq!(cfg.model.max_batch_size, defaults.model.max_batch_size);
        assert_eq!(
            cfg.accelerator.max_stream_capacity,
            defaults.accelerator.max_stream_capacity
        );
    }

    #[test]
    fn test_unknown_data_type_rejected() {
        let result: std::result::Result<ServiceConfig, _> = toml::from_str(
            r#"
[model]
data_type = "int8"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alveo-serve.toml");
        std::fs::write(
            &path,
            r#"
[accelerator]
max_stream_capacity = 32
"#,
        )
        .unwrap();

        let cfg = ServiceConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.accelerator.max_stream_capacity, 32);
    }

    #[test]
    fn test_resolve_missing_explicit_path_errors() {
        let result = ServiceConfig::resolve(Some(Path::new("/nonexistent/alveo-serve.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = ServiceConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: ServiceConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg.network.listen_address, back.network.listen_address);
        assert_eq!(cfg.model.output_dims, back.model.output_dims);
        assert_eq!(cfg.accelerator.search_dirs, back.accelerator.search_dirs);
    }
}
