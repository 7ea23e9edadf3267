//! Loading and locating the precompiled kernel image (`.xclbin`).

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::accel::AccelError;

/// Every xclbin container starts with this tag.
pub const XCLBIN_MAGIC: &[u8; 8] = b"xclbin2\0";

/// Environment variable naming the emulation target (`sw_emu`, `hw_emu`).
pub const EMULATION_MODE_ENV: &str = "XCL_EMULATION_MODE";

/// A kernel image read fully into memory.
#[derive(Clone)]
pub struct KernelImage {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl KernelImage {
    /// Read and validate the image at `path`.
    pub fn load(path: &Path) -> Result<Self, AccelError> {
        let bytes = std::fs::read(path).map_err(|e| AccelError::KernelImage {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let image = Self::from_bytes(path, bytes)?;
        info!(path = %path.display(), size_bytes = image.bytes.len(), "loaded kernel image");
        Ok(image)
    }

    /// Validate an image already in memory.
    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self, AccelError> {
        if !bytes.starts_with(XCLBIN_MAGIC) {
            return Err(AccelError::KernelImage {
                path: path.display().to_string(),
                reason: "missing xclbin2 header".into(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
        })
    }

    /// Locate an image for `device_name` by naming convention.
    ///
    /// Each directory in `search_dirs` is tried in order for
    /// `<kernel>.<mode>.<device>.xclbin`, `<kernel>.<mode>.xclbin` and
    /// `<kernel>.xclbin`, where `mode` comes from `XCL_EMULATION_MODE` and
    /// defaults to `hw`.
    pub fn discover(
        device_name: &str,
        kernel_name: &str,
        search_dirs: &[PathBuf],
    ) -> Result<PathBuf, AccelError> {
        let mode = std::env::var(EMULATION_MODE_ENV).unwrap_or_else(|_| "hw".to_string());
        let candidates = candidate_names(device_name, kernel_name, &mode);

        for dir in search_dirs {
            for name in &candidates {
                let path = dir.join(name);
                debug!(path = %path.display(), "probing for kernel image");
                if path.is_file() {
                    return Ok(path);
                }
            }
        }

        Err(AccelError::KernelImage {
            path: kernel_name.to_string(),
            reason: format!(
                "no image found for device '{}' (mode {}) in {:?}",
                device_name, mode, search_dirs
            ),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for KernelImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelImage")
            .field("path", &self.path)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// File names tried for one search directory, most specific first.
fn candidate_names(device_name: &str, kernel_name: &str, mode: &str) -> Vec<String> {
    // Platform names carry characters that never appear in file names.
    let device: String = device_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    vec![
        format!("{}.{}.{}.xclbin", kernel_name, mode, device),
        format!("{}.{}.xclbin", kernel_name, mode),
        format!("{}.xclbin", kernel_name),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_bytes() -> Vec<u8> {
        let mut bytes = XCLBIN_MAGIC.to_vec();
        bytes.extend_from_slice(&[0xAB; 64]);
        bytes
    }

    #[test]
    fn test_load_valid_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alveo_hls4ml.xclbin");
        std::fs::write(&path, image_bytes()).unwrap();

        let image = KernelImage::load(&path).unwrap();
        assert_eq!(image.path(), path.as_path());
        assert_eq!(image.bytes().len(), 72);
    }

    #[test]
    fn test_load_missing_file() {
        let err = KernelImage::load(Path::new("/nonexistent/alveo_hls4ml.xclbin")).unwrap_err();
        assert!(matches!(err, AccelError::KernelImage { .. }));
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let err =
            KernelImage::from_bytes(Path::new("x.xclbin"), b"ELF\x7f....".to_vec()).unwrap_err();
        assert!(err.to_string().contains("xclbin2"));
    }

    #[test]
    fn test_rejects_empty_image() {
        assert!(KernelImage::from_bytes(Path::new("x.xclbin"), Vec::new()).is_err());
    }

    #[test]
    fn test_candidate_names_order() {
        let names = candidate_names("xilinx_u250:xdma-201830.2", "alveo_hls4ml", "sw_emu");
        assert_eq!(
            names,
            vec![
                "alveo_hls4ml.sw_emu.xilinx_u250_xdma_201830_2.xclbin".to_string(),
                "alveo_hls4ml.sw_emu.xclbin".to_string(),
                "alveo_hls4ml.xclbin".to_string(),
            ]
        );
    }

    #[test]
    fn test_discover_falls_back_to_plain_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("alveo_hls4ml.xclbin");
        std::fs::write(&path, image_bytes()).unwrap();

        let dirs = [dir.path().to_path_buf()];
        let found = KernelImage::discover("some_device", "alveo_hls4ml", &dirs).unwrap();
        assert_eq!(found, path);
    }

    #[test]
    fn test_discover_nothing_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = KernelImage::discover("dev", "alveo_hls4ml", &[dir.path().to_path_buf()]);
        assert!(result.is_err());
    }
}
