//! Accelerator access -- one FPGA card, one kernel, one command queue.
//!
//! The card is driven through the [`Accelerator`] trait: a device that can load
//! a kernel image, bind the two host buffers as the kernel's positional
//! arguments, and execute an in-order queue of migrate / run / migrate
//! commands. [`AcceleratorSession`] owns the device and the buffers for the
//! life of the process.

pub mod buffer;
pub mod emulated;
pub mod image;
pub mod session;

pub use buffer::AlignedBuffer;
pub use image::KernelImage;
pub use session::{AcceleratorSession, SubmitTimings};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors raised by the device or while setting up the session.
#[derive(Debug, Error)]
pub enum AccelError {
    #[error("no accelerator found: {0}")]
    DeviceNotFound(String),

    #[error("kernel image {path}: {reason}")]
    KernelImage { path: String, reason: String },

    #[error("kernel '{0}' not found in loaded program")]
    KernelNotFound(String),

    #[error("host buffer allocation failed: {0}")]
    Allocation(String),

    #[error("batch of {batch_size} exceeds stream capacity {capacity}")]
    BatchTooLarge { batch_size: usize, capacity: usize },

    /// A command on the device queue failed.
    #[error("device error during {stage}: {reason}")]
    Device { stage: &'static str, reason: String },
}

/// Kind of device backing the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Software emulation of the card (host memory stands in for device DDR).
    Emulated,
    /// A physical card reached through a vendor runtime.
    Hardware,
}

/// Identity of an opened device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: Backend,
}

/// Which device to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    pub backend: Backend,
    pub index: usize,
}

/// Buffer geometry registered as the kernel's two arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelArgs {
    /// Length of argument 0 (input) in FP32 elements.
    pub input_len: usize,
    /// Length of argument 1 (output) in FP32 elements.
    pub output_len: usize,
    /// Examples per submission both buffers are sized for.
    pub stream_capacity: usize,
}

/// One accelerator card with a single in-order command queue.
///
/// Commands complete in submission order; `finish` blocks until the queue
/// has drained and reports any failure of an earlier command. Implementations
/// are not reentrant: callers serialize access.
pub trait Accelerator: Send {
    fn info(&self) -> &DeviceInfo;

    /// Program the device with `image` and look up `kernel_name` in it.
    fn load_program(&mut self, image: &KernelImage, kernel_name: &str) -> Result<(), AccelError>;

    /// Register the input and output buffers as kernel arguments 0 and 1.
    fn bind_buffers(&mut self, args: &KernelArgs) -> Result<(), AccelError>;

    /// Enqueue a host→device migration of the input buffer.
    fn migrate_to_device(&mut self, input: &[f32]) -> Result<(), AccelError>;

    /// Enqueue one execution of the kernel.
    fn enqueue_task(&mut self) -> Result<(), AccelError>;

    /// Enqueue a device→host migration into the output buffer.
    fn migrate_to_host(&mut self, output: &mut [f32]) -> Result<(), AccelError>;

    /// Block until every enqueued command has completed.
    fn finish(&mut self) -> Result<(), AccelError>;
}

/// Enumerate the devices visible to this process for `backend`.
pub fn detect_devices(backend: Backend) -> Vec<DeviceInfo> {
    match backend {
        Backend::Emulated => vec![DeviceInfo {
            name: emulated::DEVICE_NAME.to_string(),
            backend,
        }],
        // No vendor runtime is linked into this build.
        Backend::Hardware => Vec::new(),
    }
}

/// Open the device picked by `selector`.
pub fn open_device(selector: DeviceSelector) -> Result<Box<dyn Accelerator>, AccelError> {
    let devices = detect_devices(selector.backend);
    let info = devices.into_iter().nth(selector.index).ok_or_else(|| {
        AccelError::DeviceNotFound(format!(
            "no {:?} device at index {}",
            selector.backend, selector.index
        ))
    })?;

    info!(device = %info.name, backend = ?info.backend, "found device");

    match info.backend {
        Backend::Emulated => Ok(Box::new(emulated::EmulatedDevice::new(info))),
        Backend::Hardware => Err(AccelError::DeviceNotFound(
            "hardware runtime unavailable".into(),
        )),
    }
}
