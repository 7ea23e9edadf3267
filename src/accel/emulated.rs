//! Software emulation of the card.
//!
//! Device-global memory is a pair of host vectors and the kernel is a
//! per-example projection: output feature `k` of example `r` is input feature
//! `k % feature_count` of the same example. With equal feature counts the
//! kernel is the identity, which makes the emulator a pass-through device.

use tracing::debug;

use crate::accel::{AccelError, Accelerator, DeviceInfo, KernelArgs, KernelImage};

/// Name reported for the emulated device.
pub const DEVICE_NAME: &str = "xilinx_sw_emu";

pub struct EmulatedDevice {
    info: DeviceInfo,
    kernel: Option<String>,
    args: Option<KernelArgs>,
    device_in: Vec<f32>,
    device_out: Vec<f32>,
    /// Commands enqueued since the last `finish`.
    pending: usize,
}

impl EmulatedDevice {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            kernel: None,
            args: None,
            device_in: Vec::new(),
            device_out: Vec::new(),
            pending: 0,
        }
    }

    fn bound(&self, stage: &'static str) -> Result<KernelArgs, AccelError> {
        self.args.ok_or_else(|| AccelError::Device {
            stage,
            reason: "kernel arguments not bound".into(),
        })
    }
}

impl Accelerator for EmulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn load_program(&mut self, image: &KernelImage, kernel_name: &str) -> Result<(), AccelError> {
        if kernel_name.is_empty() {
            return Err(AccelError::KernelNotFound(kernel_name.to_string()));
        }
        debug!(
            image = %image.path().display(),
            kernel = kernel_name,
            "programming emulated device"
        );
        self.kernel = Some(kernel_name.to_string());
        Ok(())
    }

    fn bind_buffers(&mut self, args: &KernelArgs) -> Result<(), AccelError> {
        if self.kernel.is_none() {
            return Err(AccelError::KernelNotFound("<no program loaded>".into()));
        }
        if args.stream_capacity == 0
            || args.input_len % args.stream_capacity != 0
            || args.output_len % args.stream_capacity != 0
        {
            return Err(AccelError::Device {
                stage: "bind_buffers",
                reason: format!("buffer lengths do not match capacity: {:?}", args),
            });
        }
        self.device_in = vec![0.0; args.input_len];
        self.device_out = vec![0.0; args.output_len];
        self.args = Some(*args);
        Ok(())
    }

    fn migrate_to_device(&mut self, input: &[f32]) -> Result<(), AccelError> {
        let args = self.bound("migrate_to_device")?;
        if input.len() != args.input_len {
            return Err(AccelError::Device {
                stage: "migrate_to_device",
                reason: format!("expected {} elements, got {}", args.input_len, input.len()),
            });
        }
        self.device_in.copy_from_slice(input);
        self.pending += 1;
        Ok(())
    }

    fn enqueue_task(&mut self) -> Result<(), AccelError> {
        let args = self.bound("enqueue_task")?;
        let in_features = args.input_len / args.stream_capacity;
        let out_features = args.output_len / args.stream_capacity;

        for (row, out) in self.device_out.chunks_exact_mut(out_features).enumerate() {
            let inp = &self.device_in[row * in_features..(row + 1) * in_features];
            for (k, v) in out.iter_mut().enumerate() {
                *v = inp[k % in_features];
            }
        }
        self.pending += 1;
        Ok(())
    }

    fn migrate_to_host(&mut self, output: &mut [f32]) -> Result<(), AccelError> {
        let args = self.bound("migrate_to_host")?;
        if output.len() != args.output_len {
            return Err(AccelError::Device {
                stage: "migrate_to_host",
                reason: format!("expected {} elements, got {}", args.output_len, output.len()),
            });
        }
        output.copy_from_slice(&self.device_out);
        self.pending += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AccelError> {
        debug!(commands = self.pending, "queue drained");
        self.pending = 0;
        Ok(())
    }
}
