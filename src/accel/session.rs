//! The process-wide accelerator session.
//!
//! Created once at startup, the session binds one device, programs it with one
//! kernel image and registers two page-aligned host buffers as the kernel's
//! arguments. Every request reuses the same buffers. The session is not
//! reentrant; [`crate::gate::ConcurrencyGate`] is the only way the request path
//! reaches it.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::accel::{
    open_device, AccelError, Accelerator, AlignedBuffer, DeviceInfo, DeviceSelector, KernelArgs,
    KernelImage,
};
use crate::layout::TensorLayout;

/// Wall-clock time spent in each step of one submission.
///
/// Diagnostic only.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SubmitTimings {
    pub migrate_in: Duration,
    pub execute: Duration,
    pub migrate_out: Duration,
    pub drain: Duration,
}

impl SubmitTimings {
    pub fn total(&self) -> Duration {
        self.migrate_in + self.execute + self.migrate_out + self.drain
    }
}

pub struct AcceleratorSession {
    device: Box<dyn Accelerator>,
    kernel_name: String,
    layout: TensorLayout,
    stream_capacity: usize,
    input: AlignedBuffer,
    output: AlignedBuffer,
    submissions: u64,
}

impl AcceleratorSession {
    /// Open the selected device and set it up for serving.
    ///
    /// Any failure here means the process must not serve.
    pub fn init(
        selector: DeviceSelector,
        image: &KernelImage,
        kernel_name: &str,
        layout: TensorLayout,
        stream_capacity: usize,
    ) -> Result<Self, AccelError> {
        let device = open_device(selector)?;
        Self::with_device(device, image, kernel_name, layout, stream_capacity)
    }

    /// Set up a session on an already-opened device.
    pub fn with_device(
        mut device: Box<dyn Accelerator>,
        image: &KernelImage,
        kernel_name: &str,
        layout: TensorLayout,
        stream_capacity: usize,
    ) -> Result<Self, AccelError> {
        let input_len = stream_capacity
            .checked_mul(layout.feature_count)
            .ok_or_else(|| AccelError::Allocation("input capacity overflows".into()))?;
        let output_len = stream_capacity
            .checked_mul(layout.out_feature_count)
            .ok_or_else(|| AccelError::Allocation("output capacity overflows".into()))?;

        let input = AlignedBuffer::zeroed(input_len)?;
        let output = AlignedBuffer::zeroed(output_len)?;

        device.load_program(image, kernel_name)?;
        device.bind_buffers(&KernelArgs {
            input_len,
            output_len,
            stream_capacity,
        })?;

        info!(
            device = %device.info().name,
            kernel = kernel_name,
            stream_capacity,
            input_bytes = input.size_bytes(),
            output_bytes = output.size_bytes(),
            "accelerator session ready"
        );

        Ok(Self {
            device,
            kernel_name: kernel_name.to_string(),
            layout,
            stream_capacity,
            input,
            output,
            submissions: 0,
        })
    }

    /// Run the kernel over the input buffer and wait for the results.
    ///
    /// Migrates the input buffer to the device, executes the kernel, migrates
    /// the output buffer back and blocks until the queue drains. There is no
    /// timeout: a hung device blocks the caller indefinitely.
    pub fn submit(&mut self, batch_size: usize) -> Result<SubmitTimings, AccelError> {
        if batch_size > self.stream_capacity {
            return Err(AccelError::BatchTooLarge {
                batch_size,
                capacity: self.stream_capacity,
            });
        }

        let t0 = Instant::now();
        self.device.migrate_to_device(&self.input)?;
        let t1 = Instant::now();
        self.device.enqueue_task()?;
        let t2 = Instant::now();
        self.device.migrate_to_host(&mut self.output)?;
        let t3 = Instant::now();
        self.device.finish()?;
        let t4 = Instant::now();

        self.submissions += 1;
        let timings = SubmitTimings {
            migrate_in: t1 - t0,
            execute: t2 - t1,
            migrate_out: t3 - t2,
            drain: t4 - t3,
        };

        debug!(
            batch_size,
            submission = self.submissions,
            migrate_in_ns = timings.migrate_in.as_nanos() as u64,
            execute_ns = timings.execute.as_nanos() as u64,
            migrate_out_ns = timings.migrate_out.as_nanos() as u64,
            drain_ns = timings.drain.as_nanos() as u64,
            "device round trip complete"
        );

        Ok(timings)
    }

    /// Host input buffer, `stream_capacity * feature_count` elements.
    pub fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    /// Host output buffer as left by the most recent submission.
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    pub fn stream_capacity(&self) -> usize {
        self.stream_capacity
    }

    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}

impl Drop for AcceleratorSession {
    fn drop(&mut self) {
        info!(
            device = %self.device.info().name,
            kernel = %self.kernel_name,
            submissions = self.submissions,
            "accelerator session released"
        );
    }
}

impl std::fmt::Debug for AcceleratorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorSession")
            .field("device", self.device.info())
            .field("kernel", &self.kernel_name)
            .field("stream_capacity", &self.stream_capacity)
            .field("submissions", &self.submissions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::image::XCLBIN_MAGIC;
    use crate::accel::Backend;
    use crate::layout::{encode_out, DataType};
    use std::path::Path;

    fn image() -> KernelImage {
        KernelImage::from_bytes(Path::new("test.xclbin"), XCLBIN_MAGIC.to_vec()).unwrap()
    }

    fn emulated() -> DeviceSelector {
        DeviceSelector {
            backend: Backend::Emulated,
            index: 0,
        }
    }

    #[test]
    fn test_init_allocates_fixed_buffers() {
        let layout = TensorLayout::new(15, 1, DataType::Fp32).unwrap();
        let mut session =
            AcceleratorSession::init(emulated(), &image(), "alveo_hls4ml", layout, 64).unwrap();

        assert_eq!(session.input_mut().len(), 64 * 15);
        assert_eq!(session.output().len(), 64);
        assert_eq!(session.stream_capacity(), 64);
    }

    #[test]
    fn test_submit_round_trip() {
        let layout = TensorLayout::new(3, 1, DataType::Fp32).unwrap();
        let mut session =
            AcceleratorSession::init(emulated(), &image(), "alveo_hls4ml", layout, 4).unwrap();

        session.input_mut()[..6].copy_from_slice(&[7.0, 0.0, 0.0, 9.0, 0.0, 0.0]);
        let timings = session.submit(2).unwrap();
        assert!(timings.total() >= timings.execute);

        let raw = encode_out(session.output(), 2, 1).unwrap();
        let mut expected = 7.0f32.to_le_bytes().to_vec();
        expected.extend_from_slice(&9.0f32.to_le_bytes());
        assert_eq!(raw, expected);
        assert_eq!(session.submissions(), 1);
    }

    #[test]
    fn test_submit_over_capacity_rejected() {
        let layout = TensorLayout::new(15, 1, DataType::Fp32).unwrap();
        let mut session =
            AcceleratorSession::init(emulated(), &image(), "alveo_hls4ml", layout, 8).unwrap();
        assert!(matches!(
            session.submit(9),
            Err(AccelError::BatchTooLarge { batch_size: 9, capacity: 8 })
        ));
        assert_eq!(session.submissions(), 0);
    }

    #[test]
    fn test_zero_capacity_is_fatal() {
        let layout = TensorLayout::new(15, 1, DataType::Fp32).unwrap();
        assert!(AcceleratorSession::init(emulated(), &image(), "alveo_hls4ml", layout, 0).is_err());
    }
}
