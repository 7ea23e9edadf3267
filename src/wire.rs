//! Length-prefixed frame codec for the inference protocol.
//!
//! Frames are a 4-byte big-endian length prefix followed by a JSON-encoded
//! [`RpcMessage`]. The length covers the payload only. Frames above the
//! configured maximum message size are refused in both directions.

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::rpc::RpcMessage;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000;

/// Frame codec carrying [`RpcMessage`]s.
pub struct RpcCodec {
    inner: LengthDelimitedCodec,
    max_message_size: usize,
}

impl RpcCodec {
    pub fn new(max_message_size: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(4)
            .max_frame_length(max_message_size)
            .length_adjustment(0)
            .new_codec();

        Self {
            inner,
            max_message_size,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Encoder<RpcMessage> for RpcCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: RpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).context("failed to serialize message")?;
        if json.len() > self.max_message_size {
            anyhow::bail!(
                "serialized message ({} bytes) exceeds max message size ({} bytes)",
                json.len(),
                self.max_message_size
            );
        }
        self.inner
            .encode(Bytes::from(json), dst)
            .context("failed to write frame")
    }
}

impl Decoder for RpcCodec {
    type Item = RpcMessage;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src).context("failed to read frame")? {
            Some(frame) => {
                let msg = serde_json::from_slice(&frame).context("failed to deserialize message")?;
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }
}
