//! Client for the inference protocol.

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::rpc::{
    InferRequest, InferRequestHeader, InferResponse, MessagePayload, RawTensor, RpcMessage,
    StatusResponse,
};
use crate::wire::RpcCodec;

pub struct InferenceClient {
    framed: Framed<TcpStream, RpcCodec>,
}

impl InferenceClient {
    pub async fn connect(addr: &str, max_message_size: usize) -> Result<Self> {
        info!(address = %addr, "connecting to inference server");
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?;
        Ok(Self {
            framed: Framed::new(stream, RpcCodec::new(max_message_size)),
        })
    }

    /// Fetch the model description.
    pub async fn status(&mut self) -> Result<StatusResponse> {
        match self.call(MessagePayload::GetStatus).await? {
            MessagePayload::Status(status) => Ok(status),
            MessagePayload::Error(e) => Err(anyhow!("server error {:?}: {}", e.code, e.message)),
            other => Err(anyhow!("expected Status, got {:?}", other)),
        }
    }

    /// Run one inference over `raw`, a flattened little-endian FP32 matrix.
    pub async fn infer(&mut self, id: u64, raw: Vec<u8>) -> Result<InferResponse> {
        let request = InferRequest {
            meta_data: InferRequestHeader { id, batch_size: 0 },
            raw_input: vec![RawTensor(raw)],
        };
        match self.call(MessagePayload::Infer(request)).await? {
            MessagePayload::InferResult(resp) => Ok(resp),
            MessagePayload::Error(e) => Err(anyhow!("server error {:?}: {}", e.code, e.message)),
            other => Err(anyhow!("expected InferResult, got {:?}", other)),
        }
    }

    async fn call(&mut self, payload: MessagePayload) -> Result<MessagePayload> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.framed
            .send(RpcMessage {
                request_id: request_id.clone(),
                payload,
            })
            .await
            .context("failed to send request")?;

        loop {
            let frame = self
                .framed
                .next()
                .await
                .ok_or_else(|| anyhow!("connection closed"))?
                .context("failed to decode frame")?;

            if frame.request_id == request_id {
                return Ok(frame.payload);
            }
            debug!("ignoring message with id {} (waiting for {})", frame.request_id, request_id);
        }
    }
}
