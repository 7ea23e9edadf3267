//! Request handling: turns decoded calls into replies.
//!
//! `handle_infer` never fails at the transport level. Every internal fault is
//! folded into the reply's `request_status`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::config::ModelConfig;
use crate::error::{InferError, Result};
use crate::gate::ConcurrencyGate;
use crate::layout::{decode, encode_out, transcode_in, LayoutError, TensorLayout};
use crate::rpc::{
    ErrorResponse, InferRequest, InferResponse, InferResponseHeader, MessagePayload,
    OutputDescription, RawOutputShape, RawTensor, RequestStatus, RequestStatusCode, RpcMessage,
    StatusResponse,
};
use crate::status::StatusReporter;

pub struct InferenceService {
    model: ModelConfig,
    layout: TensorLayout,
    gate: Arc<ConcurrencyGate>,
    status: StatusReporter,
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("model", &self.model)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl InferenceService {
    pub fn new(
        model: ModelConfig,
        gate: Arc<ConcurrencyGate>,
    ) -> std::result::Result<Self, LayoutError> {
        let layout = model.tensor_layout()?;
        let status = StatusReporter::new(&model);
        Ok(Self {
            model,
            layout,
            gate,
            status,
        })
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    /// Describe the deployed model.
    pub fn handle_status(&self) -> StatusResponse {
        self.status.report()
    }

    /// Run one inference call end to end.
    pub async fn handle_infer(&self, request: InferRequest) -> InferResponse {
        let id = request.meta_data.id;
        let claimed = request.meta_data.batch_size;
        let started = Instant::now();

        match self.run(request).await {
            Ok((batch_size, raw)) => {
                debug!(
                    id,
                    claimed_batch_size = claimed,
                    batch_size,
                    output_bytes = raw.len(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "inference complete"
                );
                self.reply(
                    id,
                    RequestStatus::success(&self.model.server_id),
                    batch_size,
                    vec![RawTensor(raw)],
                )
            }
            Err(e) => {
                let code = e.status_code();
                if code == RequestStatusCode::InvalidArg {
                    warn!(id, error = %e, "rejected inference request");
                } else {
                    error!(id, error = %e, "inference failed");
                }
                self.reply(
                    id,
                    RequestStatus::failure(code, &self.model.server_id, e.to_string()),
                    0,
                    Vec::new(),
                )
            }
        }
    }

    /// Answer one framed call.
    pub async fn dispatch(&self, msg: RpcMessage) -> RpcMessage {
        let payload = match msg.payload {
            MessagePayload::GetStatus => MessagePayload::Status(self.handle_status()),
            MessagePayload::Infer(req) => MessagePayload::InferResult(self.handle_infer(req).await),
            _ => {
                warn!(request_id = %msg.request_id, "unexpected message type from client");
                MessagePayload::Error(ErrorResponse {
                    code: RequestStatusCode::Unsupported,
                    message: "unexpected message type".into(),
                })
            }
        };
        RpcMessage {
            request_id: msg.request_id,
            payload,
        }
    }

    /// Decode, run on the device, encode. Returns the effective batch size
    /// and the output bytes.
    async fn run(&self, request: InferRequest) -> Result<(usize, Vec<u8>)> {
        let raw = request
            .raw_input
            .into_iter()
            .next()
            .ok_or(InferError::MissingInput)?;

        // Staged into a private vector before the gate is touched.
        let (values, batch) = decode(raw.as_bytes(), &self.layout)?;
        if batch.batch_size == 0 {
            return Ok((0, Vec::new()));
        }

        let gate = Arc::clone(&self.gate);
        let out_features = self.layout.out_feature_count;
        let (effective, encoded) = tokio::task::spawn_blocking(move || -> Result<(usize, Vec<u8>)> {
            let mut session = gate.acquire();
            let effective = transcode_in(&values, &batch, session.input_mut());
            session.submit(effective)?;
            let encoded = encode_out(session.output(), effective, out_features)?;
            Ok((effective, encoded))
        })
        .await
        .map_err(|e| InferError::TaskFailed(e.to_string()))??;

        if effective < batch.batch_size {
            warn!(
                batch_size = batch.batch_size,
                effective_batch_size = effective,
                "batch exceeds stream capacity, extra examples dropped"
            );
        }
        Ok((effective, encoded))
    }

    fn reply(
        &self,
        id: u64,
        request_status: RequestStatus,
        batch_size: usize,
        raw_output: Vec<RawTensor>,
    ) -> InferResponse {
        let output = if request_status.is_success() {
            vec![OutputDescription {
                name: self.model.output_name.clone(),
                raw: RawOutputShape {
                    dims: self.model.output_dims.clone(),
                    batch_byte_size: self.model.output_batch_byte_size * batch_size as u64,
                },
            }]
        } else {
            Vec::new()
        };

        InferResponse {
            request_status,
            meta_data: InferResponseHeader {
                id,
                model_version: self.model.model_version,
                // Bounded by the stream capacity, which startup checks fits.
                batch_size: batch_size as u32,
                output,
            },
            raw_output,
        }
    }
}
