//! RPC message types for the inference protocol.
//!
//! Every frame carries an [`RpcMessage`] envelope: a transport-level
//! `request_id` used to pair replies with calls, and a [`MessagePayload`]
//! serialized as internally-tagged JSON (`"type": "..."`). Model-level
//! shapes follow the inference-server schema deployed clients already speak:
//! status replies carry a `request_status` and a `server_status`, inference
//! replies carry `meta_data` and `raw_output` blobs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub request_id: String,
    pub payload: MessagePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    // -- Status --
    GetStatus,
    Status(StatusResponse),

    // -- Inference --
    Infer(InferRequest),
    InferResult(InferResponse),

    // -- Generic --
    Error(ErrorResponse),
}

// ---------------------------------------------------------------------------
// Request status
// ---------------------------------------------------------------------------

/// Outcome of a call, carried inside every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatusCode {
    Invalid,
    Success,
    Unknown,
    Internal,
    NotFound,
    InvalidArg,
    Unavailable,
    Unsupported,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatus {
    pub code: RequestStatusCode,
    #[serde(default)]
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl RequestStatus {
    pub fn success(server_id: &str) -> Self {
        Self {
            code: RequestStatusCode::Success,
            server_id: server_id.to_string(),
            msg: None,
        }
    }

    pub fn failure(code: RequestStatusCode, server_id: &str, msg: impl Into<String>) -> Self {
        Self {
            code,
            server_id: server_id.to_string(),
            msg: Some(msg.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == RequestStatusCode::Success
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub request_status: RequestStatus,
    pub server_status: ServerStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub id: String,
    /// Keyed by model name; ordered so the encoding is stable.
    pub model_status: BTreeMap<String, ModelStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub config: ModelDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    pub max_batch_size: u32,
    pub input: Vec<TensorDescription>,
    pub output: Vec<TensorDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescription {
    pub name: String,
    /// Wire name of the element type, e.g. `TYPE_FP32`.
    pub data_type: String,
    pub dims: Vec<u64>,
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferRequest {
    pub meta_data: InferRequestHeader,
    /// One blob per input tensor; only the first is used.
    pub raw_input: Vec<RawTensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferRequestHeader {
    /// Caller-chosen id, echoed in the reply.
    pub id: u64,
    /// Batch size as claimed by the caller. Informational only; the server
    /// derives the real value from the payload length.
    #[serde(default)]
    pub batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResponse {
    pub request_status: RequestStatus,
    pub meta_data: InferResponseHeader,
    pub raw_output: Vec<RawTensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResponseHeader {
    pub id: u64,
    pub model_version: i64,
    /// Effective batch size actually processed.
    pub batch_size: u32,
    pub output: Vec<OutputDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescription {
    pub name: String,
    pub raw: RawOutputShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutputShape {
    pub dims: Vec<u64>,
    pub batch_byte_size: u64,
}

/// Opaque tensor bytes, base64-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTensor(#[serde(with = "base64_bytes")] pub Vec<u8>);

impl RawTensor {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawTensor({} bytes)", self.0.len())
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Protocol-level error, for frames that are not a call this server handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: RequestStatusCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_status_tag() {
        let msg = RpcMessage {
            request_id: "req-1".into(),
            payload: MessagePayload::GetStatus,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"get_status""#));
        let back: RpcMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_infer_request_base64_payload() {
        let msg = RpcMessage {
            request_id: "req-2".into(),
            payload: MessagePayload::Infer(InferRequest {
                meta_data: InferRequestHeader { id: 42, batch_size: 1 },
                raw_input: vec![RawTensor(vec![0, 0, 128, 63])],
            }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"infer""#));
        assert!(json.contains(r#""raw_input":["AACAPw=="]"#));

        let back: RpcMessage = serde_json::from_str(&json).unwrap();
        match back.payload {
            MessagePayload::Infer(req) => {
                assert_eq!(req.meta_data.id, 42);
                assert_eq!(req.raw_input[0].as_bytes(), &[0, 0, 128, 63]);
            }
            other => panic!("expected Infer, got {:?}", other),
        }
    }

    #[test]
    fn test_claimed_batch_size_optional() {
        let json = concat!(
            r#"{"request_id":"r","payload":{"type":"infer","meta_data":{"id":7},"#,
            r#""raw_input":[""]}}"#
        );
        let msg: RpcMessage = serde_json::from_str(json).unwrap();
        match msg.payload {
            MessagePayload::Infer(req) => {
                assert_eq!(req.meta_data.batch_size, 0);
                assert!(req.raw_input[0].as_bytes().is_empty());
            }
            other => panic!("expected Infer, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let json = concat!(
            r#"{"request_id":"r","payload":{"type":"infer","meta_data":{"id":7},"#,
            r#""raw_input":["!!!"]}}"#
        );
        assert!(serde_json::from_str::<RpcMessage>(json).is_err());
    }

    #[test]
    fn test_status_code_names() {
        let cases = [
            (RequestStatusCode::Success, "SUCCESS"),
            (RequestStatusCode::Internal, "INTERNAL"),
            (RequestStatusCode::InvalidArg, "INVALID_ARG"),
            (RequestStatusCode::Unavailable, "UNAVAILABLE"),
        ];
        for (code, name) in cases {
            assert_eq!(serde_json::to_string(&code).unwrap(), format!(r#""{}""#, name));
        }
    }

    #[test]
    fn test_success_status_omits_msg() {
        let json = serde_json::to_string(&RequestStatus::success("inference:0")).unwrap();
        assert_eq!(json, r#"{"code":"SUCCESS","server_id":"inference:0"}"#);
    }
}
