//! Constant model-status reply.

use std::collections::BTreeMap;

use crate::config::ModelConfig;
use crate::rpc::{
    ModelDescription, ModelStatus, RequestStatus, ServerStatus, StatusResponse, TensorDescription,
};

/// Builds the status reply once and hands out copies.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    response: StatusResponse,
}

impl StatusReporter {
    pub fn new(model: &ModelConfig) -> Self {
        let dtype = model.data_type.wire_name().to_string();
        let config = ModelDescription {
            name: model.name.clone(),
            max_batch_size: model.max_batch_size,
            input: vec![TensorDescription {
                name: model.input_name.clone(),
                data_type: dtype.clone(),
                dims: model.input_dims.clone(),
            }],
            output: vec![TensorDescription {
                name: model.output_name.clone(),
                data_type: dtype,
                dims: model.output_dims.clone(),
            }],
        };

        let mut model_status = BTreeMap::new();
        model_status.insert(model.name.clone(), ModelStatus { config });

        Self {
            response: StatusResponse {
                request_status: RequestStatus::success(&model.server_id),
                server_status: ServerStatus {
                    id: model.server_id.clone(),
                    model_status,
                },
            },
        }
    }

    pub fn report(&self) -> StatusResponse {
        self.response.clone()
    }
}
