// src/api/mod.rs
pub mod handlers;
pub mod types;

use actix_cors::Cors;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::utils::config::ServerConfig;
use crate::utils::error::NodeError;
use types::ErrorBody;

impl ResponseError for NodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            NodeError::InvalidPayload(_)
            | NodeError::UnsupportedOptionCombination(_)
            | NodeError::NoFacesDetected(_)
            | NodeError::InvalidNodeId(_)
            | NodeError::InvalidDescriptor(_) => StatusCode::BAD_REQUEST,
            NodeError::NotFound(_) => StatusCode::NOT_FOUND,
            NodeError::NodeBusy(_) => StatusCode::CONFLICT,
            NodeError::WorkerTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

/// CORS policy from the configured origins. An empty list allows none.
pub fn cors(config: &ServerConfig) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "DELETE"])
        .allow_any_header()
        .max_age(3600);

    config
        .allowed_origins
        .iter()
        .fold(cors, |cors, origin| match origin.as_str() {
            "*" => cors.allow_any_origin(),
            origin => cors.allowed_origin(origin),
        })
}
