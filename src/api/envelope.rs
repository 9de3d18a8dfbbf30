//! Uniform JSON response envelope and the API error taxonomy.
//!
//! Every logical outcome ships as HTTP 200 with `{code, message, data}` so
//! middlewares see one shape; real 4xx/5xx is reserved for framework-level
//! faults.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: i64,
    pub message: String,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

/// Successful envelope.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        code: 200,
        message: "success".to_string(),
        data: Some(data),
        total: None,
    })
    .into_response()
}

/// Request-time failures, grouped by how they surface to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad input: parameters, signatures, expiry, MD5 or chunk-count
    /// mismatch.
    #[error("{0}")]
    Param(String),

    /// Unknown uid or missing object.
    #[error("{0}")]
    NotFound(String),

    /// Lock held elsewhere; the client should retry.
    #[error("busy, retry later")]
    Busy,

    /// No owner discovered or forward failed.
    #[error("peer error: {0}")]
    Peer(String),

    /// Object-store or SQL failure.
    #[error("storage error: {0}")]
    Store(String),

    /// Bug or unclassified failure.
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Envelope code. The envelope only defines 200/400/404/500, so
    /// busy/peer/store all surface as 500.
    pub fn code(&self) -> i64 {
        match self {
            ApiError::Param(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Busy | ApiError::Peer(_) | ApiError::Store(_) | ApiError::Internal => 500,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope: Envelope<()> = Envelope {
            code: self.code(),
            message: self.to_string(),
            data: None,
            total: None,
        };
        (StatusCode::OK, Json(envelope)).into_response()
    }
}

impl From<crate::signer::SignerError> for ApiError {
    fn from(err: crate::signer::SignerError) -> Self {
        ApiError::Param(err.to_string())
    }
}

impl From<crate::meta::MetaError> for ApiError {
    fn from(err: crate::meta::MetaError) -> Self {
        ApiError::Store(err.to_string())
    }
}

impl From<crate::coord::CoordError> for ApiError {
    fn from(err: crate::coord::CoordError) -> Self {
        ApiError::Store(err.to_string())
    }
}

impl From<crate::storage::StoreError> for ApiError {
    fn from(err: crate::storage::StoreError) -> Self {
        match err {
            crate::storage::StoreError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Store(other.to_string()),
        }
    }
}

impl From<crate::peer::PeerError> for ApiError {
    fn from(err: crate::peer::PeerError) -> Self {
        ApiError::Peer(err.to_string())
    }
}

impl From<crate::snowflake::IdError> for ApiError {
    fn from(_: crate::snowflake::IdError) -> Self {
        ApiError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_taxonomy() {
        assert_eq!(ApiError::Param("x".into()).code(), 400);
        assert_eq!(ApiError::NotFound("x".into()).code(), 404);
        assert_eq!(ApiError::Busy.code(), 500);
        assert_eq!(ApiError::Peer("x".into()).code(), 500);
        assert_eq!(ApiError::Store("x".into()).code(), 500);
        assert_eq!(ApiError::Internal.code(), 500);
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: ApiError = crate::storage::StoreError::NotFound("image/1.png".into()).into();
        assert_eq!(err.code(), 404);
    }
}
