use std::{io, path::PathBuf};

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("tensorflow: {0}")]
    Tensorflow(#[from] tensorflow::Status),
    #[error("operation '{0}' not found in graph")]
    MissingOperation(String),
    #[error("failed to read image: {0}")]
    ReadImage(io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("model returned {actual} scores for {expected} classes")]
    ScoreCount { expected: usize, actual: usize },
    #[error("model returned no usable scores")]
    EmptyOutput,
    #[error("model lock poisoned by an earlier panic")]
    Poisoned,
}

/// Failures surfaced by `/api/predict`. Client mistakes map to 400, anything
/// that goes wrong after the upload was accepted maps to 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file part in request")]
    NoFilePart,
    #[error("No file selected")]
    NoFileSelected,
    #[error("Invalid file type")]
    InvalidFileType,
    #[error("File too large")]
    TooLarge,
    #[error("Malformed upload: {0}")]
    Multipart(MultipartError),
    #[error("failed to save upload: {0}")]
    Save(#[source] io::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("prediction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        // Hitting the body limit surfaces as a multipart stream error.
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::TooLarge
        } else {
            ApiError::Multipart(err)
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFilePart
            | ApiError::NoFileSelected
            | ApiError::InvalidFileType
            | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Save(_) | ApiError::Model(_) | ApiError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "prediction error");
        } else {
            tracing::warn!(error = %self, "rejected upload");
        }

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_bad_requests() {
        assert_eq!(ApiError::NoFilePart.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NoFileSelected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidFileType.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::TooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn processing_errors_keep_their_message() {
        let err = ApiError::from(ModelError::ScoreCount {
            expected: 9,
            actual: 3,
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "model returned 3 scores for 9 classes");
    }
}
