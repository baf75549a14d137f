//! Request extractors with JSON error responses
//!
//! Wrap axum's `Json` and `Path` so malformed input gets the same error body
//! as every other API error instead of axum's plain-text rejection.

use std::ops::Deref;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;

use super::types::ApiError;

/// Rejection for extractors in this module
#[derive(Debug)]
pub enum RequestRejection {
    Path(PathRejection),
    Json(JsonRejection),
}

impl IntoResponse for RequestRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Path(rejection) => {
                ApiError::bad_request("PATH_PARSE_ERROR", rejection.body_text())
            }
            Self::Json(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                ApiError::payload_too_large(rejection.body_text())
            }
            Self::Json(rejection) => {
                ApiError::bad_request("JSON_PARSE_ERROR", rejection.body_text())
            }
        }
        .into_response()
    }
}

/// JSON body extractor
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<T> Deref for ApiJson<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = RequestRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(RequestRejection::Json)?;
        Ok(Self(value))
    }
}

/// Run id path parameter
#[derive(Debug)]
pub struct RunPath(pub u64);

impl<S> FromRequestParts<S> for RunPath
where
    S: Send + Sync,
{
    type Rejection = RequestRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<u64>::from_request_parts(parts, state)
            .await
            .map_err(RequestRejection::Path)?;
        Ok(Self(id))
    }
}
