//! Response envelope and request body extraction shared by API endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequest, Request, State, rejection::JsonRejection},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::auth::AuthError;
use crate::clock::{Clock, SystemClock};

tokio::task_local! {
    /// Clock stamping envelopes built while a request is handled.
    static ENVELOPE_CLOCK: Arc<dyn Clock>;
}

/// Envelope wrapping every API response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub message: String,
    pub data: Option<T>,
    /// Unix milliseconds
    pub timestamp: i64,
}

fn now_ms() -> i64 {
    ENVELOPE_CLOCK
        .try_with(|clock| clock.now_ms())
        .unwrap_or_else(|_| SystemClock.now_ms())
}

/// Middleware that stamps every envelope of the request with `clock`.
pub async fn with_envelope_clock(
    State(clock): State<Arc<dyn Clock>>,
    request: Request,
    next: Next,
) -> Response {
    ENVELOPE_CLOCK.scope(clock, next.run(request)).await
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::success_with("Success", data)
    }

    pub fn success_with(message: impl Into<String>, data: T) -> Self {
        Self {
            code: 200,
            message: message.into(),
            data: Some(data),
            timestamp: now_ms(),
        }
    }
}

impl ApiResponse<()> {
    /// A successful response carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: 200,
            message: message.into(),
            data: None,
            timestamp: now_ms(),
        }
    }
}

impl ApiResponse<serde_json::Value> {
    pub fn failure(
        code: u32,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            data,
            timestamp: now_ms(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// JSON body extractor whose rejections use the error envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AuthError::validation(rejection.body_text())),
        }
    }
}
