//! Per-request bearer token gate.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::errors::AuthError;
use super::service::AuthService;
use super::state::HasAuthBackend;
use super::types::AuthenticatedPrincipal;

/// Strip `<prefix> ` from a header value. Values using another scheme, or
/// carrying an empty token, yield `None`.
pub fn extract_bearer<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let token = value.strip_prefix(prefix)?.strip_prefix(' ')?;
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Read the bearer token from the configured header. A header that is not
/// valid UTF-8 counts as an invalid token.
pub fn bearer_token<'a>(
    headers: &'a HeaderMap,
    service: &AuthService,
) -> Result<Option<&'a str>, AuthError> {
    let settings = service.settings();
    let Some(value) = headers.get(&settings.token_header) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::InvalidToken)?;
    Ok(extract_bearer(value, &settings.token_prefix))
}

/// Authenticate the request headers. `Ok(None)` means no bearer token was
/// presented; any presented token that fails a check is an error.
pub async fn authenticate_request(
    headers: &HeaderMap,
    service: &AuthService,
) -> Result<Option<AuthenticatedPrincipal>, AuthError> {
    match bearer_token(headers, service)? {
        Some(token) => service.authenticate(token).await.map(Some),
        None => Ok(None),
    }
}

/// Middleware attaching the caller's [`AuthenticatedPrincipal`] to the request
/// extensions.
///
/// Requests without a token pass through unauthenticated, leaving the
/// decision to the handler's extractors. A token that fails any check blocks
/// the request with a uniform 401 so the caller cannot tell which check
/// failed. Storage faults are reported as such.
pub async fn request_authenticator<S>(
    State(state): State<S>,
    mut request: Request,
    next: Next,
) -> Response
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    match authenticate_request(request.headers(), state.auth()).await {
        Ok(Some(principal)) => {
            debug!(username = %principal.username, "Request authenticated");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(e) if e.is_infrastructure() => e.into_response(),
        Err(e) => {
            warn!(reason = %e, path = %request.uri().path(), "Rejected bearer token");
            AuthError::InvalidToken.into_response()
        }
    }
}
