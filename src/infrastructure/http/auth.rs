use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::auth::TestTokenIssuer;
use crate::error::TestkitError;

/// Caller identity injected into request extensions after authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub token_id: String,
}

/// Bearer-token middleware for test routers.
///
/// ```ignore
/// let app = Router::new()
///     .route("/me", get(me))
///     .layer(middleware::from_fn_with_state(issuer.clone(), bearer_auth));
/// ```
pub async fn bearer_auth(
    State(issuer): State<Arc<TestTokenIssuer>>,
    mut request: Request,
    next: Next,
) -> Result<Response, TestkitError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| TestkitError::Unauthorized("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| TestkitError::Unauthorized("Invalid authorization format".to_string()))?;

    let claims = issuer.validate_token(token)?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.uid,
        token_id: claims.jti,
    });

    Ok(next.run(request).await)
}
