use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use parley_gateway::auth::{self, AuthError};

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer JWT; handlers read the result as
/// `Extension<Identity>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = auth::bearer_token(req.headers()).ok_or(AuthError::Missing)?;
    let identity = auth::verify_token(&state.jwt_secret, token)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
