use axum::{extract::State, response::Html};

use crate::error::Result;
use crate::server::AppState;

/// GET / - serve the configured static page verbatim, whatever its encoding
pub async fn index(State(state): State<AppState>) -> Result<Html<Vec<u8>>> {
    let content = tokio::fs::read(&state.settings.server.static_file).await?;
    Ok(Html(content))
}
