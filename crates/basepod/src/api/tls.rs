//! On-demand TLS probe endpoint — the proxy asks before issuing a
//! certificate; a 200 means yes, anything else means no.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::routes::authorize_domain;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AskQuery {
    #[serde(default)]
    domain: String,
}

pub async fn ask(
    State(state): State<AppState>,
    Query(query): Query<AskQuery>,
) -> impl IntoResponse {
    let allowed = authorize_domain(
        &query.domain,
        &state.config.root_domain,
        &state.config.dashboard_host(),
    );

    if allowed {
        (StatusCode::OK, "allowed")
    } else {
        tracing::debug!(domain = %query.domain, "TLS authorization denied");
        (StatusCode::FORBIDDEN, "denied")
    }
}
