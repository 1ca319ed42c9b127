//! Internal session endpoint used by the external credential verifier
//!
//! Login (OTP) is verified elsewhere; the verifier then activates the session
//! here and hands the returned tokens to the client.

use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::constant_time_eq;
use crate::core::server::SharedChatServer;
use crate::error::RustyChatError;
use crate::handlers::with_server;

const MAX_BODY_BYTES: u64 = 4 * 1024;

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub user_id: Uuid,
    pub device_id: String,
}

/// `POST /internal/sessions` and `DELETE /internal/sessions`
pub fn session_routes(server: SharedChatServer) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let base = warp::path!("internal" / "sessions")
        .and(warp::header::optional::<String>("x-service-key"))
        .and(with_server(server))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<SessionRequest>());

    let activate = warp::post().and(base.clone()).and_then(activate_session);
    let deactivate = warp::delete().and(base).and_then(deactivate_session);
    activate.or(deactivate)
}

fn check_service_key(server: &SharedChatServer, presented: Option<&str>) -> Result<(), Rejection> {
    match presented {
        Some(key) if constant_time_eq(key, &server.config.service_key) => Ok(()),
        _ => {
            warn!("Session endpoint called with a missing or wrong service key");
            Err(warp::reject::custom(RustyChatError::Unauthenticated))
        }
    }
}

async fn activate_session(
    key: Option<String>,
    server: SharedChatServer,
    request: SessionRequest,
) -> Result<impl Reply, Rejection> {
    check_service_key(&server, key.as_deref())?;
    let issued = server
        .login(request.user_id, &request.device_id)
        .await
        .map_err(warp::reject::custom)?;

    info!("Issued session for user {} on device {}", request.user_id, issued.device_id);
    Ok(warp::reply::json(&issued))
}

async fn deactivate_session(
    key: Option<String>,
    server: SharedChatServer,
    request: SessionRequest,
) -> Result<impl Reply, Rejection> {
    check_service_key(&server, key.as_deref())?;
    server.logout(request.user_id, &request.device_id).await;
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT))
}
