//! Request handlers for the server endpoints

pub mod session;
pub mod websocket;

use std::convert::Infallible;

use log::debug;
use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::core::server::SharedChatServer;
use crate::error::RustyChatError;

/// All routes of the server, with rejections turned into JSON errors
pub fn routes(server: SharedChatServer) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path("health").and(warp::path::end()).map(|| "OK");

    websocket::ws_route(server.clone())
        .or(session::session_routes(server))
        .or(health)
        .recover(handle_rejection)
}

// Helper function to include the shared server in a request
pub fn with_server(server: SharedChatServer) -> impl Filter<Extract = (SharedChatServer,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

fn error_reply(status: StatusCode, error: String, code: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&json!({ "error": error, "code": code })), status)
}

/// Map rejections to `{error, code}` bodies
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(e) = err.find::<RustyChatError>() {
        let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Ok(error_reply(status, e.client_message(), e.code()));
    }
    if err.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "Not found".to_string(), "NOT_FOUND"));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
            "METHOD_NOT_ALLOWED",
        ));
    }

    debug!("Unhandled rejection: {:?}", err);
    Ok(error_reply(StatusCode::BAD_REQUEST, "Bad request".to_string(), "BAD_REQUEST"))
}
