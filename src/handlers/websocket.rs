use std::time::Duration;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use uuid::Uuid;
use warp::http::HeaderMap;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::auth::{extract_token, AuthTimer};
use crate::constants::{MAX_FRAME_SIZE, MIN_AUTH_FAILURE_MS, WS_PATH};
use crate::core::connection::ConnectionHandle;
use crate::core::message_types::{CommandEnvelope, ServerEvent};
use crate::core::room::RoomId;
use crate::core::server::SharedChatServer;
use crate::core::session::Session;
use crate::error::{Result, RustyChatError};
use crate::handlers::with_server;

/// `GET /ws/chat/{id}` and `GET /ws/group/{id}`
pub fn ws_route(server: SharedChatServer) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let chat = warp::path(WS_PATH)
        .and(warp::path("chat"))
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .map(RoomId::Direct);
    let group = warp::path(WS_PATH)
        .and(warp::path("group"))
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .map(RoomId::Group);

    chat.or(group)
        .unify()
        .and(warp::ws())
        .and(warp::header::headers_cloned())
        .and(with_server(server))
        .and_then(upgrade)
}

// Every check runs before the upgrade so refusals are plain HTTP errors
async fn upgrade(
    room: RoomId,
    ws: Ws,
    headers: HeaderMap,
    server: SharedChatServer,
) -> std::result::Result<impl Reply, Rejection> {
    let timer = AuthTimer::start(Duration::from_millis(MIN_AUTH_FAILURE_MS));
    match admit(&server, &room, &headers).await {
        Ok(session) => {
            info!("New websocket connection for user {} in {}", session.user_id, room);
            Ok(ws
                .max_message_size(MAX_FRAME_SIZE)
                .max_frame_size(MAX_FRAME_SIZE)
                .on_upgrade(move |socket| handle_ws_client(socket, room, session, server)))
        }
        Err(e) => {
            timer.wait().await;
            warn!("Refused websocket connection to {}: {}", room, e);
            Err(warp::reject::custom(e))
        }
    }
}

async fn admit(server: &SharedChatServer, room: &RoomId, headers: &HeaderMap) -> Result<Session> {
    let token = extract_token(headers).ok_or(RustyChatError::Unauthenticated)?;
    let session = server.authenticate_token(&token).await?;
    server.hub.admit(room, &session).await?;
    Ok(session)
}

/// Drive one upgraded connection until the client leaves or the hub closes it
pub async fn handle_ws_client(ws: WebSocket, room: RoomId, session: Session, server: SharedChatServer) {
    let (handle, mut outbound) = match server.hub.open(room, &session).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Connection for user {} in {} not opened: {}", session.user_id, room, e);
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Forward queued frames to the socket; a forced close ends with a close frame
    let writer = tokio::task::spawn(async move {
        while let Some(message) = outbound.next().await {
            if let Err(e) = ws_tx.send(message).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        if let Err(e) = ws_tx.close().await {
            debug!("Failed to close WebSocket: {}", e);
        }
    });

    let mut closed = handle.clone();
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = closed.wait_closed() => break,
        };
        match frame {
            Some(Ok(msg)) if msg.is_text() => process_message(&server, &handle, msg).await,
            Some(Ok(msg)) if msg.is_close() => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("WebSocket error on {}: {}", handle.id, e);
                break;
            }
            None => break,
        }
    }

    server.hub.close(&handle).await;
    if let Err(e) = writer.await {
        warn!("Writer task for {} failed: {}", handle.id, e);
    }
}

// One frame, one command, processed before the next frame is read
async fn process_message(server: &SharedChatServer, handle: &ConnectionHandle, msg: Message) {
    let text = match msg.to_str() {
        Ok(text) => text,
        Err(_) => return,
    };

    let result = match CommandEnvelope::parse(text) {
        Ok(envelope) => server.engine.handle(handle, envelope).await.map(|_| ()),
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!("Rejected command from user {} on {}: {}", handle.session.user_id, handle.id, e);
        match ServerEvent::error(&e).to_json() {
            Ok(payload) => {
                if let Err(send_err) = server.hub.send_to(handle, &payload).await {
                    debug!("Error envelope not delivered: {}", send_err);
                }
            }
            Err(ser_err) => warn!("Failed to serialize error envelope: {}", ser_err),
        }
    }
}
