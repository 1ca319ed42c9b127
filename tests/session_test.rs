// Integration tests for single-active-session enforcement

use rusty_chat::config::ServerConfig;
use rusty_chat::core::room::RoomId;
use rusty_chat::core::server::ChatServer;
use rusty_chat::error::RustyChatError;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activations_leave_exactly_one_active() {
    let (server, _store) = ChatServer::in_memory(ServerConfig::for_testing()).await;

    for _ in 0..50 {
        let user = Uuid::new_v4();
        let registry = server.registry.clone();
        let other = registry.clone();

        let (x, y) = tokio::join!(
            tokio::spawn(async move { registry.activate(user, "x").await }),
            tokio::spawn(async move { other.activate(user, "y").await }),
        );
        let x = x.unwrap().unwrap();
        let y = y.unwrap().unwrap();

        let active: Vec<_> = server
            .registry
            .sessions_for(&user)
            .await
            .into_iter()
            .filter(|s| s.active)
            .collect();
        assert_eq!(active.len(), 1);

        let x_ok = server.registry.authenticate(user, "x", &x.token).await.is_ok();
        let y_ok = server.registry.authenticate(user, "y", &y.token).await.is_ok();
        assert!(x_ok ^ y_ok);
    }
}

#[tokio::test]
async fn test_access_token_of_superseded_session_is_refused() {
    let (server, _store) = ChatServer::in_memory(ServerConfig::for_testing()).await;
    let user = Uuid::new_v4();

    let first = server.login(user, "phone").await.unwrap();
    assert_eq!(server.authenticate_token(&first.access_token).await.unwrap().device_id, "phone");

    let second = server.login(user, "tablet").await.unwrap();
    assert_eq!(
        server.authenticate_token(&first.access_token).await,
        Err(RustyChatError::Unauthenticated)
    );
    assert!(server.authenticate_token(&second.access_token).await.is_ok());
}

#[tokio::test]
async fn test_logout_closes_live_connections() {
    let (server, store) = ChatServer::in_memory(ServerConfig::for_testing()).await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = store.create_direct_room(a, b).await.unwrap();

    let issued = server.login(a, "phone").await.unwrap();
    let session = server.authenticate_token(&issued.access_token).await.unwrap();
    let (mut handle, _outbound) = server.hub.open(room, &session).await.unwrap();

    server.logout(a, "phone").await;
    handle.wait_closed().await;
    assert!(server.hub.connected_users(&room).await.is_empty());

    // logging out twice is fine
    server.logout(a, "phone").await;
    assert!(server.authenticate_token(&issued.access_token).await.is_err());
}

#[tokio::test]
async fn test_garbage_tokens_are_unauthenticated() {
    let (server, _store) = ChatServer::in_memory(ServerConfig::for_testing()).await;
    for token in ["", "abc", "a.b.c"] {
        assert_eq!(
            server.authenticate_token(token).await,
            Err(RustyChatError::Unauthenticated)
        );
    }
}

#[tokio::test]
async fn test_connections_in_other_rooms_survive_other_users_logins() {
    let (server, store) = ChatServer::in_memory(ServerConfig::for_testing()).await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room: RoomId = store.create_direct_room(a, b).await.unwrap();

    let a_session = server.registry.activate(a, "x").await.unwrap();
    let (a_handle, _out) = server.hub.open(room, &a_session).await.unwrap();

    server.registry.activate(b, "y").await.unwrap();
    assert!(!a_handle.is_closed());
}
