use std::{sync::Arc, time::Duration};

use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::jwt::JwtAccessTokenService, broadcast::BroadcastRegistry, coordinator::RoomCoordinator,
};

pub mod handler;
pub mod protocol;
pub mod session;

/// Everything a live connection needs after the upgrade.
#[derive(Clone)]
pub struct LiveState {
    pub coordinator: RoomCoordinator,
    pub registry: Arc<BroadcastRegistry>,
    pub jwt_service: Arc<JwtAccessTokenService>,
    /// Parent of every session token; cancelled on process shutdown.
    pub shutdown: CancellationToken,
    pub viewer_count_interval: Duration,
}

pub fn router(state: LiveState) -> Router {
    Router::new().route("/v1/rooms/{room_id}/ws", get(handler::ws_upgrade)).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::{router, LiveState};
    use crate::{
        auth::jwt::JwtAccessTokenService,
        broadcast::BroadcastRegistry,
        coordinator::RoomCoordinator,
        db::sessions::DurableSessionStore,
        store::MemorySharedStore,
        sync::SessionSyncer,
    };
    use futures_util::{SinkExt, StreamExt};
    use liveroom_common::protocol::live::{LiveMessage, MessageKind};
    use std::{sync::Arc, time::Duration};
    use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{client::IntoClientRequest, Error as WsError, Message as WsFrame},
        MaybeTlsStream, WebSocketStream,
    };
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    const TEST_SECRET: &str = "liveroom_test_secret_that_is_definitely_long_enough";

    type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    struct TestRelay {
        base_url: String,
        coordinator: RoomCoordinator,
        registry: Arc<BroadcastRegistry>,
        jwt_service: Arc<JwtAccessTokenService>,
        shutdown: CancellationToken,
        server: JoinHandle<()>,
    }

    impl TestRelay {
        fn token(&self, user_id: Uuid, name: &str) -> String {
            self.jwt_service
                .issue_user_token(user_id, "user", Some(name))
                .expect("token should be issued")
        }

        fn ws_url(&self, room_id: &str, token: &str) -> String {
            format!("{}/v1/rooms/{room_id}/ws?token={token}", self.base_url)
        }

        async fn connect(&self, room_id: &str, user_id: Uuid, name: &str) -> ClientSocket {
            let url = self.ws_url(room_id, &self.token(user_id, name));
            let (socket, _) = connect_async(url.as_str()).await.expect("client should connect");
            socket
        }

        async fn rejection_status(&self, url: &str) -> u16 {
            match connect_async(url).await {
                Err(WsError::Http(response)) => response.status().as_u16(),
                Err(other) => panic!("expected an http rejection, got {other}"),
                Ok(_) => panic!("upgrade should have been rejected"),
            }
        }
    }

    impl Drop for TestRelay {
        fn drop(&mut self) {
            self.shutdown.cancel();
            self.server.abort();
        }
    }

    async fn spawn_relay(viewer_count_interval: Duration) -> TestRelay {
        let store = Arc::new(MemorySharedStore::default());
        let registry = Arc::new(BroadcastRegistry::default());
        let syncer = Arc::new(SessionSyncer::new(store.clone(), DurableSessionStore::memory()));
        let coordinator = RoomCoordinator::new(store, registry.clone(), syncer, 1000);
        let jwt_service = Arc::new(
            JwtAccessTokenService::new(TEST_SECRET).expect("jwt service should initialize"),
        );
        let shutdown = CancellationToken::new();
        let app = router(LiveState {
            coordinator: coordinator.clone(),
            registry: registry.clone(),
            jwt_service: jwt_service.clone(),
            shutdown: shutdown.clone(),
            viewer_count_interval,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let addr = listener.local_addr().expect("listener should expose local address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("relay server should run for tests");
        });

        TestRelay {
            base_url: format!("ws://{addr}"),
            coordinator,
            registry,
            jwt_service,
            shutdown,
            server,
        }
    }

    async fn send_json(socket: &mut ClientSocket, raw: &str) {
        socket.send(WsFrame::Text(raw.into())).await.expect("frame should send");
    }

    async fn recv_message(socket: &mut ClientSocket) -> LiveMessage {
        loop {
            let next = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("timed out waiting for websocket frame");
            let frame =
                next.expect("websocket should remain open").expect("websocket frame should decode");

            match frame {
                WsFrame::Text(payload) => {
                    return serde_json::from_str::<LiveMessage>(&payload)
                        .expect("text frame should decode as live message");
                }
                WsFrame::Ping(payload) => {
                    socket.send(WsFrame::Pong(payload)).await.expect("pong should send");
                }
                WsFrame::Close(_) => panic!("websocket closed unexpectedly"),
                WsFrame::Binary(_) | WsFrame::Pong(_) | WsFrame::Frame(_) => {}
            }
        }
    }

    /// Waits until the server closes the socket, skipping any queued frames.
    async fn expect_closed(socket: &mut ClientSocket) {
        loop {
            let next = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("timed out waiting for websocket close");
            match next {
                None | Some(Err(_)) | Some(Ok(WsFrame::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    }

    async fn room_with_viewer(relay: &TestRelay) -> (String, Uuid, Uuid) {
        let creator = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let room = relay
            .coordinator
            .create_room(creator, "Launch party", None)
            .await
            .expect("room should be created");
        relay.coordinator.join_room(&room.room_id, viewer).await.expect("viewer should join");
        (room.room_id, creator, viewer)
    }

    #[tokio::test]
    async fn upgrade_rejections_map_to_http_statuses() {
        let relay = spawn_relay(Duration::from_secs(60)).await;
        let (room_id, _, _) = room_with_viewer(&relay).await;
        let stranger = relay.token(Uuid::new_v4(), "stranger");

        let missing_token = format!("{}/v1/rooms/{room_id}/ws", relay.base_url);
        assert_eq!(relay.rejection_status(&missing_token).await, 401);

        let bad_token = relay.ws_url(&room_id, "not-a-jwt");
        assert_eq!(relay.rejection_status(&bad_token).await, 401);

        let blank_room = relay.ws_url("%20", &stranger);
        assert_eq!(relay.rejection_status(&blank_room).await, 400);

        let unknown_room = relay.ws_url("room_00000000", &stranger);
        assert_eq!(relay.rejection_status(&unknown_room).await, 404);

        let non_member = relay.ws_url(&room_id, &stranger);
        assert_eq!(relay.rejection_status(&non_member).await, 403);
    }

    #[tokio::test]
    async fn bearer_header_authenticates_the_upgrade() {
        let relay = spawn_relay(Duration::from_secs(60)).await;
        let (room_id, _, viewer) = room_with_viewer(&relay).await;

        let mut request = format!("{}/v1/rooms/{room_id}/ws", relay.base_url)
            .into_client_request()
            .expect("request should build");
        let header = format!("Bearer {}", relay.token(viewer, "bea"));
        request
            .headers_mut()
            .insert("authorization", header.parse().expect("header value should parse"));

        let (mut socket, _) = connect_async(request).await.expect("client should connect");
        let welcome = recv_message(&mut socket).await;
        assert_eq!(welcome.kind, MessageKind::Welcome);
    }

    #[tokio::test]
    async fn chat_reaches_every_session_and_is_recorded() {
        let relay = spawn_relay(Duration::from_secs(60)).await;
        let (room_id, creator, viewer) = room_with_viewer(&relay).await;

        let mut host = relay.connect(&room_id, creator, "host").await;
        let host_welcome = recv_message(&mut host).await;
        assert_eq!(host_welcome.kind, MessageKind::Welcome);

        let mut guest = relay.connect(&room_id, viewer, "guest").await;
        let welcome = recv_message(&mut guest).await;
        assert_eq!(welcome.kind, MessageKind::Welcome);
        let data = welcome.data.expect("welcome should carry data");
        assert_eq!(data["viewer_count"], 1);
        assert_eq!(data["room_status"], "created");

        let joined = recv_message(&mut host).await;
        assert_eq!(joined.kind, MessageKind::UserJoined);
        assert_eq!(joined.user_id, Some(viewer));
        assert_eq!(joined.username.as_deref(), Some("guest"));

        send_json(&mut guest, r#"{"type":"chat","content":"  hello room  "}"#).await;
        for socket in [&mut host, &mut guest] {
            let chat = recv_message(socket).await;
            assert_eq!(chat.kind, MessageKind::Chat);
            assert_eq!(chat.content.as_deref(), Some("hello room"));
            assert_eq!(chat.user_id, Some(viewer));
        }

        send_json(&mut guest, r#"{"type":"ping"}"#).await;
        assert_eq!(recv_message(&mut guest).await.kind, MessageKind::Pong);

        let history =
            relay.coordinator.recent_chat(&room_id, None).await.expect("history should load");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello room");
        assert_eq!(history[0].username, "guest");

        guest.close(None).await.expect("close should send");
        let left = recv_message(&mut host).await;
        assert_eq!(left.kind, MessageKind::UserLeft);
        assert!(
            relay.coordinator.is_member(&room_id, viewer).await.expect("membership"),
            "disconnecting must not leave the room"
        );
    }

    #[tokio::test]
    async fn bad_frames_are_answered_without_closing_the_session() {
        let relay = spawn_relay(Duration::from_secs(60)).await;
        let (room_id, _, viewer) = room_with_viewer(&relay).await;
        let mut guest = relay.connect(&room_id, viewer, "guest").await;
        recv_message(&mut guest).await;

        send_json(&mut guest, r#"{"type":"chat","content":"   "}"#).await;
        let rejected = recv_message(&mut guest).await;
        assert_eq!(rejected.kind, MessageKind::Error);

        send_json(&mut guest, "not json").await;
        assert_eq!(recv_message(&mut guest).await.kind, MessageKind::Error);

        send_json(&mut guest, r#"{"type":"emoji_rain"}"#).await;
        send_json(&mut guest, r#"{"type":"ping"}"#).await;
        assert_eq!(recv_message(&mut guest).await.kind, MessageKind::Pong);
    }

    #[tokio::test]
    async fn oversized_frames_end_the_session() {
        let relay = spawn_relay(Duration::from_secs(60)).await;
        let (room_id, _, viewer) = room_with_viewer(&relay).await;
        let mut guest = relay.connect(&room_id, viewer, "guest").await;
        recv_message(&mut guest).await;

        let content = "x".repeat(4 * 1024);
        let _ = guest
            .send(WsFrame::Text(format!(r#"{{"type":"chat","content":"{content}"}}"#).into()))
            .await;

        expect_closed(&mut guest).await;
    }

    #[tokio::test]
    async fn lifecycle_events_reach_viewers_and_close_ends_sessions() {
        let relay = spawn_relay(Duration::from_secs(60)).await;
        let (room_id, creator, viewer) = room_with_viewer(&relay).await;
        let mut guest = relay.connect(&room_id, viewer, "guest").await;
        recv_message(&mut guest).await;

        relay.coordinator.start_live(&room_id, creator).await.expect("start should succeed");
        let started = recv_message(&mut guest).await;
        assert_eq!(started.kind, MessageKind::LiveStarted);
        assert_eq!(started.data.expect("data")["status"], "live");

        relay.coordinator.close_room(&room_id, creator).await.expect("close should succeed");
        assert_eq!(recv_message(&mut guest).await.kind, MessageKind::LiveEnded);
        assert_eq!(recv_message(&mut guest).await.kind, MessageKind::RoomClosed);
        expect_closed(&mut guest).await;
    }

    #[tokio::test]
    async fn creators_receive_periodic_viewer_counts() {
        let relay = spawn_relay(Duration::from_millis(100)).await;
        let (room_id, creator, _) = room_with_viewer(&relay).await;
        let mut host = relay.connect(&room_id, creator, "host").await;
        assert_eq!(recv_message(&mut host).await.kind, MessageKind::Welcome);

        let update = recv_message(&mut host).await;
        assert_eq!(update.kind, MessageKind::ViewerCountUpdate);
        assert_eq!(update.data.expect("data")["viewer_count"], 1);
        assert_eq!(relay.registry.stats().sessions, 1);
    }
}
