//! Live event delivery over `/api/v1/ws` against a real listener.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use taskpulse_api::{router, AppContext, AppState};
use taskpulse_core::{owner_topic, CreateTaskRequest, User};
use taskpulse_db::MemoryStore;

struct Server {
    ws_url: String,
    context: AppContext,
    state: AppState,
    alice: User,
    bob: User,
}

async fn spawn_server() -> Server {
    let store = MemoryStore::new();
    let alice = User {
        id: Uuid::now_v7(),
        username: "alice".into(),
        email: "alice@example.com".into(),
    };
    let bob = User {
        id: Uuid::now_v7(),
        username: "bob".into(),
        email: "bob@example.com".into(),
    };
    store.users.add(alice.clone(), "alice-token").await;
    store.users.add(bob.clone(), "bob-token").await;

    let context = AppContext::in_memory(&store);
    let state = context.state();
    let app = router(state.clone(), &[]);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        ws_url: format!("ws://{}/api/v1/ws", addr),
        context,
        state,
        alice,
        bob,
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(server: &Server, token: &str) -> WsStream {
    let (ws, response) =
        tokio_tungstenite::connect_async(format!("{}?token={}", server.ws_url, token))
            .await
            .unwrap();
    assert_eq!(response.status(), 101);
    ws
}

/// Wait until `owner` has `expected` live subscriptions.
async fn wait_for_subscribers(server: &Server, owner: Uuid, expected: usize) {
    let topic = owner_topic(owner);
    for _ in 0..100 {
        if server.context.events.subscriber_count(&topic) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} subscribers on {}, found {}",
        expected,
        topic,
        server.context.events.subscriber_count(&topic)
    );
}

/// Next text frame within `wait`, skipping pings.
async fn next_text(ws: &mut WsStream, wait: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(text),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => panic!("WS error: {}", e),
            Ok(None) | Err(_) => return None,
        }
    }
}

async fn create_task(server: &Server, owner: &User, title: &str) -> taskpulse_core::Task {
    server
        .context
        .coordinator
        .create(
            owner.id,
            CreateTaskRequest {
                title: title.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upgrade_requires_token() {
    let server = spawn_server().await;

    assert!(tokio_tungstenite::connect_async(server.ws_url.clone())
        .await
        .is_err());
    assert!(
        tokio_tungstenite::connect_async(format!("{}?token=wrong", server.ws_url))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_bearer_header_is_accepted() {
    let server = spawn_server().await;
    let mut request = server.ws_url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer bob-token".parse().unwrap());

    let (_ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status(), 101);
    wait_for_subscribers(&server, server.bob.id, 1).await;
}

#[tokio::test]
async fn test_receives_own_task_events() {
    let server = spawn_server().await;
    let mut ws = connect(&server, "alice-token").await;
    wait_for_subscribers(&server, server.alice.id, 1).await;

    let task = create_task(&server, &server.alice, "Live one").await;

    let text = next_text(&mut ws, Duration::from_secs(5))
        .await
        .expect("created event");
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["message"]["action"], "created");
    assert_eq!(parsed["message"]["task"]["id"], task.id.to_string());
    assert_eq!(parsed["message"]["task"]["title"], "Live one");

    server
        .context
        .coordinator
        .delete(server.alice.id, task.id)
        .await
        .unwrap();
    let text = next_text(&mut ws, Duration::from_secs(5))
        .await
        .expect("deleted event");
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["message"]["action"], "deleted");
    assert_eq!(parsed["message"]["task"]["title"], "Live one");
}

#[tokio::test]
async fn test_other_owners_events_are_not_delivered() {
    let server = spawn_server().await;
    let mut alice_ws = connect(&server, "alice-token").await;
    let mut bob_ws = connect(&server, "bob-token").await;
    wait_for_subscribers(&server, server.alice.id, 1).await;
    wait_for_subscribers(&server, server.bob.id, 1).await;

    create_task(&server, &server.alice, "Alice private").await;

    assert!(next_text(&mut alice_ws, Duration::from_secs(5)).await.is_some());
    assert!(next_text(&mut bob_ws, Duration::from_millis(300))
        .await
        .is_none());
}

#[tokio::test]
async fn test_every_session_gets_every_event() {
    let server = spawn_server().await;
    let mut sessions = Vec::new();
    for _ in 0..3 {
        sessions.push(connect(&server, "alice-token").await);
    }
    wait_for_subscribers(&server, server.alice.id, 3).await;

    for i in 0..4 {
        create_task(&server, &server.alice, &format!("burst {}", i)).await;
    }

    for ws in sessions.iter_mut() {
        for i in 0..4 {
            let text = next_text(ws, Duration::from_secs(5))
                .await
                .expect("missing event");
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed["message"]["task"]["title"], format!("burst {}", i));
        }
    }
}

#[tokio::test]
async fn test_client_text_is_not_rebroadcast() {
    let server = spawn_server().await;
    let mut talker = connect(&server, "alice-token").await;
    let mut listener = connect(&server, "alice-token").await;
    wait_for_subscribers(&server, server.alice.id, 2).await;

    talker
        .send(Message::Text("hello everyone".to_string()))
        .await
        .unwrap();

    assert!(next_text(&mut listener, Duration::from_millis(300))
        .await
        .is_none());
    assert!(next_text(&mut talker, Duration::from_millis(100))
        .await
        .is_none());
}

#[tokio::test]
async fn test_closed_session_releases_subscription() {
    let server = spawn_server().await;
    let keep = connect(&server, "alice-token").await;
    let mut leave = connect(&server, "alice-token").await;
    wait_for_subscribers(&server, server.alice.id, 2).await;
    assert_eq!(server.state.ws_connections.load(Ordering::Relaxed), 2);

    leave.close(None).await.unwrap();
    wait_for_subscribers(&server, server.alice.id, 1).await;

    drop(keep);
    wait_for_subscribers(&server, server.alice.id, 0).await;
    for _ in 0..100 {
        if server.state.ws_connections.load(Ordering::Relaxed) == 0 {
            assert_eq!(server.context.events.topic_count(), 0);
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection counter did not drop to zero");
}
