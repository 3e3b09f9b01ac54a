//! HTTP behavior of the task routes against the in-memory store.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use taskpulse_api::{router, AppContext};
use taskpulse_core::{owner_topic, JobKind, TaskAction, User};
use taskpulse_db::MemoryStore;

const ALICE_TOKEN: &str = "alice-token";
const BOB_TOKEN: &str = "bob-token";

struct TestApp {
    app: Router,
    store: MemoryStore,
    context: AppContext,
    alice: User,
}

async fn setup() -> TestApp {
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
    store.users.add(alice.clone(), ALICE_TOKEN).await;
    store.users.add(bob, BOB_TOKEN).await;

    let context = AppContext::in_memory(&store);
    let app = router(context.state(), &[]);
    TestApp {
        app,
        store,
        context,
        alice,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, token: &str, body: Value) -> Value {
    let (status, task) = send(app, "POST", "/api/v1/tasks", Some(token), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", task);
    task
}

#[tokio::test]
async fn test_health_check() {
    let t = setup().await;
    let (status, body) = send(&t.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_requests_carry_a_request_id() {
    let t = setup().await;
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_task_routes_require_authentication() {
    let t = setup().await;

    let (status, body) = send(&t.app, "GET", "/api/v1/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&t.app, "GET", "/api/v1/tasks", Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/v1/tasks",
        None,
        Some(json!({"title": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(t.store.tasks.is_empty().await);
}

#[tokio::test]
async fn test_create_task_side_effects() {
    let t = setup().await;
    let mut sub = t.context.events.subscribe(&owner_topic(t.alice.id));

    // Warm the cache so the create has something to invalidate.
    send(&t.app, "GET", "/api/v1/tasks", Some(ALICE_TOKEN), None).await;
    assert!(t.context.cache.get(t.alice.id).await.is_some());

    let task = create(
        &t.app,
        ALICE_TOKEN,
        json!({"title": "Write report", "priority": "high"}),
    )
    .await;

    let id: Uuid = task["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(task["title"], "Write report");
    assert_eq!(task["priority"], "high");
    assert_eq!(task["status"], "todo");
    assert_eq!(task["description"], "");
    assert!(task["due_date"].is_null());
    assert!(task["created_at"].is_string());
    assert!(task["updated_at"].is_string());
    assert_eq!(task["owner_id"], t.alice.id.to_string());

    assert_eq!(t.context.cache.get(t.alice.id).await, None);

    let jobs = t.store.jobs.all().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::TaskAssignment);
    assert_eq!(jobs[0].task_id, id);

    let envelope = sub.try_recv().expect("created event");
    assert_eq!(envelope.payload.action, TaskAction::Created);
    assert_eq!(envelope.payload.task.id, id);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let t = setup().await;

    for body in [
        json!({"title": ""}),
        json!({"title": "   "}),
        json!({"title": "x".repeat(201)}),
        json!({"description": "no title"}),
        json!({"title": "ok", "priority": "urgent"}),
        json!({"title": "ok", "due_date": "tomorrow"}),
    ] {
        let (status, response) =
            send(&t.app, "POST", "/api/v1/tasks", Some(ALICE_TOKEN), Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {}", body);
        assert!(response["error"].is_string());
    }

    assert!(t.store.tasks.is_empty().await);
    assert!(t.store.jobs.all().await.is_empty());

    // Exactly 200 characters is fine.
    create(&t.app, ALICE_TOKEN, json!({"title": "y".repeat(200)})).await;
}

#[tokio::test]
async fn test_list_cache_stays_coherent_across_writes() {
    let t = setup().await;

    let (_, list) = send(&t.app, "GET", "/api/v1/tasks", Some(ALICE_TOKEN), None).await;
    assert_eq!(list, json!([]));

    let task = create(&t.app, ALICE_TOKEN, json!({"title": "First"})).await;
    let id = task["id"].as_str().unwrap().to_string();

    let (_, list) = send(&t.app, "GET", "/api/v1/tasks", Some(ALICE_TOKEN), None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert!(t.context.cache.get(t.alice.id).await.is_some());

    let (status, updated) = send(
        &t.app,
        "PATCH",
        &format!("/api/v1/tasks/{}", id),
        Some(ALICE_TOKEN),
        Some(json!({"title": "Renamed", "status": "in_progress"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "Renamed");
    assert_eq!(t.context.cache.get(t.alice.id).await, None);

    let (_, list) = send(&t.app, "GET", "/api/v1/tasks", Some(ALICE_TOKEN), None).await;
    assert_eq!(list[0]["title"], "Renamed");
    assert_eq!(list[0]["status"], "in_progress");

    let (status, body) = send(
        &t.app,
        "DELETE",
        &format!("/api/v1/tasks/{}", id),
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    assert_eq!(t.context.cache.get(t.alice.id).await, None);

    let (_, list) = send(&t.app, "GET", "/api/v1/tasks", Some(ALICE_TOKEN), None).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn test_update_does_not_queue_email() {
    let t = setup().await;
    let task = create(&t.app, ALICE_TOKEN, json!({"title": "Once"})).await;

    let (status, updated) = send(
        &t.app,
        "PUT",
        &format!("/api/v1/tasks/{}", task["id"].as_str().unwrap()),
        Some(ALICE_TOKEN),
        Some(json!({"priority": "low", "due_date": "2026-05-01T09:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["priority"], "low");
    assert!(updated["due_date"].is_string());
    assert_eq!(t.store.jobs.all().await.len(), 1);

    // Explicit null clears the due date.
    let (_, cleared) = send(
        &t.app,
        "PATCH",
        &format!("/api/v1/tasks/{}", task["id"].as_str().unwrap()),
        Some(ALICE_TOKEN),
        Some(json!({"due_date": null})),
    )
    .await;
    assert!(cleared["due_date"].is_null());
    assert_eq!(cleared["priority"], "low");
}

#[tokio::test]
async fn test_list_filters_are_case_insensitive() {
    let t = setup().await;
    create(
        &t.app,
        ALICE_TOKEN,
        json!({"title": "A", "priority": "high", "status": "done", "due_date": "2026-05-01T23:30:00Z"}),
    )
    .await;
    create(
        &t.app,
        ALICE_TOKEN,
        json!({"title": "B", "priority": "high", "due_date": "2026-05-02T00:30:00Z"}),
    )
    .await;
    create(&t.app, ALICE_TOKEN, json!({"title": "C", "priority": "low"})).await;

    let titles = |list: Value| -> Vec<String> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap().to_string())
            .collect()
    };

    let (status, list) = send(
        &t.app,
        "GET",
        "/api/v1/tasks?priority=HIGH",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(titles(list), vec!["A", "B"]);

    let (_, list) = send(
        &t.app,
        "GET",
        "/api/v1/tasks?priority=High&status=Done",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(titles(list), vec!["A"]);

    let (_, list) = send(
        &t.app,
        "GET",
        "/api/v1/tasks?due_date=2026-05-02",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(titles(list), vec!["B"]);

    // Filtered reads never populate the cache.
    assert_eq!(t.context.cache.get(t.alice.id).await, None);

    let (status, _) = send(
        &t.app,
        "GET",
        "/api/v1/tasks?due_date=05/02/2026",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        "GET",
        "/api/v1/tasks?status=blocked",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tasks_are_owner_scoped() {
    let t = setup().await;
    let task = create(&t.app, ALICE_TOKEN, json!({"title": "Alice only"})).await;
    let uri = format!("/api/v1/tasks/{}", task["id"].as_str().unwrap());

    let (status, _) = send(&t.app, "GET", &uri, Some(BOB_TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &t.app,
        "PATCH",
        &uri,
        Some(BOB_TOKEN),
        Some(json!({"title": "Mine now"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&t.app, "DELETE", &uri, Some(BOB_TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = send(&t.app, "GET", "/api/v1/tasks", Some(BOB_TOKEN), None).await;
    assert_eq!(list, json!([]));

    let (status, fetched) = send(&t.app, "GET", &uri, Some(ALICE_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Alice only");
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let t = setup().await;

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/v1/tasks/{}", Uuid::now_v7()),
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = send(
        &t.app,
        "GET",
        "/api/v1/tasks/not-a-uuid",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_broadcasts_pre_delete_snapshot() {
    let t = setup().await;
    let task = create(
        &t.app,
        ALICE_TOKEN,
        json!({"title": "Ephemeral", "description": "gone soon"}),
    )
    .await;
    let mut sub = t.context.events.subscribe(&owner_topic(t.alice.id));
    let uri = format!("/api/v1/tasks/{}", task["id"].as_str().unwrap());

    let (status, _) = send(&t.app, "DELETE", &uri, Some(ALICE_TOKEN), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let envelope = sub.try_recv().expect("deleted event");
    assert_eq!(envelope.payload.action, TaskAction::Deleted);
    assert_eq!(serde_json::to_value(&envelope.payload.task).unwrap(), task);

    let (status, _) = send(&t.app, "DELETE", &uri, Some(ALICE_TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_report() {
    let t = setup().await;
    let rows = [
        ("done", "high"),
        ("done", "low"),
        ("todo", "high"),
        ("in_progress", "high"),
        ("todo", "low"),
    ];
    for (i, (status, priority)) in rows.iter().enumerate() {
        create(
            &t.app,
            ALICE_TOKEN,
            json!({"title": format!("task {}", i), "status": status, "priority": priority}),
        )
        .await;
    }
    // Another owner's tasks do not leak into the report.
    create(&t.app, BOB_TOKEN, json!({"title": "bob", "priority": "medium"})).await;

    let (status, report) = send(
        &t.app,
        "GET",
        "/api/v1/tasks/report",
        Some(ALICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        report,
        json!({
            "completed_count": 2,
            "pending_count": 3,
            "counts_by_priority": [
                {"priority": "high", "count": 3},
                {"priority": "low", "count": 2},
            ],
        })
    );
}
