//! From HTTP create to delivered email through the context-built worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;
use uuid::Uuid;

use taskpulse_api::{router, AppContext};
use taskpulse_core::{
    JobStatus, Mailer, NewTask, OutgoingEmail, Priority, Result, TaskRepository, TaskStatus, User,
};
use taskpulse_db::MemoryStore;
use taskpulse_jobs::{SweepConfig, WorkerConfig};

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

async fn setup() -> (MemoryStore, AppContext, User) {
    let store = MemoryStore::new();
    let owner = User {
        id: Uuid::now_v7(),
        username: "carol".into(),
        email: "carol@example.com".into(),
    };
    store.users.add(owner.clone(), "carol-token").await;
    let context = AppContext::in_memory(&store);
    (store, context, owner)
}

#[tokio::test]
async fn test_created_task_is_emailed_to_owner() {
    let (store, context, _owner) = setup().await;
    let app = router(context.state(), &[]);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/tasks")
                .header(header::AUTHORIZATION, "Bearer carol-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"title": "Book venue", "description": "Seats 40"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let mailer = Arc::new(RecordingMailer::default());
    let worker = context.worker(
        WorkerConfig::default().with_retry_delay(Duration::ZERO),
        mailer.clone(),
        "noreply@taskpulse.local".into(),
    );
    assert_eq!(worker.drain().await, 1);

    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "carol@example.com");
    assert_eq!(sent[0].from, "noreply@taskpulse.local");
    assert_eq!(sent[0].subject, "New Task Assigned: Book venue");
    assert!(sent[0].body.contains("Description: Seats 40"));
    assert!(sent[0].body.ends_with("Due Date: None"));

    let jobs = store.jobs.all().await;
    assert_eq!(jobs[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn test_sweep_reminders_are_delivered() {
    let (store, context, owner) = setup().await;
    let now = Utc::now();
    for (title, hours) in [("soon", 2), ("later", 48)] {
        store
            .tasks
            .insert(NewTask {
                owner_id: owner.id,
                title: title.into(),
                description: String::new(),
                priority: Priority::Medium,
                status: TaskStatus::Todo,
                due_date: Some(now + chrono::Duration::hours(hours)),
            })
            .await
            .unwrap();
    }

    let queued = context
        .sweep(SweepConfig::default())
        .run_once(now)
        .await
        .unwrap();
    assert_eq!(queued, 1);

    let mailer = Arc::new(RecordingMailer::default());
    context
        .worker(WorkerConfig::default(), mailer.clone(), "noreply@taskpulse.local".into())
        .drain()
        .await;

    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Task Deadline Approaching: soon");
}
