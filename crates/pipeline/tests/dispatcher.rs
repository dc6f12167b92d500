//! Integration tests for `Dispatcher` and its worker pool.
//!
//! Run against the in-memory stores with scripted providers, so every
//! lifecycle path (success, provider failure, empty output, withdrawal,
//! retry, restart recovery) can be driven deterministically.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{generation, GatedProvider, Harness, Script, ScriptedProvider};
use imagegen_core::messages::TaskMessage;
use imagegen_core::ports::TaskStore;
use imagegen_core::task::{NewTask, TaskParams, TaskStatus};
use imagegen_pipeline::{NewGeneration, SubmitError, CANCELLED_MESSAGE, INTERRUPTED_MESSAGE};

fn succeed() -> Arc<ScriptedProvider> {
    ScriptedProvider::new("fake", Script::Succeed)
}

// ---------------------------------------------------------------------------
// Test: a task runs to completion with per-image progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_completes_with_progress_per_image() {
    let mut h = Harness::new(vec![succeed()], 2, 10);
    h.start();

    let task = h.dispatcher.submit(generation("a red kite", 2)).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.model_id, "gemini-3-pro-image-preview");

    let done = h.wait_terminal(&task.task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.completed_count, 2);
    assert!(done.completed_at.is_some());
    assert_eq!(
        done.image_url.as_deref(),
        Some(format!("/files/{}_0.png", task.task_id).as_str())
    );
    assert!(h.dir.path().join(format!("{}_1.png", task.task_id)).exists());

    let messages = h.notifier.for_task(&task.task_id);
    assert_eq!(messages.len(), 3);
    assert_matches!(
        &messages[0],
        TaskMessage::Progress { completed_count: 1, total_count: 2, latest_image: Some(_) }
    );
    assert_matches!(&messages[1], TaskMessage::Progress { completed_count: 2, .. });
    assert_matches!(
        &messages[2],
        TaskMessage::Complete { completed_count: 2, total_count: 2, latest_image: Some(_) }
    );

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Test: provider failure fails the task and notifies once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn provider_failure_marks_task_failed() {
    let provider = ScriptedProvider::new("fake", Script::FailAfter(1, "rate limited".into()));
    let mut h = Harness::new(vec![provider], 1, 10);
    h.start();

    let task = h.dispatcher.submit(generation("p", 3)).await.unwrap();
    let done = h.wait_terminal(&task.task_id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.completed_at.is_some());
    assert!(done.error_message.as_deref().unwrap().contains("rate limited"));
    assert!(done.image_url.is_none());

    let messages = h.notifier.for_task(&task.task_id);
    assert_eq!(messages.len(), 2);
    assert_matches!(&messages[0], TaskMessage::Progress { completed_count: 1, .. });
    assert_matches!(&messages[1], TaskMessage::Error { message } if message.contains("rate limited"));

    h.stop().await;
}

#[tokio::test]
async fn empty_output_is_a_failure() {
    let mut h = Harness::new(vec![ScriptedProvider::new("fake", Script::Nothing)], 1, 10);
    h.start();

    let task = h.dispatcher.submit(generation("p", 1)).await.unwrap();
    let done = h.wait_terminal(&task.task_id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("provider produced no images"));

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Test: admission rejections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_queue_rejects_without_creating_a_record() {
    let h = Harness::new(vec![succeed()], 1, 1);

    h.dispatcher.submit(generation("first", 1)).await.unwrap();
    let err = h.dispatcher.submit(generation("second", 1)).await.unwrap_err();

    assert_matches!(err, SubmitError::Capacity);
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.dispatcher.queue_depth(), 1);
}

#[tokio::test]
async fn duplicate_id_releases_its_slot() {
    let h = Harness::new(vec![succeed()], 1, 2);
    let input = NewGeneration {
        task_id: Some("fixed-id".into()),
        ..generation("p", 1)
    };

    h.dispatcher.submit(input.clone()).await.unwrap();
    let err = h.dispatcher.submit(input).await.unwrap_err();

    assert_matches!(err, SubmitError::DuplicateTask(id) if id == "fixed-id");
    assert_eq!(h.dispatcher.queue_depth(), 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_admission() {
    let h = Harness::new(vec![succeed()], 1, 10);

    assert_matches!(
        h.dispatcher.submit(generation("   ", 1)).await,
        Err(SubmitError::InvalidRequest(_))
    );
    assert_matches!(
        h.dispatcher.submit(generation("p", 9)).await,
        Err(SubmitError::InvalidRequest(_))
    );
    assert_matches!(
        h.dispatcher
            .submit(NewGeneration {
                provider: Some("nope".into()),
                ..generation("p", 1)
            })
            .await,
        Err(SubmitError::UnknownProvider(name)) if name == "nope"
    );

    let mut params = serde_json::Map::new();
    params.insert("unsupported".into(), true.into());
    assert_matches!(
        h.dispatcher
            .submit(NewGeneration {
                params,
                ..generation("p", 1)
            })
            .await,
        Err(SubmitError::InvalidRequest(_))
    );

    assert!(h.store.is_empty().await);
    assert_eq!(h.dispatcher.queue_depth(), 0);
}

#[tokio::test]
async fn request_model_wins_over_defaults() {
    let h = Harness::new(vec![succeed()], 1, 10);
    let task = h
        .dispatcher
        .submit(NewGeneration {
            model_id: Some("  custom-model ".into()),
            ..generation("p", 1)
        })
        .await
        .unwrap();
    assert_eq!(task.model_id, "custom-model");
}

#[tokio::test]
async fn model_ids_outside_one_path_segment_are_rejected() {
    let h = Harness::new(vec![succeed()], 1, 10);

    let err = h
        .dispatcher
        .submit(NewGeneration {
            model_id: Some("../../v1/admin/delete?x=".into()),
            ..generation("p", 1)
        })
        .await
        .unwrap_err();
    assert_matches!(err, SubmitError::InvalidRequest(msg) if msg.contains("model id"));

    let mut params = serde_json::Map::new();
    params.insert("model".into(), "models/other:generateContent".into());
    assert_matches!(
        h.dispatcher
            .submit(NewGeneration {
                params,
                ..generation("p", 1)
            })
            .await,
        Err(SubmitError::InvalidRequest(_))
    );

    assert!(h.store.is_empty().await);
    assert_eq!(h.dispatcher.queue_depth(), 0);
}

// ---------------------------------------------------------------------------
// Test: worker_count bounds concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_more_than_worker_count_tasks_run_at_once() {
    let provider = GatedProvider::new();
    let mut h = Harness::new(vec![provider.clone()], 2, 10);
    h.start();

    let mut ids = Vec::new();
    for i in 0..5 {
        let task = h.dispatcher.submit(generation(&format!("p{i}"), 1)).await.unwrap();
        ids.push(task.task_id);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while provider.active.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(provider.peak.load(Ordering::SeqCst), 2);

    provider.release.add_permits(5);
    for id in &ids {
        assert_eq!(h.wait_terminal(id).await.status, TaskStatus::Completed);
    }
    assert_eq!(provider.peak.load(Ordering::SeqCst), 2);

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Test: withdrawal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queued_task_can_be_withdrawn_and_is_never_claimed() {
    let mut h = Harness::new(vec![succeed()], 1, 10);
    let withdrawn = h.dispatcher.submit(generation("gone", 1)).await.unwrap();
    let kept = h.dispatcher.submit(generation("kept", 1)).await.unwrap();

    let task = h.dispatcher.withdraw(&withdrawn.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(task.completed_at.is_some());
    assert_eq!(
        h.notifier.for_task(&withdrawn.task_id),
        vec![TaskMessage::error(CANCELLED_MESSAGE)]
    );

    h.start();
    assert_eq!(h.wait_terminal(&kept.task_id).await.status, TaskStatus::Completed);
    let after = h.store.find(&withdrawn.task_id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Failed);
    assert_eq!(h.notifier.for_task(&withdrawn.task_id).len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn withdraw_rejects_processing_and_unknown_tasks() {
    let provider = GatedProvider::new();
    let mut h = Harness::new(vec![provider.clone()], 1, 10);
    h.start();

    let task = h.dispatcher.submit(generation("p", 1)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while provider.active.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_matches!(
        h.dispatcher.withdraw(&task.task_id).await,
        Err(SubmitError::NotQueued(_))
    );
    assert_matches!(
        h.dispatcher.withdraw("missing").await,
        Err(SubmitError::NotFound(_))
    );

    provider.release.add_permits(1);
    assert_eq!(h.wait_terminal(&task.task_id).await.status, TaskStatus::Completed);
    h.stop().await;
}

// ---------------------------------------------------------------------------
// Test: retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_resubmits_failed_task_under_new_id() {
    let provider = ScriptedProvider::new("fake", Script::FailAfter(0, "boom".into()));
    let mut h = Harness::new(vec![provider], 1, 10);
    h.start();

    let original = h.dispatcher.submit(generation("again", 2)).await.unwrap();
    h.wait_terminal(&original.task_id).await;

    let retried = h.dispatcher.retry(&original.task_id).await.unwrap();
    assert_ne!(retried.task_id, original.task_id);
    assert_eq!(retried.prompt, "again");
    assert_eq!(retried.total_count, 2);
    assert_eq!(retried.model_id, original.model_id);

    let retried = h.wait_terminal(&retried.task_id).await;
    assert_matches!(
        h.dispatcher.retry(&retried.task_id).await,
        Ok(_)
    );

    h.stop().await;
}

#[tokio::test]
async fn retry_requires_a_failed_task() {
    let h = Harness::new(vec![succeed()], 1, 10);
    let task = h.dispatcher.submit(generation("p", 1)).await.unwrap();

    assert_matches!(
        h.dispatcher.retry(&task.task_id).await,
        Err(SubmitError::NotFailed(_))
    );
    assert_matches!(h.dispatcher.retry("missing").await, Err(SubmitError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Test: shutdown and restart recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_after_shutdown_is_rejected() {
    let mut h = Harness::new(vec![succeed()], 1, 10);
    h.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.stop().await;

    assert_matches!(
        h.dispatcher.submit(generation("late", 1)).await,
        Err(SubmitError::ShuttingDown)
    );
}

#[tokio::test]
async fn recover_fails_orphans_and_requeues_waiting_tasks() {
    let mut h = Harness::new(vec![succeed()], 1, 10);
    for id in ["orphan", "waiting-1", "waiting-2"] {
        h.store
            .create(&NewTask {
                task_id: id.into(),
                provider_name: "fake".into(),
                model_id: "m".into(),
                prompt: "p".into(),
                params: TaskParams::default(),
                total_count: 1,
            })
            .await
            .unwrap();
    }
    h.store.claim("orphan").await.unwrap();

    let summary = h.dispatcher.recover().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.requeued, 2);

    let orphan = h.store.find("orphan").await.unwrap().unwrap();
    assert_eq!(orphan.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

    h.start();
    for id in ["waiting-1", "waiting-2"] {
        assert_eq!(h.wait_terminal(id).await.status, TaskStatus::Completed);
    }
    h.stop().await;
}
