mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jobs_core::{JobEvent, JobId, JobResult, JobStatus};
use jobs_db::{DbError, StoreConfig};

use common::{job, setup_db_and_store, setup_store, setup_store_with};

fn names(queues: &[&str]) -> Vec<String> {
    queues.iter().map(|q| q.to_string()).collect()
}

#[tokio::test]
async fn enqueued_job_is_shown_as_queued() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let id = store.enqueue(job("emails", "first")).await?;
    let shown = store.get(id).await?;

    assert_eq!(shown.id, id);
    assert_eq!(shown.queue, "emails");
    assert_eq!(shown.title.as_deref(), Some("first"));
    assert_eq!(shown.status, JobStatus::Queued);
    assert!(shown.created <= Utc::now());
    assert_eq!(shown.attempts, 0);
    Ok(())
}

#[tokio::test]
async fn unknown_job_is_not_found() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let missing = store.get(JobId::new()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    let missing = store.remove(JobId::new()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn list_orders_by_queue_then_arrival() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let b1 = store.enqueue(job("b", "b1")).await?;
    let a1 = store.enqueue(job("a", "a1")).await?;
    let b2 = store.enqueue(job("b", "b2")).await?;
    let a2 = store.enqueue(job("a", "a2")).await?;

    let all: Vec<JobId> = store.list(&[]).await?.into_iter().map(|j| j.id).collect();
    assert_eq!(all, vec![a1, a2, b1, b2]);

    let only_b: Vec<JobId> = store
        .list(&names(&["b"]))
        .await?
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(only_b, vec![b1, b2]);

    assert!(store.list(&names(&["missing"])).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn enqueue_rejects_bad_queue_names() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let result = store.enqueue(job("two words", "x")).await;
    assert!(matches!(result, Err(DbError::Invalid(_))));
    Ok(())
}

#[tokio::test]
async fn clear_all_reports_non_empty_queues() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    store.enqueue(job("c", "c1")).await?;
    store.enqueue(job("a", "a1")).await?;
    store.enqueue(job("a", "a2")).await?;

    let cleared = store.clear(&[]).await?;
    assert_eq!(cleared, vec!["a", "c"]);
    assert!(store.list(&[]).await?.is_empty());

    let cleared_again = store.clear(&[]).await?;
    assert!(cleared_again.is_empty());
    Ok(())
}

#[tokio::test]
async fn clear_named_queues_leaves_others() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    store.enqueue(job("a", "a1")).await?;
    let b1 = store.enqueue(job("b", "b1")).await?;

    let cleared = store.clear(&names(&["a", "empty"])).await?;
    assert_eq!(cleared, vec!["a"]);

    let left: Vec<JobId> = store.list(&[]).await?.into_iter().map(|j| j.id).collect();
    assert_eq!(left, vec![b1]);
    Ok(())
}

#[tokio::test]
async fn clear_does_not_touch_running_jobs() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let id = store.enqueue(job("a", "a1")).await?;
    store.claim(&names(&["a"]), "worker-1").await?;

    assert!(store.clear(&[]).await?.is_empty());
    assert_eq!(store.get(id).await?.status, JobStatus::Running);
    Ok(())
}

#[tokio::test]
async fn claim_drains_queues_in_priority_order() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let queues = names(&["high", "low"]);

    let low1 = store.enqueue(job("low", "low1")).await?;
    let high1 = store.enqueue(job("high", "high1")).await?;
    let high2 = store.enqueue(job("high", "high2")).await?;

    let mut claimed = Vec::new();
    while let Some(job) = store.claim(&queues, "worker-1").await? {
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.worker.as_deref(), Some("worker-1"));
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());
        claimed.push(job.id);
    }

    assert_eq!(claimed, vec![high1, high2, low1]);
    assert!(store.list(&[]).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn claim_ignores_unlisted_queues() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    store.enqueue(job("other", "o1")).await?;
    assert!(store.claim(&names(&["default"]), "worker-1").await?.is_none());
    assert_eq!(store.list(&[]).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_removes_job_and_second_cancel_fails() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let keep = store.enqueue(job("default", "keep")).await?;
    let id = store.enqueue(job("default", "cancel me")).await?;

    let cancelled = store.cancel(id).await?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.ended_at.is_some());

    let left: Vec<JobId> = store.list(&[]).await?.into_iter().map(|j| j.id).collect();
    assert_eq!(left, vec![keep]);

    let again = store.cancel(id).await;
    assert!(matches!(
        again,
        Err(DbError::NotCancellable {
            status: JobStatus::Cancelled,
            ..
        })
    ));

    assert_eq!(store.get(id).await?.status, JobStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn failed_cancel_leaves_job_queued() -> Result<(), Box<dyn Error>> {
    let (db, store) = setup_db_and_store().await?;
    let id = store.enqueue(job("default", "stuck")).await?;

    // An archived record with the same id makes the history insert fail.
    db.query("CREATE type::thing('job_history', $id) CONTENT { queue: 'default' }")
        .bind(("id", id.to_string()))
        .await?
        .check()?;

    assert!(store.cancel(id).await.is_err());

    let job = store.get(id).await?;
    assert_eq!(job.status, JobStatus::Queued);
    let left: Vec<JobId> = store.list(&[]).await?.into_iter().map(|j| j.id).collect();
    assert_eq!(left, vec![id]);
    Ok(())
}

#[tokio::test]
async fn running_job_is_not_cancellable() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let id = store.enqueue(job("default", "busy")).await?;
    store.claim(&names(&["default"]), "worker-1").await?;

    let result = store.cancel(id).await;
    assert!(matches!(
        result,
        Err(DbError::NotCancellable {
            status: JobStatus::Running,
            ..
        })
    ));
    assert_eq!(store.get(id).await?.status, JobStatus::Running);
    Ok(())
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let result = store.cancel(JobId::new()).await;
    assert!(matches!(result, Err(DbError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn finished_and_failed_jobs_stay_inspectable() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let queues = names(&["default"]);

    let ok_id = store.enqueue(job("default", "ok")).await?;
    let bad_id = store.enqueue(job("default", "bad")).await?;

    let ok = store.claim(&queues, "worker-1").await?.ok_or("no job")?;
    store.finish(&ok, JobResult::new("done")).await?;

    let bad = store.claim(&queues, "worker-1").await?.ok_or("no job")?;
    store.fail(&bad, "boom").await?;

    let ok = store.get(ok_id).await?;
    assert_eq!(ok.status, JobStatus::Finished);
    assert_eq!(ok.result, Some(JobResult::new("done")));
    assert!(ok.ended_at.is_some());

    let bad = store.get(bad_id).await?;
    assert_eq!(bad.status, JobStatus::Failed);
    assert_eq!(bad.error.as_deref(), Some("boom"));

    assert!(store.queue_names().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn finish_and_fail_refuse_a_queued_job() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let id = store.enqueue(job("default", "waiting")).await?;
    let queued = store.get(id).await?;

    let finished = store.finish(&queued, JobResult::new("done")).await;
    assert!(matches!(
        finished,
        Err(DbError::InvalidTransition {
            from: JobStatus::Queued,
            to: JobStatus::Finished,
            ..
        })
    ));
    let failed = store.fail(&queued, "boom").await;
    assert!(matches!(
        failed,
        Err(DbError::InvalidTransition {
            from: JobStatus::Queued,
            to: JobStatus::Failed,
            ..
        })
    ));

    assert_eq!(store.get(id).await?.status, JobStatus::Queued);
    assert_eq!(store.list(&[]).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn ended_job_cannot_be_finished_again() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    store.enqueue(job("default", "once")).await?;
    let claimed = store
        .claim(&names(&["default"]), "worker-1")
        .await?
        .ok_or("no job")?;
    store.fail(&claimed, "boom").await?;

    let again = store.finish(&claimed, JobResult::new("late")).await;
    assert!(matches!(
        again,
        Err(DbError::InvalidTransition {
            from: JobStatus::Failed,
            ..
        })
    ));
    let requeued = store.requeue(&claimed, "late").await;
    assert!(matches!(requeued, Err(DbError::InvalidTransition { .. })));

    let kept = store.get(claimed.id).await?;
    assert_eq!(kept.status, JobStatus::Failed);
    assert_eq!(kept.error.as_deref(), Some("boom"));
    Ok(())
}

#[tokio::test]
async fn remove_deletes_a_queued_job() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let id = store.enqueue(job("default", "unwanted")).await?;

    let removed = store.remove(id).await?;
    assert_eq!(removed.id, id);
    assert_eq!(removed.title.as_deref(), Some("unwanted"));

    assert!(store.list(&[]).await?.is_empty());
    assert!(matches!(store.get(id).await, Err(DbError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn requeue_moves_job_to_the_tail() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let queues = names(&["default"]);

    let first = store.enqueue(job("default", "first")).await?;
    let second = store.enqueue(job("default", "second")).await?;

    let claimed = store.claim(&queues, "worker-1").await?.ok_or("no job")?;
    assert_eq!(claimed.id, first);
    let requeued = store.requeue(&claimed, "flaky").await?;
    assert_eq!(requeued.status, JobStatus::Queued);
    assert_eq!(requeued.error.as_deref(), Some("flaky"));

    let order: Vec<JobId> = store.list(&[]).await?.into_iter().map(|j| j.id).collect();
    assert_eq!(order, vec![second, first]);

    store.claim(&queues, "worker-1").await?;
    let again = store.claim(&queues, "worker-1").await?.ok_or("no job")?;
    assert_eq!(again.id, first);
    assert_eq!(again.attempts, 2);
    Ok(())
}

#[tokio::test]
async fn purge_drops_expired_history() -> Result<(), Box<dyn Error>> {
    let config = StoreConfig::default().with_result_ttl(Some(Duration::ZERO));
    let store = setup_store_with(config).await?;

    let id = store.enqueue(job("default", "short lived")).await?;
    let claimed = store
        .claim(&names(&["default"]), "worker-1")
        .await?
        .ok_or("no job")?;
    store.finish(&claimed, JobResult::new("done")).await?;

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(store.purge_expired().await?, 1);
    assert!(matches!(store.get(id).await, Err(DbError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn purge_keeps_history_without_ttl() -> Result<(), Box<dyn Error>> {
    let store = setup_store_with(StoreConfig::default().with_result_ttl(None)).await?;

    let id = store.enqueue(job("default", "kept")).await?;
    store.cancel(id).await?;

    assert_eq!(store.purge_expired().await?, 0);
    assert_eq!(store.get(id).await?.status, JobStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn queue_counts_cover_only_queued_jobs() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    store.enqueue(job("a", "a1")).await?;
    store.enqueue(job("a", "a2")).await?;
    store.enqueue(job("b", "b1")).await?;
    store.claim(&names(&["b"]), "worker-1").await?;

    let counts = store.queue_counts().await?;
    assert_eq!(counts.get("a"), Some(&2));
    assert_eq!(counts.get("b"), None);
    assert_eq!(store.queue_names().await?, vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn enqueue_broadcasts_event() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let mut events = store.subscribe();

    let id = store.enqueue(job("emails", "hello")).await?;

    match events.recv().await? {
        JobEvent::JobEnqueued { job_id, queue, .. } => {
            assert_eq!(job_id, id);
            assert_eq!(queue, "emails");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() -> Result<(), Box<dyn Error>> {
    const JOBS: usize = 60;
    const CLAIMERS: usize = 6;

    let store = Arc::new(setup_store().await?);
    let mut enqueued = HashSet::new();
    for i in 0..JOBS {
        enqueued.insert(store.enqueue(job("default", &format!("job-{i}"))).await?);
    }

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..CLAIMERS {
        let store = store.clone();
        tasks.spawn(async move {
            let queues = vec!["default".to_string()];
            let worker_id = format!("worker-{n}");
            let mut claimed = Vec::new();
            while let Some(job) = store.claim(&queues, &worker_id).await? {
                claimed.push(job.id);
            }
            Ok::<_, DbError>(claimed)
        });
    }

    let mut all = Vec::new();
    while let Some(result) = tasks.join_next().await {
        all.extend(result??);
    }

    let unique: HashSet<JobId> = all.iter().copied().collect();
    assert_eq!(all.len(), JOBS);
    assert_eq!(unique, enqueued);
    Ok(())
}
