#[cfg(test)]
mod tests {
    use crate::core::time::TimeProvider;
    use crate::notifications::api::{EventFilter, JobEventType};
    use crate::queue::api::{
        handler_fn, HandlerError, JobOptionsOverride, JobOutcome, JobState, JobStore,
        STALLED_REASON,
    };
    use crate::queue::tests::support::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const LOCK: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_crashed_worker_job_is_reclaimed() {
        let h = harness();
        let mut events = h.manager.subscribe("observer", EventFilter::JobOnly);
        let job = h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        // A worker claims the job and then disappears without reporting back
        let claimed = h
            .store
            .claim_next_ready(QUEUE, TYPE, LOCK)
            .await
            .unwrap()
            .expect("job should be claimable");
        assert_eq!(claimed.attempts_made, 1);

        h.clock.advance(Duration::from_secs(10));
        assert!(h.manager.tick().await.unwrap().is_empty());

        h.clock.advance(Duration::from_secs(21));
        let report = h.manager.tick().await.unwrap();
        assert_eq!(report.stalled, 1);
        assert_eq!(report.failed, 0);

        let status = h.manager.get_job_status(QUEUE, job.id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Waiting);
        assert_eq!(status.attempts_made, 1);

        h.manager.register_handler(QUEUE, TYPE, 1, ok_handler()).unwrap();
        match h.manager.process_next(QUEUE, TYPE).await.unwrap() {
            Some(JobOutcome::Completed(done)) => {
                assert_eq!(done.id, job.id);
                assert_eq!(done.attempts_made, 2);
            }
            other => panic!("expected completion after recovery, got {:?}", other),
        }
        assert_eq!(count_of(&job_events(&mut events), JobEventType::Stalled), 1);
        println!("✓ Stalled job recovered by the dispatcher");
    }

    #[tokio::test]
    async fn test_stalled_job_without_attempts_fails() {
        let h = harness();
        let job = h
            .manager
            .enqueue(QUEUE, TYPE, report_payload(), Some(JobOptionsOverride::new().max_attempts(1)))
            .await
            .unwrap();
        h.store.claim_next_ready(QUEUE, TYPE, LOCK).await.unwrap();
        let mut events = h.manager.subscribe("observer", EventFilter::JobOnly);

        h.clock.advance(LOCK + Duration::from_secs(1));
        let report = h.manager.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.stalled, 0);

        let status = h.manager.get_job_status(QUEUE, job.id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some(STALLED_REASON));
        assert!(status.finished_on.is_some());

        let received = job_events(&mut events);
        assert_eq!(count_of(&received, JobEventType::Stalled), 1);
        assert_eq!(count_of(&received, JobEventType::Failed), 1);
    }

    #[tokio::test]
    async fn test_extend_lock_keeps_job_alive() {
        let h = harness();
        let clock = h.clock.clone();
        let observed = Arc::new(Mutex::new(None));
        let seen = observed.clone();
        let store = h.store.clone();
        h.manager
            .register_handler(
                QUEUE,
                TYPE,
                1,
                handler_fn(move |ctx| {
                    let clock = clock.clone();
                    let seen = seen.clone();
                    let store = store.clone();
                    async move {
                        clock.advance(Duration::from_secs(20));
                        let extended = ctx
                            .extend_lock()
                            .await
                            .map_err(|e| HandlerError::new(e.to_string()))?;
                        let current = store
                            .get(ctx.queue_name(), ctx.id())
                            .await
                            .map_err(|e| HandlerError::new(e.to_string()))?;
                        *seen.lock().unwrap() =
                            current.and_then(|job| job.lock_expires_at).map(|at| (at, clock.now()));
                        Ok(json!({ "extended": extended }))
                    }
                }),
            )
            .unwrap();
        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        match h.manager.process_next(QUEUE, TYPE).await.unwrap() {
            Some(JobOutcome::Completed(job)) => {
                assert_eq!(job.result, Some(json!({ "extended": true })))
            }
            other => panic!("expected completion, got {:?}", other),
        }
        let (expires_at, at) = observed.lock().unwrap().take().expect("lock observed");
        assert_eq!(expires_at, at + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_result_after_lost_lock_is_discarded() {
        let h = harness();
        let rescuer = sibling(&h, fast_config());
        let clock = h.clock.clone();
        h.manager
            .register_handler(
                QUEUE,
                TYPE,
                1,
                handler_fn(move |ctx| {
                    let clock = clock.clone();
                    let rescuer = rescuer.clone();
                    async move {
                        // Run past the lock while another engine's dispatcher ticks
                        clock.advance(LOCK + Duration::from_secs(1));
                        rescuer
                            .tick()
                            .await
                            .map_err(|e| HandlerError::new(e.to_string()))?;
                        let recorded = ctx
                            .progress(50)
                            .await
                            .map_err(|e| HandlerError::new(e.to_string()))?;
                        Ok(json!({ "progress_recorded": recorded }))
                    }
                }),
            )
            .unwrap();
        let job = h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        let outcome = h.manager.process_next(QUEUE, TYPE).await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::LockLost(job.id)));

        let status = h.manager.get_job_status(QUEUE, job.id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Waiting);
        assert_eq!(status.attempts_made, 1);
        assert_eq!(status.progress, json!(0));
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_ticks_promote_each_job_once() {
        let h = harness();
        let other = sibling(&h, fast_config());
        let mut events = h.manager.subscribe("observer", EventFilter::JobOnly);
        for _ in 0..20 {
            h.manager
                .enqueue(QUEUE, TYPE, report_payload(), Some(JobOptionsOverride::new().delay_ms(100)))
                .await
                .unwrap();
        }
        h.clock.advance(Duration::from_millis(100));

        let (a, b) = tokio::join!(h.manager.tick(), other.tick());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.promoted + b.promoted, 20);

        let counts = h.manager.get_queue_status(QUEUE).await.unwrap().counts;
        assert_eq!(counts.get(JobState::Waiting), 20);
        assert_eq!(counts.get(JobState::Delayed), 0);

        // Each engine announces only the promotions it performed
        let seen = count_of(&job_events(&mut events), JobEventType::Promoted);
        assert_eq!(seen, a.promoted);
    }

    #[tokio::test]
    async fn test_tick_on_empty_store_is_noop() {
        let h = harness();
        let report = h.manager.tick().await.unwrap();
        assert!(report.is_empty());
    }
}
