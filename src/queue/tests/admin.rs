#[cfg(test)]
mod tests {
    use crate::notifications::api::{Event, EventFilter, QueueEventType};
    use crate::queue::api::{
        handler_fn, EmailJob, JobOptionsOverride, JobOutcome, JobPayload, JobState, QueueError,
        QueueManager, Recipients, EMAIL_QUEUE, SEND_EMAIL,
    };
    use crate::queue::tests::support::*;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_pause_and_resume_are_idempotent() {
        let h = harness();
        h.manager.register_handler(QUEUE, TYPE, 1, ok_handler()).unwrap();
        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        assert!(h.manager.pause_queue(QUEUE).await.unwrap());
        assert!(!h.manager.pause_queue(QUEUE).await.unwrap());
        assert!(h.manager.get_queue_status(QUEUE).await.unwrap().paused);

        // Paused queues accept jobs but hand none out
        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
        assert!(h.manager.process_next(QUEUE, TYPE).await.unwrap().is_none());
        assert_eq!(
            h.manager.get_queue_status(QUEUE).await.unwrap().counts.get(JobState::Waiting),
            2
        );

        assert!(h.manager.resume_queue(QUEUE).await.unwrap());
        assert!(!h.manager.resume_queue(QUEUE).await.unwrap());
        assert!(!h.manager.get_queue_status(QUEUE).await.unwrap().paused);
        assert!(h.manager.process_next(QUEUE, TYPE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pause_emits_event_only_on_change() {
        let h = harness();
        h.manager.get_queue_status(QUEUE).await.unwrap();
        let mut events = h.manager.subscribe("observer", EventFilter::QueueOnly);

        h.manager.pause_queue(QUEUE).await.unwrap();
        h.manager.pause_queue(QUEUE).await.unwrap();
        h.manager.resume_queue(QUEUE).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(Event::Queue(event)) = events.try_recv() {
            kinds.push(event.event_type);
        }
        assert_eq!(kinds, vec![QueueEventType::Paused, QueueEventType::Resumed]);
    }

    #[tokio::test]
    async fn test_remove_job_is_idempotent() {
        let h = harness();
        let job = h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        assert!(h.manager.remove_job(QUEUE, job.id).await.unwrap());
        assert!(!h.manager.remove_job(QUEUE, job.id).await.unwrap());
        assert!(!h.manager.remove_job(QUEUE, 9_999).await.unwrap());
        assert!(!h.manager.remove_job("never-created", 1).await.unwrap());
        assert!(h.manager.get_job_status(QUEUE, job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_while_running_discards_result() {
        let h = harness();
        let gate = Arc::new(Notify::new());
        let release = gate.clone();
        h.manager
            .register_handler(
                QUEUE,
                TYPE,
                1,
                handler_fn(move |_ctx| {
                    let release = release.clone();
                    async move {
                        release.notified().await;
                        Ok(json!("done"))
                    }
                }),
            )
            .unwrap();
        let job = h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        let manager = h.manager.clone();
        let running = tokio::spawn(async move { manager.process_next(QUEUE, TYPE).await });
        wait_for_counts(&h.manager, QUEUE, |c| c.get(JobState::Active) == 1).await;

        assert!(h.manager.remove_job(QUEUE, job.id).await.unwrap());
        gate.notify_one();

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, Some(JobOutcome::Removed(job.id)));
        assert!(h.manager.get_job_status(QUEUE, job.id).await.unwrap().is_none());
        assert_eq!(h.manager.get_queue_status(QUEUE).await.unwrap().counts.total(), 0);
    }

    #[tokio::test]
    async fn test_clean_completed_with_zero_grace_removes_exactly_those() {
        let h = harness();
        h.manager.register_handler(QUEUE, TYPE, 1, ok_handler()).unwrap();
        h.manager
            .register_handler(QUEUE, "broken", 1, failing_handler("nope"))
            .unwrap();

        for _ in 0..3 {
            h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
            h.manager.process_next(QUEUE, TYPE).await.unwrap();
        }
        h.manager
            .enqueue(QUEUE, "broken", json!({}), Some(JobOptionsOverride::new().max_attempts(1)))
            .await
            .unwrap();
        h.manager.process_next(QUEUE, "broken").await.unwrap();
        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        let removed = h
            .manager
            .clean_queue(QUEUE, Duration::ZERO, JobState::Completed)
            .await
            .unwrap();
        assert_eq!(removed.len(), 3);
        assert!(removed.iter().all(|job| job.state == JobState::Completed));

        let counts = h.manager.get_queue_status(QUEUE).await.unwrap().counts;
        assert_eq!(counts.get(JobState::Completed), 0);
        assert_eq!(counts.get(JobState::Failed), 1);
        assert_eq!(counts.get(JobState::Waiting), 1);
    }

    #[tokio::test]
    async fn test_clean_respects_grace_period() {
        let h = harness();
        h.manager.register_handler(QUEUE, TYPE, 1, ok_handler()).unwrap();

        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
        h.manager.process_next(QUEUE, TYPE).await.unwrap();
        h.clock.advance(Duration::from_secs(60));
        let recent = h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
        h.manager.process_next(QUEUE, TYPE).await.unwrap();

        let removed = h
            .manager
            .clean_queue(QUEUE, Duration::from_secs(30), JobState::Completed)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_ne!(removed[0].id, recent.id);
        assert!(h.manager.get_job_status(QUEUE, recent.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clean_waiting_jobs_by_age() {
        let h = harness();
        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
        h.clock.advance(Duration::from_secs(10));

        let removed = h
            .manager
            .clean_queue(QUEUE, Duration::from_secs(5), JobState::Waiting)
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
    }

    #[tokio::test]
    async fn test_clean_with_unbounded_grace_removes_nothing() {
        let h = harness();
        h.manager.register_handler(QUEUE, TYPE, 1, ok_handler()).unwrap();
        h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
        h.manager.process_next(QUEUE, TYPE).await.unwrap();

        let removed = h
            .manager
            .clean_queue(QUEUE, Duration::from_millis(u64::MAX), JobState::Completed)
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert_eq!(
            h.manager.get_queue_status(QUEUE).await.unwrap().counts.get(JobState::Completed),
            1
        );
    }

    #[tokio::test]
    async fn test_empty_queue_keeps_metadata_and_ids() {
        let h = harness();
        h.manager.pause_queue(QUEUE).await.unwrap();
        let mut last = None;
        for _ in 0..4 {
            last = Some(h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap());
        }
        let mut events = h.manager.subscribe("observer", EventFilter::QueueOnly);

        assert_eq!(h.manager.empty_queue(QUEUE).await.unwrap(), 4);
        let status = h.manager.get_queue_status(QUEUE).await.unwrap();
        assert_eq!(status.counts.total(), 0);
        assert!(status.paused);

        match events.try_recv() {
            Ok(Event::Queue(event)) => {
                assert_eq!(event.event_type, QueueEventType::Emptied);
                assert_eq!(event.count, Some(4));
            }
            other => panic!("expected emptied event, got {:?}", other),
        }

        let next = h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();
        assert!(next.id > last.map(|job| job.id).unwrap_or_default());
    }

    #[tokio::test]
    async fn test_retry_failed_job() {
        let h = harness();
        h.manager
            .register_handler(QUEUE, "broken", 1, failing_handler("nope"))
            .unwrap();
        let job = h
            .manager
            .enqueue(QUEUE, "broken", json!({}), Some(JobOptionsOverride::new().max_attempts(1)))
            .await
            .unwrap();
        h.manager.process_next(QUEUE, "broken").await.unwrap();

        let retried = h.manager.retry_job(QUEUE, job.id).await.unwrap();
        assert_eq!(retried.state, JobState::Waiting);
        assert_eq!(retried.attempts_made, 0);
        assert!(retried.failure_reason.is_none());
        assert!(retried.finished_on.is_none());

        match h.manager.process_next(QUEUE, "broken").await.unwrap() {
            Some(JobOutcome::Failed(job)) => assert_eq!(job.attempts_made, 1),
            other => panic!("expected another failed attempt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_rejects_other_states() {
        let h = harness();
        let job = h.manager.enqueue(QUEUE, TYPE, report_payload(), None).await.unwrap();

        match h.manager.retry_job(QUEUE, job.id).await {
            Err(QueueError::InvalidState { job_id, state, expected }) => {
                assert_eq!(job_id, job.id);
                assert_eq!(state, JobState::Waiting);
                assert_eq!(expected, JobState::Failed);
            }
            other => panic!("expected invalid state, got {:?}", other),
        }
        assert!(matches!(
            h.manager.retry_job(QUEUE, 404).await,
            Err(QueueError::NotFound { job_id: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_input_without_side_effects() {
        let h = harness();

        let cases: Vec<(&str, &str, Value, Option<JobOptionsOverride>)> = vec![
            ("", TYPE, report_payload(), None),
            (QUEUE, " ", report_payload(), None),
            ("bad queue", TYPE, report_payload(), None),
            (QUEUE, TYPE, Value::Null, None),
            (QUEUE, TYPE, report_payload(), Some(JobOptionsOverride::new().max_attempts(0))),
            (EMAIL_QUEUE, SEND_EMAIL, json!({ "to": "a@example.com" }), None),
        ];
        for (queue, type_name, payload, options) in cases {
            let result = h.manager.enqueue(queue, type_name, payload, options).await;
            assert!(
                matches!(result, Err(QueueError::Validation(_))),
                "expected validation error for {:?}/{:?}, got {:?}",
                queue,
                type_name,
                result
            );
        }
        assert!(h.manager.queue_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_payload_routes_to_its_queue() {
        let h = harness();
        let job = h
            .manager
            .enqueue_payload(
                JobPayload::Email(EmailJob {
                    to: Recipients::One("ops@example.com".to_string()),
                    subject: "Nightly".to_string(),
                    body: "All good".to_string(),
                    html: None,
                    cc: None,
                    bcc: None,
                    attachments: None,
                }),
                None,
            )
            .await
            .unwrap();
        assert_eq!(job.queue_name, EMAIL_QUEUE);
        assert_eq!(job.type_name, SEND_EMAIL);
        assert_eq!(job.payload["to"], "ops@example.com");
    }

    #[tokio::test]
    async fn test_all_queue_status_lists_every_queue() {
        let h = harness();
        h.manager.enqueue("alpha", TYPE, report_payload(), None).await.unwrap();
        h.manager.enqueue("alpha", TYPE, report_payload(), None).await.unwrap();
        h.manager.enqueue("beta", TYPE, report_payload(), None).await.unwrap();
        h.manager.pause_queue("beta").await.unwrap();

        let statuses = h.manager.get_all_queues_status().await.unwrap();
        let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(statuses[0].counts.get(JobState::Waiting), 2);
        assert!(!statuses[0].paused);
        assert!(statuses[1].paused);
        assert!(statuses.iter().all(|s| s.error.is_none()));
    }

    #[tokio::test]
    async fn test_all_queue_status_reports_unreadable_queue() {
        let h = harness();
        let manager = QueueManager::with_store(
            fast_config(),
            Arc::new(BrokenCountsStore {
                inner: h.store.clone(),
                broken: "beta".to_string(),
            }),
            Arc::new(h.clock.clone()),
        );
        manager.enqueue("alpha", TYPE, report_payload(), None).await.unwrap();
        manager.enqueue("beta", TYPE, report_payload(), None).await.unwrap();
        manager.enqueue("gamma", TYPE, report_payload(), None).await.unwrap();
        assert!(manager.get_queue_status("beta").await.is_err());

        let statuses = manager.get_all_queues_status().await.unwrap();
        let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);

        let beta = &statuses[1];
        assert!(beta.error.as_deref().unwrap().contains("offline"));
        assert_eq!(beta.counts.total(), 0);
        assert!(!beta.paused);
        for healthy in [&statuses[0], &statuses[2]] {
            assert!(healthy.error.is_none());
            assert_eq!(healthy.counts.get(JobState::Waiting), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_queue_status_is_created_empty() {
        let h = harness();
        let status = h.manager.get_queue_status("fresh").await.unwrap();
        assert_eq!(status.counts.total(), 0);
        assert!(!status.paused);
        assert_eq!(h.manager.queue_names().await.unwrap(), vec!["fresh".to_string()]);
    }
}
