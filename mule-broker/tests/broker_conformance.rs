use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use mule_broker::{
    Broker, BrokerError, Clock, JobEvent, JobState, LeaseId, LeaseSweeper, ManualClock, WorkerId,
};

fn worker(id: &str) -> WorkerId {
    WorkerId::from(id)
}

/// Broker wired to a manual clock so lease expiry and retry hold-backs are
/// exercised without real sleeping.
fn broker_with_manual_clock() -> (Arc<Broker>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let broker = Broker::new().with_clock(clock.clone() as Arc<dyn mule_broker::Clock>);
    (Arc::new(broker), clock)
}

async fn receive_next_event(rx: &mut tokio::sync::broadcast::Receiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn happy_path_enqueue_poll_ack() {
    let broker = Broker::new();
    let w1 = worker("w1");

    let job_id = broker.enqueue("hello", None).unwrap();

    let job = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .expect("job should be leased immediately");
    assert_eq!(job.id, job_id);
    assert_eq!(job.state, JobState::Leased);
    assert_eq!(job.lease_id, LeaseId(1));
    assert_eq!(job.lease_owner, Some(w1.clone()));
    assert_eq!(job.payload, "hello");

    broker.ack(&w1, &job_id, job.lease_id).unwrap();
    // Ack is idempotent against itself.
    broker.ack(&w1, &job_id, job.lease_id).unwrap();

    let finished = broker.get_job(&job_id).unwrap();
    assert_eq!(finished.state, JobState::Done);
    assert_eq!(finished.attempts, 0);
    assert_eq!(finished.lease_owner, None);
    assert_eq!(finished.lease_expires_at, None);
}

#[tokio::test]
async fn ack_rejects_wrong_worker_and_stale_token() {
    let broker = Broker::new();
    let w1 = worker("w1");

    let job_id = broker.enqueue("x", None).unwrap();
    let job = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        broker.ack(&worker("intruder"), &job_id, job.lease_id),
        Err(BrokerError::NotLeaseHolder)
    );
    assert_eq!(
        broker.ack(&w1, &job_id, LeaseId(0)),
        Err(BrokerError::StaleLease {
            presented: LeaseId(0),
            current: LeaseId(1),
        })
    );

    // The real holder with the real token still succeeds.
    broker.ack(&w1, &job_id, job.lease_id).unwrap();
}

#[tokio::test]
async fn ack_against_expired_lease_is_a_conflict() {
    let (broker, clock) = broker_with_manual_clock();
    let w1 = worker("w1");

    let job_id = broker.enqueue("x", None).unwrap();
    let job = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();

    clock.advance(ChronoDuration::seconds(31));
    assert_eq!(
        broker.ack(&w1, &job_id, job.lease_id),
        Err(BrokerError::LeaseExpired)
    );
}

#[tokio::test]
async fn zombie_worker_is_fenced_off() {
    let (broker, clock) = broker_with_manual_clock();
    let (w1, w2) = (worker("w1"), worker("w2"));

    let job_id = broker.enqueue("x", None).unwrap();

    let first = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.lease_id, LeaseId(1));

    // w1 goes silent past its lease; the sweeper reclaims the job.
    clock.advance(ChronoDuration::seconds(35));
    assert_eq!(broker.sweep_expired(), 1);
    assert_eq!(broker.get_job(&job_id).unwrap().state, JobState::Queued);

    let second = broker
        .poll_with_deadline(&w2, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.id, job_id);
    assert_eq!(second.lease_id, LeaseId(2));

    // The zombie's commit bounces; the live worker's lands.
    assert!(broker.ack(&w1, &job_id, first.lease_id).is_err());
    broker.ack(&w2, &job_id, second.lease_id).unwrap();
    assert_eq!(broker.get_job(&job_id).unwrap().state, JobState::Done);
}

#[tokio::test]
async fn repeated_failures_back_off_then_dead_letter() {
    let (broker, clock) = broker_with_manual_clock();
    let w1 = worker("w1");

    let job_id = broker.enqueue("p", None).unwrap();

    for (attempt, window_secs) in [(1u32, 5i64), (2, 10)] {
        let job = broker
            .poll_with_deadline(&w1, Duration::from_millis(100))
            .await
            .unwrap()
            .expect("job should be eligible");
        assert_eq!(job.lease_id, LeaseId(attempt as u64));

        let now = clock.now();
        broker.fail(&w1, &job_id, job.lease_id).unwrap();

        let failed = broker.get_job(&job_id).unwrap();
        assert_eq!(failed.state, JobState::Queued);
        assert_eq!(failed.attempts, attempt);
        let next = failed.next_available_at.expect("retry hold-back set");
        assert!(next >= now, "hold-back in the past");
        assert!(
            next <= now + ChronoDuration::seconds(window_secs),
            "hold-back beyond the jitter window"
        );

        // Step past the worst-case hold-back so the next poll finds it.
        clock.advance(ChronoDuration::seconds(window_secs + 1));
    }

    let job = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.lease_id, LeaseId(3));
    broker.fail(&w1, &job_id, job.lease_id).unwrap();

    let dead = broker.get_job(&job_id).unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 3);
    assert_eq!(dead.next_available_at, None);
    assert!(broker.snapshot_dead().contains_key(&job_id));

    // Dead is terminal: nothing is eligible any more.
    let nothing = broker
        .poll_with_deadline(&w1, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(nothing.is_none());

    // And further worker reports bounce off the terminal state.
    assert_eq!(
        broker.fail(&w1, &job_id, LeaseId(3)),
        Err(BrokerError::NotLeaseHolder)
    );
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let broker = Broker::new();
    let w1 = worker("w1");
    let missing = mule_broker::JobId::new();

    assert!(matches!(
        broker.ack(&w1, &missing, LeaseId(1)),
        Err(BrokerError::JobNotFound(_))
    ));
    assert!(matches!(
        broker.fail(&w1, &missing, LeaseId(1)),
        Err(BrokerError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn fail_after_done_reports_success() {
    let broker = Broker::new();
    let w1 = worker("w1");

    let job_id = broker.enqueue("x", None).unwrap();
    let job = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    broker.ack(&w1, &job_id, job.lease_id).unwrap();

    // A late failure report for a completed job is not an error.
    broker.fail(&w1, &job_id, job.lease_id).unwrap();
    assert_eq!(broker.get_job(&job_id).unwrap().state, JobState::Done);
}

#[tokio::test]
async fn idempotency_key_replay_returns_original_job() {
    let broker = Broker::new();

    // First request: key is fresh, job gets created and committed.
    assert_eq!(broker.reserve_key("K").unwrap(), None);
    let job_id = broker.enqueue("a", Some("K")).unwrap();

    // Replay with a different payload still maps to the original job.
    let replayed = broker.reserve_key("K").unwrap();
    assert_eq!(replayed, Some(job_id.clone()));

    assert_eq!(broker.snapshot_all().len(), 1);
    assert_eq!(broker.get_job(&job_id).unwrap().payload, "a");
}

#[tokio::test]
async fn concurrent_duplicate_enqueue_conflicts_until_committed() {
    let broker = Broker::new();

    // Request one holds the reservation...
    assert_eq!(broker.reserve_key("K").unwrap(), None);

    // ...so an overlapping duplicate is refused instead of double-creating.
    assert_eq!(
        broker.reserve_key("K"),
        Err(BrokerError::ReservationInFlight("K".to_string()))
    );

    let job_id = broker.enqueue("a", Some("K")).unwrap();

    // After the commit the key resolves to the job for everyone.
    assert_eq!(broker.reserve_key("K").unwrap(), Some(job_id));
    assert_eq!(broker.snapshot_all().len(), 1);
}

#[tokio::test]
async fn released_reservation_can_be_retried() {
    let broker = Broker::new();

    assert_eq!(broker.reserve_key("K").unwrap(), None);
    // Request turned out to be malformed; the reservation is dropped.
    broker.release_key("K");

    assert_eq!(broker.reserve_key("K").unwrap(), None);
    let job_id = broker.enqueue("fixed", Some("K")).unwrap();
    assert_eq!(broker.reserve_key("K").unwrap(), Some(job_id));
}

#[tokio::test]
async fn blocked_poll_wakes_on_enqueue() {
    let broker = Arc::new(Broker::new());
    let handle = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            broker
                .poll_with_deadline(&worker("w1"), Duration::from_secs(5))
                .await
        })
    };

    // Let the poll park before the job shows up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let job_id = broker.enqueue("y", None).unwrap();

    let job = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poll did not wake after enqueue")
        .unwrap()
        .unwrap()
        .expect("woken poll should lease the new job");
    assert_eq!(job.id, job_id);
    assert_eq!(job.lease_id, LeaseId(1));
    assert_eq!(job.lease_owner, Some(worker("w1")));
}

#[tokio::test(start_paused = true)]
async fn poll_deadline_returns_no_job() {
    let broker = Broker::new();
    let outcome = broker
        .poll_with_deadline(&worker("w1"), Duration::from_secs(30))
        .await
        .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn sweeper_requeue_wakes_blocked_poll() {
    let (broker, clock) = broker_with_manual_clock();
    let (w1, w2) = (worker("w1"), worker("w2"));

    let job_id = broker.enqueue("x", None).unwrap();
    let first = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();

    // w1 stalls past the lease while w2 sits in a long poll.
    clock.advance(ChronoDuration::seconds(31));
    let sweeper = LeaseSweeper::with_interval(Arc::clone(&broker), Duration::from_millis(10));
    let sweeper_handle = tokio::spawn(sweeper.start());

    let second = broker
        .poll_with_deadline(&w2, Duration::from_secs(3))
        .await
        .unwrap()
        .expect("sweeper should have re-queued the job");
    assert_eq!(second.id, job_id);
    assert_eq!(second.lease_id, first.lease_id.next());

    sweeper_handle.abort();
}

#[tokio::test]
async fn lifecycle_emits_events_in_order() {
    let broker = Broker::new();
    let w1 = worker("w1");
    let mut events = broker.subscribe_events();

    let job_id = broker.enqueue("evt", Some("EK")).unwrap();
    match receive_next_event(&mut events).await {
        JobEvent::Enqueued {
            job_id: id,
            payload_len,
            idempotency_key,
            ..
        } => {
            assert_eq!(id, job_id);
            assert_eq!(payload_len, 3);
            assert_eq!(idempotency_key.as_deref(), Some("EK"));
        }
        other => panic!("expected Enqueued, got {:?}", other.event_name()),
    }

    let job = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    match receive_next_event(&mut events).await {
        JobEvent::Leased {
            job_id: id,
            worker_id,
            lease_id,
            ..
        } => {
            assert_eq!(id, job_id);
            assert_eq!(worker_id, w1);
            assert_eq!(lease_id, LeaseId(1));
        }
        other => panic!("expected Leased, got {:?}", other.event_name()),
    }

    broker.ack(&w1, &job_id, job.lease_id).unwrap();
    match receive_next_event(&mut events).await {
        JobEvent::Acked { job_id: id, .. } => assert_eq!(id, job_id),
        other => panic!("expected Acked, got {:?}", other.event_name()),
    }
}

#[tokio::test]
async fn rejected_ack_emits_reason() {
    let broker = Broker::new();
    let w1 = worker("w1");

    let job_id = broker.enqueue("x", None).unwrap();
    let job = broker
        .poll_with_deadline(&w1, Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();

    let mut events = broker.subscribe_events();
    let _ = broker.ack(&w1, &job_id, LeaseId(99));

    match receive_next_event(&mut events).await {
        JobEvent::AckRejected {
            job_id: id, reason, ..
        } => {
            assert_eq!(id, job_id);
            assert_eq!(reason, mule_broker::RejectReason::StaleLeaseId);
        }
        other => panic!("expected AckRejected, got {:?}", other.event_name()),
    }

    // The job is still live for the real token.
    broker.ack(&w1, &job_id, job.lease_id).unwrap();
}
