use super::*;
use anyhow::anyhow;
use tokio::time::Instant;

#[test]
fn reconciliation_schedule_matches_documented_delays() {
    let backoff = Backoff::reconciliation();
    assert_eq!(backoff.max_attempts, 4);
    let delays: Vec<u64> = (1..=4)
        .map(|attempt| backoff.delay_before(attempt).as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![1500, 1000, 2000, 3000]);
    assert_eq!(backoff.total_delay(), Duration::from_millis(7500));
}

#[test]
fn csrf_reverify_fits_in_six_seconds() {
    let backoff = Backoff::csrf_reverify();
    assert_eq!(backoff.max_attempts, 3);
    assert_eq!(backoff.total_delay(), Duration::from_secs(6));
}

#[test]
fn exponential_delays_grow_and_cap() {
    let backoff = Backoff::exponential(
        Duration::ZERO,
        Duration::from_millis(100),
        2,
        Duration::from_millis(500),
        6,
    );
    let delays: Vec<u64> = (1..=6)
        .map(|attempt| backoff.delay_before(attempt).as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![0, 100, 200, 400, 500, 500]);
}

#[test]
fn schedule_repeats_last_delay() {
    let mut backoff = Backoff::schedule(Duration::ZERO, [Duration::from_millis(10)]);
    backoff.max_attempts = 4;
    assert_eq!(backoff.delay_before(4), Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn poll_stops_as_soon_as_predicate_holds() {
    let backoff = Backoff::reconciliation();
    let start = Instant::now();
    let outcome = poll_until(
        &backoff,
        "test",
        |attempt| async move { Ok::<_, anyhow::Error>(attempt) },
        |attempt| *attempt == 3,
    )
    .await;

    assert_eq!(
        outcome,
        PollOutcome::Satisfied {
            value: 3,
            attempts: 3
        }
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(4500) && elapsed < Duration::from_millis(4600));
}

#[tokio::test(start_paused = true)]
async fn exhausted_poll_keeps_last_successful_value() {
    let backoff = Backoff::reconciliation();
    let start = Instant::now();
    let outcome = poll_until(
        &backoff,
        "test",
        |attempt| async move {
            if attempt == 4 {
                Err(anyhow!("backend unavailable"))
            } else {
                Ok(attempt)
            }
        },
        |_| false,
    )
    .await;

    assert_eq!(
        outcome,
        PollOutcome::Exhausted {
            last: Some(3),
            attempts: 4
        }
    );
    assert!(!outcome.is_satisfied());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(7500) && elapsed < Duration::from_millis(7600));
}
