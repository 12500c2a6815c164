mod common;

use common::{
    at, base_time, build_driver, frame, init_tracing, poller_config, CapturingPublisher,
    CapturingSink, FailingPublisher,
};
use muster_models::{SensorCommand, SensorState};
use std::sync::Arc;

/// A silent device is re-polled on the fixed timeout with quiet hints that
/// apportion the remaining window evenly over the unspent budget, then
/// settles absent once the budget is gone. The cycle commits normally.
#[tokio::test]
async fn silent_device_walks_the_retry_ladder_to_absent() {
    init_tracing();
    let publisher = Arc::new(CapturingPublisher::default());
    let sink = Arc::new(CapturingSink::default());
    let mut driver = build_driver(
        &["alpha"],
        poller_config(60, 5, 3),
        publisher.clone(),
        sink.clone(),
    );

    driver.on_schedule_boundary(base_time()).await.unwrap();
    for secs in [5, 10, 15] {
        driver.on_timer_tick(at(secs)).await.unwrap();
    }
    assert!(sink.records().is_empty());
    driver.on_timer_tick(at(20)).await.unwrap();

    // 55/3, 50/2 and 45/1 seconds left across the unspent retries.
    assert_eq!(
        publisher.commands_for("alpha"),
        vec![
            SensorCommand::Poll(None),
            SensorCommand::Poll(Some(18)),
            SensorCommand::Poll(Some(25)),
            SensorCommand::Poll(Some(45)),
        ]
    );

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].values(), ["NaN"]);
    assert_eq!(records[0].committed_at(), at(20));

    let snap = driver.metrics().snapshot();
    assert_eq!(snap.repolls_sent, 3);
    assert_eq!(snap.absences, 1);
    assert_eq!(snap.cycles_committed, 1);
    // Exhaustion is a normal settlement, not a boundary overrun.
    assert_eq!(snap.cycles_forced, 0);

    let alpha = driver.roster().get("alpha").unwrap();
    assert_eq!(alpha.state, SensorState::Idle);
    assert_eq!(alpha.last_reading, None);
}

/// Ticks between timeouts spend nothing; the ladder only advances when the
/// fixed timeout has fully elapsed since the last poll.
#[tokio::test]
async fn ticks_inside_the_timeout_are_free() {
    init_tracing();
    let publisher = Arc::new(CapturingPublisher::default());
    let sink = Arc::new(CapturingSink::default());
    let mut driver = build_driver(
        &["alpha"],
        poller_config(60, 5, 3),
        publisher.clone(),
        sink.clone(),
    );

    driver.on_schedule_boundary(base_time()).await.unwrap();
    for secs in [1, 2, 3, 4] {
        driver.on_timer_tick(at(secs)).await.unwrap();
    }

    assert_eq!(publisher.commands_for("alpha"), vec![SensorCommand::Poll(None)]);
    assert_eq!(driver.roster().get("alpha").unwrap().retries_remaining, 3);
}

/// A response mid-ladder restores the full budget for the next cycle and
/// stops further re-polls.
#[tokio::test]
async fn response_mid_ladder_restores_the_budget() {
    init_tracing();
    let publisher = Arc::new(CapturingPublisher::default());
    let sink = Arc::new(CapturingSink::default());
    let mut driver = build_driver(
        &["alpha", "bravo"],
        poller_config(60, 5, 3),
        publisher.clone(),
        sink.clone(),
    );

    driver.on_schedule_boundary(base_time()).await.unwrap();
    driver.on_inbound(frame("bravo", "b1:20.0"), at(1)).await.unwrap();
    driver.on_timer_tick(at(5)).await.unwrap();
    driver.on_timer_tick(at(10)).await.unwrap();
    assert_eq!(driver.roster().get("alpha").unwrap().retries_remaining, 1);

    driver.on_inbound(frame("alpha", "a1:21.0"), at(12)).await.unwrap();

    let alpha = driver.roster().get("alpha").unwrap();
    assert_eq!(alpha.retries_remaining, 3);
    assert_eq!(alpha.last_reading, Some("21.0".to_string()));

    // Both settled, so the cycle committed; later ticks poll nobody.
    assert_eq!(sink.records().len(), 1);
    driver.on_timer_tick(at(17)).await.unwrap();
    assert_eq!(driver.metrics().snapshot().repolls_sent, 2);
    assert_eq!(driver.roster().get("alpha").unwrap().state, SensorState::Idle);
}

/// Once a cycle commits early, the schedule stays quiet until the period
/// boundary; only then does the next cycle open.
#[tokio::test]
async fn early_commit_keeps_quiet_until_the_boundary() {
    init_tracing();
    let publisher = Arc::new(CapturingPublisher::default());
    let sink = Arc::new(CapturingSink::default());
    let mut driver = build_driver(
        &["alpha"],
        poller_config(60, 5, 3),
        publisher.clone(),
        sink.clone(),
    );

    driver.on_schedule_boundary(base_time()).await.unwrap();
    driver.on_inbound(frame("alpha", "a1:21.5"), at(1)).await.unwrap();
    assert_eq!(sink.records().len(), 1);

    for secs in [10, 30, 59] {
        driver.on_timer_tick(at(secs)).await.unwrap();
    }
    assert_eq!(
        publisher.commands_for("alpha"),
        vec![SensorCommand::Poll(None), SensorCommand::Ack]
    );
    assert_eq!(driver.metrics().snapshot().cycles_committed, 1);

    driver.on_timer_tick(at(60)).await.unwrap();
    assert_eq!(
        publisher.commands_for("alpha").last(),
        Some(&SensorCommand::Poll(None))
    );
    assert_eq!(
        driver.roster().get("alpha").unwrap().state,
        SensorState::AwaitingResponse
    );
}

/// The quiet hint never reaches zero, even with almost no window left.
#[tokio::test]
async fn quiet_hint_is_floored_at_one_second() {
    init_tracing();
    let publisher = Arc::new(CapturingPublisher::default());
    let sink = Arc::new(CapturingSink::default());
    let mut driver = build_driver(
        &["alpha"],
        poller_config(12, 10, 3),
        publisher.clone(),
        sink.clone(),
    );

    driver.on_schedule_boundary(base_time()).await.unwrap();
    driver.on_timer_tick(at(10)).await.unwrap();

    // 2 seconds left over 3 unspent retries rounds down to zero; the hint
    // floors at one so the device never goes fully quiet.
    assert_eq!(
        publisher.commands_for("alpha"),
        vec![SensorCommand::Poll(None), SensorCommand::Poll(Some(1))]
    );
}

/// A dead transport refuses every command, but the cycle still runs its
/// course: retries are spent, absence settles, the record commits.
#[tokio::test]
async fn cycle_completes_even_when_publishing_fails() {
    init_tracing();
    let sink = Arc::new(CapturingSink::default());
    let mut driver = build_driver(
        &["alpha"],
        poller_config(60, 5, 1),
        Arc::new(FailingPublisher),
        sink.clone(),
    );

    driver.on_schedule_boundary(base_time()).await.unwrap();
    driver.on_timer_tick(at(5)).await.unwrap();
    driver.on_timer_tick(at(10)).await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].values(), ["NaN"]);

    let snap = driver.metrics().snapshot();
    // Initial poll plus one re-poll, every one refused.
    assert_eq!(snap.publish_failures, 2);
    assert_eq!(snap.repolls_sent, 1);
    assert_eq!(snap.absences, 1);
    assert_eq!(snap.cycles_committed, 1);
}
