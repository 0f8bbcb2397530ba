
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use printer_node_agent::heartbeat::HeartbeatLoop;
use printer_node_agent::stale::StaleQueueCanceller;
use test_harness::{listing, test_now, FakeSpooler, FixedClock, RecordingControlPlane};

fn heartbeat(spooler: &Arc<FakeSpooler>, cp: &Arc<RecordingControlPlane>) -> HeartbeatLoop {
    let clock = Arc::new(FixedClock(test_now()));
    HeartbeatLoop::new(
        "rpi-cd1ee4",
        Duration::from_secs(60),
        30,
        cp.clone(),
        StaleQueueCanceller::new(spooler.clone(), clock.clone()),
        clock,
    )
}

#[tokio::test]
async fn test_beat_reports_online_and_sweeps() {
    let spooler = Arc::new(
        FakeSpooler::new().with_listing(listing(&[("PDF-1", 45), ("PDF-2", 1)], test_now())),
    );
    let cp = Arc::new(RecordingControlPlane::new());

    heartbeat(&spooler, &cp).beat().await;

    let statuses = cp.statuses.lock().unwrap().clone();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].0, "rpi-cd1ee4");
    assert_eq!(statuses[0].1, "online");
    assert_eq!(statuses[0].2, test_now());
    assert_eq!(spooler.cancelled(), vec!["PDF-1", "PDF-2"]);
}

#[tokio::test]
async fn test_status_failure_does_not_skip_sweep() {
    let spooler = Arc::new(FakeSpooler::new().with_listing(listing(&[("PDF-9", 90)], test_now())));
    let cp = Arc::new(RecordingControlPlane::failing());

    heartbeat(&spooler, &cp).beat().await;

    assert_eq!(cp.status_count(), 1);
    assert_eq!(spooler.cancelled(), vec!["PDF-9"]);
}

#[tokio::test(start_paused = true)]
async fn test_loop_beats_every_interval_until_cancelled() {
    let spooler = Arc::new(FakeSpooler::new());
    let cp = Arc::new(RecordingControlPlane::new());
    let token = CancellationToken::new();

    let hb = heartbeat(&spooler, &cp);
    let run_token = token.clone();
    let handle = tokio::spawn(async move { hb.run(run_token).await });

    // Beats at t=0, 60 and 120
    tokio::time::sleep(Duration::from_secs(150)).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(cp.status_count(), 3);
    assert_eq!(spooler.list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_loop_exits_promptly_on_cancel() {
    let spooler = Arc::new(FakeSpooler::new());
    let cp = Arc::new(RecordingControlPlane::new());
    let token = CancellationToken::new();
    token.cancel();

    tokio::time::timeout(Duration::from_secs(1), heartbeat(&spooler, &cp).run(token))
        .await
        .expect("cancelled loop should return immediately");

    assert_eq!(cp.status_count(), 0);
}
