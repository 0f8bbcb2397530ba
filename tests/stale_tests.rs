
use std::sync::atomic::Ordering;
use std::sync::Arc;

use printer_node_agent::spooler::ListingOutput;
use printer_node_agent::stale::{StaleCheck, StaleQueueCanceller};
use test_harness::{listing, test_now, FakeSpooler, FixedClock};

fn canceller(spooler: &Arc<FakeSpooler>) -> StaleQueueCanceller {
    StaleQueueCanceller::new(spooler.clone(), Arc::new(FixedClock(test_now())))
}

#[tokio::test]
async fn test_one_stale_job_cancels_whole_queue() {
    let now = test_now();
    let spooler = Arc::new(
        FakeSpooler::new().with_listing(listing(&[("PDF-1", 10), ("PDF-2", 35), ("PDF-3", 5)], now)),
    );

    let check = canceller(&spooler).check_and_cancel(30).await.unwrap();

    match check {
        StaleCheck::Cancelled { max_age, report } => {
            assert!((max_age - 35.0).abs() < 0.01, "max_age was {}", max_age);
            assert_eq!(report.found, 3);
            assert_eq!(report.canceled, 3);
            assert!(report.errors.is_empty());
        }
        other => panic!("expected a sweep, got {:?}", other),
    }
    // Fresh jobs are cancelled too
    assert_eq!(spooler.cancelled(), vec!["PDF-1", "PDF-2", "PDF-3"]);
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let now = test_now();
    let spooler = Arc::new(FakeSpooler::new().with_listing(listing(&[("PDF-7", 30)], now)));

    let check = canceller(&spooler).check_and_cancel(30).await.unwrap();

    assert!(matches!(check, StaleCheck::Cancelled { .. }));
    assert_eq!(spooler.cancelled(), vec!["PDF-7"]);
}

#[tokio::test]
async fn test_young_queue_is_left_alone() {
    let now = test_now();
    let spooler = Arc::new(
        FakeSpooler::new().with_listing(listing(&[("PDF-1", 29), ("PDF-2", 3)], now)),
    );

    let check = canceller(&spooler).check_and_cancel(30).await.unwrap();

    match check {
        StaleCheck::WithinThreshold { found, max_age } => {
            assert_eq!(found, 2);
            assert!((max_age - 29.0).abs() < 0.01);
        }
        other => panic!("expected no sweep, got {:?}", other),
    }
    assert!(spooler.cancelled().is_empty());
}

#[tokio::test]
async fn test_empty_queue_reports_no_jobs() {
    let spooler = Arc::new(
        FakeSpooler::new().with_listing(ListingOutput {
            stdout: String::new(),
            stderr: "lpstat: No jobs.".to_string(),
            exit_code: 1,
        }),
    );

    let check = canceller(&spooler).check_and_cancel(30).await.unwrap();

    assert_eq!(check, StaleCheck::NoJobs);
    assert!(spooler.cancelled().is_empty());
}

#[tokio::test]
async fn test_listing_failure_is_an_error() {
    let spooler = Arc::new(FakeSpooler::new().with_listing(ListingOutput {
        stdout: String::new(),
        stderr: "lpstat: Unable to connect to server".to_string(),
        exit_code: 1,
    }));

    let err = canceller(&spooler).check_and_cancel(30).await.unwrap_err();

    assert!(err.to_string().contains("Unable to connect"));
    assert!(spooler.cancelled().is_empty());
}

#[tokio::test]
async fn test_partial_cancel_failure_is_collected() {
    let now = test_now();
    let spooler = Arc::new(
        FakeSpooler::new()
            .with_listing(listing(&[("PDF-1", 40), ("PDF-2", 40), ("PDF-3", 40)], now))
            .fail_cancel("PDF-2", "cancel: Job #2 is already completed"),
    );

    let report = canceller(&spooler).cancel_all().await.unwrap();

    assert_eq!(report.found, 3);
    assert_eq!(report.canceled, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].job, "PDF-2");
    assert!(report.errors[0].error.contains("already completed"));
    assert_eq!(spooler.cancelled(), vec!["PDF-1", "PDF-3"]);
}

#[tokio::test]
async fn test_unparseable_timestamps_never_trigger_sweep() {
    let spooler = Arc::new(FakeSpooler::new().with_listing(ListingOutput::success(
        "PDF-1 pi 1024 sometime yesterday\nPDF-2 pi 2048",
    )));

    let check = canceller(&spooler).check_and_cancel(0).await.unwrap();

    // Unknown ages count as 0, which still meets a zero threshold
    assert!(matches!(check, StaleCheck::Cancelled { .. }));

    let check = canceller(&spooler).check_and_cancel(1).await.unwrap();
    assert!(matches!(
        check,
        StaleCheck::WithinThreshold { found: 2, .. }
    ));
}

#[tokio::test]
async fn test_cancel_all_relists_queue() {
    let now = test_now();
    let spooler = Arc::new(FakeSpooler::new().with_listings(vec![
        listing(&[("PDF-1", 45)], now),
        listing(&[("PDF-1", 45), ("PDF-2", 0)], now),
    ]));

    let check = canceller(&spooler).check_and_cancel(30).await.unwrap();

    // The job queued between the check and the sweep is cancelled as well
    match check {
        StaleCheck::Cancelled { report, .. } => assert_eq!(report.found, 2),
        other => panic!("expected a sweep, got {:?}", other),
    }
    assert_eq!(spooler.list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(spooler.cancelled(), vec!["PDF-1", "PDF-2"]);
}
