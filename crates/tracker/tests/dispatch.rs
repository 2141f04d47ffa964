mod common;

use capture::{LiveSource, SyntheticSource};
use common::{GatedClient, eventually, next_call};
use std::sync::Arc;
use tracker::status::{self, StatusBoard, StatusToken};
use tracker::{
    AnalysisError, DispatchMetrics, DispatchTick, Dispatcher, FrameEncoder, Session,
};

struct Fixture {
    session: Arc<Session>,
    board: Arc<StatusBoard>,
    dispatcher: Dispatcher,
}

fn fixture(bound: usize, client: GatedClient) -> Fixture {
    let session = Arc::new(Session::new(bound));
    let source: Arc<dyn LiveSource> = Arc::new(SyntheticSource::new(640, 480));
    let board = Arc::new(StatusBoard::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&session),
        source,
        Arc::new(client),
        FrameEncoder::new(416, 0.5),
        board.clone(),
        DispatchMetrics::new("tracker-test"),
    );
    Fixture {
        session,
        board,
        dispatcher,
    }
}

/// With a bound of one, ticks while a request is outstanding submit nothing.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_saturated_ticks_do_not_submit() {
    let (client, mut calls) = GatedClient::new();
    let f = fixture(1, client);

    assert_eq!(f.dispatcher.tick(), DispatchTick::Submitted { sequence: 1 });
    for _ in 0..10 {
        assert_eq!(f.dispatcher.tick(), DispatchTick::Saturated);
    }
    assert_eq!(f.session.in_flight(), 1);

    let call = next_call(&mut calls).await;
    assert_eq!((call.frame.width, call.frame.height), (416, 312));
    call.succeed(0, None);

    eventually("permit release", || f.session.in_flight() == 0).await;
    assert_eq!(f.dispatcher.tick(), DispatchTick::Submitted { sequence: 2 });
    assert_eq!(f.session.peak_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_result_status_follows_person_count() {
    let (client, mut calls) = GatedClient::new();
    let f = fixture(1, client);

    f.dispatcher.tick();
    next_call(&mut calls).await.succeed(3, Some(11.0));
    eventually("first result", || f.session.cache().latest().is_some()).await;
    let snapshot = f.board.snapshot();
    assert_eq!(snapshot.status, StatusToken::Detecting);
    assert_eq!(snapshot.persons, 3);
    assert_eq!(snapshot.fps, 11.0);

    eventually("permit release", || f.session.in_flight() == 0).await;
    f.dispatcher.tick();
    next_call(&mut calls).await.succeed(0, None);
    eventually("second result", || {
        f.session.cache().latest().is_some_and(|c| c.sequence == 2)
    })
    .await;
    assert_eq!(f.board.snapshot().status, StatusToken::Active);
}

/// A failed request keeps the cached result and does not stall the loop.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failures_are_contained() {
    let (client, mut calls) = GatedClient::new();
    let f = fixture(1, client);

    f.dispatcher.tick();
    next_call(&mut calls).await.succeed(1, None);
    eventually("permit release", || f.session.in_flight() == 0).await;

    f.dispatcher.tick();
    next_call(&mut calls).await.fail(AnalysisError::Service {
        code: Some(500),
        message: "Internal Server Error".to_string(),
    });
    eventually("permit release", || f.session.in_flight() == 0).await;

    assert_eq!(f.session.cache().latest().unwrap().sequence, 1);
    let snapshot = f.board.snapshot();
    assert_eq!(snapshot.status, StatusToken::Error);
    assert_eq!(snapshot.message, status::PROCESSING_ERROR);

    assert_eq!(f.dispatcher.tick(), DispatchTick::Submitted { sequence: 3 });
    next_call(&mut calls)
        .await
        .fail(AnalysisError::Network("connection refused".to_string()));
    eventually("permit release", || f.session.in_flight() == 0).await;

    let snapshot = f.board.snapshot();
    assert_eq!(snapshot.status, StatusToken::Offline);
    assert_eq!(snapshot.message, status::CONNECTION_ERROR);
    assert_eq!(f.session.cache().latest().unwrap().sequence, 1);
}

/// Results completing after the session stopped are dropped silently.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_result_after_deactivate_is_discarded() {
    let (client, mut calls) = GatedClient::new();
    let f = fixture(1, client);

    f.dispatcher.tick();
    let call = next_call(&mut calls).await;

    assert!(f.session.deactivate());
    assert_eq!(f.dispatcher.tick(), DispatchTick::Inactive);
    let before = f.board.snapshot();

    call.succeed(4, Some(20.0));
    eventually("permit release", || f.session.in_flight() == 0).await;

    assert!(f.session.cache().latest().is_none());
    assert_eq!(f.board.snapshot(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_requests_keep_newest_result() {
    let (client, mut calls) = GatedClient::new();
    let f = fixture(2, client);

    assert_eq!(f.dispatcher.tick(), DispatchTick::Submitted { sequence: 1 });
    let first = next_call(&mut calls).await;
    assert_eq!(f.dispatcher.tick(), DispatchTick::Submitted { sequence: 2 });
    let second = next_call(&mut calls).await;
    assert_eq!(f.dispatcher.tick(), DispatchTick::Saturated);

    second.succeed(2, None);
    eventually("second result", || f.session.cache().latest().is_some()).await;
    first.succeed(1, None);
    eventually("both released", || f.session.in_flight() == 0).await;

    let held = f.session.cache().latest().unwrap();
    assert_eq!(held.sequence, 2);
    assert_eq!(held.result.person_count, 2);
    assert_eq!(f.session.peak_in_flight(), 2);
}
