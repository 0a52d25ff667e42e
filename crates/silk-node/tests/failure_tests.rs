//! Integration tests: failure detection and request-scoped errors.

mod support;

use std::time::Duration;

use silk_node::{NodeEvent, ReplyPolicy, SilkError, SubscribeOptions};
use support::{init_tracing, settle, started, started_with, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unclean_kill_is_detected_by_keepalive_expiry() {
    init_tracing();

    let mut a = started("a").await;

    let mut b_config = test_config("b");
    b_config.keepalive_period_ms = 200;
    let mut b = started_with(b_config).await;
    let b_id = b.id().clone();

    let mut events = a.take_event_receiver().expect("event receiver");

    a.join(b.info().await.expect("b info")).await.expect("join");
    settle().await;

    // Kill b without a _leave. Its keepalives stop; a must evict it
    // within three keepalive periods plus one prune interval.
    b.abort();

    let removed = tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(event) = events.recv().await {
            if let NodeEvent::PeerRemoved { id } = event {
                return id;
            }
        }
        panic!("event channel closed before PeerRemoved");
    })
    .await
    .expect("silent peer evicted");
    assert_eq!(removed, b_id);

    match a.send_to(&b_id, "anything", None).await {
        Err(SilkError::UnknownPeer { id }) => assert_eq!(id, b_id),
        other => panic!("expected UnknownPeer, got {other:?}"),
    }

    a.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unacknowledged_request_fails_after_retries() {
    init_tracing();

    let mut a_config = test_config("a");
    a_config.sweep_interval_ms = 100;
    let mut a = started_with(a_config).await;

    // b receives but never acknowledges; its advertised policy keeps
    // the retry budget small so the test converges quickly.
    let mut b_config = test_config("b");
    b_config.ack_all = false;
    let mut b = started_with(b_config).await;

    b.on(
        "silent",
        SubscribeOptions {
            policy: ReplyPolicy {
                period: 200,
                attempts: 2,
            },
        },
        |_| {},
    )
    .await
    .expect("subscribe");

    a.join(b.info().await.expect("b info")).await.expect("join");
    settle().await;

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        a.request_to(b.id(), "silent", None),
    )
    .await
    .expect("retry budget exhausts in time");

    match result {
        Err(SilkError::DeliveryFailed { .. }) => {}
        other => panic!("expected DeliveryFailed, got {other:?}"),
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_leaving_fails_requests_in_flight() {
    init_tracing();

    let mut a = started("a").await;

    let mut b_config = test_config("b");
    b_config.ack_all = false;
    let mut b = started_with(b_config).await;
    let b_id = b.id().clone();

    // Default policy: a long retry budget, so the request is still
    // pending when b departs.
    b.on("silent", Default::default(), |_| {}).await.expect("subscribe");

    a.join(b.info().await.expect("b info")).await.expect("join");
    settle().await;

    let request = a.request_to(&b_id, "silent", None);
    let departure = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        b.stop().await;
    };

    let (result, ()) = tokio::join!(request, departure);
    match result {
        Err(SilkError::PeerLost { id }) => assert_eq!(id, b_id),
        other => panic!("expected PeerLost, got {other:?}"),
    }

    a.stop().await;
}
