//! Integration tests: load-balanced sends across a four-node cluster
//! and broadcast request/reply fan-in.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use silk_node::{Node, SilkError};
use support::{init_tracing, settle, started};

/// Subscribes `node` to `work`, counting deliveries.
async fn count_work(node: &Node) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    node.on("work", Default::default(), move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .await
    .expect("subscribe");
    counter
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn load_balance_is_roughly_uniform() {
    init_tracing();

    let mut a = started("a").await;
    let mut b = started("b").await;
    let mut c = started("c").await;
    let mut d = started("d").await;

    let count_b = count_work(&b).await;
    let count_c = count_work(&c).await;
    let count_d = count_work(&d).await;

    let seed = b.info().await.expect("b info");
    a.join(seed.clone()).await.expect("a joins");
    settle().await;
    c.join(seed.clone()).await.expect("c joins");
    settle().await;
    d.join(seed).await.expect("d joins");
    settle().await;

    assert_eq!(
        a.peers().await.expect("peers").len(),
        3,
        "a must know b, c, and d before sending"
    );

    for _ in 0..300 {
        a.send("work", None).await.expect("send");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let counts = [
        count_b.load(Ordering::SeqCst),
        count_c.load(Ordering::SeqCst),
        count_d.load(Ordering::SeqCst),
    ];
    assert_eq!(counts.iter().sum::<usize>(), 300, "nothing lost");
    for (i, &n) in counts.iter().enumerate() {
        // Three-sigma band around the uniform expectation of 100.
        assert!(
            (75..=125).contains(&n),
            "receiver {i} got {n} of 300 — outside [75, 125]"
        );
    }

    a.stop().await;
    b.stop().await;
    c.stop().await;
    d.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_collects_replies_in_arrival_order() {
    init_tracing();

    let mut a = started("a").await;
    let mut b = started("b").await;
    let mut c = started("c").await;

    for (node, tag) in [(&b, "b"), (&c, "c")] {
        node.on("ping", Default::default(), move |delivery| {
            let _ = delivery.responder.respond(Some(json!({ "from": tag })));
        })
        .await
        .expect("subscribe");
    }

    let seed = b.info().await.expect("b info");
    a.join(seed.clone()).await.expect("a joins");
    settle().await;
    c.join(seed).await.expect("c joins");
    settle().await;

    let mut replies = a
        .request_all("ping", Some(json!({})))
        .await
        .expect("broadcast");

    let mut responders = Vec::new();
    while let Some(mut reply) = replies.recv().await {
        let from = reply.get("data.from").expect("parse").expect("from field");
        responders.push(from.as_str().expect("string").to_owned());
    }

    responders.sort();
    assert_eq!(responders, vec!["b", "c"], "one reply per subscriber");

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_without_subscribers_completes_empty() {
    init_tracing();

    let mut a = started("a").await;

    let begin = Instant::now();
    let mut replies = a
        .request_all("nothing-listens", None)
        .await
        .expect("broadcast");

    assert!(
        replies.recv().await.is_none(),
        "stream must close without items"
    );
    assert!(
        begin.elapsed() < Duration::from_secs(5),
        "stream must close once the reply period elapses"
    );

    a.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_without_subscribers_fails_synchronously() {
    init_tracing();

    let mut a = started("a").await;

    match a.send("work", None).await {
        Err(SilkError::NoSubscribers { kind }) => assert_eq!(kind, "work"),
        other => panic!("expected NoSubscribers, got {other:?}"),
    }

    a.stop().await;
}
