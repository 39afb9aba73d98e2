//! Tests for the endpoint: pub/sub, peering, and statuses.

mod common;

use broker::core::error::ErrorCode;
use broker::data::{Data, DataMessage, Topic};
use broker::endpoint::{Endpoint, StatusCode, StatusMessage};
use common::{eventually, make_endpoint, settle};
use std::time::Duration;

/// Two endpoints peered over loopback.
async fn peered_pair() -> (Endpoint, Endpoint) {
    let upstream = make_endpoint();
    let downstream = make_endpoint();
    let port = upstream
        .listen("127.0.0.1", 0)
        .await
        .expect("failed to listen");
    downstream
        .peer("127.0.0.1", port, Duration::ZERO)
        .await
        .expect("failed to peer");
    settle().await;
    (upstream, downstream)
}

// ============================================================================
// Pub/Sub
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribers_receive_matching_topics() {
    let (receiver, sender) = peered_pair().await;
    let sub = receiver
        .make_subscriber(vec![Topic::new("/broker/test")], 20)
        .unwrap();
    settle().await;

    sender.publish("/broker/test", "ping");
    sender.publish("/broker/test/nested", "nested");
    sender.publish("/broker/testing", "no match");
    sender.publish("/other", "no match");

    assert!(
        eventually(Duration::from_secs(5), || async { sub.available() >= 2 }).await,
        "matching messages never arrived"
    );
    settle().await;

    let messages = sub.poll();
    let topics: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(topics, vec!["/broker/test", "/broker/test/nested"]);
    assert_eq!(messages[0].data, Data::Str("ping".into()));

    sender.shutdown().await;
    receiver.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publishes_stay_invisible_to_the_origin() {
    let (receiver, sender) = peered_pair().await;
    let origin_sub = sender
        .make_subscriber(vec![Topic::new("/broker/test")], 20)
        .unwrap();
    let remote_sub = receiver
        .make_subscriber(vec![Topic::new("/broker/test")], 20)
        .unwrap();
    settle().await;

    sender.publish("/broker/test", "hello");
    assert!(
        eventually(Duration::from_secs(5), || async {
            remote_sub.available() == 1
        })
        .await,
        "remote subscriber never got the message"
    );
    settle().await;
    assert_eq!(origin_sub.available(), 0);

    sender.shutdown().await;
    receiver.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscriber_get_times_out_when_idle() {
    let endpoint = make_endpoint();
    let sub = endpoint
        .make_subscriber(vec![Topic::new("/quiet")], 20)
        .unwrap();
    settle().await;

    let start = std::time::Instant::now();
    let result = tokio::task::spawn_blocking(move || sub.get_timeout(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(start.elapsed() >= Duration::from_millis(90));

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscriber_queue_overflow_drops_messages() {
    let (receiver, sender) = peered_pair().await;
    let sub = receiver
        .make_subscriber(vec![Topic::new("/burst")], 5)
        .unwrap();
    settle().await;

    for i in 0..10u64 {
        sender.publish("/burst", i);
    }
    assert!(
        eventually(Duration::from_secs(5), || async { sub.available() == 5 }).await,
        "queue never filled to its bound"
    );
    settle().await;

    assert_eq!(sub.available(), 5);
    assert_eq!(sub.poll().len(), 5);

    sender.shutdown().await;
    receiver.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_publish_preserves_order() {
    let (receiver, sender) = peered_pair().await;
    let sub = receiver
        .make_subscriber(vec![Topic::new("/batch")], 20)
        .unwrap();
    settle().await;

    let batch: Vec<DataMessage> = (0..5u64).map(|i| DataMessage::new("/batch", i)).collect();
    sender.publish_batch(batch);

    assert!(
        eventually(Duration::from_secs(5), || async { sub.available() == 5 }).await,
        "batch never arrived"
    );
    let received: Vec<Data> = sub.poll().into_iter().map(|m| m.data).collect();
    let expected: Vec<Data> = (0..5u64).map(Data::Count).collect();
    assert_eq!(received, expected);

    sender.shutdown().await;
    receiver.shutdown().await;
}

// ============================================================================
// Publisher Frontend
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publisher_delivers_and_tracks_capacity() {
    let (receiver, sender) = peered_pair().await;
    let sub = receiver
        .make_subscriber(vec![Topic::new("/pub")], 20)
        .unwrap();
    settle().await;

    let publisher = sender.make_publisher("/pub").unwrap();
    assert_eq!(publisher.capacity(), 30);
    assert_eq!(publisher.free_capacity(), publisher.capacity());
    assert_eq!(publisher.buffered(), 0);
    assert!(publisher.fd() >= 0);

    publisher.publish("one");
    publisher.publish_batch(vec![Data::Str("two".into()), Data::Str("three".into())]);

    assert!(
        eventually(Duration::from_secs(5), || async { sub.available() == 3 }).await,
        "subscriber never got the published values"
    );
    let received: Vec<Data> = sub.poll().into_iter().map(|m| m.data).collect();
    assert_eq!(
        received,
        vec![
            Data::Str("one".into()),
            Data::Str("two".into()),
            Data::Str("three".into()),
        ]
    );

    sender.shutdown().await;
    receiver.shutdown().await;
}

// ============================================================================
// Peering
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ping_pong_between_two_endpoints() {
    let mercury = make_endpoint();
    let venus = make_endpoint();

    let mercury_sub = mercury
        .make_subscriber(vec![Topic::new("/broker/test")], 20)
        .unwrap();
    let venus_sub = venus
        .make_subscriber(vec![Topic::new("/broker/test")], 20)
        .unwrap();

    let port = mercury
        .listen("127.0.0.1", 0)
        .await
        .expect("failed to listen");
    assert!(port > 0);
    venus
        .peer("127.0.0.1", port, Duration::ZERO)
        .await
        .expect("failed to peer");
    settle().await;

    mercury.publish("/broker/test", "ping");
    assert!(
        eventually(Duration::from_secs(5), || async {
            venus_sub.available() > 0
        })
        .await,
        "venus never received the ping"
    );
    let ping = venus_sub.poll().remove(0);
    assert_eq!(ping, DataMessage::new("/broker/test", "ping"));

    venus.publish("/broker/test", "pong");
    assert!(
        eventually(Duration::from_secs(5), || async {
            mercury_sub.available() > 0
        })
        .await,
        "mercury never received the pong"
    );
    let pong = mercury_sub.poll().remove(0);
    assert_eq!(pong, DataMessage::new("/broker/test", "pong"));

    // Neither side sees its own publication.
    assert_eq!(mercury_sub.available(), 0);
    assert_eq!(venus_sub.available(), 0);

    venus.shutdown().await;
    mercury.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peering_with_nobody_listening_fails_fast() {
    let endpoint = make_endpoint();

    // Find a port with no listener by binding and dropping one.
    let probe = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let err = endpoint
        .peer("127.0.0.1", port, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(
        err.code(),
        ErrorCode::PeerUnavailable | ErrorCode::PeerTimeout
    ));

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn statuses_report_the_peering_lifecycle() {
    let alpha = make_endpoint();
    let beta = make_endpoint();
    let statuses = beta.make_status_subscriber(true).unwrap();
    settle().await;

    let port = alpha.listen("127.0.0.1", 0).await.expect("failed to listen");
    beta.peer("127.0.0.1", port, Duration::ZERO)
        .await
        .expect("failed to peer");
    assert!(
        eventually(Duration::from_secs(5), || async {
            statuses.available() > 0
        })
        .await,
        "no status after peering"
    );
    match statuses.poll().remove(0) {
        StatusMessage::Status(status) => assert_eq!(status.code, StatusCode::PeerAdded),
        StatusMessage::Error(e) => panic!("unexpected error status: {}", e),
    }

    beta.unpeer("127.0.0.1", port)
        .await
        .expect("failed to unpeer");
    assert!(
        eventually(Duration::from_secs(5), || async {
            statuses.available() > 0
        })
        .await,
        "no status after unpeering"
    );
    match statuses.poll().remove(0) {
        StatusMessage::Status(status) => assert_eq!(status.code, StatusCode::PeerRemoved),
        StatusMessage::Error(e) => panic!("unexpected error status: {}", e),
    }

    alpha.shutdown().await;
    beta.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unpeer_unknown_address_is_an_error() {
    let endpoint = make_endpoint();
    let err = endpoint.unpeer("127.0.0.1", 1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PeerInvalid);
    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_to_targets_one_endpoint() {
    let alpha = make_endpoint();
    let beta = make_endpoint();
    let gamma = make_endpoint();

    let beta_sub = beta.make_subscriber(vec![Topic::new("/t")], 20).unwrap();
    let gamma_sub = gamma.make_subscriber(vec![Topic::new("/t")], 20).unwrap();

    let beta_port = beta.listen("127.0.0.1", 0).await.unwrap();
    let gamma_port = gamma.listen("127.0.0.1", 0).await.unwrap();
    alpha
        .peer("127.0.0.1", beta_port, Duration::ZERO)
        .await
        .unwrap();
    alpha
        .peer("127.0.0.1", gamma_port, Duration::ZERO)
        .await
        .unwrap();
    settle().await;

    alpha.publish_to(beta.node_id(), "/t", "only beta");
    assert!(
        eventually(Duration::from_secs(5), || async {
            beta_sub.available() > 0
        })
        .await,
        "beta never received the targeted publish"
    );
    settle().await;
    assert_eq!(gamma_sub.available(), 0);

    alpha.shutdown().await;
    beta.shutdown().await;
    gamma.shutdown().await;
}
