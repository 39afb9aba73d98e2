//! Tests for the replicated data stores.

mod common;

use broker::core::error::ErrorCode;
use broker::core::time::Timespan;
use broker::data::{Data, DataType, Set, Table};
use broker::endpoint::{BackendType, Endpoint};
use broker::store::{MemoryBackend, StoreEvent};
use common::{eventually, make_endpoint, make_sim_endpoint, settle};
use std::time::Duration;

fn memory() -> (BackendType, broker::endpoint::BackendOptions) {
    (BackendType::Memory, Table::new())
}

async fn master(endpoint: &Endpoint, name: &str) -> broker::Store {
    let (backend, options) = memory();
    endpoint
        .attach_master(name, backend, options)
        .expect("failed to attach master")
}

// ============================================================================
// Master Basics
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_put_get_erase() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;

    store.put("k", 42u64, None).unwrap();
    assert_eq!(store.get("k").await.unwrap(), Data::Count(42));
    assert!(store.exists("k").await.unwrap());

    store.erase("k").unwrap();
    let err = store.get("k").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchKey);
    assert!(!store.exists("k").await.unwrap());

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_keys_and_clear() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;

    assert_eq!(store.keys().await.unwrap(), Data::None);

    store.put("a", 1u64, None).unwrap();
    store.put("b", 2u64, None).unwrap();
    let keys = store.keys().await.unwrap();
    assert_eq!(
        keys,
        Data::Vector(vec![Data::Str("a".into()), Data::Str("b".into())])
    );

    store.clear().unwrap();
    assert_eq!(store.keys().await.unwrap(), Data::None);

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_add_and_subtract() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;

    // add initializes an absent key with the additive identity.
    store.add("hits", 5u64, DataType::Count, None).unwrap();
    store.add("hits", 3u64, DataType::Count, None).unwrap();
    assert_eq!(store.get("hits").await.unwrap(), Data::Count(8));

    store.subtract("hits", 2u64, None).unwrap();
    assert_eq!(store.get("hits").await.unwrap(), Data::Count(6));

    // Sets accumulate inserted elements.
    store.add("tags", "x", DataType::Set, None).unwrap();
    store.add("tags", "y", DataType::Set, None).unwrap();
    let mut expected = Set::new();
    expected.insert(Data::Str("x".into()));
    expected.insert(Data::Str("y".into()));
    assert_eq!(store.get("tags").await.unwrap(), Data::Set(expected));

    // subtract on a missing key is dropped with a warning; nothing appears.
    store.subtract("missing", 1u64, None).unwrap();
    settle().await;
    assert!(!store.exists("missing").await.unwrap());

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_aspect_queries() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;

    store.add("tags", "x", DataType::Set, None).unwrap();
    assert_eq!(
        store.get_aspect("tags", "x").await.unwrap(),
        Data::Bool(true)
    );
    assert_eq!(
        store.get_aspect("tags", "y").await.unwrap(),
        Data::Bool(false)
    );

    let mut table = Table::new();
    table.insert(Data::Str("inner".into()), Data::Count(9));
    store.put("map", Data::Table(table), None).unwrap();
    assert_eq!(store.get_aspect("map", "inner").await.unwrap(), Data::Count(9));

    store.put("plain", 1u64, None).unwrap();
    let err = store.get_aspect("plain", "x").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::TypeClash);

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_rejects_duplicate_name() {
    let endpoint = make_endpoint();
    let _store = master(&endpoint, "kv").await;

    let (backend, options) = memory();
    let err = endpoint.attach_master("kv", backend, options).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MasterExists);

    endpoint.shutdown().await;
}

// ============================================================================
// Store Events
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_emits_insert_update_erase() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;
    let mut events = store.events().await.unwrap();

    store.put("k", 1u64, None).unwrap();
    store.put("k", 2u64, None).unwrap();
    store.erase("k").unwrap();
    settle().await;

    match events.recv().await.unwrap() {
        StoreEvent::Insert { key, value, .. } => {
            assert_eq!(key, Data::Str("k".into()));
            assert_eq!(value, Data::Count(1));
        }
        other => panic!("expected insert, got {:?}", other),
    }
    match events.recv().await.unwrap() {
        StoreEvent::Update {
            old_value,
            new_value,
            ..
        } => {
            assert_eq!(old_value, Data::Count(1));
            assert_eq!(new_value, Data::Count(2));
        }
        other => panic!("expected update, got {:?}", other),
    }
    match events.recv().await.unwrap() {
        StoreEvent::Erase { key, .. } => assert_eq!(key, Data::Str("k".into())),
        other => panic!("expected erase, got {:?}", other),
    }

    endpoint.shutdown().await;
}

// ============================================================================
// Master/Clone Replication (single endpoint)
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clone_converges_to_master_state() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;
    let clone = endpoint.attach_clone("kv").expect("failed to attach clone");

    store.put("k", 42u64, None).unwrap();

    assert!(
        eventually(Duration::from_secs(5), || async {
            clone.get("k").await.ok() == Some(Data::Count(42))
        })
        .await,
        "clone never saw the put"
    );

    store.erase("k").unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            matches!(clone.get("k").await, Err(e) if e.code() == ErrorCode::NoSuchKey)
        })
        .await,
        "clone never saw the erase"
    );

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clone_bootstraps_from_snapshot() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;

    // State that predates the clone only arrives via the snapshot.
    store.put("old", 1u64, None).unwrap();
    settle().await;

    let clone = endpoint.attach_clone("kv").expect("failed to attach clone");
    assert!(
        eventually(Duration::from_secs(5), || async {
            clone.get("old").await.ok() == Some(Data::Count(1))
        })
        .await,
        "clone never installed the snapshot"
    );

    // Updates after the sync point flow over the channel.
    store.put("new", 2u64, None).unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            clone.get("new").await.ok() == Some(Data::Count(2))
        })
        .await,
        "clone never saw the follow-up put"
    );

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clone_applies_clear() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;
    let clone = endpoint.attach_clone("kv").expect("failed to attach clone");

    store.put("a", 1u64, None).unwrap();
    store.put("b", 2u64, None).unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            clone.exists("b").await.unwrap_or(false)
        })
        .await
    );

    store.clear().unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            clone.keys().await.ok() == Some(Data::None)
        })
        .await,
        "clone never applied the clear"
    );

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_through_a_clone_reach_the_master() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;
    let clone = endpoint.attach_clone("kv").expect("failed to attach clone");

    clone.put("k", 7u64, None).unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            store.get("k").await.ok() == Some(Data::Count(7))
        })
        .await,
        "master never saw the clone's put"
    );

    endpoint.shutdown().await;
}

// ============================================================================
// put_unique
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn put_unique_has_exactly_one_winner() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;

    let first = store.put_unique("k", 1u64, None).await.unwrap();
    let second = store.put_unique("k", 2u64, None).await.unwrap();
    assert!(first);
    assert!(!second);
    assert_eq!(store.get("k").await.unwrap(), Data::Count(1));

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn put_unique_through_a_clone() {
    let endpoint = make_endpoint();
    let store = master(&endpoint, "kv").await;
    let clone = endpoint.attach_clone("kv").expect("failed to attach clone");

    let won = clone.put_unique("k", 5u64, None).await.unwrap();
    assert!(won);
    let lost = clone.put_unique("k", 6u64, None).await.unwrap();
    assert!(!lost);
    assert_eq!(store.get("k").await.unwrap(), Data::Count(5));

    endpoint.shutdown().await;
}

// ============================================================================
// Expiration
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keys_expire_on_master_and_clone() {
    let (endpoint, clock) = make_sim_endpoint();
    let store = master(&endpoint, "kv").await;
    let clone = endpoint.attach_clone("kv").expect("failed to attach clone");
    let mut master_events = store.events().await.unwrap();

    store
        .put("k", 1u64, Some(Timespan::from_millis(100)))
        .unwrap();
    assert!(
        eventually(Duration::from_secs(5), || async {
            clone.get("k").await.is_ok()
        })
        .await
    );

    // Nothing expires before the deadline.
    clock.advance(Timespan::from_millis(50));
    settle().await;
    assert!(store.exists("k").await.unwrap());

    clock.advance(Timespan::from_millis(100));
    assert!(
        eventually(Duration::from_secs(5), || async {
            matches!(store.get("k").await, Err(e) if e.code() == ErrorCode::NoSuchKey)
        })
        .await,
        "master never expired the key"
    );
    assert!(
        eventually(Duration::from_secs(5), || async {
            matches!(clone.get("k").await, Err(e) if e.code() == ErrorCode::NoSuchKey)
        })
        .await,
        "clone never saw the expiration"
    );

    // Both sides report an expiration, not a plain erase.
    let mut saw_expire = false;
    while let Ok(event) = master_events.try_recv() {
        if let StoreEvent::Expire { key, .. } = event {
            assert_eq!(key, Data::Str("k".into()));
            saw_expire = true;
        }
    }
    assert!(saw_expire, "master emitted no expire event");

    endpoint.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overwriting_disarms_the_old_expiry() {
    let (endpoint, clock) = make_sim_endpoint();
    let store = master(&endpoint, "kv").await;

    store
        .put("k", 1u64, Some(Timespan::from_millis(100)))
        .unwrap();
    settle().await;

    // Overwrite without expiry; the old reminder must not delete the key.
    store.put("k", 2u64, None).unwrap();
    settle().await;
    clock.advance(Timespan::from_millis(200));
    settle().await;

    assert_eq!(store.get("k").await.unwrap(), Data::Count(2));

    endpoint.shutdown().await;
}

// ============================================================================
// Replication Across Endpoints
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clone_syncs_over_the_network() {
    let hub = make_endpoint();
    let leaf = make_endpoint();
    let port = hub.listen("127.0.0.1", 0).await.expect("failed to listen");
    leaf.peer("127.0.0.1", port, Duration::ZERO)
        .await
        .expect("failed to peer");

    let store = master(&hub, "kv").await;
    store.put("seed", 1u64, None).unwrap();

    let clone = leaf.attach_clone("kv").expect("failed to attach clone");
    assert!(
        eventually(Duration::from_secs(10), || async {
            clone.get("seed").await.ok() == Some(Data::Count(1))
        })
        .await,
        "remote clone never synced"
    );

    store.put("live", 2u64, None).unwrap();
    assert!(
        eventually(Duration::from_secs(10), || async {
            clone.get("live").await.ok() == Some(Data::Count(2))
        })
        .await,
        "remote clone never saw the live update"
    );

    leaf.shutdown().await;
    hub.shutdown().await;
}

// ============================================================================
// Backend Unit Behavior
// ============================================================================

#[test]
fn memory_backend_expiry_contract() {
    use broker::core::time::Timestamp;
    use broker::store::backend::Backend;

    let mut backend = MemoryBackend::new();
    let key = Data::Str("k".into());
    backend
        .put(key.clone(), Data::Count(1), Some(Timestamp::from_nanos(100)))
        .unwrap();

    // Not yet due.
    assert!(!backend.expire(&key, Timestamp::from_nanos(50)).unwrap());
    assert!(backend.exists(&key).unwrap());

    // Due exactly at the deadline.
    assert!(backend.expire(&key, Timestamp::from_nanos(100)).unwrap());
    assert!(!backend.exists(&key).unwrap());

    // Missing keys report false, not an error.
    assert!(!backend.expire(&key, Timestamp::from_nanos(200)).unwrap());
}

#[test]
fn memory_backend_lists_expiries() {
    use broker::core::time::Timestamp;
    use broker::store::backend::Backend;

    let mut backend = MemoryBackend::new();
    backend
        .put("a".into(), Data::Count(1), Some(Timestamp::from_nanos(10)))
        .unwrap();
    backend.put("b".into(), Data::Count(2), None).unwrap();

    let expiries = backend.expiries().unwrap();
    assert_eq!(expiries.len(), 1);
    assert_eq!(expiries[0].0, Data::Str("a".into()));
    assert_eq!(expiries[0].1, Timestamp::from_nanos(10));
}
