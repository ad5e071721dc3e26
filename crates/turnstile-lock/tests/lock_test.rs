//! Turnstile Lock Integration Tests
//!
//! Several lock managers, each on its own session, contending over one
//! in-memory coordination service.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use turnstile_common::logging::{LoggingConfig, init_tracing};
use turnstile_coordination::{
    CoordinationClient, MemoryClient, MemoryCoordinationService, RetryPolicy, RetryingClient,
};
use turnstile_lock::{LockError, LockManager, SessionState};

const ROOT: &str = "/locks/L";

fn setup() -> MemoryCoordinationService {
    init_tracing(&LoggingConfig::for_tests());
    MemoryCoordinationService::new()
}

fn contender(client: MemoryClient) -> Arc<LockManager> {
    Arc::new(LockManager::new(Arc::new(client)))
}

async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}

// ============== Mutual Exclusion ==============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_under_contention() {
    let service = setup();
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let manager = contender(service.connect());
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        let completed = completed.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                let handle = manager.acquire("L", Duration::from_secs(10)).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
                handle.release().await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 50);
    assert!(service.children(ROOT).is_empty());
}

#[tokio::test]
async fn test_keys_are_independent() {
    let service = setup();
    let manager = contender(service.connect());

    let orders = manager.acquire("orders", Duration::from_secs(1)).await.unwrap();
    let invoices = manager.acquire("invoices", Duration::from_secs(1)).await.unwrap();
    assert_eq!(service.children("/locks/orders").len(), 1);
    assert_eq!(service.children("/locks/invoices").len(), 1);

    orders.release().await.unwrap();
    invoices.release().await.unwrap();
}

// ============== FIFO Ordering ==============

#[tokio::test]
async fn test_fifo_order_a_b_c() {
    let service = setup();
    let a = contender(service.connect());
    let b = contender(service.connect());
    let c = contender(service.connect());
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = a.acquire("L", Duration::from_secs(5)).await.unwrap();
    order.lock().push("A");

    let mut waiters = Vec::new();
    for (name, manager) in [("B", b), ("C", c)] {
        let order = order.clone();
        let queued = service.children(ROOT).len();
        waiters.push(tokio::spawn(async move {
            let handle = manager.acquire("L", Duration::from_secs(5)).await.unwrap();
            order.lock().push(name);
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.release().await.unwrap();
        }));
        eventually("waiter queued", || service.children(ROOT).len() == queued + 1).await;
    }

    held.release().await.unwrap();
    for waiter in waiters {
        waiter.await.unwrap();
    }

    assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    assert!(service.children(ROOT).is_empty());
}

#[tokio::test]
async fn test_waiter_watches_only_its_predecessor() {
    let service = setup();
    let a = contender(service.connect());
    let b = contender(service.connect());
    let c = contender(service.connect());

    let held = a.acquire("L", Duration::from_secs(5)).await.unwrap();
    let b_task = tokio::spawn(async move { b.acquire("L", Duration::from_secs(5)).await });
    eventually("B queued", || service.children(ROOT).len() == 2).await;
    let c_task = tokio::spawn(async move { c.acquire("L", Duration::from_secs(5)).await });
    eventually("C queued", || service.children(ROOT).len() == 3).await;

    let nodes: Vec<String> = service
        .children(ROOT)
        .into_iter()
        .map(|name| format!("{}/{}", ROOT, name))
        .collect();
    eventually("watches registered", || {
        service.watch_count(&nodes[0]) == 1 && service.watch_count(&nodes[1]) == 1
    })
    .await;
    assert_eq!(service.watch_count(&nodes[2]), 0);

    held.release().await.unwrap();
    let b_handle = b_task.await.unwrap().unwrap();
    assert_eq!(b_handle.node_path(), nodes[1]);
    assert!(!c_task.is_finished());

    b_handle.release().await.unwrap();
    let c_handle = c_task.await.unwrap().unwrap();
    assert_eq!(c_handle.node_path(), nodes[2]);
    c_handle.release().await.unwrap();
}

// ============== Session Loss ==============

#[tokio::test]
async fn test_holder_crash_lets_waiter_in() {
    let service = setup();
    let holder_client = service.connect();
    let holder_session = holder_client.session_id();
    let holder = contender(holder_client);
    let waiter = contender(service.connect());

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    let waiting = tokio::spawn(async move { waiter.acquire("L", Duration::from_secs(5)).await });
    eventually("waiter queued", || service.children(ROOT).len() == 2).await;

    service.expire(holder_session);
    let handle = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("waiter not woken")
        .unwrap()
        .unwrap();
    assert_eq!(service.children(ROOT), vec![handle.node_path().rsplit('/').next().unwrap()]);

    // the crashed holder's handle releases cleanly
    held.release().await.unwrap();
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_expired_waiter_is_skipped() {
    let service = setup();
    let a = contender(service.connect());
    let b_client = service.connect();
    let b_session = b_client.session_id();
    let b = contender(b_client);
    let c = contender(service.connect());

    let held = a.acquire("L", Duration::from_secs(5)).await.unwrap();
    let b_task = tokio::spawn(async move { b.acquire("L", Duration::from_secs(5)).await });
    eventually("B queued", || service.children(ROOT).len() == 2).await;
    let c_task = tokio::spawn(async move { c.acquire("L", Duration::from_secs(5)).await });
    eventually("C queued", || service.children(ROOT).len() == 3).await;

    service.expire(b_session);
    let b_result = b_task.await.unwrap();
    assert!(matches!(b_result, Err(LockError::SessionExpired)));
    assert_eq!(service.children(ROOT).len(), 2);

    // C re-evaluated and now waits on A instead of becoming a phantom holder
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!c_task.is_finished());

    held.release().await.unwrap();
    let c_handle = c_task.await.unwrap().unwrap();
    assert_eq!(
        a.current_holder("L").await.unwrap().as_deref(),
        Some(c_handle.node_path())
    );
    c_handle.release().await.unwrap();
}

#[tokio::test]
async fn test_acquire_on_expired_session_fails() {
    let service = setup();
    let client = service.connect();
    let session = client.session_id();
    let manager = contender(client);

    service.expire(session);
    eventually("gate expired", || {
        manager.session().state() == SessionState::Expired
    })
    .await;

    let result = manager.acquire("L", Duration::from_secs(1)).await;
    assert!(matches!(result, Err(LockError::SessionExpired)));
}

// ============== Timeouts ==============

#[tokio::test]
async fn test_timeout_leaves_no_node() {
    let service = setup();
    let holder = contender(service.connect());
    let waiter = contender(service.connect());

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    let result = waiter.acquire("L", Duration::from_millis(100)).await;

    assert!(matches!(result, Err(LockError::TimedOut)));
    assert_eq!(service.children(ROOT), vec!["lock-0000000000"]);
    held.release().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_budget_is_end_to_end() {
    let service = setup();
    let holder = contender(service.connect());
    let late_client = service.connect_deferred();
    let late_session = late_client.session_id();
    let late = contender(late_client);

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();

    let connector = service.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        connector.resume(late_session);
    });

    let started = Instant::now();
    let result = late.acquire("L", Duration::from_millis(300)).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(LockError::TimedOut)));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
    assert_eq!(service.children(ROOT).len(), 1);
    held.release().await.unwrap();
}

#[tokio::test]
async fn test_session_unavailable_creates_nothing() {
    let service = setup();
    let manager = contender(service.connect_deferred());

    let result = manager.acquire("L", Duration::from_millis(50)).await;
    assert!(matches!(result, Err(LockError::SessionUnavailable)));
    assert!(service.children(ROOT).is_empty());
}

#[tokio::test]
async fn test_acquire_waits_for_connection() {
    let service = setup();
    let client = service.connect_deferred();
    let session = client.session_id();
    let manager = contender(client);

    let connector = service.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        connector.resume(session);
    });

    let handle = manager.acquire("L", Duration::from_secs(2)).await.unwrap();
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_dropped_acquire_future_cleans_up() {
    let service = setup();
    let holder = contender(service.connect());
    let waiter = contender(service.connect());

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    let outer = tokio::time::timeout(
        Duration::from_millis(50),
        waiter.acquire("L", Duration::from_secs(10)),
    )
    .await;
    assert!(outer.is_err());

    eventually("pending node removed", || service.children(ROOT).len() == 1).await;
    held.release().await.unwrap();
}

// ============== Release ==============

#[tokio::test]
async fn test_release_after_session_expiry() {
    let service = setup();
    let client = service.connect();
    let session = client.session_id();
    let manager = contender(client);

    let handle = manager.acquire("L", Duration::from_secs(1)).await.unwrap();
    service.expire(session);
    manager.release(handle).await.unwrap();
}

#[tokio::test]
async fn test_release_after_external_delete_keeps_next_holder() {
    let service = setup();
    let a = contender(service.connect());
    let b = contender(service.connect());

    let a_handle = a.acquire("L", Duration::from_secs(5)).await.unwrap();
    let b_task = tokio::spawn(async move { b.acquire("L", Duration::from_secs(5)).await });
    eventually("B queued", || service.children(ROOT).len() == 2).await;

    a.client().delete(a_handle.node_path()).await.unwrap();
    let b_handle = b_task.await.unwrap().unwrap();

    a.release(a_handle).await.unwrap();
    assert!(a.is_held(&b_handle).await.unwrap());
    b_handle.release().await.unwrap();
}

#[tokio::test]
async fn test_connection_loss_during_wait_surfaces_and_cleans_up() {
    let service = setup();
    let holder = contender(service.connect());
    let waiter_client = service.connect();
    let waiter_session = waiter_client.session_id();
    let waiter = contender(waiter_client);

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    let waiting = tokio::spawn(async move { waiter.acquire("L", Duration::from_secs(5)).await });
    eventually("waiter queued", || service.children(ROOT).len() == 2).await;
    eventually("watch registered", || {
        service.watch_count("/locks/L/lock-0000000000") == 1
    })
    .await;

    service.suspend(waiter_session);
    held.release().await.unwrap();
    let result = waiting.await.unwrap();
    assert!(matches!(result, Err(LockError::Connection(_))));
    assert_eq!(service.children(ROOT).len(), 1);

    service.resume(waiter_session);
    eventually("waiter node cleaned up", || service.children(ROOT).is_empty()).await;
}

#[tokio::test]
async fn test_retrying_client_rides_out_suspension() {
    let service = setup();
    let holder = contender(service.connect());
    let waiter_client = service.connect();
    let waiter_session = waiter_client.session_id();
    let waiter = Arc::new(LockManager::new(Arc::new(RetryingClient::new(
        waiter_client,
        RetryPolicy::new(Duration::from_millis(20), 10, Duration::from_millis(50)),
    ))));

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    let waiting = tokio::spawn(async move { waiter.acquire("L", Duration::from_secs(5)).await });
    eventually("waiter queued", || service.children(ROOT).len() == 2).await;

    service.suspend(waiter_session);
    held.release().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    service.resume(waiter_session);

    let handle = waiting.await.unwrap().unwrap();
    assert_eq!(handle.sequence(), 1);
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_retrying_client_cannot_stretch_budget() {
    let service = setup();
    let holder = contender(service.connect());
    let waiter_client = service.connect();
    let waiter_session = waiter_client.session_id();
    let waiter = Arc::new(LockManager::new(Arc::new(RetryingClient::new(
        waiter_client,
        RetryPolicy::new(Duration::from_millis(200), 10, Duration::from_millis(400)),
    ))));

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    let started = Instant::now();
    let waiting = tokio::spawn(async move { waiter.acquire("L", Duration::from_millis(300)).await });
    eventually("watch registered", || {
        service.watch_count("/locks/L/lock-0000000000") == 1
    })
    .await;

    service.suspend(waiter_session);
    held.release().await.unwrap();
    let result = waiting.await.unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(LockError::TimedOut)), "got {:?}", result);
    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);

    service.resume(waiter_session);
    eventually("waiter node cleaned up", || service.children(ROOT).is_empty()).await;
}

#[tokio::test]
async fn test_timed_out_waits_leave_no_watches() {
    let service = setup();
    let holder = contender(service.connect());
    let waiter = contender(service.connect());

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    for _ in 0..5 {
        let result = waiter.acquire("L", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(LockError::TimedOut)));
    }

    assert_eq!(service.watch_count("/locks/L/lock-0000000000"), 0);
    assert_eq!(service.children(ROOT), vec!["lock-0000000000"]);
    held.release().await.unwrap();
}

#[tokio::test]
async fn test_dropped_waits_do_not_pile_up_watches() {
    let service = setup();
    let holder = contender(service.connect());
    let waiter = contender(service.connect());

    let held = holder.acquire("L", Duration::from_secs(5)).await.unwrap();
    for _ in 0..5 {
        let outer = tokio::time::timeout(
            Duration::from_millis(20),
            waiter.acquire("L", Duration::from_secs(10)),
        )
        .await;
        assert!(outer.is_err());
        eventually("pending node removed", || service.children(ROOT).len() == 1).await;
    }

    assert_eq!(service.watch_count("/locks/L/lock-0000000000"), 1);
    held.release().await.unwrap();
    eventually("pending nodes removed", || service.children(ROOT).is_empty()).await;
}
