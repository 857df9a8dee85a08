// Many sessions competing for one lock directory

use nodesync::prelude::*;
use nodesync::sequence::sequence_number;
use nodesync::test_utils::ensemble_sessions;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Tracks how many callers believe they hold the lock right now
#[derive(Default)]
struct Holders {
    current: AtomicUsize,
    max_seen: AtomicUsize,
    order: Mutex<Vec<u64>>,
}

impl Holders {
    fn enter(&self, sequence: u64) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.order.lock().push(sequence);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_grant_order() {
    let ensemble = MemoryEnsemble::new();
    let clients = ensemble_sessions(&ensemble, "/contention", 8).await.unwrap();

    // enqueue in a known order, then start waiting in the reverse order
    let mut queued = Vec::new();
    for (_, sync) in clients {
        let ticket = sync.enqueue("mutex").await.unwrap();
        queued.push((sync, ticket));
    }

    let holders = Arc::new(Holders::default());
    let mut handles = Vec::new();
    for (sync, ticket) in queued.into_iter().rev() {
        let holders = holders.clone();
        handles.push(tokio::spawn(async move {
            sync.await_head(&ticket).await?;
            holders.enter(ticket.sequence(SEQUENCE_WIDTH).unwrap_or_default());
            tokio::time::sleep(Duration::from_millis(2)).await;
            holders.leave();
            sync.release(ticket).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let order = holders.order.lock().clone();
    assert_eq!(order, (1..=8).collect::<Vec<u64>>());
    assert_eq!(holders.max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_under_concurrent_arrival() {
    let ensemble = MemoryEnsemble::new();
    let clients = ensemble_sessions(&ensemble, "/contention", 16).await.unwrap();
    let holders = Arc::new(Holders::default());

    let mut handles = Vec::new();
    for (_, sync) in clients {
        let holders = holders.clone();
        handles.push(tokio::spawn(async move {
            let ticket = sync.lock("mutex").await?;
            holders.enter(ticket.sequence(SEQUENCE_WIDTH).unwrap_or_default());
            tokio::task::yield_now().await;
            holders.leave();
            sync.release(ticket).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(holders.max_seen.load(Ordering::SeqCst), 1);
    let order = holders.order.lock().clone();
    assert_eq!(order.len(), 16);
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{order:?}");

    let observer = ensemble.connect();
    assert!(observer.children("/contention/mutex").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_combined_wait_and_release() {
    let ensemble = MemoryEnsemble::new();
    let clients = ensemble_sessions(&ensemble, "/contention", 6).await.unwrap();

    let mut queued = Vec::new();
    for (_, sync) in clients {
        let ticket = sync.enqueue("mutex").await.unwrap();
        queued.push((sync, ticket));
    }

    let mut handles = Vec::new();
    for (sync, ticket) in queued.into_iter().rev() {
        handles.push(tokio::spawn(async move {
            let sequence = ticket.sequence(SEQUENCE_WIDTH).unwrap_or_default();
            sync.await_and_release(ticket).await?;

            // every earlier ticket was gone before ours could be released
            let remaining = sync.queue("mutex").await?;
            for name in remaining {
                assert!(sequence_number(&name, SEQUENCE_WIDTH) > Some(sequence));
            }
            Ok::<_, Error>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(ensemble.connect().children("/contention/mutex").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crashed_holders_are_skipped() {
    let ensemble = MemoryEnsemble::new();
    let mut clients = ensemble_sessions(&ensemble, "/contention", 4).await.unwrap();

    let (last_session, last) = clients.pop().unwrap();
    let mut crashed = Vec::new();
    for (session, sync) in clients {
        sync.enqueue("mutex").await.unwrap();
        crashed.push(session);
    }
    let ticket = last.enqueue("mutex").await.unwrap();

    let waiter = tokio::spawn({
        let last = last.clone();
        let ticket = ticket.clone();
        async move { last.await_head(&ticket).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    // kill the sessions ahead of us, most recent first
    for session in crashed.iter().rev() {
        ensemble.expire(session.id());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(last.is_head(&ticket).await.unwrap());
    assert_eq!(last.queue("mutex").await.unwrap().len(), 1);

    last_session.close();
    let observer = ensemble.connect();
    assert!(observer.children("/contention/mutex").await.unwrap().is_empty());
}
