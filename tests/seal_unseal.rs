//! Seal / unseal tests
//!
//! Seal outcomes relative to the cluster's last committed GLSN, truncation of
//! the uncommitted tail, and resuming writes after unseal.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aerolog::executor::{ExecutorError, ExecutorState, LogStreamExecutor, SealStatus};
use aerolog::types::{CommitContext, Glsn, Llsn, LogPosition};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use common::{make_mutable, open, payloads, replica, Sequencer};

// =============================================================================
// Test Utilities
// =============================================================================

/// Appends and commits `n` single-entry records.
async fn append_committed(executor: &LogStreamExecutor, sequencer: &mut Sequencer, n: usize) {
    let (appended, _) = tokio::join!(executor.append(payloads("c", n)), async {
        let mut committed = 0;
        while committed < n as u64 {
            committed += sequencer.commit_round(&[executor]).await;
            tokio::task::yield_now().await;
        }
    });
    appended.unwrap();
}

/// Starts an append that will wait for a commit nobody sends.
fn append_pending(
    executor: &Arc<LogStreamExecutor>,
    n: usize,
) -> JoinHandle<Result<Vec<LogPosition>, ExecutorError>> {
    let executor = Arc::clone(executor);
    tokio::spawn(async move { executor.append(payloads("u", n)).await })
}

async fn wait_uncommitted(executor: &LogStreamExecutor, n: u64) {
    while executor.report().unwrap().uncommitted_llsn_length < n {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

// =============================================================================
// Seal outcomes
// =============================================================================

#[tokio::test]
async fn test_fresh_replica_seals_at_zero() {
    let dir = TempDir::new().unwrap();
    let executor = open(dir.path(), 1).await;

    assert_eq!(
        executor.seal(Glsn::INVALID).await.unwrap(),
        (SealStatus::Sealed, Glsn::INVALID)
    );
    assert_eq!(executor.state(), ExecutorState::Sealed);

    // Sealing again is a no-op.
    assert_eq!(
        executor.seal(Glsn(10)).await.unwrap(),
        (SealStatus::Sealed, Glsn::INVALID)
    );
    assert_eq!(executor.metrics().seals, 1);
}

#[tokio::test]
async fn test_seal_behind_stays_sealing_until_caught_up() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(open(dir.path(), 1).await);
    make_mutable(&executor, vec![replica(1)]).await;
    let mut sequencer = Sequencer::new(1);
    append_committed(&executor, &mut sequencer, 3).await;

    let pending = append_pending(&executor, 2);
    wait_uncommitted(&executor, 2).await;

    assert_eq!(
        executor.seal(Glsn(5)).await.unwrap(),
        (SealStatus::Sealing, Glsn(3))
    );
    assert!(matches!(
        executor.append(payloads("x", 1)).await,
        Err(ExecutorError::NotMutable(ExecutorState::Sealing))
    ));

    // Commits still apply while sealing.
    assert_eq!(sequencer.commit_round(&[executor.as_ref()]).await, 2);
    let positions = pending.await.unwrap().unwrap();
    assert_eq!(positions[1].glsn, Glsn(5));

    assert_eq!(
        executor.seal(Glsn(5)).await.unwrap(),
        (SealStatus::Sealed, Glsn(5))
    );
    assert_eq!(executor.read(Glsn(5)).await.unwrap().data, b"u-1");
}

#[tokio::test]
async fn test_seal_ahead_is_protocol_violation() {
    let dir = TempDir::new().unwrap();
    let executor = open(dir.path(), 1).await;
    make_mutable(&executor, vec![replica(1)]).await;
    let mut sequencer = Sequencer::new(1);
    append_committed(&executor, &mut sequencer, 3).await;

    let err = executor.seal(Glsn(2)).await.unwrap_err();
    assert!(matches!(err, ExecutorError::ProtocolViolation(_)));
    assert!(err.is_fatal());
    assert_eq!(executor.state(), ExecutorState::Sealing);
}

#[tokio::test]
async fn test_seal_truncates_uncommitted_tail() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(open(dir.path(), 1).await);
    make_mutable(&executor, vec![replica(1)]).await;
    let mut sequencer = Sequencer::new(1);
    append_committed(&executor, &mut sequencer, 3).await;

    let pending = append_pending(&executor, 2);
    wait_uncommitted(&executor, 2).await;
    assert_eq!(executor.metadata().waiting_for_commit, 1);

    assert_eq!(
        executor.seal(Glsn(3)).await.unwrap(),
        (SealStatus::Sealed, Glsn(3))
    );
    assert!(matches!(pending.await.unwrap(), Err(ExecutorError::Sealed)));

    let report = executor.report().unwrap();
    assert_eq!(report.uncommitted_llsn_offset, Llsn(4));
    assert_eq!(report.uncommitted_llsn_length, 0);

    // The truncated LLSNs are reused after unseal.
    executor.unseal(vec![replica(1)]).await.unwrap();
    append_committed(&executor, &mut sequencer, 1).await;
    let entry = executor.read(Glsn(4)).await.unwrap();
    assert_eq!(entry.llsn, Llsn(4));
    assert_eq!(entry.data, b"c-0");
}

#[tokio::test]
async fn test_truncation_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let executor = Arc::new(open(dir.path(), 1).await);
        make_mutable(&executor, vec![replica(1)]).await;
        let mut sequencer = Sequencer::new(1);
        append_committed(&executor, &mut sequencer, 2).await;

        let pending = append_pending(&executor, 3);
        wait_uncommitted(&executor, 3).await;
        executor.seal(Glsn(2)).await.unwrap();
        assert!(pending.await.unwrap().is_err());
        executor.close().await.unwrap();
    }

    let executor = open(dir.path(), 1).await;
    let report = executor.report().unwrap();
    assert_eq!(report.uncommitted_llsn_offset, Llsn(3));
    assert_eq!(report.uncommitted_llsn_length, 0);
}

#[tokio::test]
async fn test_commit_refused_once_sealed() {
    let dir = TempDir::new().unwrap();
    let executor = open(dir.path(), 1).await;
    executor.seal(Glsn::INVALID).await.unwrap();

    let cc = CommitContext {
        version: 1,
        high_watermark: Glsn(4),
        prev_high_watermark: Glsn::INVALID,
        committed_glsn_begin: Glsn(5),
        committed_glsn_end: Glsn(5),
        committed_llsn_begin: Llsn(1),
    };
    assert!(matches!(
        executor.commit(cc).await,
        Err(ExecutorError::Sealed)
    ));
}

// =============================================================================
// Unseal
// =============================================================================

#[tokio::test]
async fn test_unseal_validation() {
    let dir = TempDir::new().unwrap();
    let executor = open(dir.path(), 1).await;

    // Not sealed yet
    assert!(matches!(
        executor.unseal(vec![replica(1)]).await,
        Err(ExecutorError::Invalid(_))
    ));

    executor.seal(Glsn::INVALID).await.unwrap();
    for replicas in [vec![], vec![replica(2)], vec![replica(1), replica(1)]] {
        assert!(matches!(
            executor.unseal(replicas).await,
            Err(ExecutorError::Invalid(_))
        ));
    }
    assert_eq!(executor.state(), ExecutorState::Sealed);

    executor.unseal(vec![replica(1), replica(2)]).await.unwrap();
    let metadata = executor.metadata();
    assert_eq!(metadata.state, ExecutorState::Mutable);
    assert!(metadata.is_primary);
    assert_eq!(metadata.replicas.len(), 2);
}

// =============================================================================
// Seal under load
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seal_during_traffic_then_resume() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(open(dir.path(), 1).await);
    make_mutable(&executor, vec![replica(1)]).await;

    let done = Arc::new(AtomicBool::new(false));
    let sequencer = {
        let executor = Arc::clone(&executor);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut sequencer = Sequencer::new(1);
            while !done.load(Ordering::Acquire) {
                if sequencer.commit_round(&[executor.as_ref()]).await == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            sequencer
        })
    };

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let mut written = Vec::new();
                loop {
                    match executor.append(vec![format!("p{}", p).into_bytes()]).await {
                        Ok(positions) => written.extend(positions),
                        Err(err) => return (written, err),
                    }
                }
            })
        })
        .collect();

    while executor.metrics().committed_records < 40 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    done.store(true, Ordering::Release);
    let mut sequencer = sequencer.await.unwrap();
    let hwm = sequencer.high_watermark();

    assert_eq!(
        executor.seal(hwm).await.unwrap(),
        (SealStatus::Sealed, hwm)
    );

    let mut acknowledged = 0;
    for producer in producers {
        let (written, err) = producer.await.unwrap();
        acknowledged += written.len() as u64;
        assert!(
            matches!(
                err,
                ExecutorError::Sealed | ExecutorError::NotMutable(_)
            ),
            "unexpected error {:?}",
            err
        );
    }
    // Every acknowledged append is readable; nothing past the seal point is.
    assert_eq!(acknowledged, hwm.0);
    assert_eq!(executor.scan(Glsn(1), Glsn(u64::MAX)).await.unwrap().len() as u64, hwm.0);
    assert_eq!(executor.report().unwrap().uncommitted_llsn_length, 0);

    executor.unseal(vec![replica(1)]).await.unwrap();
    append_committed(&executor, &mut sequencer, 1).await;
    let entry = executor.read(hwm.next()).await.unwrap();
    assert_eq!(entry.llsn, Llsn(hwm.0 + 1));
}
