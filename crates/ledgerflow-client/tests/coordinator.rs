//! Coordinator state machine behavior against scripted backends.

use ledgerflow_client::{
    CoordinatorConfig, TransferCoordinator, TransferError, TransferEvent, TransferStatusKey,
    TransferUpdate, TxHistoryEntry,
};
use ledgerflow_core::{
    AccountRef, Amount, CallError, ErrorKind, GlobalId, Nat, Principal, RequestId, Timestamp,
    TransferRequest, TxAggStatus, TxLedgerStatus, TxOutput, TxResult,
};
use ledgerflow_testkit::{MemoryJournal, ScriptedBackend};
use std::sync::Arc;
use std::time::Duration;

fn transfer() -> TransferRequest {
    TransferRequest {
        from: AccountRef::Sub(Nat::from(1u64)),
        to: AccountRef::Vir(Principal::from_slice(&[9; 8]), Nat::from(2u64)),
        asset: Nat::from(3u64),
        amount: Amount::Exact(Nat::from(500u64)),
        fee_mode: None,
        memo: Vec::new(),
    }
}

fn settlement() -> TxResult {
    TxResult::Success(TxOutput::FtTransfer {
        amount: Nat::from(500u64),
        fee: Nat::from(5u64),
    })
}

async fn run_to_end(
    backend: Arc<ScriptedBackend>,
    journal: Arc<MemoryJournal>,
    entry: TxHistoryEntry,
) -> Vec<TransferUpdate> {
    let (coordinator, mut updates, _cancel) =
        TransferCoordinator::new(backend, journal, entry, CoordinatorConfig::default());
    let task = tokio::spawn(coordinator.run());
    let mut collected = Vec::new();
    while let Some(update) = updates.recv().await {
        collected.push(update);
    }
    task.await.unwrap();
    collected
}

fn processed_events(updates: &[TransferUpdate]) -> usize {
    updates
        .iter()
        .filter(|u| matches!(u, Ok(TransferEvent::Processed { .. })))
        .count()
}

#[tokio::test(start_paused = true)]
async fn happy_path_ends_in_exactly_one_processed() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .agg_ok(TxAggStatus::Queued(Nat::from(1u64)), 10)
            .agg_ok(TxAggStatus::Pending, 20)
            .agg_ok(TxAggStatus::Other(Timestamp::from_nanos(100)), 30)
            .ledger_ok(TxLedgerStatus::Awaited, 50)
            .ledger_ok(TxLedgerStatus::Awaited, 60)
            .ledger_ok(TxLedgerStatus::Processed(Some(settlement())), 110),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(
        Arc::clone(&backend),
        Arc::clone(&journal),
        TxHistoryEntry::new(1, transfer()),
    )
    .await;

    assert!(updates.iter().all(|u| u.is_ok()), "unexpected error: {updates:?}");
    assert_eq!(processed_events(&updates), 1);
    // The terminal event is last: nothing forwarded-derived follows it.
    match updates.last().unwrap() {
        Ok(TransferEvent::Processed { gid, result }) => {
            assert_eq!(*gid, GlobalId::new(1u64, 42u64));
            assert_eq!(*result, Some(settlement()));
        }
        other => panic!("expected terminal processed, got {other:?}"),
    }
    // Forwarding progressed through the expected stages along the way.
    assert!(updates
        .iter()
        .any(|u| matches!(u, Ok(TransferEvent::Queued { position, .. }) if *position == Nat::from(1u64))));
    assert!(updates.iter().any(|u| matches!(
        u,
        Ok(TransferEvent::Forwarded { batch_timestamp, .. }) if *batch_timestamp == Timestamp::from_nanos(100)
    )));

    let entry = TxHistoryEntry::load(journal.as_ref(), 1).await.unwrap().unwrap();
    assert_eq!(entry.last_seen_status, TransferStatusKey::Processed);
    assert!(!entry.resumable());
    assert_eq!(entry.gid, Some(GlobalId::new(1u64, 42u64)));
}

#[tokio::test(start_paused = true)]
async fn dropped_terminates_fatally_with_no_further_events() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .agg_ok(TxAggStatus::Queued(Nat::from(2u64)), 10)
            .agg_ok(TxAggStatus::Pending, 20)
            .ledger_ok(TxLedgerStatus::Dropped, 50),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(backend, Arc::clone(&journal), TxHistoryEntry::new(2, transfer())).await;

    match updates.last().unwrap() {
        Err(TransferError::Dropped { gid }) => assert_eq!(*gid, GlobalId::new(1u64, 42u64)),
        other => panic!("expected dropped, got {other:?}"),
    }
    assert_eq!(processed_events(&updates), 0);

    let entry = TxHistoryEntry::load(journal.as_ref(), 2).await.unwrap().unwrap();
    assert!(entry.last_error.as_deref().unwrap().contains("dropped"));
}

#[tokio::test(start_paused = true)]
async fn journaled_request_id_resumes_without_re_preparing() {
    let request_id = RequestId([0x5au8; 32]);
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_request_id(request_id)
            .agg_ok(TxAggStatus::Other(Timestamp::from_nanos(100)), 30)
            .ledger_ok(TxLedgerStatus::Processed(Some(settlement())), 110),
    );
    // As journaled by a run that crashed after transmitting the envelope.
    let mut entry = TxHistoryEntry::new(3, transfer());
    entry.aggregator = Some(Principal::from_slice(&[0xaa; 8]));
    entry.request_id = Some(request_id);

    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(Arc::clone(&backend), journal, entry).await;

    assert_eq!(backend.prepare_count(), 0, "resume must not re-transmit");
    assert_eq!(backend.commit_count(), 1);
    assert_eq!(backend.committed_request_id(), Some(request_id));
    match updates.last().unwrap() {
        Ok(TransferEvent::Processed { gid, .. }) => {
            assert_eq!(*gid, GlobalId::new(1u64, 42u64));
        }
        other => panic!("expected processed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn fresh_run_prepares_exactly_once() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .agg_ok(TxAggStatus::Other(Timestamp::from_nanos(100)), 30)
            .ledger_ok(TxLedgerStatus::Processed(None), 110),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates =
        run_to_end(Arc::clone(&backend), Arc::clone(&journal), TxHistoryEntry::new(4, transfer()))
            .await;

    assert_eq!(backend.prepare_count(), 1);
    assert_eq!(backend.commit_count(), 1);
    assert_eq!(processed_events(&updates), 1);
    // The request id hit the journal before commit completed.
    let entry = TxHistoryEntry::load(journal.as_ref(), 4).await.unwrap().unwrap();
    assert_eq!(entry.request_id, Some(RequestId([7u8; 32])));
}

#[tokio::test(start_paused = true)]
async fn awaited_past_the_forwarded_batch_is_a_consistency_violation() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .agg_ok(TxAggStatus::Other(Timestamp::from_nanos(100)), 30)
            // Certified time 150 > forwarded batch timestamp 100.
            .ledger_ok(TxLedgerStatus::Awaited, 150),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(backend, journal, TxHistoryEntry::new(5, transfer())).await;

    match updates.last().unwrap() {
        Err(TransferError::Call(error)) => {
            assert_eq!(error.kind, ErrorKind::ConsistencyViolation);
            assert_eq!(error.timestamp, Some(Timestamp::from_nanos(150)));
        }
        other => panic!("expected consistency violation, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stale_awaited_before_the_batch_timestamp_is_tolerated() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .agg_ok(TxAggStatus::Other(Timestamp::from_nanos(100)), 30)
            // Certified time 90 <= 100: stale replica, not a violation.
            .ledger_ok(TxLedgerStatus::Awaited, 90)
            .ledger_ok(TxLedgerStatus::Processed(None), 120),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(backend, journal, TxHistoryEntry::new(6, transfer())).await;

    assert!(updates
        .iter()
        .any(|u| matches!(u, Ok(TransferEvent::Awaited { .. }))));
    assert_eq!(processed_events(&updates), 1);
}

#[tokio::test(start_paused = true)]
async fn not_yet_issued_is_swallowed_while_replicas_catch_up() {
    let stale_error = CallError::transient("tx not yet issued")
        .with_timestamp(Timestamp::from_nanos(900));
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_submitted_at(Timestamp::from_nanos(1_000))
            .agg_err(stale_error)
            .agg_ok(TxAggStatus::Queued(Nat::from(1u64)), 1_100)
            .agg_ok(TxAggStatus::Other(Timestamp::from_nanos(1_200)), 1_150)
            .ledger_ok(TxLedgerStatus::Processed(None), 1_300),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(backend, journal, TxHistoryEntry::new(7, transfer())).await;

    assert!(updates.iter().all(|u| u.is_ok()), "swallowed read escalated: {updates:?}");
    assert_eq!(processed_events(&updates), 1);
}

#[tokio::test(start_paused = true)]
async fn not_yet_issued_after_submission_time_escalates() {
    let late_error = CallError::transient("tx not yet issued")
        .with_timestamp(Timestamp::from_nanos(2_000));
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_submitted_at(Timestamp::from_nanos(1_000))
            .agg_err(late_error)
            .agg_ok(TxAggStatus::Pending, 2_100),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(backend, journal, TxHistoryEntry::new(8, transfer())).await;

    match updates.last().unwrap() {
        Err(TransferError::Call(error)) => {
            assert_eq!(error.kind, ErrorKind::Transient);
            assert!(error.message.contains("not yet issued"));
        }
        other => panic!("expected escalated read failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn dual_poll_relays_stale_aggregator_answers() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .agg_ok(TxAggStatus::Queued(Nat::from(1u64)), 10)
            .agg_ok(TxAggStatus::Pending, 20)
            // A replica still behind re-reports queued during the dual poll.
            .agg_ok(TxAggStatus::Queued(Nat::from(2u64)), 25)
            .ledger_ok(TxLedgerStatus::Awaited, 50)
            .ledger_ok(TxLedgerStatus::Processed(None), 120),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates =
        run_to_end(backend, Arc::clone(&journal), TxHistoryEntry::new(15, transfer())).await;

    assert!(updates.iter().all(|u| u.is_ok()), "unexpected error: {updates:?}");
    let forwarding_at = updates
        .iter()
        .position(|u| matches!(u, Ok(TransferEvent::Forwarding { .. })))
        .unwrap();
    let requeued_at = updates
        .iter()
        .position(|u| matches!(
            u,
            Ok(TransferEvent::Queued { position, .. }) if *position == Nat::from(2u64)
        ))
        .unwrap();
    // The stale answer is relayed as an informational update...
    assert!(requeued_at > forwarding_at);
    assert_eq!(processed_events(&updates), 1);
    // ...without winding the journal back from where it had advanced to.
    let entry = TxHistoryEntry::load(journal.as_ref(), 15).await.unwrap().unwrap();
    assert_eq!(entry.last_seen_status, TransferStatusKey::Processed);
}

#[tokio::test(start_paused = true)]
async fn slow_status_query_is_inconclusive_not_fatal() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .agg_ok(TxAggStatus::Other(Timestamp::from_nanos(100)), 30)
            // Past the 5s cap; the coordinator abandons it and retries.
            .ledger_ok_delayed(Duration::from_secs(10), TxLedgerStatus::Awaited, 50)
            .ledger_ok(TxLedgerStatus::Processed(None), 120),
    );
    let journal = Arc::new(MemoryJournal::new());
    let updates = run_to_end(backend, journal, TxHistoryEntry::new(9, transfer())).await;

    assert!(updates.iter().all(|u| u.is_ok()));
    assert_eq!(processed_events(&updates), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_the_stream_without_a_terminal() {
    let backend = Arc::new(
        ScriptedBackend::new().agg_ok(TxAggStatus::Queued(Nat::from(1u64)), 10),
    );
    let journal = Arc::new(MemoryJournal::new());
    let (coordinator, mut updates, cancel) = TransferCoordinator::new(
        backend,
        journal,
        TxHistoryEntry::new(10, transfer()),
        CoordinatorConfig::default(),
    );
    let task = tokio::spawn(coordinator.run());

    // Let it reach the queued phase, then interrupt.
    let mut seen = Vec::new();
    while let Some(update) = updates.recv().await {
        let queued = matches!(update, Ok(TransferEvent::Queued { .. }));
        seen.push(update);
        if queued {
            cancel.cancel();
            break;
        }
    }
    // The stream drains and closes; nothing terminal arrives.
    while let Some(update) = updates.recv().await {
        seen.push(update);
    }
    task.await.unwrap();
    assert_eq!(processed_events(&seen), 0);
    assert!(seen.iter().all(|u| u.is_ok()));
}

#[tokio::test(start_paused = true)]
async fn all_zero_weights_fail_deterministically() {
    let backend = Arc::new(ScriptedBackend::new().with_aggregators(vec![
        (Principal::from_slice(&[1; 8]), Nat::from(0u64)),
        (Principal::from_slice(&[2; 8]), Nat::from(0u64)),
    ]));
    let journal = Arc::new(MemoryJournal::new());
    for local_id in [11, 12, 13] {
        let updates = run_to_end(
            Arc::clone(&backend),
            Arc::clone(&journal),
            TxHistoryEntry::new(local_id, transfer()),
        )
        .await;
        assert!(matches!(updates.last().unwrap(), Err(TransferError::NoAggregator)));
    }
}

#[tokio::test(start_paused = true)]
async fn journal_write_failure_surfaces_as_journal_error() {
    let backend = Arc::new(ScriptedBackend::new());
    let journal = Arc::new(MemoryJournal::failing_writes());
    let updates = run_to_end(backend, journal, TxHistoryEntry::new(14, transfer())).await;
    assert!(matches!(updates.last().unwrap(), Err(TransferError::Journal(_))));
}
