#![expect(
    clippy::unwrap_used,
    clippy::panic,
    reason = "test code uses unwrap/panic for concise assertions"
)]

use std::sync::Arc;

use serde::Deserialize;
use vm_exception_trace::storage::memory::MemoryConnection;
use vm_exception_trace::{
    CallType, Connection, ContractCodeRecord, Error, ExceptionKind, ExternalOutcome,
    FrameOutcome, FrameStart, FsConnection, OverflowPolicy, SCHEMA_VERSION, StatusCode,
    StoreConfig, TraceStore, TransactionAssembler, TransactionRecord, TxFields, classify,
};

#[derive(Deserialize)]
struct MessageCase {
    message: Option<String>,
    kind: String,
}

#[derive(Deserialize)]
struct TxFixture {
    block_num: u64,
    tx_index: u64,
    nonce: u64,
    tx_hash: String,
    from: String,
    to: Option<String>,
    value: String,
    #[serde(with = "vm_exception_trace::serde_hex")]
    input: Vec<u8>,
    gas_limit: u64,
    gas_price: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Event {
    Enter {
        call_type: CallType,
        from: String,
        to: Option<String>,
        value: String,
        #[serde(with = "vm_exception_trace::serde_hex")]
        input: Vec<u8>,
        gas_limit: u64,
    },
    Step {
        pc: u64,
        op: String,
        #[serde(default)]
        immediate: Option<String>,
        gas: u64,
    },
    Exit {
        failure: Option<String>,
        gas_remaining: u64,
        #[serde(default)]
        created_address: Option<String>,
    },
}

#[derive(Deserialize)]
struct TraceFixture {
    tx: TxFixture,
    status: u64,
    events: Vec<Event>,
}

fn load<T: serde::de::DeserializeOwned>(filename: &str) -> T {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let path = format!("{manifest_dir}/tests/fixtures/{filename}");
    let data =
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"));
    serde_json::from_str(&data).unwrap_or_else(|e| panic!("failed to parse {path}: {e}"))
}

/// Feeds a recorded interpreter event stream through the assembler.
fn replay(filename: &str) -> TransactionRecord {
    let fixture: TraceFixture = load(filename);
    replay_fixture(fixture)
}

/// Replays `filename` as if it were transaction `tx_index` of its block.
fn replay_as(filename: &str, tx_index: u64) -> TransactionRecord {
    let mut fixture: TraceFixture = load(filename);
    fixture.tx.tx_index = tx_index;
    fixture.tx.tx_hash = format!("0x{tx_index:064x}");
    replay_fixture(fixture)
}

fn replay_fixture(fixture: TraceFixture) -> TransactionRecord {
    let tx = fixture.tx;
    let mut asm = TransactionAssembler::begin(TxFields {
        block_num: tx.block_num,
        tx_index: tx.tx_index,
        nonce: tx.nonce,
        tx_hash: tx.tx_hash,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        input: tx.input,
        gas_limit: tx.gas_limit,
        gas_price: tx.gas_price,
    });

    let mut created: Option<String> = None;
    for event in fixture.events {
        match event {
            Event::Enter {
                call_type,
                from,
                to,
                value,
                input,
                gas_limit,
            } => {
                asm.open_trace(FrameStart {
                    call_type,
                    from,
                    to,
                    value,
                    input,
                    gas_limit,
                });
            }
            Event::Step {
                pc,
                op,
                immediate,
                gas,
            } => asm.record_step(pc, op, immediate, gas).unwrap(),
            Event::Exit {
                failure,
                gas_remaining,
                created_address,
            } => {
                if asm.open_depth() == 1 {
                    created.clone_from(&created_address);
                }
                asm.close_trace(FrameOutcome {
                    failure,
                    gas_remaining,
                    created_address,
                })
                .unwrap();
            }
        }
    }

    asm.seal(ExternalOutcome {
        status_code: StatusCode::from(fixture.status),
        contract_address: created,
    })
}

fn memory_store(max_document_bytes: usize) -> (Arc<MemoryConnection>, TraceStore) {
    let config = StoreConfig {
        max_document_bytes,
        ..StoreConfig::default()
    };
    let conn = Arc::new(MemoryConnection::connect(&config).unwrap());
    let store = TraceStore::open(conn.clone(), &config).unwrap();
    (conn, store)
}

// ──────────────────── classification ────────────────────

#[test]
fn failure_messages_classify_from_fixture() {
    let cases: Vec<MessageCase> = load("failure_messages.json");
    for case in cases {
        let expected: ExceptionKind = case
            .kind
            .parse()
            .unwrap_or_else(|_| panic!("unknown kind {}", case.kind));
        let (message, kind) = classify(case.message.as_deref());
        assert_eq!(kind, expected, "wrong kind for {:?}", case.message);
        assert_eq!(message, case.message.clone().unwrap_or_default());
    }
}

// ──────────────────── assembly ────────────────────

#[test]
fn reverted_internal_call_is_recorded_in_entry_order() {
    let record = replay("reverted_internal_call.json");

    let shape: Vec<(u64, CallType, ExceptionKind)> = record
        .traces()
        .iter()
        .map(|n| (n.call_stack_depth(), n.call_type(), n.error_code()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (0, CallType::Call, ExceptionKind::None),
            (1, CallType::DelegateCall, ExceptionKind::ExplicitRevert),
            (2, CallType::StaticCall, ExceptionKind::None),
        ]
    );
    assert_eq!(record.status_code(), StatusCode::Success);
    assert!(record.has_exception());
    assert_eq!(record.num_steps(), 9);
    assert_eq!(record.traces()[1].error_msg(), "evm: execution reverted");
    assert!(record.traces()[2].steps().is_empty());
    assert_eq!(record.schema_version(), SCHEMA_VERSION);
}

#[test]
fn step_numbers_restart_per_frame() {
    let record = replay("reverted_internal_call.json");
    for node in record.traces() {
        let nums: Vec<u64> = node.steps().iter().map(|s| s.step_num).collect();
        let expected: Vec<u64> = (1..=node.num_steps()).collect();
        assert_eq!(nums, expected);
    }
    let root_ops: Vec<&str> = record.traces()[0]
        .steps()
        .iter()
        .map(|s| s.op_code.as_str())
        .collect();
    assert_eq!(
        root_ops,
        vec!["PUSH1", "PUSH1", "MSTORE", "DELEGATECALL", "POP", "STOP"]
    );
}

#[test]
fn aborted_create_keeps_open_frames() {
    let record = replay("aborted_create.json");
    assert_eq!(record.to(), None);
    assert_eq!(record.contract_address(), None);
    assert_eq!(record.status_code(), StatusCode::Failure);
    assert!(record.has_exception());
    assert_eq!(record.traces().len(), 2);

    let root = &record.traces()[0];
    assert_eq!(root.error_code(), ExceptionKind::PrecompiledCallError);
    assert_eq!(root.steps().len(), 4);
    assert_eq!(root.created_address(), None);

    let child = &record.traces()[1];
    assert_eq!(child.error_code(), ExceptionKind::InvalidInstruction);
    assert_eq!(child.status_code(), StatusCode::Failure);
    assert_eq!(record.num_steps(), 7);
}

#[test]
fn sealed_summary_agrees_with_traces() {
    let empty_failure =
        TransactionAssembler::begin(TxFields::default()).seal(ExternalOutcome::default());
    assert_eq!(empty_failure.status_code(), StatusCode::Failure);
    assert!(empty_failure.has_exception());
    assert!(empty_failure.traces().is_empty());

    for filename in ["reverted_internal_call.json", "aborted_create.json"] {
        let record = replay(filename);
        let steps: u64 = record.traces().iter().map(|n| n.num_steps()).sum();
        assert_eq!(record.num_steps(), steps);
        let any_exception = record.traces().iter().any(|n| n.has_exception());
        assert_eq!(
            record.has_exception(),
            any_exception || !record.status_code().is_success()
        );
        for node in record.traces() {
            assert_eq!(node.status_code().is_success(), !node.has_exception());
            assert_eq!(node.error_msg().is_empty(), !node.has_exception());
        }
    }
}

#[test]
fn record_roundtrips_field_for_field() {
    let record = replay("reverted_internal_call.json");
    let json = serde_json::to_string(&record).unwrap();
    let back: TransactionRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}

// ──────────────────── persistence ────────────────────

#[test]
fn small_record_is_stored_inline() {
    let (conn, store) = memory_store(1 << 20);
    let record = replay("reverted_internal_call.json");
    let report = store.persist_transaction(record.clone()).unwrap();
    assert!(report.is_empty());

    let collection = conn.memory_collection("exceptions").unwrap();
    let stored: TransactionRecord =
        serde_json::from_value(collection.get(record.tx_hash()).unwrap()).unwrap();
    assert_eq!(stored, record);
}

#[test]
fn oversized_record_is_detached_and_restorable() {
    let record = replay("reverted_internal_call.json");
    let limit = 800;
    let (conn, store) = memory_store(limit);
    let report = store.persist_transaction(record.clone()).unwrap();
    assert!(report.record_detached);

    let collection = conn.memory_collection("exceptions").unwrap();
    let document = collection.get(record.tx_hash()).unwrap();
    assert!(serde_json::to_vec(&document).unwrap().len() <= limit);
    assert!(document["trace_doc_id"].is_string());
    assert_eq!(document["has_exception"], true);
    assert_eq!(document["num_steps"], 9);

    let mut stored: TransactionRecord = serde_json::from_value(document).unwrap();
    assert!(stored.traces().is_empty());
    OverflowPolicy::new(limit)
        .restore(&mut stored, store.overflow_bucket())
        .unwrap();
    assert_eq!(stored, record);
}

#[test]
fn oversized_payload_fetch_is_byte_identical() {
    let (_conn, store) = memory_store(1024);
    let payload: Vec<u8> = (0..100_000_u32).map(|i| (i % 251) as u8).collect();
    let bucket = store.overflow_bucket();
    let id = bucket.store(&payload).unwrap();
    assert_eq!(bucket.fetch(&id).unwrap(), payload);
}

#[test]
fn one_failed_transaction_does_not_block_others() {
    let (conn, store) = memory_store(1 << 20);
    let reverted = replay("reverted_internal_call.json");
    let aborted = replay("aborted_create.json");

    let results = store.persist_all(vec![reverted.clone(), reverted.clone(), aborted.clone()]);
    assert_eq!(results.len(), 3);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(Error::Storage { .. })));
    assert_eq!(results[2].0, aborted.tx_hash());
    assert!(results[2].1.is_ok());
    assert_eq!(conn.memory_collection("exceptions").unwrap().len(), 2);
}

#[test]
fn persisting_after_close_reports_retryable_error() {
    let (_conn, store) = memory_store(1 << 20);
    store.close().unwrap();
    store.close().unwrap();
    let err = store
        .persist_transaction(replay("reverted_internal_call.json"))
        .unwrap_err();
    assert!(err.is_retryable());
}

#[test]
fn workers_share_one_store() {
    let (conn, store) = memory_store(2_000);

    std::thread::scope(|scope| {
        for worker in 0..4_u64 {
            let store = &store;
            scope.spawn(move || {
                for i in 0..25_u64 {
                    let record = replay_as("reverted_internal_call.json", worker * 100 + i);
                    store.persist_transaction(record).unwrap();
                }
            });
        }
    });

    let collection = conn.memory_collection("exceptions").unwrap();
    assert_eq!(collection.len(), 100);
}

#[test]
fn contract_records_are_keyed_by_address() {
    let (conn, store) = memory_store(1 << 20);
    let record = ContractCodeRecord {
        schema_version: SCHEMA_VERSION,
        address: "0x2a65aca4d5fc5b5c859090a6c34d164135398226".to_string(),
        code: vec![0x60, 0x80, 0x60, 0x40, 0x52],
        creator: "0x8ba1f109551bd432803012645ac136ddd64dba72".to_string(),
        nonce: 3,
        value: "0".to_string(),
        gas_limit: 900_000,
        gas_price: "9000000000".to_string(),
        init: vec![0x60, 0x80, 0x60, 0x40, 0x52],
        tx_hash: "0x9f3c5d8cbd1c43b2a2e6d5e9f9b55c31f3e9ab84a7fd0b9e6cf6bbf1c1b6a4f1".to_string(),
        external: true,
    };
    store.persist_contract(&record).unwrap();
    assert!(store.persist_contract(&record).is_err());

    let stored = conn
        .memory_collection("contracts")
        .unwrap()
        .get(&record.address)
        .unwrap();
    assert_eq!(
        serde_json::from_value::<ContractCodeRecord>(stored).unwrap(),
        record
    );
}

#[test]
fn fs_backend_exports_json_lines_and_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        export_dir: Some(dir.path().to_path_buf()),
        max_document_bytes: 800,
        ..StoreConfig::default()
    };
    let conn = Arc::new(FsConnection::connect(&config).unwrap());
    let store = TraceStore::open(conn.clone(), &config).unwrap();
    let record = replay("reverted_internal_call.json");
    store.persist_transaction(record.clone()).unwrap();
    store.close().unwrap();
    assert!(!conn.is_connected());

    let text = std::fs::read_to_string(conn.collection_path("exceptions")).unwrap();
    let line = text.lines().next().unwrap();
    let mut stored: TransactionRecord = serde_json::from_str(line).unwrap();
    assert!(stored.is_detached());

    let reopened = FsConnection::connect(&config).unwrap();
    let bucket = reopened.bucket("exception_bucket").unwrap();
    OverflowPolicy::new(800)
        .restore(&mut stored, bucket.as_ref())
        .unwrap();
    assert_eq!(stored, record);
}
