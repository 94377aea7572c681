use collector_core::Anonymizer;
use futures::{SinkExt, StreamExt};
use ingest::{Store, StoreConfig};
use ingest_server::serve_connection;
use obs_sqlite::{Db, Table};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wire::{Batch, Call, Code, LogEntry, LogInfo, Metadata, PassiveEntry, Reply};

fn store() -> Arc<Store> {
    let db = Db::open_in_memory().unwrap();
    Arc::new(Store::open(db, StoreConfig { batch_size: 100, cache_size: 100 }, Anonymizer::identity()).unwrap())
}

fn muid(s: &Store) -> String {
    s.start_measurement(&CancellationToken::new(), "test", "host").unwrap()
}

fn count(s: &Store, table: Table) -> i64 {
    s.inspect(|db| db.count(table).unwrap()).unwrap()
}

/// Run one call to completion: send `call` and the raw `frames`, half-close,
/// then collect every reply until the server hangs up.
async fn exchange(store: &Arc<Store>, call: &Call, frames: &[String]) -> Vec<Reply> {
    let (client, server) = tokio::io::duplex(1 << 20);
    let task = tokio::spawn(serve_connection(server, store.clone(), CancellationToken::new()));
    let (mut sink, mut stream) = wire::framed(client).split();
    wire::send(&mut sink, call).await.unwrap();
    for frame in frames {
        sink.send(frame.clone()).await.unwrap();
    }
    sink.close().await.unwrap();
    let mut replies = Vec::new();
    while let Some(reply) = wire::recv::<_, Reply>(&mut stream).await.unwrap() {
        replies.push(reply);
    }
    task.await.unwrap().unwrap();
    replies
}

fn log_entry(der: Vec<u8>, index: i64) -> LogEntry {
    LogEntry {
        cert_der: der,
        is_precert: false,
        index,
        timestamp_ms: 1_700_000_000_000 + index,
        log: LogInfo { url: "https://ct.example/log".into(), description: "log".into(), ..Default::default() },
    }
}

fn frame<E: wire::StreamEntry>(entries: Vec<E>) -> String {
    serde_json::to_string(&Batch { entries }).unwrap()
}

fn status_code(reply: &Reply) -> Code {
    match reply {
        Reply::Status { code, .. } => *code,
        other => panic!("expected status, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_certificate_is_acked_and_stream_continues() {
    let s = store();
    let m = muid(&s);
    let good = rcgen::generate_simple_self_signed(vec!["www.example.com".to_string()]).unwrap().cert.der().to_vec();
    let entries = vec![log_entry(b"not a certificate".to_vec(), 1), log_entry(good, 2)];
    let replies = exchange(&s, &Call::StoreLogEntries { metadata: Metadata::muid(&m) }, &[frame(entries)]).await;

    assert_eq!(replies.len(), 3, "{replies:?}");
    assert!(matches!(&replies[0], Reply::Ack { ok: false, error } if error.contains("certificate")));
    assert_eq!(replies[1], Reply::Ack { ok: true, error: String::new() });
    assert_eq!(replies[2], Reply::ok());
    assert_eq!(count(&s, Table::Certificate), 1);
    assert_eq!(count(&s, Table::LogEntry), 1);
}

#[tokio::test]
async fn acks_follow_entry_order_across_batches() {
    let s = store();
    let m = muid(&s);
    let first = vec![
        PassiveEntry { query: "www.a.com".into(), query_type: "a".into(), timestamp_ms: 10 },
        PassiveEntry { query: "".into(), query_type: "A".into(), timestamp_ms: 10 },
    ];
    let second = vec![PassiveEntry { query: "mx.b.org".into(), query_type: "MX".into(), timestamp_ms: 20 }];
    let replies =
        exchange(&s, &Call::StorePassiveEntry { metadata: Metadata::muid(&m) }, &[frame(first), frame(second)]).await;

    let acks: Vec<bool> = replies
        .iter()
        .filter_map(|r| match r {
            Reply::Ack { ok, .. } => Some(*ok),
            _ => None,
        })
        .collect();
    assert_eq!(acks, vec![true, false, true]);
    assert_eq!(replies.last(), Some(&Reply::ok()));
    assert_eq!(count(&s, Table::PassiveEntry), 2);
}

#[tokio::test]
async fn out_of_range_timestamp_is_an_entry_error() {
    let s = store();
    let m = muid(&s);
    let entries = vec![PassiveEntry { query: "www.a.com".into(), query_type: "A".into(), timestamp_ms: i64::MAX }];
    let replies = exchange(&s, &Call::StorePassiveEntry { metadata: Metadata::muid(&m) }, &[frame(entries)]).await;
    assert!(matches!(&replies[0], Reply::Ack { ok: false, .. }));
    assert_eq!(replies[1], Reply::ok());
}

#[tokio::test]
async fn timestamp_just_below_the_earliest_second_is_an_entry_error() {
    let s = store();
    let m = muid(&s);
    let entries = vec![
        PassiveEntry { query: "www.a.com".into(), query_type: "A".into(), timestamp_ms: -377_705_116_800_001 },
        PassiveEntry { query: "www.a.com".into(), query_type: "A".into(), timestamp_ms: 1_000 },
    ];
    let replies = exchange(&s, &Call::StorePassiveEntry { metadata: Metadata::muid(&m) }, &[frame(entries)]).await;
    assert_eq!(replies.len(), 3, "{replies:?}");
    assert!(matches!(&replies[0], Reply::Ack { ok: false, error } if error.contains("timestamp")));
    assert_eq!(replies[1], Reply::Ack { ok: true, error: String::new() });
    assert_eq!(replies[2], Reply::ok());
    assert_eq!(count(&s, Table::PassiveEntry), 1);
}

#[tokio::test]
async fn stream_without_measurement_id_is_invalid_argument() {
    let s = store();
    let replies = exchange(&s, &Call::StoreZoneEntry { metadata: Metadata::default() }, &[]).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(status_code(&replies[0]), Code::InvalidArgument);

    let replies = exchange(&s, &Call::StoreZoneEntry { metadata: Metadata::muid("") }, &[]).await;
    assert_eq!(status_code(&replies[0]), Code::InvalidArgument);
}

#[tokio::test]
async fn stream_for_unknown_measurement_is_internal() {
    let s = store();
    let replies = exchange(&s, &Call::StoreEntradaEntry { metadata: Metadata::muid("nope") }, &[]).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(status_code(&replies[0]), Code::Internal);
}

#[tokio::test]
async fn malformed_batch_ends_the_stream() {
    let s = store();
    let m = muid(&s);
    let replies = exchange(
        &s,
        &Call::StorePassiveEntry { metadata: Metadata::muid(&m) },
        &[r#"{"entries":[{"apex":1}]}"#.to_string()],
    )
    .await;
    assert_eq!(replies.len(), 1, "{replies:?}");
    assert_eq!(status_code(&replies[0]), Code::Internal);
}

#[tokio::test]
async fn unary_measurement_lifecycle() {
    let s = store();
    let replies =
        exchange(&s, &Call::StartMeasurement { description: "scan".into(), host: "h1".into() }, &[]).await;
    let muid = match &replies[..] {
        [Reply::Muid { muid }] => muid.clone(),
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(muid.len(), 32);
    assert!(s.is_active(&muid).unwrap());

    assert_eq!(exchange(&s, &Call::StopStage { muid: muid.clone() }, &[]).await, vec![Reply::ok()]);
    assert_eq!(exchange(&s, &Call::StartStage { muid: muid.clone() }, &[]).await, vec![Reply::ok()]);
    assert_eq!(exchange(&s, &Call::StopMeasurement { muid: muid.clone() }, &[]).await, vec![Reply::ok()]);
    assert!(!s.is_active(&muid).unwrap());

    let replies = exchange(&s, &Call::StopMeasurement { muid }, &[]).await;
    assert_eq!(status_code(&replies[0]), Code::Internal);
}
