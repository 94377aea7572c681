use collector_core::Anonymizer;
use futures::StreamExt;
use ingest::{Store, StoreConfig};
use ingest_client::{BufferedStream, Client, ClientError, StreamSummary};
use obs_sqlite::{Db, Table};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wire::{Batch, Call, Code, Metadata, PassiveEntry, Reply, WireError};

fn passive(i: usize) -> PassiveEntry {
    PassiveEntry { query: format!("host{i}.example.com"), query_type: "A".into(), timestamp_ms: 1_000 + i as i64 }
}

/// Withholds every ack until `resume` is notified, then acks all received
/// entries and keeps acking as batches arrive.
async fn paused_server(io: DuplexStream, resume: Arc<Notify>) -> usize {
    let (mut sink, mut stream) = wire::framed(io).split();
    let call: Call = wire::recv(&mut stream).await.unwrap().unwrap();
    assert_eq!(call, Call::StorePassiveEntry { metadata: Metadata::muid("m1") });
    let mut paused = true;
    let mut held = 0usize;
    let mut total = 0usize;
    loop {
        tokio::select! {
            _ = resume.notified(), if paused => {
                paused = false;
                for _ in 0..held {
                    wire::send(&mut sink, &Reply::ack::<String>(Ok(()))).await.unwrap();
                }
                held = 0;
            }
            next = wire::recv::<_, Batch<PassiveEntry>>(&mut stream) => match next.unwrap() {
                Some(batch) => {
                    total += batch.len();
                    if paused {
                        held += batch.len();
                    } else {
                        for _ in 0..batch.len() {
                            wire::send(&mut sink, &Reply::ack::<String>(Ok(()))).await.unwrap();
                        }
                    }
                }
                None => break,
            }
        }
    }
    wire::send(&mut sink, &Reply::ok()).await.unwrap();
    total
}

#[tokio::test]
async fn send_blocks_once_the_window_is_full() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let resume = Arc::new(Notify::new());
    let server = tokio::spawn(paused_server(server, resume.clone()));

    let stream: BufferedStream<PassiveEntry, DuplexStream> = BufferedStream::open(client, "m1", 50, 100).await.unwrap();
    for i in 0..100 {
        timeout(Duration::from_secs(1), stream.send(passive(i))).await.unwrap().unwrap();
    }
    assert_eq!(stream.in_flight(), 100);
    assert!(timeout(Duration::from_millis(100), stream.send(passive(100))).await.is_err());

    resume.notify_one();
    for i in 100..250 {
        timeout(Duration::from_secs(1), stream.send(passive(i))).await.unwrap().unwrap();
    }
    let summary = stream.close_send(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary, StreamSummary { acked: 250, failed: 0 });
    assert_eq!(server.await.unwrap(), 250);
}

#[tokio::test]
async fn small_window_flushes_partial_batches() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let resume = Arc::new(Notify::new());
    resume.notify_one();
    let server = tokio::spawn(paused_server(server, resume));

    let stream: BufferedStream<PassiveEntry, DuplexStream> = BufferedStream::open(client, "m1", 50, 3).await.unwrap();
    for i in 0..10 {
        timeout(Duration::from_secs(1), stream.send(passive(i))).await.unwrap().unwrap();
    }
    let summary = stream.close_send(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.acked, 10);
    assert_eq!(server.await.unwrap(), 10);
}

#[tokio::test]
async fn close_send_gives_up_on_cancel() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let server = tokio::spawn(paused_server(server, Arc::new(Notify::new())));
    let stream: BufferedStream<PassiveEntry, DuplexStream> = BufferedStream::open(client, "m1", 2, 10).await.unwrap();
    stream.send(passive(0)).await.unwrap();

    // acks never come, so only the token ends the wait
    let ctx = CancellationToken::new();
    ctx.cancel();
    assert!(matches!(stream.close_send(&ctx).await, Err(ClientError::Cancelled)));
    server.abort();
}

async fn spawn_server() -> (Arc<Store>, String, CancellationToken) {
    let db = Db::open_in_memory().unwrap();
    let store =
        Arc::new(Store::open(db, StoreConfig { batch_size: 4, cache_size: 100 }, Anonymizer::identity()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(ingest_server::serve(listener, store.clone(), shutdown.clone()));
    (store, addr, shutdown)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn end_to_end_passive_stream() {
    let (store, addr, shutdown) = spawn_server().await;
    let client = Client::new(addr);

    let muid = client.start_measurement("e2e", "localhost").await.unwrap();
    let stream = client.passive_entries(&muid, 2, 3).await.unwrap();
    for i in 0..4 {
        stream.send(passive(i)).await.unwrap();
    }
    stream.send(PassiveEntry { query: "com".into(), query_type: "NS".into(), timestamp_ms: 5 }).await.unwrap();
    let summary = stream.close_send(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary, StreamSummary { acked: 4, failed: 1 });

    client.start_stage(&muid).await.unwrap();
    client.stop_stage(&muid).await.unwrap();
    client.stop_measurement(&muid).await.unwrap();

    let passive_rows = store.inspect(|db| db.count(Table::PassiveEntry).unwrap()).unwrap();
    assert_eq!(passive_rows, 4);
    assert_eq!(store.inspect(|db| db.count(Table::Stage).unwrap()).unwrap(), 2);
    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_measurement_surfaces_internal_status() {
    let (_store, addr, shutdown) = spawn_server().await;
    let client = Client::new(addr);

    let err = client.stop_measurement("missing").await.unwrap_err();
    assert!(matches!(err, ClientError::Wire(WireError::Status { code: Code::Internal, .. })));

    let stream = client.zone_entries("missing", 10, 10).await.unwrap();
    let err = stream.close_send(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Wire(WireError::Status { code: Code::Internal, .. })));
    shutdown.cancel();
}

#[tokio::test]
async fn connect_failure_names_the_address() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    let client = Client::new(addr.clone());
    assert_eq!(client.addr(), addr);
    let err = client.start_stage("m").await.unwrap_err();
    assert!(matches!(&err, ClientError::Connect { .. }));
    assert!(err.to_string().contains(client.addr()));
}
