//! End-to-end coverage over loopback TCP: lifecycle events, full-stack
//! message delivery, ordering, error policy, and resource accounting.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use rstest::rstest;
use sealframe::{
    AesGcmCipher, Connection, ConnectionListener, FrameDecoder, FrameEncoder, Message,
    Pipeline, RegistryBuilder, ServerConfig, ServerContext, TransportServer, ZlibCompressor,
    registry::MessageRegistry,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
struct Ping {
    seq: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    State(bool),
    Received(u32),
    Sent(usize),
}

/// Listener forwarding events into a channel and capturing the connection.
struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl ConnectionListener for Recorder {
    fn state_changed(&self, connection: &Arc<Connection>, connected: bool) {
        if connected {
            *self.connection.lock().expect("recorder lock") = Some(Arc::clone(connection));
        }
        let _ = self.events.send(Event::State(connected));
    }

    fn message_received(&self, _connection: &Arc<Connection>, message: Box<dyn Message>) {
        if let Some(ping) = message.downcast_ref::<Ping>() {
            let _ = self.events.send(Event::Received(ping.seq));
        }
    }

    fn message_sent(
        &self,
        _connection: &Arc<Connection>,
        _message: &dyn Message,
        len: usize,
        _plaintext: &[u8],
    ) {
        let _ = self.events.send(Event::Sent(len));
    }
}

struct Harness {
    context: Arc<ServerContext>,
    addr: SocketAddr,
    events: mpsc::UnboundedReceiver<Event>,
    recorder: Arc<Recorder>,
    client_pipeline: Pipeline,
    server: Arc<TransportServer>,
}

impl Harness {
    fn registry(&self) -> Arc<MessageRegistry> { Arc::clone(self.context.registry()) }

    fn server_connection(&self) -> Arc<Connection> {
        self.recorder
            .connection
            .lock()
            .expect("recorder lock")
            .clone()
            .expect("connection not yet accepted")
    }

    async fn next_event(&mut self) -> Event {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn expect_connected(&mut self) {
        assert_eq!(self.next_event().await, Event::State(true));
    }
}

fn identity_pipelines() -> (Pipeline, Pipeline) { (Pipeline::identity(), Pipeline::identity()) }

fn sealed_pipelines() -> (Pipeline, Pipeline) {
    let build = || {
        Pipeline::new(
            Arc::new(ZlibCompressor::default()),
            Arc::new(AesGcmCipher::new(&[0x11; 32])),
        )
    };
    (build(), build())
}

async fn start(server_pipeline: Pipeline, client_pipeline: Pipeline, config: ServerConfig) -> Harness {
    let registry = Arc::new(RegistryBuilder::new().register::<Ping>().build());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let recorder = Arc::new(Recorder {
        events: events_tx,
        connection: Mutex::new(None),
    });
    let context = ServerContext::new(
        config,
        registry,
        Arc::new(server_pipeline),
        Arc::clone(&recorder) as Arc<dyn ConnectionListener>,
    );

    let listener = TransportServer::bind("127.0.0.1:0".parse().expect("loopback addr"))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = Arc::new(TransportServer::new(Arc::clone(&context)));
    tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            server.run(listener).await.expect("server run");
        }
    });

    Harness {
        context,
        addr,
        events: events_rx,
        recorder,
        client_pipeline,
        server,
    }
}

/// Wire bytes for one `Ping` as a client would send it.
fn wire_frame(registry: &MessageRegistry, pipeline: &Pipeline, seq: u32) -> Vec<u8> {
    let plaintext = registry.serialize(&Ping { seq }).expect("serialize");
    let sealed = pipeline.outbound(&plaintext).expect("outbound");
    FrameEncoder::default().encode(&sealed).expect("frame").to_vec()
}

/// Read `count` pings from the server on the client socket.
async fn read_pings(
    stream: &mut TcpStream,
    registry: &MessageRegistry,
    pipeline: &Pipeline,
    count: usize,
) -> Vec<u32> {
    let mut decoder = FrameDecoder::new(sealframe::MAX_PAYLOAD_LEN);
    let mut seqs = Vec::new();
    let mut buf = [0u8; 4096];

    while seqs.len() < count {
        let read = timeout(WAIT, stream.read(&mut buf))
            .await
            .expect("timed out reading")
            .expect("read");
        assert!(read > 0, "unexpected end of stream");
        for payload in decoder.decode_chunk(&buf[..read]).expect("decode") {
            let plaintext = pipeline.inbound(&payload).expect("inbound");
            let message = registry.deserialize(&plaintext).expect("deserialize");
            seqs.push(message.downcast_ref::<Ping>().expect("ping").seq);
        }
    }
    seqs
}

#[rstest]
#[tokio::test]
async fn client_messages_reach_listener_in_order() {
    let (server_pipeline, client_pipeline) = sealed_pipelines();
    let mut harness = start(server_pipeline, client_pipeline, ServerConfig::new()).await;

    let mut client = TcpStream::connect(harness.addr).await.expect("connect");
    harness.expect_connected().await;

    let registry = harness.registry();
    let mut bytes = wire_frame(&registry, &harness.client_pipeline, 1);
    bytes.extend(wire_frame(&registry, &harness.client_pipeline, 2));
    client.write_all(&bytes).await.expect("write");

    assert_eq!(harness.next_event().await, Event::Received(1));
    assert_eq!(harness.next_event().await, Event::Received(2));
    assert!(harness.context.bytes_received() > 0);
}

#[rstest]
#[tokio::test]
async fn remote_close_fires_exactly_one_disconnect() {
    let (server_pipeline, client_pipeline) = identity_pipelines();
    let mut harness = start(server_pipeline, client_pipeline, ServerConfig::new()).await;

    let client = TcpStream::connect(harness.addr).await.expect("connect");
    harness.expect_connected().await;
    assert_eq!(harness.context.connection_count(), 1);
    drop(client);

    assert_eq!(harness.next_event().await, Event::State(false));

    // No second disconnect event and full resource release.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.events.try_recv().is_err());
    assert_eq!(harness.context.connection_count(), 0);
    assert_eq!(harness.context.pool().outstanding(), 0);
}

#[rstest]
#[tokio::test]
async fn framing_error_keeps_the_connection_open() {
    let (server_pipeline, client_pipeline) = identity_pipelines();
    let mut harness = start(server_pipeline, client_pipeline, ServerConfig::new()).await;

    let mut client = TcpStream::connect(harness.addr).await.expect("connect");
    harness.expect_connected().await;

    client.write_all(&[0x00, 0x00, 0x00]).await.expect("write zero header");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let registry = harness.registry();
    let frame = wire_frame(&registry, &harness.client_pipeline, 9);
    client.write_all(&frame).await.expect("write valid frame");

    // The valid frame in the next chunk still arrives; no disconnect first.
    assert_eq!(harness.next_event().await, Event::Received(9));
    assert!(harness.server_connection().is_connected());
}

#[rstest]
#[tokio::test]
async fn server_sends_reach_the_client_in_submission_order() {
    let (server_pipeline, client_pipeline) = sealed_pipelines();
    let mut harness = start(server_pipeline, client_pipeline, ServerConfig::new()).await;

    let mut client = TcpStream::connect(harness.addr).await.expect("connect");
    harness.expect_connected().await;
    let connection = harness.server_connection();

    for seq in 1..=5 {
        connection.send(&Ping { seq }).await.expect("send");
        assert!(matches!(harness.next_event().await, Event::Sent(_)));
    }

    let registry = harness.registry();
    let seqs = read_pings(&mut client, &registry, &harness.client_pipeline, 5).await;
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert!(harness.context.bytes_sent() > 0);
}

#[rstest]
#[tokio::test]
async fn send_blocking_returns_with_the_queue_drained() {
    let (server_pipeline, client_pipeline) = identity_pipelines();
    let mut harness = start(server_pipeline, client_pipeline, ServerConfig::new()).await;

    let mut client = TcpStream::connect(harness.addr).await.expect("connect");
    harness.expect_connected().await;
    let connection = harness.server_connection();

    connection
        .send_blocking(&Ping { seq: 3 })
        .await
        .expect("send_blocking");
    assert!(!connection.is_sending());

    let registry = harness.registry();
    let seqs = read_pings(&mut client, &registry, &harness.client_pipeline, 1).await;
    assert_eq!(seqs, vec![3]);
}

#[rstest]
#[tokio::test]
async fn disconnect_is_idempotent_and_fires_once() {
    let (server_pipeline, client_pipeline) = identity_pipelines();
    let mut harness = start(server_pipeline, client_pipeline, ServerConfig::new()).await;

    let _client = TcpStream::connect(harness.addr).await.expect("connect");
    harness.expect_connected().await;
    let connection = harness.server_connection();
    connection.set_user_data(Box::new("session state".to_owned()));

    connection.disconnect();
    connection.disconnect();

    assert_eq!(harness.next_event().await, Event::State(false));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.events.try_recv().is_err());
    assert!(!connection.is_connected());
    // Disconnect disposes the user state slot.
    assert!(connection.take_user_data().is_none());
}

#[rstest]
#[tokio::test]
async fn server_shutdown_disconnects_every_client() {
    let (server_pipeline, client_pipeline) = identity_pipelines();
    let mut harness = start(server_pipeline, client_pipeline, ServerConfig::new()).await;

    let mut client = TcpStream::connect(harness.addr).await.expect("connect");
    harness.expect_connected().await;

    harness.server.shutdown().await;

    assert_eq!(harness.next_event().await, Event::State(false));
    assert_eq!(harness.context.connection_count(), 0);

    let mut buf = [0u8; 1];
    let read = timeout(WAIT, client.read(&mut buf))
        .await
        .expect("timed out waiting for close")
        .expect("read");
    assert_eq!(read, 0, "client should observe the close");
}

#[rstest]
#[tokio::test]
async fn pool_exhaustion_rejects_the_next_connection() {
    let (server_pipeline, client_pipeline) = identity_pipelines();
    let config = ServerConfig::new().with_pool_capacity(1);
    let mut harness = start(server_pipeline, client_pipeline, config).await;

    let _first = TcpStream::connect(harness.addr).await.expect("first connect");
    harness.expect_connected().await;

    let mut second = TcpStream::connect(harness.addr).await.expect("second connect");
    let mut buf = [0u8; 1];
    let read = timeout(WAIT, second.read(&mut buf))
        .await
        .expect("timed out waiting for rejection")
        .expect("read");
    assert_eq!(read, 0, "rejected socket should be closed");
    assert_eq!(harness.context.connection_count(), 1);
}
