// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NSQ transport.
//!
//! The producer keeps one TCP connection to `NSQD_ADDRESS` and publishes each
//! envelope as JSON on the topic of its task kind. The consumer resolves the
//! nsqd instances of every topic through lookupd, subscribes with channel
//! `default` and feeds the handler queues. While a delivery is being handled
//! its message is touched every 30 s so nsqd does not time it out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{CHANNEL, Delivery, QUEUE_CAPACITY, TaskEnvelope, TaskProducer, TaskQueues};
use crate::error::{Error, Result};
use crate::task::{CreateClusterPayload, InitClusterPayload, TaskPayload, UpdateClusterPayload};

pub mod protocol;

use protocol::{Command, Frame, LookupProducer, MAGIC, MessageId, OK, ProtocolError};

/// How often an in-flight message is touched.
pub const TOUCH_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before a requeued message is redelivered.
const REQUEUE_DELAY_MS: u64 = 5_000;

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Queue(err.to_string())
    }
}

/// Publishes envelopes to one nsqd.
pub struct NsqProducer {
    address: String,
    conn: Mutex<Option<TcpStream>>,
}

impl NsqProducer {
    /// The connection is opened on first publish.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            conn: Mutex::new(None),
        }
    }

    async fn publish<P: Serialize>(&self, topic: &str, envelope: &TaskEnvelope<P>) -> Result<()> {
        let body = Bytes::from(serde_json::to_vec(envelope)?);
        let command = Command::Pub {
            topic: topic.to_string(),
            body,
        }
        .encode();

        let mut conn = self.conn.lock().await;
        for attempt in 0..2 {
            if conn.is_none() {
                *conn = Some(self.connect().await?);
            }
            let Some(stream) = conn.as_mut() else {
                continue;
            };
            match publish_on(stream, &command).await {
                Ok(()) => {
                    debug!(topic, task_id = %envelope.task_id, "Task published");
                    return Ok(());
                }
                Err(PublishError::Rejected(reason)) => {
                    return Err(Error::Queue(format!("nsqd rejected publish: {}", reason)));
                }
                Err(PublishError::Protocol(e)) => {
                    warn!(topic, attempt, error = %e, "NSQ connection broken, reconnecting");
                    *conn = None;
                }
            }
        }
        Err(Error::Queue(format!("cannot publish to {}", self.address)))
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| Error::Queue(format!("connect {}: {}", self.address, e)))?;
        stream
            .write_all(MAGIC)
            .await
            .map_err(|e| Error::Queue(format!("handshake {}: {}", self.address, e)))?;
        debug!(address = %self.address, "Connected to nsqd");
        Ok(stream)
    }
}

enum PublishError {
    Rejected(String),
    Protocol(ProtocolError),
}

impl From<ProtocolError> for PublishError {
    fn from(err: ProtocolError) -> Self {
        PublishError::Protocol(err)
    }
}

impl From<std::io::Error> for PublishError {
    fn from(err: std::io::Error) -> Self {
        PublishError::Protocol(err.into())
    }
}

async fn publish_on(stream: &mut TcpStream, command: &[u8]) -> std::result::Result<(), PublishError> {
    stream.write_all(command).await?;
    loop {
        match protocol::read_frame(stream).await? {
            frame if frame.is_heartbeat() => stream.write_all(&Command::Nop.encode()).await?,
            Frame::Response(data) if data.as_ref() == OK => return Ok(()),
            Frame::Response(data) | Frame::Error(data) => {
                return Err(PublishError::Rejected(
                    String::from_utf8_lossy(&data).into_owned(),
                ));
            }
            Frame::Message(_) => {
                return Err(PublishError::Protocol(ProtocolError::Malformed(
                    "message frame on a producer connection",
                )));
            }
        }
    }
}

#[async_trait]
impl TaskProducer for NsqProducer {
    async fn send_create(&self, envelope: TaskEnvelope<CreateClusterPayload>) -> Result<()> {
        self.publish(CreateClusterPayload::TOPIC, &envelope).await
    }

    async fn send_init(&self, envelope: TaskEnvelope<InitClusterPayload>) -> Result<()> {
        self.publish(InitClusterPayload::TOPIC, &envelope).await
    }

    async fn send_update(&self, envelope: TaskEnvelope<UpdateClusterPayload>) -> Result<()> {
        self.publish(UpdateClusterPayload::TOPIC, &envelope).await
    }
}

/// Subscribes to the three task topics.
#[derive(Clone)]
pub struct NsqConsumer {
    http: reqwest::Client,
    lookupd: String,
    retry_delay: Duration,
}

impl NsqConsumer {
    pub fn new(http: reqwest::Client, lookupd: impl Into<String>) -> Self {
        Self {
            http,
            lookupd: lookupd.into(),
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Wait between lookups and reconnects. Default: 5 seconds.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Start one consumer loop per topic on `tracker`. The loops stop when
    /// `cancel` fires.
    pub fn subscribe(&self, cancel: CancellationToken, tracker: &TaskTracker) -> TaskQueues {
        TaskQueues {
            create: self.spawn_topic::<CreateClusterPayload>(cancel.clone(), tracker),
            init: self.spawn_topic::<InitClusterPayload>(cancel.clone(), tracker),
            update: self.spawn_topic::<UpdateClusterPayload>(cancel, tracker),
        }
    }

    fn spawn_topic<P: TaskPayload>(
        &self,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> mpsc::Receiver<Delivery<P>> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let consumer = self.clone();
        let sessions = tracker.clone();
        tracker.spawn(async move { consumer.consume(tx, cancel, sessions).await });
        rx
    }

    async fn consume<P: TaskPayload>(
        self,
        tx: mpsc::Sender<Delivery<P>>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) {
        let topic = P::TOPIC;
        info!(topic, lookupd = %self.lookupd, "NSQ consumer started");
        while !cancel.is_cancelled() {
            match lookup(&self.http, &self.lookupd, topic).await {
                Ok(producers) => match producers.first() {
                    Some(producer) => {
                        let address = producer.tcp_address();
                        match session(&address, &tx, &cancel, &tracker).await {
                            Ok(()) => break,
                            Err(e) => warn!(topic, address = %address, error = %e, "NSQ session ended"),
                        }
                    }
                    None => debug!(topic, "No nsqd has the topic yet"),
                },
                Err(e) => warn!(topic, error = %e, "NSQ lookup failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
        info!(topic, "NSQ consumer stopped");
    }
}

/// nsqd instances carrying `topic`. An unknown topic has none.
pub(crate) async fn lookup(
    http: &reqwest::Client,
    lookupd: &str,
    topic: &str,
) -> Result<Vec<LookupProducer>> {
    let base = if lookupd.starts_with("http://") || lookupd.starts_with("https://") {
        lookupd.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", lookupd.trim_end_matches('/'))
    };
    let response = http
        .get(format!("{}/lookup", base))
        .query(&[("topic", topic)])
        .send()
        .await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(Vec::new());
    }
    let body = response.error_for_status()?.bytes().await?;
    Ok(protocol::parse_lookup(&body)?)
}

/// One subscription over one connection. Returns `Ok` when cancelled or when
/// the handlers are gone.
async fn session<P: TaskPayload>(
    address: &str,
    tx: &mpsc::Sender<Delivery<P>>,
    cancel: &CancellationToken,
    tracker: &TaskTracker,
) -> Result<()> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| Error::Queue(format!("connect {}: {}", address, e)))?;
    let (mut reader, mut writer) = stream.into_split();
    writer.write_all(MAGIC).await?;
    let subscribe = Command::Sub {
        topic: P::TOPIC.to_string(),
        channel: CHANNEL.to_string(),
    };
    writer.write_all(&subscribe.encode()).await?;
    loop {
        match protocol::read_frame(&mut reader).await? {
            frame if frame.is_heartbeat() => writer.write_all(&Command::Nop.encode()).await?,
            Frame::Response(data) if data.as_ref() == OK => break,
            other => return Err(Error::Queue(format!("subscribe refused: {:?}", other))),
        }
    }
    writer
        .write_all(&Command::Rdy(QUEUE_CAPACITY as u32).encode())
        .await?;
    info!(topic = P::TOPIC, address, "Subscribed to nsqd");

    let writer = Arc::new(Mutex::new(writer));
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = writer.lock().await.write_all(&Command::Cls.encode()).await;
                return Ok(());
            }
            frame = protocol::read_frame(&mut reader) => frame?,
        };
        match frame {
            frame if frame.is_heartbeat() => {
                writer.lock().await.write_all(&Command::Nop.encode()).await?;
            }
            Frame::Response(_) => {}
            Frame::Error(data) => {
                warn!(topic = P::TOPIC, error = %String::from_utf8_lossy(&data), "nsqd error");
            }
            Frame::Message(message) => {
                let envelope = match serde_json::from_slice::<TaskEnvelope<P>>(&message.body) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(topic = P::TOPIC, id = %message.id, error = %e, "Discarding undecodable message");
                        writer
                            .lock()
                            .await
                            .write_all(&Command::Fin(message.id).encode())
                            .await?;
                        continue;
                    }
                };
                let (delivery, acked) = Delivery::with_ack(envelope);
                if tx.send(delivery).await.is_err() {
                    return Ok(());
                }
                tracker.spawn(settle(writer.clone(), message.id, acked));
            }
        }
    }
}

/// Touch the message until the handler settles it, then FIN or REQ.
async fn settle(writer: Arc<Mutex<OwnedWriteHalf>>, id: MessageId, mut acked: oneshot::Receiver<()>) {
    let mut touch = tokio::time::interval_at(Instant::now() + TOUCH_INTERVAL, TOUCH_INTERVAL);
    let command = loop {
        tokio::select! {
            result = &mut acked => {
                break match result {
                    Ok(()) => Command::Fin(id),
                    Err(_) => Command::Req(id, REQUEUE_DELAY_MS),
                };
            }
            _ = touch.tick() => {
                if let Err(e) = writer.lock().await.write_all(&Command::Touch(id).encode()).await {
                    debug!(id = %id, error = %e, "Touch failed, nsqd will redeliver");
                    return;
                }
            }
        }
    };
    if let Err(e) = writer.lock().await.write_all(&command.encode()).await {
        warn!(id = %id, error = %e, "Failed to settle message, nsqd will redeliver");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response_frame(data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32((data.len() + 4) as u32);
        buf.put_i32(0);
        buf.put_slice(data);
        buf.to_vec()
    }

    fn message_frame(id: &[u8; 16], body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32((4 + 8 + 2 + 16 + body.len()) as u32);
        buf.put_i32(2);
        buf.put_i64(0);
        buf.put_u16(1);
        buf.put_slice(id);
        buf.put_slice(body);
        buf.to_vec()
    }

    fn init_envelope(task_id: &str) -> TaskEnvelope<InitClusterPayload> {
        TaskEnvelope::new(
            "E1",
            task_id,
            InitClusterPayload {
                provider_name: "custom".to_string(),
                cluster_id: "c1".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_producer_publishes_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr").to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let mut reader = BufReader::new(socket);
            let mut magic = [0u8; 4];
            reader.read_exact(&mut magic).await.expect("magic");
            let mut line = String::new();
            reader.read_line(&mut line).await.expect("command");
            let len = reader.read_u32().await.expect("len") as usize;
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await.expect("body");
            reader
                .get_mut()
                .write_all(&response_frame(b"OK"))
                .await
                .expect("ok");
            (magic, line, body)
        });

        let producer = NsqProducer::new(address);
        producer
            .send_init(init_envelope("t1"))
            .await
            .expect("publish");

        let (magic, line, body) = server.await.expect("server");
        assert_eq!(&magic, MAGIC);
        assert_eq!(line, "PUB cloud-init\n");
        let decoded: TaskEnvelope<InitClusterPayload> =
            serde_json::from_slice(&body).expect("json");
        assert_eq!(decoded, init_envelope("t1"));
    }

    #[tokio::test]
    async fn test_producer_surfaces_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            let mut frame = BytesMut::new();
            frame.put_u32(4 + 13);
            frame.put_i32(1);
            frame.put_slice(b"E_BAD_MESSAGE");
            let _ = socket.write_all(&frame).await;
        });

        let err = NsqProducer::new(address)
            .send_init(init_envelope("t1"))
            .await
            .err()
            .expect("should fail");
        assert!(err.to_string().contains("E_BAD_MESSAGE"));
    }

    #[tokio::test]
    async fn test_lookup_missing_topic_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lookup"))
            .and(query_param("topic", "cloud-update"))
            .respond_with(ResponseTemplate::new(404).set_body_string("TOPIC_NOT_FOUND"))
            .mount(&server)
            .await;

        let producers = lookup(&reqwest::Client::new(), &server.uri(), "cloud-update")
            .await
            .expect("lookup");
        assert!(producers.is_empty());
    }

    #[tokio::test]
    async fn test_consumer_delivers_and_fins() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let lookupd = MockServer::start().await;
        for topic in ["cloud-create", "cloud-update"] {
            Mock::given(method("GET"))
                .and(path("/lookup"))
                .and(query_param("topic", topic))
                .respond_with(ResponseTemplate::new(404))
                .mount(&lookupd)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/lookup"))
            .and(query_param("topic", "cloud-init"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "channels": ["default"],
                "producers": [{"broadcast_address": "127.0.0.1", "tcp_port": port}]
            })))
            .mount(&lookupd)
            .await;

        let nsqd = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let mut reader = BufReader::new(socket);
            let mut magic = [0u8; 4];
            reader.read_exact(&mut magic).await.expect("magic");
            let mut sub = String::new();
            reader.read_line(&mut sub).await.expect("sub");
            reader
                .get_mut()
                .write_all(&response_frame(b"OK"))
                .await
                .expect("ok");
            let mut rdy = String::new();
            reader.read_line(&mut rdy).await.expect("rdy");

            let body = serde_json::to_vec(&init_envelope("t7")).expect("json");
            reader
                .get_mut()
                .write_all(&message_frame(b"0000000000000001", &body))
                .await
                .expect("message");
            let mut fin = String::new();
            reader.read_line(&mut fin).await.expect("fin");
            (sub, rdy, fin)
        });

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut queues = NsqConsumer::new(reqwest::Client::new(), lookupd.uri())
            .with_retry_delay(Duration::from_millis(50))
            .subscribe(cancel.clone(), &tracker);

        let delivery = queues.init.recv().await.expect("delivery");
        let (envelope, acker) = delivery.into_parts();
        assert_eq!(envelope.task_id, "t7");
        acker.ack();

        let (sub, rdy, fin) = nsqd.await.expect("nsqd");
        assert_eq!(sub, "SUB cloud-init default\n");
        assert_eq!(rdy, "RDY 10\n");
        assert_eq!(fin, "FIN 0000000000000001\n");

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }
}
