//! Device connection registry and TCP listener.
//!
//! One live connection per device id. A reconnect supersedes the previous
//! connection only after the old receive loop has drained, so two connections
//! never claim the same id at once.
mod bus;
mod connection;

pub use bus::{DeviceMessage, MessageBus, MessageSubscription};
pub use connection::{ConnectionInfo, DeviceConnection};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use dau_gateway_error::{init::InitContextError, CommandError, DauResult};
use dau_gateway_models::settings::Listener;
use dau_gateway_protocol::{
    message::{now_ms, Envelope, Hello, HelloAck, RequestKind, ResponseKind},
    EnvelopeCodec, Inbound,
};
use futures::StreamExt;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, instrument, trace, warn};

use crate::link::DeviceLink;
use connection::BoxedWriter;

pub struct ConnectionRegistry {
    server_id: String,
    settings: Listener,
    connections: DashMap<String, Arc<DeviceConnection>>,
    /// Serialises supersede/install per device id
    install_locks: DashMap<String, Arc<Mutex<()>>>,
    bus: MessageBus,
    next_connection_id: AtomicU64,
    local_addr: ArcSwapOption<SocketAddr>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Releases a connection however its receive loop ends.
struct ConnectionCleanup {
    registry: Arc<ConnectionRegistry>,
    connection: Arc<DeviceConnection>,
}

impl Drop for ConnectionCleanup {
    fn drop(&mut self) {
        let conn = &self.connection;
        conn.cancel.cancel();
        conn.mark_disconnected();
        let removed = self
            .registry
            .connections
            .remove_if(conn.device_id(), |_, current| current.id == conn.id)
            .is_some();
        if removed {
            info!(device_id = %conn.device_id(), connection_id = conn.id, "device disconnected");
        }
        // a reconnect in progress still holds its clone of the lock
        self.registry
            .install_locks
            .remove_if(conn.device_id(), |_, lock| Arc::strong_count(lock) == 1);
        conn.drained.cancel();
    }
}

impl ConnectionRegistry {
    pub fn new(server_id: impl Into<String>, settings: Listener) -> Arc<Self> {
        Arc::new(Self {
            server_id: server_id.into(),
            settings,
            connections: DashMap::new(),
            install_locks: DashMap::new(),
            bus: MessageBus::new(),
            next_connection_id: AtomicU64::new(1),
            local_addr: ArcSwapOption::empty(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Binds the listener and spawns the accept loop. Returns the bound address.
    #[instrument(name = "registry-start", skip(self), fields(addr = %self.settings.bind_addr()))]
    pub async fn start(self: &Arc<Self>) -> DauResult<SocketAddr> {
        let listener = TcpListener::bind(self.settings.bind_addr())
            .await
            .map_err(|e| InitContextError::Bind(format!("{}: {e}", self.settings.bind_addr())))?;
        let addr = listener.local_addr()?;
        self.local_addr.store(Some(Arc::new(addr)));
        info!(%addr, "device listener started");

        let registry = Arc::clone(self);
        self.tracker.spawn(async move { registry.accept_loop(listener).await });
        Ok(addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("accept loop cancelled");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(self.settings.tcp_nodelay) {
                            debug!(%peer, error = %e, "set_nodelay failed");
                        }
                        let registry = Arc::clone(&self);
                        self.tracker.spawn(async move { registry.serve_tcp(stream, peer).await });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    async fn serve_tcp(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (reader, writer) = stream.into_split();
        self.serve_connection(reader, writer, peer).await;
    }

    /// Identifies the peer, installs the connection and runs its receive loop.
    pub async fn serve_connection<R, W>(self: Arc<Self>, reader: R, writer: W, peer: SocketAddr)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let codec = EnvelopeCodec::new(self.settings.max_frame_len);
        let mut frames = FramedRead::new(reader, codec.clone());

        let identification = match self.identify(&mut frames, peer).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%peer, error = %e, "dropping unidentified connection");
                return;
            }
        };
        let device_id = identification.sender_id().to_string();
        let hello = match identification.request_kind() {
            Some(RequestKind::Hello(hello)) => hello.clone(),
            _ => Hello::default(),
        };
        let is_hello = matches!(identification.request_kind(), Some(RequestKind::Hello(_)));

        let connection = Arc::new(DeviceConnection::new(
            self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            device_id.clone(),
            peer,
            hello,
            Box::new(writer) as BoxedWriter,
            codec,
            self.settings.write_timeout(),
            self.cancel.child_token(),
        ));

        if !self.install(&connection).await {
            return;
        }
        let cleanup = ConnectionCleanup {
            registry: Arc::clone(&self),
            connection: Arc::clone(&connection),
        };

        if is_hello {
            let ack = Envelope::response(
                self.server_id.clone(),
                identification.sequence(),
                ResponseKind::HelloAck(HelloAck {
                    accepted: true,
                    server_time_ms: now_ms(),
                }),
            );
            connection.send(ack).await;
        }
        self.bus.publish(DeviceMessage {
            device_id: device_id.clone(),
            connection_id: connection.id,
            envelope: identification,
        });

        self.receive_loop(&connection, &mut frames).await;

        drop(cleanup);
        connection.close_writer().await;
    }

    async fn identify<R>(
        &self,
        frames: &mut FramedRead<R, EnvelopeCodec>,
        peer: SocketAddr,
    ) -> Result<Envelope, CommandError>
    where
        R: AsyncRead + Unpin,
    {
        let timeout = self.settings.identification_timeout();
        let first = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(CommandError::ConnectionLost(peer.to_string()));
            }
            first = tokio::time::timeout(timeout, frames.next()) => first,
        };
        match first {
            Err(_) => Err(CommandError::ProtocolViolation(format!(
                "{peer} sent no identification within {timeout:?}"
            ))),
            Ok(None) => Err(CommandError::ConnectionLost(peer.to_string())),
            Ok(Some(Err(e))) => Err(CommandError::ProtocolViolation(format!(
                "{peer} identification frame: {e}"
            ))),
            Ok(Some(Ok(Inbound::Malformed { reason, .. }))) => Err(
                CommandError::ProtocolViolation(format!("{peer} malformed identification: {reason}")),
            ),
            Ok(Some(Ok(Inbound::Envelope(envelope)))) => {
                if envelope.header.is_none() || envelope.sender_id().is_empty() {
                    Err(CommandError::ProtocolViolation(format!(
                        "{peer} identification without sender id"
                    )))
                } else {
                    Ok(envelope)
                }
            }
        }
    }

    /// Supersedes any previous connection for the same device and registers
    /// `connection`. Returns `false` when the registry is shutting down.
    async fn install(&self, connection: &Arc<DeviceConnection>) -> bool {
        let device_id = connection.device_id().to_string();
        let lock = self
            .install_locks
            .entry(device_id.clone())
            .or_default()
            .value()
            .clone();
        let _guard = lock.lock().await;

        if let Some((_, previous)) = self.connections.remove(&device_id) {
            info!(
                device_id = %device_id,
                previous = previous.id,
                current = connection.id,
                "device reconnected, superseding previous connection"
            );
            previous.cancel.cancel();
            let drain = self.settings.supersede_drain_timeout();
            if tokio::time::timeout(drain, previous.drained.cancelled())
                .await
                .is_err()
            {
                warn!(device_id = %device_id, previous = previous.id, timeout = ?drain, "previous connection did not drain in time");
            }
        }

        if self.cancel.is_cancelled() {
            return false;
        }
        self.connections.insert(device_id.clone(), Arc::clone(connection));
        info!(
            device_id = %device_id,
            connection_id = connection.id,
            peer = %connection.info().peer,
            "device connected"
        );
        true
    }

    async fn receive_loop<R>(
        &self,
        connection: &Arc<DeviceConnection>,
        frames: &mut FramedRead<R, EnvelopeCodec>,
    ) where
        R: AsyncRead + Unpin,
    {
        let device_id = connection.device_id();
        loop {
            let item = tokio::select! {
                biased;
                _ = connection.cancel.cancelled() => {
                    debug!(device_id, connection_id = connection.id, "receive loop cancelled");
                    break;
                }
                item = frames.next() => item,
            };
            match item {
                None => {
                    debug!(device_id, connection_id = connection.id, "peer closed connection");
                    break;
                }
                Some(Ok(Inbound::Envelope(envelope))) => {
                    connection.touch();
                    if !envelope.sender_id().is_empty() && envelope.sender_id() != device_id {
                        warn!(
                            device_id,
                            sender_id = envelope.sender_id(),
                            "envelope sender differs from connection identity"
                        );
                    }
                    trace!(
                        device_id,
                        sequence = envelope.sequence(),
                        payload = envelope.payload_name(),
                        "envelope received"
                    );
                    self.bus.publish(DeviceMessage {
                        device_id: device_id.to_string(),
                        connection_id: connection.id,
                        envelope,
                    });
                }
                Some(Ok(Inbound::Malformed { len, reason })) => {
                    connection.touch();
                    warn!(device_id, len, reason = %reason, "malformed envelope skipped");
                }
                Some(Err(e)) => {
                    warn!(device_id, connection_id = connection.id, error = %e, "connection failed");
                    break;
                }
            }
        }
    }

    /// Best-effort send to the device's current connection.
    pub async fn send(&self, device_id: &str, envelope: Envelope) -> bool {
        let connection = self
            .connections
            .get(device_id)
            .map(|entry| Arc::clone(entry.value()));
        match connection {
            Some(connection) => connection.send(envelope).await,
            None => {
                debug!(device_id, "send to unknown device");
                false
            }
        }
    }

    pub fn subscribe(&self) -> MessageSubscription {
        self.bus.subscribe()
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.connections
            .get(device_id)
            .is_some_and(|entry| entry.value().is_connected())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connected_devices(&self) -> Vec<ConnectionInfo> {
        let mut devices: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| entry.value().info())
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.load_full().map(|addr| *addr)
    }

    /// Stops accepting, cancels every connection and waits (bounded) for the
    /// receive loops to drain.
    #[instrument(name = "registry-shutdown", skip_all)]
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        let budget = self.settings.shutdown_drain_timeout();
        if tokio::time::timeout(budget, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                timeout = ?budget,
                "connections did not drain before shutdown deadline"
            );
        }
        self.connections.clear();
        self.install_locks.clear();
        info!("connection registry stopped");
    }
}

#[async_trait]
impl DeviceLink for ConnectionRegistry {
    async fn send(&self, device_id: &str, envelope: Envelope) -> bool {
        ConnectionRegistry::send(self, device_id, envelope).await
    }

    fn subscribe(&self) -> MessageSubscription {
        ConnectionRegistry::subscribe(self)
    }
}
