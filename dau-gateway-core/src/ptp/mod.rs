//! Unicast time-sync lease negotiation.
//!
//! Devices ask for unicast Sync, Delay_Req, Delay_Resp or Announce over PTP
//! signaling (any other message type is denied with a zero duration); every
//! grant is recorded in the lease table and the daemon configuration is
//! regenerated from the set of devices that still hold a live grant.
mod config;
mod daemon;
mod lease;
mod wire;

pub use config::{render as render_config, write_atomically, ConfigWriter};
pub use daemon::PtpDaemon;
pub use lease::{ClientLease, GrantInfo, LeaseInfo, LeaseTable};
pub use wire::{
    build_grant, parse_request, PortIdentity, PtpMessageType, SignalingRequest, UnicastGrant,
    UnicastRequest, WireError,
};

use arc_swap::ArcSwapOption;
use dau_gateway_error::{init::InitContextError, DauResult};
use dau_gateway_models::settings::Ptp as PtpSettings;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::UdpSocket, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, instrument, trace, warn};

const MAX_DATAGRAM: usize = 1500;
const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Capped exponential delay between consecutive socket receive failures.
#[derive(Debug)]
struct RecvBackoff {
    next: Duration,
}

impl RecvBackoff {
    fn new() -> Self {
        Self {
            next: RECV_BACKOFF_MIN,
        }
    }

    fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(RECV_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = RECV_BACKOFF_MIN;
    }
}

/// Answer to one signaling datagram.
#[derive(Debug)]
pub struct Negotiation {
    pub reply: Vec<u8>,
    pub granted: usize,
    pub denied: usize,
}

pub struct PtpManager {
    settings: PtpSettings,
    identity: PortIdentity,
    leases: LeaseTable,
    config: ConfigWriter,
    daemon: Option<PtpDaemon>,
    local_addrs: ArcSwapOption<(SocketAddr, SocketAddr)>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl PtpManager {
    pub fn new(server_id: &str, settings: PtpSettings) -> Arc<Self> {
        let daemon = (!settings.daemon_program.trim().is_empty()).then(|| {
            PtpDaemon::new(
                settings.daemon_program.clone(),
                settings.daemon_args.clone(),
                settings.config_path.clone(),
            )
        });
        Arc::new(Self {
            identity: clock_identity(server_id),
            leases: LeaseTable::new(settings.min_duration_s, settings.max_duration_s),
            config: ConfigWriter::new(settings.config_path.clone()),
            daemon,
            local_addrs: ArcSwapOption::empty(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            settings,
        })
    }

    /// Writes the initial configuration, launches the daemon and binds both ports.
    #[instrument(name = "ptp-start", skip(self))]
    pub async fn start(self: &Arc<Self>) -> DauResult<()> {
        self.config
            .write(render_config(&self.settings, &[]))
            .await
            .map_err(|e| InitContextError::Bind(format!("{}: {e}", self.config.path().display())))?;
        if let Some(daemon) = &self.daemon {
            daemon.start().await?;
        }

        let event = bind(&self.settings.bind_host, self.settings.event_port).await?;
        let general = bind(&self.settings.bind_host, self.settings.general_port).await?;
        let addrs = (event.local_addr()?, general.local_addr()?);
        self.local_addrs.store(Some(Arc::new(addrs)));
        info!(event = %addrs.0, general = %addrs.1, "ptp negotiator listening");

        for socket in [event, general] {
            let manager = Arc::clone(self);
            self.tracker.spawn(async move { manager.recv_loop(socket).await });
        }
        let manager = Arc::clone(self);
        self.tracker.spawn(async move { manager.sweep_loop().await });
        Ok(())
    }

    /// Bound (event, general) addresses once started.
    pub fn local_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        self.local_addrs.load().as_deref().copied()
    }

    pub fn leases(&self) -> Vec<LeaseInfo> {
        self.leases.snapshot(Instant::now())
    }

    /// Parses a datagram and records grants. `Ok(None)` when it is not a unicast request.
    pub fn negotiate(
        &self,
        datagram: &[u8],
        peer: SocketAddr,
        now: Instant,
    ) -> Result<Option<Negotiation>, WireError> {
        let Some(request) = parse_request(datagram)? else {
            return Ok(None);
        };
        let device_id = peer.ip().to_string();
        let mut grants = Vec::with_capacity(request.requests.len());
        let (mut granted, mut denied) = (0, 0);

        for requested in &request.requests {
            let duration_s = match PtpMessageType::from_nibble(requested.message_type) {
                Some(message_type) => {
                    granted += 1;
                    let duration_s = self.leases.grant(
                        &device_id,
                        peer,
                        message_type,
                        requested.duration_s,
                        now,
                    );
                    debug!(device_id = %device_id, %message_type, requested = requested.duration_s, duration_s, "unicast lease granted");
                    duration_s
                }
                None => {
                    denied += 1;
                    warn!(device_id = %device_id, message_type = requested.message_type, "unicast request for unsupported message type denied");
                    0
                }
            };
            grants.push(UnicastGrant {
                message_type: requested.message_type,
                log_inter_message_period: requested.log_inter_message_period,
                duration_s,
                renewal: duration_s > 0,
            });
        }

        Ok(Some(Negotiation {
            reply: build_grant(self.identity, &request, &grants),
            granted,
            denied,
        }))
    }

    /// Expires stale leases; regenerates the configuration when any device left.
    pub async fn sweep(&self) -> Vec<String> {
        let removed = self.leases.sweep(Instant::now());
        if !removed.is_empty() {
            info!(?removed, "unicast leases expired");
            self.regenerate().await;
        }
        removed
    }

    /// Rewrites the daemon configuration from live leases and signals a reload on change.
    pub async fn regenerate(&self) {
        let destinations = self.leases.destinations(Instant::now());
        let contents = render_config(&self.settings, &destinations);
        match self.config.write(contents).await {
            Ok(true) => {
                info!(destinations = destinations.len(), "time-sync configuration updated");
                if let Some(daemon) = &self.daemon {
                    if let Err(e) = daemon.reload().await {
                        warn!(error = %e, "time-sync daemon reload failed");
                    }
                }
            }
            Ok(false) => trace!("time-sync configuration unchanged"),
            Err(e) => warn!(error = %e, path = %self.config.path().display(), "writing time-sync configuration failed"),
        }
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if let Some(daemon) = &self.daemon {
            daemon.stop().await;
        }
        info!("ptp negotiator stopped");
    }

    async fn recv_loop(&self, socket: UdpSocket) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut backoff = RecvBackoff::new();
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };
            let (len, peer) = match received {
                Ok(received) => {
                    backoff.reset();
                    received
                }
                Err(e) => {
                    let delay = backoff.failed();
                    debug!(error = %e, ?delay, "ptp receive failed");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };
            let negotiation = match self.negotiate(&buf[..len], peer, Instant::now()) {
                Ok(Some(negotiation)) => negotiation,
                Ok(None) => continue,
                Err(e) => {
                    debug!(%peer, error = %e, "malformed ptp datagram");
                    continue;
                }
            };
            if let Err(e) = socket.send_to(&negotiation.reply, peer).await {
                warn!(%peer, error = %e, "sending unicast grant failed");
            }
            if negotiation.granted > 0 {
                self.regenerate().await;
            }
        }
    }

    async fn sweep_loop(&self) {
        let mut interval = tokio::time::interval(self.settings.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}

async fn bind(host: &str, port: u16) -> DauResult<UdpSocket> {
    let addr = format!("{host}:{port}");
    UdpSocket::bind(&addr)
        .await
        .map_err(|e| InitContextError::Bind(format!("{addr}: {e}")).into())
}

/// EUI-64 style clock identity derived from the server id.
fn clock_identity(server_id: &str) -> PortIdentity {
    let [a, b, c, d] = crc32fast::hash(server_id.as_bytes()).to_be_bytes();
    PortIdentity {
        clock_identity: [a, b, c, 0xFF, 0xFE, d, 0x00, 0x01],
        port_number: 1,
    }
}
