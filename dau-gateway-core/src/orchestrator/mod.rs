//! Sequence-correlated request/response over the device link.
//!
//! Every device operation goes through [`Orchestrator::send_and_await`]: stamp a
//! fresh sequence number, register a waiter, send, then wait (bounded) for the
//! response carrying the same sequence number.
mod operations;
mod pending;

use dau_gateway_error::{CommandError, CommandResult};
use dau_gateway_models::settings::Orchestrator as Timeouts;
use dau_gateway_protocol::{
    message::{Command, DeviceStatus, Envelope, RequestKind, ResponseKind},
    SequenceGenerator,
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{link::DeviceLink, registry::MessageSubscription};
use pending::{PendingTable, Resolution};

pub struct Orchestrator {
    server_id: String,
    link: Arc<dyn DeviceLink>,
    sequences: SequenceGenerator,
    pending: Arc<PendingTable>,
    timeouts: Timeouts,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates the orchestrator and spawns its response dispatcher.
    pub fn new(server_id: impl Into<String>, link: Arc<dyn DeviceLink>, timeouts: Timeouts) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            server_id: server_id.into(),
            sequences: SequenceGenerator::new(),
            pending: Arc::new(PendingTable::default()),
            timeouts,
            cancel: CancellationToken::new(),
            link,
        });
        let subscription = orchestrator.link.subscribe();
        tokio::spawn(dispatch(
            subscription,
            Arc::clone(&orchestrator.pending),
            orchestrator.cancel.clone(),
        ));
        orchestrator
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends `request` to `device_id` and waits up to `timeout` for the
    /// correlated response. `matcher` extracts the expected shape; any other
    /// shape is a contract violation reported as [`CommandError::Internal`].
    pub async fn send_and_await<T, F>(
        &self,
        device_id: &str,
        operation: &str,
        request: RequestKind,
        timeout: Duration,
        matcher: F,
    ) -> CommandResult<T>
    where
        F: FnOnce(ResponseKind) -> Result<T, ResponseKind>,
    {
        if self.cancel.is_cancelled() {
            return Err(CommandError::Unavailable(device_id.to_string()));
        }
        let deadline = Instant::now() + timeout;
        let (guard, rx) = self.pending.register(&self.sequences, device_id);
        let sequence = guard.sequence;
        let envelope = Envelope::request(self.server_id.clone(), sequence, request);
        debug!(device_id, sequence, operation, "sending command");

        let deadline_exceeded = || CommandError::DeadlineExceeded {
            device: device_id.to_string(),
            sequence,
            timeout,
        };

        match tokio::time::timeout_at(deadline, self.link.send(device_id, envelope)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(device_id, sequence, operation, "device unavailable");
                return Err(CommandError::Unavailable(device_id.to_string()));
            }
            Err(_) => return Err(deadline_exceeded()),
        }

        let response = match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(_)) => {
                return Err(CommandError::Internal(format!(
                    "{operation} to {device_id} abandoned: orchestrator stopped"
                )))
            }
            Err(_) => {
                warn!(device_id, sequence, operation, ?timeout, "command timed out");
                return Err(deadline_exceeded());
            }
        };
        drop(guard);

        let Some(kind) = response.into_response_kind() else {
            return Err(CommandError::Internal(format!(
                "{operation} to {device_id} answered with an empty response"
            )));
        };
        match matcher(kind) {
            Ok(value) => {
                trace!(device_id, sequence, operation, "command completed");
                Ok(value)
            }
            Err(ResponseKind::Error(error)) => Err(CommandError::Rejected {
                device: device_id.to_string(),
                status: error.status_label(),
                message: error.message,
            }),
            Err(other) => Err(CommandError::Internal(format!(
                "{operation} to {device_id} answered with {}",
                other.name()
            ))),
        }
    }

    /// Runs a catalog [`Command`] with an explicit timeout.
    pub async fn execute<C: Command>(
        &self,
        device_id: &str,
        command: C,
        timeout: Duration,
    ) -> CommandResult<C::Response> {
        self.send_and_await(
            device_id,
            C::OPERATION,
            command.into_request(),
            timeout,
            C::match_response,
        )
        .await
    }

    /// Stops the dispatcher; outstanding calls fail instead of waiting out their timeout.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pending.clear();
    }
}

async fn dispatch(
    mut subscription: MessageSubscription,
    pending: Arc<PendingTable>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = subscription.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if !message.envelope.is_response() {
            continue;
        }
        let sequence = message.envelope.sequence();
        match pending.resolve(&message.device_id, message.envelope.clone()) {
            Resolution::Resolved => {
                trace!(device_id = %message.device_id, sequence, "response correlated")
            }
            Resolution::CallerGone => {
                debug!(device_id = %message.device_id, sequence, "caller stopped waiting")
            }
            Resolution::WrongDevice => warn!(
                device_id = %message.device_id,
                sequence,
                "response sequence belongs to another device, ignored"
            ),
            Resolution::NoWaiter => trace!(
                device_id = %message.device_id,
                sequence,
                payload = message.envelope.payload_name(),
                "uncorrelated response ignored"
            ),
        }
    }
    debug!("response dispatcher stopped");
}

#[cfg(test)]
mod tests;
