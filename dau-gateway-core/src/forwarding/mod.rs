//! Relays data-retrieval responses to the archival service, one upload stream per dataset.
//!
//! A router task fans chunks out by dataset id. Every dataset streams on its own task so
//! a stalled upload only ever holds back its own chunks.
mod archive;

pub use archive::{ArchiveClient, ArchiveUpload, GrpcArchiveClient};

use dashmap::DashMap;
use dau_gateway_models::settings::Archive as ArchiveSettings;
use dau_gateway_protocol::message::{
    archive::{ArchiveChunk, DatasetMetadata},
    now_ms, DeviceStatus, GetDataResponse, ResponseKind,
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, instrument, warn};

use crate::registry::MessageSubscription;

/// Completed dataset ids remembered so late duplicates do not reopen a stream.
const RECENTLY_COMPLETED: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct DatasetProgress {
    pub dataset_id: String,
    pub device_id: String,
    pub total_chunks: u32,
    pub chunks_sent: u32,
    pub started_at_ms: u64,
}

enum DatasetEvent {
    Chunk {
        device_id: String,
        chunk: GetDataResponse,
    },
    Failed {
        status: String,
    },
}

struct StreamHandle {
    generation: u64,
    events: mpsc::UnboundedSender<DatasetEvent>,
}

struct StreamClosed {
    dataset_id: String,
    generation: u64,
    completed: bool,
}

/// Router-side bookkeeping, owned by the router task.
struct Router {
    streams: HashMap<String, StreamHandle>,
    completed: VecDeque<String>,
    generation: u64,
    closed_tx: mpsc::UnboundedSender<StreamClosed>,
}

impl Router {
    fn new(closed_tx: mpsc::UnboundedSender<StreamClosed>) -> Self {
        Self {
            streams: HashMap::new(),
            completed: VecDeque::with_capacity(RECENTLY_COMPLETED),
            generation: 0,
            closed_tx,
        }
    }

    fn on_closed(&mut self, closed: StreamClosed) {
        if self
            .streams
            .get(&closed.dataset_id)
            .is_some_and(|handle| handle.generation == closed.generation)
        {
            self.streams.remove(&closed.dataset_id);
        }
        if closed.completed {
            if self.completed.len() == RECENTLY_COMPLETED {
                self.completed.pop_front();
            }
            self.completed.push_back(closed.dataset_id);
        }
    }

    #[instrument(
        skip_all,
        fields(device_id = %device_id, dataset_id = %chunk.dataset_id, chunk_index = chunk.chunk_index)
    )]
    fn route(&mut self, forwarder: &Arc<DataForwarder>, device_id: &str, chunk: &GetDataResponse) {
        let dataset_id = chunk.dataset_id.as_str();
        if !chunk.is_ok() {
            if let Some(handle) = self.streams.get(dataset_id) {
                let _ = handle.events.send(DatasetEvent::Failed {
                    status: chunk.status_label(),
                });
            }
            return;
        }
        if dataset_id.is_empty() {
            warn!("data chunk without dataset id dropped");
            return;
        }
        if self.completed.iter().any(|id| id == dataset_id) {
            debug!("chunk for an already completed dataset ignored");
            return;
        }

        if !self.streams.contains_key(dataset_id) {
            if chunk.total_chunks == 0 {
                warn!("dataset announced with zero chunks, nothing to forward");
                return;
            }
            self.generation += 1;
            let (tx, rx) = mpsc::unbounded_channel();
            forwarder.tracker.spawn(Arc::clone(forwarder).stream_dataset(
                dataset_id.to_string(),
                self.generation,
                rx,
                self.closed_tx.clone(),
            ));
            self.streams.insert(
                dataset_id.to_string(),
                StreamHandle {
                    generation: self.generation,
                    events: tx,
                },
            );
        }

        if let Some(handle) = self.streams.get(dataset_id) {
            let event = DatasetEvent::Chunk {
                device_id: device_id.to_string(),
                chunk: chunk.clone(),
            };
            if handle.events.send(event).is_err() {
                debug!("dataset stream already closing, chunk dropped");
            }
        }
    }
}

/// Why an open dataset stream ended without completing.
#[derive(Debug, Clone, Copy)]
enum Abort {
    Shutdown,
    RouterGone,
    Idle,
    Stalled,
}

pub struct DataForwarder {
    client: Arc<dyn ArchiveClient>,
    settings: ArchiveSettings,
    active: Arc<DashMap<String, DatasetProgress>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl DataForwarder {
    pub fn new(client: Arc<dyn ArchiveClient>, settings: ArchiveSettings) -> Arc<Self> {
        Arc::new(Self {
            client,
            settings,
            active: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Starts consuming `subscription` on a background task.
    pub fn start(self: &Arc<Self>, subscription: MessageSubscription) {
        self.tracker.spawn(Arc::clone(self).run(subscription));
    }

    pub fn active_datasets(&self) -> Vec<DatasetProgress> {
        let mut datasets: Vec<_> = self.active.iter().map(|e| e.value().clone()).collect();
        datasets.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        datasets
    }

    /// Aborts open streams and waits (bounded) for pending summaries.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!("archive forwarding did not drain in time");
        }
        self.active.clear();
    }

    async fn run(self: Arc<Self>, mut subscription: MessageSubscription) {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let mut router = Router::new(closed_tx);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(closed) = closed_rx.recv() => router.on_closed(closed),
                message = subscription.recv() => {
                    let Some(message) = message else { break };
                    if let Some(ResponseKind::GetData(chunk)) = message.envelope.response_kind() {
                        router.route(&self, &message.device_id, chunk);
                    }
                }
            }
        }
        debug!("data forwarder stopped");
    }

    async fn stream_dataset(
        self: Arc<Self>,
        dataset_id: String,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<DatasetEvent>,
        closed: mpsc::UnboundedSender<StreamClosed>,
    ) {
        let finished = self.pump(&dataset_id, &mut events).await;
        self.active.remove(&dataset_id);
        drop(events);
        let _ = closed.send(StreamClosed {
            dataset_id: dataset_id.clone(),
            generation,
            completed: finished.is_some(),
        });

        let Some((upload, chunks_sent)) = finished else {
            return;
        };
        match upload.finish().await {
            Ok(summary) if summary.success => info!(
                %dataset_id,
                chunks_sent,
                chunks_received = summary.chunks_received,
                samples_received = summary.samples_received,
                "dataset archived"
            ),
            Ok(summary) => {
                warn!(%dataset_id, chunks_sent, message = %summary.message, "archive rejected dataset")
            }
            Err(e) => error!(%dataset_id, chunks_sent, error = %e, "archive upload failed"),
        }
    }

    /// Streams one dataset until every chunk is queued. Returns the upload to finish,
    /// or `None` once the stream was aborted.
    #[instrument(skip_all, fields(dataset_id = %dataset_id))]
    async fn pump(
        &self,
        dataset_id: &str,
        events: &mut mpsc::UnboundedReceiver<DatasetEvent>,
    ) -> Option<(ArchiveUpload, u32)> {
        let Ok(DatasetEvent::Chunk {
            device_id: owner,
            chunk: first,
        }) = self.next_event(events).await
        else {
            return None;
        };

        let metadata = self.metadata(&owner, &first);
        let upload = match self.guarded(self.client.open_upload(metadata)).await {
            Ok(Ok(upload)) => upload,
            Ok(Err(e)) => {
                error!(error = %e, "failed to open archive stream");
                return None;
            }
            Err(reason) => {
                error!(?reason, "archive stream did not open");
                return None;
            }
        };
        info!(device_id = %owner, total_chunks = first.total_chunks, "archive stream opened");

        let total_chunks = first.total_chunks;
        self.active.insert(
            dataset_id.to_string(),
            DatasetProgress {
                dataset_id: dataset_id.to_string(),
                device_id: owner.clone(),
                total_chunks,
                chunks_sent: 0,
                started_at_ms: now_ms(),
            },
        );

        let mut chunks_sent = 0u32;
        let mut next_index = 0u32;
        let mut pending = Some(first);
        loop {
            let chunk = match pending.take() {
                Some(chunk) => chunk,
                None => match self.next_event(events).await {
                    Ok(DatasetEvent::Chunk { device_id, chunk }) => {
                        if device_id != owner {
                            warn!(%device_id, %owner, "chunk from a different device than the dataset owner");
                        }
                        chunk
                    }
                    Ok(DatasetEvent::Failed { status }) => {
                        warn!(%status, chunks_sent, "device failed the retrieval, archive stream aborted");
                        upload.abort();
                        return None;
                    }
                    Err(reason) => {
                        warn!(?reason, chunks_sent, "archive stream aborted");
                        upload.abort();
                        return None;
                    }
                },
            };

            if chunk.chunk_index != next_index {
                warn!(
                    expected = next_index,
                    chunk_index = chunk.chunk_index,
                    "chunk arrived out of order, forwarded as received"
                );
            }
            next_index = chunk.chunk_index.wrapping_add(1);
            let item = ArchiveChunk {
                dataset_id: dataset_id.to_string(),
                chunk_index: chunk.chunk_index,
                data: chunk.data,
            };
            match self.guarded(upload.send_chunk(item)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "forwarding chunk failed, archive stream aborted");
                    upload.abort();
                    return None;
                }
                Err(Abort::Stalled) => {
                    error!(
                        send_timeout_ms = self.settings.send_timeout_ms,
                        chunks_sent, "archive stream stalled, aborted"
                    );
                    upload.abort();
                    return None;
                }
                Err(reason) => {
                    warn!(?reason, chunks_sent, "archive stream aborted");
                    upload.abort();
                    return None;
                }
            }

            chunks_sent += 1;
            if let Some(mut progress) = self.active.get_mut(dataset_id) {
                progress.chunks_sent = chunks_sent;
            }
            if chunks_sent >= total_chunks {
                return Some((upload, chunks_sent));
            }
        }
    }

    async fn next_event(
        &self,
        events: &mut mpsc::UnboundedReceiver<DatasetEvent>,
    ) -> Result<DatasetEvent, Abort> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Abort::Shutdown),
            event = tokio::time::timeout(self.settings.idle_timeout(), events.recv()) => match event {
                Ok(Some(event)) => Ok(event),
                Ok(None) => Err(Abort::RouterGone),
                Err(_) => Err(Abort::Idle),
            },
        }
    }

    /// Bounds one archive call by the send timeout.
    async fn guarded<T>(&self, call: impl Future<Output = T>) -> Result<T, Abort> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Abort::Shutdown),
            result = tokio::time::timeout(self.settings.send_timeout(), call) => {
                result.map_err(|_| Abort::Stalled)
            }
        }
    }

    fn metadata(&self, device_id: &str, chunk: &GetDataResponse) -> DatasetMetadata {
        DatasetMetadata {
            dataset_id: chunk.dataset_id.clone(),
            device_id: device_id.to_string(),
            start_time_ms: chunk.start_time_ms.unwrap_or_else(now_ms),
            sample_rate_hz: chunk
                .sample_rate_hz
                .unwrap_or(self.settings.default_sample_rate_hz),
            channel_count: chunk
                .channel_count
                .unwrap_or(self.settings.default_channel_count),
            total_chunks: chunk.total_chunks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_tracing, MemoryLink};
    use crate::DeviceLink;
    use async_trait::async_trait;
    use dau_gateway_error::DauResult;
    use dau_gateway_protocol::message::{
        archive::{UploadDatasetRequest, UploadItem, UploadSummary},
        Envelope, HeartbeatResponse, StatusCode,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use tokio::sync::mpsc;

    #[derive(Debug, Clone)]
    struct RecordedUpload {
        metadata: DatasetMetadata,
        chunks: Vec<ArchiveChunk>,
    }

    #[derive(Default)]
    struct MockArchive {
        opened: AtomicUsize,
        uploads: Arc<Mutex<Vec<RecordedUpload>>>,
        /// Dataset whose stream is never drained.
        stalled: Option<String>,
        held: Mutex<Vec<mpsc::Receiver<UploadDatasetRequest>>>,
    }

    impl MockArchive {
        fn stalling(dataset_id: &str) -> Self {
            Self {
                stalled: Some(dataset_id.to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ArchiveClient for MockArchive {
        async fn open_upload(&self, metadata: DatasetMetadata) -> DauResult<ArchiveUpload> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.stalled.as_deref() == Some(metadata.dataset_id.as_str()) {
                let (tx, rx) = mpsc::channel(1);
                self.held.lock().unwrap().push(rx);
                let summary = tokio::spawn(std::future::pending());
                return Ok(ArchiveUpload::new(tx, summary));
            }
            let (tx, mut rx) = mpsc::channel::<UploadDatasetRequest>(16);
            let uploads = self.uploads.clone();
            let summary = tokio::spawn(async move {
                let mut chunks = Vec::new();
                while let Some(request) = rx.recv().await {
                    if let Some(UploadItem::Chunk(chunk)) = request.item {
                        chunks.push(chunk);
                    }
                }
                let chunks_received = chunks.len() as u32;
                uploads.lock().unwrap().push(RecordedUpload { metadata, chunks });
                Ok(UploadSummary {
                    success: true,
                    chunks_received,
                    samples_received: 0,
                    message: String::new(),
                })
            });
            Ok(ArchiveUpload::new(tx, summary))
        }
    }

    fn chunk(dataset_id: &str, chunk_index: u32, total_chunks: u32) -> GetDataResponse {
        GetDataResponse {
            status: StatusCode::Ok as i32,
            dataset_id: dataset_id.into(),
            chunk_index,
            total_chunks,
            data: vec![chunk_index as u8; 4],
            ..Default::default()
        }
    }

    fn setup() -> (Arc<MemoryLink>, Arc<MockArchive>, Arc<DataForwarder>) {
        setup_with(MockArchive::default(), ArchiveSettings::default())
    }

    fn setup_with(
        archive: MockArchive,
        settings: ArchiveSettings,
    ) -> (Arc<MemoryLink>, Arc<MockArchive>, Arc<DataForwarder>) {
        init_tracing();
        let (link, _outbox) = MemoryLink::new();
        let archive = Arc::new(archive);
        let forwarder = DataForwarder::new(archive.clone(), settings);
        forwarder.start(link.subscribe());
        (link, archive, forwarder)
    }

    fn archived(archive: &MockArchive, dataset_id: &str) -> bool {
        archive
            .uploads
            .lock()
            .unwrap()
            .iter()
            .any(|upload| upload.metadata.dataset_id == dataset_id)
    }

    fn send(link: &MemoryLink, sequence: u32, response: GetDataResponse) {
        link.respond("dau-7", sequence, ResponseKind::GetData(response));
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn dataset_completes_once_after_all_chunks() {
        let (link, archive, forwarder) = setup();
        for index in 0..3 {
            send(&link, index + 1, chunk("ds-1", index, 3));
        }
        wait_for(|| archive.uploads.lock().unwrap().len() == 1).await;

        let uploads = archive.uploads.lock().unwrap().clone();
        let indices: Vec<u32> = uploads[0].chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(uploads[0].metadata.device_id, "dau-7");
        assert_eq!(uploads[0].metadata.total_chunks, 3);
        assert_eq!(uploads[0].metadata.sample_rate_hz, 1000);
        assert_eq!(uploads[0].metadata.channel_count, 1);
        assert!(forwarder.active_datasets().is_empty());

        // a late duplicate must not reopen the dataset
        send(&link, 9, chunk("ds-1", 2, 3));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(archive.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chunks_keep_arrival_order() {
        let (link, archive, _forwarder) = setup();
        for index in [1, 0, 2] {
            send(&link, index + 1, chunk("ds-2", index, 3));
        }
        wait_for(|| archive.uploads.lock().unwrap().len() == 1).await;

        let uploads = archive.uploads.lock().unwrap();
        let indices: Vec<u32> = uploads[0].chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![1, 0, 2]);
    }

    #[tokio::test]
    async fn device_supplied_metadata_wins() {
        let (link, archive, _forwarder) = setup();
        let mut first = chunk("ds-3", 0, 1);
        first.sample_rate_hz = Some(25_600);
        first.channel_count = Some(4);
        first.start_time_ms = Some(1_700_000_000_000);
        send(&link, 1, first);
        wait_for(|| archive.uploads.lock().unwrap().len() == 1).await;

        let metadata = archive.uploads.lock().unwrap()[0].metadata.clone();
        assert_eq!(metadata.sample_rate_hz, 25_600);
        assert_eq!(metadata.channel_count, 4);
        assert_eq!(metadata.start_time_ms, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn failed_retrieval_aborts_open_stream() {
        let (link, archive, forwarder) = setup();
        send(&link, 1, chunk("ds-4", 0, 5));
        wait_for(|| forwarder.active_datasets().first().map(|d| d.chunks_sent) == Some(1)).await;

        let mut failed = chunk("ds-4", 1, 5);
        failed.status = StatusCode::Error as i32;
        send(&link, 2, failed);
        wait_for(|| forwarder.active_datasets().is_empty()).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(archive.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrelated_messages_are_ignored() {
        let (link, archive, forwarder) = setup();
        link.respond(
            "dau-7",
            1,
            ResponseKind::Heartbeat(HeartbeatResponse {
                status: StatusCode::Ok as i32,
                uptime_s: 5,
            }),
        );
        link.deliver("dau-7", Envelope::default());
        send(&link, 2, chunk("", 0, 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(archive.opened.load(Ordering::SeqCst), 0);
        assert!(forwarder.active_datasets().is_empty());
    }

    #[tokio::test]
    async fn stalled_archive_stream_does_not_hold_back_other_datasets() {
        let (link, archive, forwarder) =
            setup_with(MockArchive::stalling("ds-slow"), ArchiveSettings::default());
        for index in 0..5 {
            let slow = ResponseKind::GetData(chunk("ds-slow", index, 5));
            link.respond("dau-1", index + 1, slow);
        }
        for index in 0..2 {
            let fast = ResponseKind::GetData(chunk("ds-fast", index, 2));
            link.respond("dau-2", index + 1, fast);
        }
        wait_for(|| archived(&archive, "ds-fast")).await;

        let active = forwarder.active_datasets();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].dataset_id, "ds-slow");
        assert_eq!(active[0].device_id, "dau-1");
        assert_eq!(active[0].chunks_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_archive_stream_is_aborted_after_send_timeout() {
        let settings = ArchiveSettings {
            send_timeout_ms: 500,
            ..Default::default()
        };
        let (link, archive, forwarder) = setup_with(MockArchive::stalling("ds-slow"), settings);
        for index in 0..3 {
            let slow = ResponseKind::GetData(chunk("ds-slow", index, 3));
            link.respond("dau-1", index + 1, slow);
        }
        wait_for(|| forwarder.active_datasets().first().map(|d| d.chunks_sent) == Some(1)).await;
        wait_for(|| forwarder.active_datasets().is_empty()).await;

        // the dataset can be retrieved again once the stalled attempt is gone
        send(&link, 10, chunk("ds-slow", 0, 3));
        wait_for(|| archive.opened.load(Ordering::SeqCst) == 2).await;
        assert!(!archived(&archive, "ds-slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_dataset_is_evicted() {
        let settings = ArchiveSettings {
            idle_timeout_ms: 1_000,
            ..Default::default()
        };
        let (link, archive, forwarder) = setup_with(MockArchive::default(), settings);
        send(&link, 1, chunk("ds-5", 0, 3));
        wait_for(|| forwarder.active_datasets().len() == 1).await;

        let started = tokio::time::Instant::now();
        wait_for(|| forwarder.active_datasets().is_empty()).await;
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert!(archive.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_aborts_open_streams() {
        let (link, archive, forwarder) = setup();
        send(&link, 1, chunk("ds-6", 0, 4));
        wait_for(|| forwarder.active_datasets().len() == 1).await;

        forwarder.shutdown(Duration::from_secs(1)).await;
        assert!(forwarder.active_datasets().is_empty());
        assert!(archive.uploads.lock().unwrap().is_empty());
    }
}
