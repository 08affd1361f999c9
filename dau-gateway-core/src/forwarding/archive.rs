use async_trait::async_trait;
use dau_gateway_error::{DauError, DauResult};
use dau_gateway_models::settings::Archive as ArchiveSettings;
use dau_gateway_protocol::message::archive::{
    ArchiveChunk, DatasetMetadata, UploadDatasetRequest, UploadSummary, UPLOAD_DATASET_PATH,
};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};
use tracing::debug;

/// Downstream archival service.
#[async_trait]
pub trait ArchiveClient: Send + Sync + 'static {
    /// Opens one streamed upload; the metadata item is already queued.
    async fn open_upload(&self, metadata: DatasetMetadata) -> DauResult<ArchiveUpload>;
}

/// An upload in flight. Chunks are queued in order; the summary resolves
/// once the stream is finished and the service has answered.
pub struct ArchiveUpload {
    tx: mpsc::Sender<UploadDatasetRequest>,
    summary: JoinHandle<DauResult<UploadSummary>>,
}

impl ArchiveUpload {
    pub fn new(
        tx: mpsc::Sender<UploadDatasetRequest>,
        summary: JoinHandle<DauResult<UploadSummary>>,
    ) -> Self {
        Self { tx, summary }
    }

    pub async fn send_chunk(&self, chunk: ArchiveChunk) -> DauResult<()> {
        self.tx
            .send(UploadDatasetRequest::chunk(chunk))
            .await
            .map_err(|_| DauError::Msg("archive upload stream closed".into()))
    }

    /// Closes the stream and waits for the service summary.
    pub async fn finish(self) -> DauResult<UploadSummary> {
        drop(self.tx);
        self.summary.await?
    }

    pub fn abort(self) {
        self.summary.abort();
    }
}

pub struct GrpcArchiveClient {
    channel: Channel,
    stream_buffer: usize,
}

impl GrpcArchiveClient {
    /// Connects lazily: the first upload establishes the HTTP/2 connection.
    pub fn new(settings: &ArchiveSettings) -> DauResult<Self> {
        let endpoint = Endpoint::from_shared(settings.endpoint.clone())
            .map_err(|e| DauError::ConfigurationError(format!("archive endpoint: {e}")))?
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms));
        Ok(Self {
            channel: endpoint.connect_lazy(),
            stream_buffer: settings.stream_buffer.max(1),
        })
    }
}

#[async_trait]
impl ArchiveClient for GrpcArchiveClient {
    async fn open_upload(&self, metadata: DatasetMetadata) -> DauResult<ArchiveUpload> {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let dataset_id = metadata.dataset_id.clone();
        tx.send(UploadDatasetRequest::metadata(metadata))
            .await
            .map_err(|_| DauError::Msg("archive upload stream closed".into()))?;

        let channel = self.channel.clone();
        let summary = tokio::spawn(async move {
            let mut grpc = Grpc::new(channel);
            grpc.ready()
                .await
                .map_err(|e| DauError::Msg(format!("archive not ready: {e}")))?;
            let codec: ProstCodec<UploadDatasetRequest, UploadSummary> = ProstCodec::default();
            let response = grpc
                .client_streaming(
                    tonic::Request::new(ReceiverStream::new(rx)),
                    PathAndQuery::from_static(UPLOAD_DATASET_PATH),
                    codec,
                )
                .await
                .map_err(|status| DauError::Msg(format!("archive upload failed: {status}")))?;
            debug!(dataset_id, "archive upload answered");
            Ok(response.into_inner())
        });
        Ok(ArchiveUpload::new(tx, summary))
    }
}
