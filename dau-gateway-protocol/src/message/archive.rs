//! Upload catalog of the archival service (`dau.archive.ArchiveService`).
use serde::{Deserialize, Serialize};

/// gRPC path of the client-streaming upload call.
pub const UPLOAD_DATASET_PATH: &str = "/dau.archive.ArchiveService/UploadDataset";

/// One item of the upload stream: metadata first, then chunks in order.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UploadDatasetRequest {
    #[prost(oneof = "UploadItem", tags = "1, 2")]
    pub item: Option<UploadItem>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum UploadItem {
    #[prost(message, tag = "1")]
    Metadata(DatasetMetadata),
    #[prost(message, tag = "2")]
    Chunk(ArchiveChunk),
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[prost(string, tag = "1")]
    pub dataset_id: String,
    #[prost(string, tag = "2")]
    pub device_id: String,
    #[prost(uint64, tag = "3")]
    pub start_time_ms: u64,
    #[prost(uint32, tag = "4")]
    pub sample_rate_hz: u32,
    #[prost(uint32, tag = "5")]
    pub channel_count: u32,
    #[prost(uint32, tag = "6")]
    pub total_chunks: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ArchiveChunk {
    #[prost(string, tag = "1")]
    pub dataset_id: String,
    #[prost(uint32, tag = "2")]
    pub chunk_index: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct UploadSummary {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(uint32, tag = "2")]
    pub chunks_received: u32,
    #[prost(uint64, tag = "3")]
    pub samples_received: u64,
    #[prost(string, tag = "4")]
    pub message: String,
}

impl UploadDatasetRequest {
    pub fn metadata(metadata: DatasetMetadata) -> Self {
        Self {
            item: Some(UploadItem::Metadata(metadata)),
        }
    }

    pub fn chunk(chunk: ArchiveChunk) -> Self {
        Self {
            item: Some(UploadItem::Chunk(chunk)),
        }
    }
}
