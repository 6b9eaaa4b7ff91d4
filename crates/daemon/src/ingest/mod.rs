use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use common::store::StoreKey;

use crate::publish::{PutOutcome, Publisher};

mod decoder;

pub use decoder::{next_record, spawn_decoder, DecodeError};

/// Records buffered between the decoder thread and the publisher
pub const RECORD_BUFFER: usize = 64;

/// One blob to publish, as decoded from the input stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub path: String,
    pub data: Bytes,
    /// Publish under the assets prefix instead of the content prefix
    #[serde(rename = "asset", default)]
    pub is_asset: bool,
}

/// Totals for one run of an [`Ingestor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub records: u64,
    pub written: u64,
    pub unchanged: u64,
    /// Records that decoded but could not be published
    pub failed: u64,
    /// Items the decoder could not turn into records
    pub malformed: u64,
}

/// Feeds a record stream into a [`Publisher`], strictly in stream order
#[derive(Debug, Clone)]
pub struct Ingestor {
    publisher: Publisher,
    content_prefix: StoreKey,
    assets_prefix: StoreKey,
}

impl Ingestor {
    pub fn new(publisher: Publisher, content_prefix: StoreKey, assets_prefix: StoreKey) -> Self {
        Self {
            publisher,
            content_prefix,
            assets_prefix,
        }
    }

    pub fn destination(&self, record: &IngestRecord) -> StoreKey {
        let prefix = if record.is_asset {
            &self.assets_prefix
        } else {
            &self.content_prefix
        };
        prefix.join(&record.path)
    }

    /// Publish every record until the stream ends. Each put completes
    ///  before the next record is taken, so a path repeated in the stream
    ///  ends up holding its last record's bytes.
    pub async fn run<S>(&self, records: S) -> IngestSummary
    where
        S: Stream<Item = Result<IngestRecord, DecodeError>>,
    {
        let mut summary = IngestSummary::default();
        let mut records = std::pin::pin!(records);

        while let Some(item) = records.next().await {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("skipping undecodable record: {}", e);
                    summary.malformed += 1;
                    continue;
                }
            };
            summary.records += 1;

            let key = self.destination(&record);
            tracing::debug!(key = %key, asset = record.is_asset, "ingesting record");
            match self.publisher.put_blob(key.clone(), record.data).await {
                Ok(PutOutcome::Written) => summary.written += 1,
                Ok(PutOutcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    tracing::error!(key = %key, "failed to publish record: {}", e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            records = summary.records,
            written = summary.written,
            unchanged = summary.unchanged,
            failed = summary.failed,
            malformed = summary.malformed,
            "end of stream"
        );
        summary
    }
}
