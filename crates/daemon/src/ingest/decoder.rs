use std::io::{BufRead, BufReader, Read};

use serde::de::IgnoredAny;

use super::IngestRecord;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to read record stream: {0}")]
    Io(#[from] std::io::Error),
    /// The bytes are not a MessagePack value; the stream cannot continue
    #[error("record stream is corrupt: {0}")]
    Corrupt(rmp_serde::decode::Error),
    /// A well-formed value that is not a record; the stream continues
    #[error("malformed record: {0}")]
    Malformed(rmp_serde::decode::Error),
}

impl DecodeError {
    /// Whether decoding can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::Malformed(_))
    }
}

/// Copies everything read through it, so one value's exact bytes can be
///  decoded a second time
struct Capture<'a, R> {
    inner: &'a mut R,
    bytes: Vec<u8>,
}

impl<R: Read> Read for Capture<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// Decode the next record, or `None` at a clean end of stream
pub fn next_record<R: BufRead>(reader: &mut R) -> Result<Option<IngestRecord>, DecodeError> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }

    // skip over one whole value first so a bad record never desyncs us
    let mut capture = Capture {
        inner: reader,
        bytes: Vec::new(),
    };
    rmp_serde::from_read::<_, IgnoredAny>(&mut capture).map_err(|e| match e {
        rmp_serde::decode::Error::InvalidMarkerRead(io)
        | rmp_serde::decode::Error::InvalidDataRead(io) => DecodeError::Io(io),
        other => DecodeError::Corrupt(other),
    })?;

    rmp_serde::from_slice(&capture.bytes)
        .map(Some)
        .map_err(DecodeError::Malformed)
}

/// Decode records from a blocking reader on a blocking thread
///
/// Records arrive on the returned channel in stream order. Malformed
/// records are delivered as errors and decoding continues; any other
/// error is delivered and ends the stream. Decoding stops early if the
/// receiver is dropped.
pub fn spawn_decoder<R>(reader: R, capacity: usize) -> flume::Receiver<Result<IngestRecord, DecodeError>>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = flume::bounded(capacity);
    tokio::task::spawn_blocking(move || {
        let mut reader = BufReader::new(reader);
        loop {
            let item = match next_record(&mut reader) {
                Ok(Some(record)) => Ok(record),
                Ok(None) => break,
                Err(e) => Err(e),
            };
            let fatal = matches!(&item, Err(e) if !e.is_recoverable());
            if sender.send(item).is_err() {
                tracing::debug!("record receiver dropped, stopping decoder");
                return;
            }
            if fatal {
                break;
            }
        }
        tracing::debug!("record stream ended");
    });
    receiver
}
