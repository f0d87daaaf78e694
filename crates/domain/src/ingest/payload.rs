use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;

use super::entity::{CanonicalFlow, IngestBatchRef, RecordFormat};
use super::error::IngestError;

/// Serialized batch ready for the wire.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub body: Vec<u8>,
    pub gzipped: bool,
    pub record_count: usize,
    /// Size before compression.
    pub raw_len: usize,
}

/// Size limits applied when encoding.
#[derive(Debug, Clone, Copy)]
pub struct PayloadLimits {
    /// Compress when the JSON body is larger than this.
    pub gzip_threshold: usize,
    /// Hard cap on what goes on the wire.
    pub max_payload: usize,
}

/// Serialize, gzip above the threshold, and enforce the size cap.
///
/// `PayloadTooLarge` means the caller must split the batch; retrying the
/// same records will never fit.
pub fn encode_batch(
    collector_id: &str,
    records: &[CanonicalFlow],
    limits: PayloadLimits,
) -> Result<EncodedBatch, IngestError> {
    let batch = IngestBatchRef {
        collector_id,
        format: RecordFormat::Canonical,
        records,
    };
    let raw = serde_json::to_vec(&batch).map_err(|e| IngestError::Encoding(e.to_string()))?;
    let raw_len = raw.len();

    let (body, gzipped) = if raw_len > limits.gzip_threshold {
        (gzip(&raw)?, true)
    } else {
        (raw, false)
    };

    if body.len() > limits.max_payload {
        return Err(IngestError::PayloadTooLarge {
            size: body.len(),
            limit: limits.max_payload,
            records: records.len(),
        });
    }

    Ok(EncodedBatch {
        body,
        gzipped,
        record_count: records.len(),
        raw_len,
    })
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| IngestError::Encoding(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| IngestError::Encoding(e.to_string()))
}

/// Decompress a gzip body, refusing to inflate past `limit` bytes.
pub fn gunzip(data: &[u8], limit: usize) -> Result<Vec<u8>, IngestError> {
    use std::io::Read;

    let decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    let read = decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| IngestError::Encoding(e.to_string()))?;
    if read > limit {
        return Err(IngestError::PayloadTooLarge {
            size: read,
            limit,
            records: 0,
        });
    }
    Ok(out)
}
