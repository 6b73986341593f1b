//!  Blob operations for file storage.
//!
//! Each stored file is a single blob. This module writes and reads raw blob
//! bytes and produces the base64 transfer form the contents endpoint hands
//! out, wrapped into lines the same way remote forges do.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::host::error::HostResult;
use crate::host::types::BlobId;

/// line width of base64 payloads returned by the contents endpoint
pub const TRANSFER_LINE_WIDTH: usize = 60;

/// write raw bytes as a blob to the repository
///
/// returns the blob ID (SHA-1 hash of the content); writing the same bytes
/// twice yields the same ID and stores the object once
pub fn write_blob(repo: &git2::Repository, content: &[u8]) -> HostResult<BlobId> {
    let oid = repo.blob(content)?;
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> HostResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}

/// metadata about a blob without copying its content
#[derive(Debug, Clone, Copy)]
pub struct BlobMetadata {
    pub id: BlobId,
    pub size: u64,
}

impl BlobMetadata {
    /// get the metadata for a blob
    pub fn from_blob(blob: &git2::Blob<'_>) -> Self {
        Self {
            id: BlobId::new(blob.id()),
            size: blob.size() as u64,
        }
    }
}

/// base64-encode `content`, breaking the output into fixed-width lines
pub fn encode_for_transfer(content: &[u8]) -> String {
    let encoded = STANDARD.encode(content);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / TRANSFER_LINE_WIDTH + 1);
    for (i, chunk) in encoded.as_bytes().chunks(TRANSFER_LINE_WIDTH).enumerate() {
        if i > 0 {
            wrapped.push('\n');
        }
        // base64 output is pure ASCII
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    wrapped.push('\n');
    wrapped
}
