//! Raw-byte content fingerprints in the `sha256:<hex>` form.
//!
//! The digest only depends on the bytes, never on parsed content, so any
//! byte-level edit (including metadata-only edits) changes it.

use crate::error::ExtractError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const HASH_PREFIX: &str = "sha256:";

/// Read size used when hashing from a file handle.
pub const CHUNK_SIZE: usize = 4096;

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{HASH_PREFIX}{:x}", hasher.finalize())
}

pub fn hash_reader<R: Read>(reader: R) -> Result<String, ExtractError> {
    hash_reader_chunked(reader, CHUNK_SIZE)
}

pub(crate) fn hash_reader_chunked<R: Read>(
    mut reader: R,
    chunk_size: usize,
) -> Result<String, ExtractError> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error.into()),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{HASH_PREFIX}{:x}", hasher.finalize()))
}

pub fn hash_file(path: &Path) -> Result<String, ExtractError> {
    let file = File::open(path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => ExtractError::NotFound(path.to_path_buf()),
        _ => ExtractError::Io(error),
    })?;
    hash_reader(file)
}
