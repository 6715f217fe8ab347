//! Backup artifact metadata and payload encoding.

use crate::driver::BackendFamily;
use crate::error::Result;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Serialization of a backup payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFormat {
    /// JSON encoded snapshot.
    #[default]
    Json,
}

impl BackupFormat {
    /// File extension of a payload in this format.
    pub fn extension(&self, compressed: bool) -> &'static str {
        match (self, compressed) {
            (BackupFormat::Json, false) => "json",
            (BackupFormat::Json, true) => "json.gz",
        }
    }
}

/// Metadata of a stored backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Connection the backup was taken from.
    pub connection_id: String,
    /// Family of the source backend.
    pub family: BackendFamily,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Size of the stored payload in bytes.
    pub size_bytes: u64,
    /// Payload serialization.
    pub format: BackupFormat,
    /// Whether the payload is gzip compressed.
    pub compressed: bool,
    /// Tables in the backup.
    pub tables: Vec<String>,
    /// Total number of records.
    pub record_count: u64,
    /// Hex SHA-256 of the stored payload.
    pub checksum: String,
    /// Object store location of the payload.
    pub location: String,
}

/// Hex SHA-256 digest of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Gzip `data`.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Gunzip `data`.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
