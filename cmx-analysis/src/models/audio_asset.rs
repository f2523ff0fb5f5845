//! Inbound audio asset
//!
//! The upload collaborator has already enforced file-size and format
//! allow-listing; an `AudioAsset` is the encoded byte stream plus the metadata
//! it declared.

use crate::error::{AnalysisError, AnalysisResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Supported container/codec families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    Aac,
}

impl AudioFormat {
    /// Extension passed to the decoder's format detection
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Aac => "m4a",
        }
    }

    /// Infer format from a file path's extension
    pub fn from_path(path: &Path) -> AnalysisResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                AnalysisError::UnsupportedFormat(format!(
                    "no extension on {}",
                    path.display()
                ))
            })?;
        ext.parse()
    }
}

impl FromStr for AudioFormat {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "wav" | "wave" => Ok(AudioFormat::Wav),
            "flac" => Ok(AudioFormat::Flac),
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" | "oga" | "vorbis" => Ok(AudioFormat::Ogg),
            "aac" | "m4a" | "mp4" => Ok(AudioFormat::Aac),
            other => Err(AnalysisError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Metadata declared alongside the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub format: AudioFormat,
    /// Declared duration in seconds
    pub duration_secs: f64,
    /// Declared native sample rate in Hz
    pub sample_rate: u32,
    pub channels: u16,
}

/// Immutable encoded audio plus declared metadata
#[derive(Debug, Clone)]
pub struct AudioAsset {
    bytes: Arc<[u8]>,
    metadata: AssetMetadata,
}

impl AudioAsset {
    pub fn new(bytes: impl Into<Arc<[u8]>>, metadata: AssetMetadata) -> Self {
        Self {
            bytes: bytes.into(),
            metadata,
        }
    }

    /// Read a file from disk, inferring format from its extension and
    /// probing the container for duration, sample rate and channel count
    pub fn from_file(path: &Path) -> AnalysisResult<Self> {
        let format = AudioFormat::from_path(path)?;
        let bytes: Arc<[u8]> = std::fs::read(path)
            .map_err(|e| {
                AnalysisError::PipelineTransient(format!("read {}: {}", path.display(), e))
            })?
            .into();
        let metadata = crate::services::audio_decoder::read_metadata(&bytes, format)?;
        Ok(Self { bytes, metadata })
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn metadata(&self) -> &AssetMetadata {
        &self.metadata
    }

    pub fn format(&self) -> AudioFormat {
        self.metadata.format
    }

    /// Content fingerprint: lowercase hex SHA-256 of the encoded bytes
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        format!("{:x}", digest)
    }
}
