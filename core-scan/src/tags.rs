//! Tag reading.
//!
//! Turns an audio file into a [`TrackBundle`] using `lofty`. Reading is
//! behind a trait so the scan pipeline can be driven with a test double.

use crate::error::{Result, ScanError};
use async_trait::async_trait;
use core_collection::TrackBundle;
use lofty::config::ParseOptions;
use lofty::file::AudioFile;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::path::Path;
use tracing::debug;

/// Reads one file's tags into a bundle.
#[async_trait]
pub trait TagReader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<TrackBundle>;
}

/// [`TagReader`] backed by `lofty`. Supports ID3v2, Vorbis Comments, MP4
/// tags, FLAC and the other common formats.
pub struct LoftyTagReader {
    parse_options: ParseOptions,
}

impl LoftyTagReader {
    pub fn new() -> Self {
        Self {
            parse_options: ParseOptions::new(),
        }
    }
}

impl Default for LoftyTagReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TagReader for LoftyTagReader {
    async fn read(&self, path: &Path) -> Result<TrackBundle> {
        debug!(path = %path.display(), "Reading tags");

        let data = tokio::fs::read(path).await?;
        let tagged_file = Probe::new(std::io::Cursor::new(&data))
            .options(self.parse_options)
            .guess_file_type()
            .map_err(|e| ScanError::TagRead(format!("failed to probe file: {e}")))?
            .read()
            .map_err(|e| ScanError::TagRead(format!("failed to parse file: {e}")))?;

        let properties = tagged_file.properties();
        let mut bundle = TrackBundle::new(path.to_string_lossy().to_string());
        bundle.length_secs = Some(properties.duration().as_secs());
        bundle.bitrate = properties.audio_bitrate();
        bundle.sample_rate = properties.sample_rate();

        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
        if let Some(tag) = tag {
            bundle.title = tag.title().map(|s| s.trim().to_string()).unwrap_or_default();
            bundle.artist = tag.artist().map(|s| s.trim().to_string()).unwrap_or_default();
            bundle.album = tag.album().map(|s| s.trim().to_string()).unwrap_or_default();
            bundle.genre = tag.genre().map(|s| s.trim().to_string()).unwrap_or_default();
            bundle.comment = tag.comment().map(|s| s.trim().to_string()).unwrap_or_default();
            bundle.year = tag.year().map(|y| y.to_string()).unwrap_or_default();
            bundle.track_number = tag.track();
        }

        // An untagged file still enters the index, titled by its filename.
        if bundle.title.is_empty() {
            bundle.title = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Unknown")
                .to_string();
        }

        Ok(bundle)
    }
}
