//! Streaming configuration

use std::path::{Path, PathBuf};

use crate::core::error::{Result, StreamError};

/// Default streaming-buffer reservation (bytes).
const DEFAULT_STREAMING_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Engine-level settings for the animation streaming system.
///
/// Loaded from JSON alongside the rest of the engine config, or built in
/// code for tests and tools.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct StreamingSettings {
    /// Root of the packaged game data.
    pub data_dir: PathBuf,
    /// Actor pak folder suffix; stream files live in `animstream<N>/`.
    pub actor_pak_folder: u32,
    /// Disc builds treat i/o failures as fatal; non-disc builds fall back
    /// to the permanently resident first chunk and retry.
    pub on_disc: bool,
    /// Total bytes reserved for the streaming block buffer.
    pub streaming_buffer_size: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            actor_pak_folder: 0,
            on_disc: false,
            streaming_buffer_size: DEFAULT_STREAMING_BUFFER_SIZE,
        }
    }
}

impl StreamingSettings {
    /// Load settings from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| StreamError::Config(e.to_string()))
    }

    /// Full path of a stream file: `<data_dir>/animstream<N>/<name>.stm`.
    pub fn stream_file_path(&self, stream_name: &str) -> PathBuf {
        self.data_dir
            .join(format!("animstream{}", self.actor_pak_folder))
            .join(format!("{stream_name}.stm"))
    }
}
