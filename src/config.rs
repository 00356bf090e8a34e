//! Configuration types for the player

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Immutable per-run configuration, supplied at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// URL of the play page (or a direct SRS play API URL)
    pub page_url: String,

    /// Stream name override; resolved from the page URL when None
    pub stream_name: Option<String>,

    /// Play duration and connection timeout in seconds (0 = unbounded)
    pub timeout_secs: u64,

    /// Open a preview window
    pub display: bool,

    /// Record the stream to an MP4 file
    pub record: bool,

    /// Recording output path
    pub output_path: PathBuf,

    /// ICE configuration
    pub ice: IceConfig,
}

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            page_url: String::new(),
            stream_name: None,
            timeout_secs: 30,
            display: false,
            record: false,
            output_path: PathBuf::from("output.mp4"),
            ice: IceConfig::default(),
        }
    }
}

impl RunConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.page_url.is_empty() {
            return Err(Error::InvalidConfig("page URL must not be empty".to_string()));
        }

        if !self.page_url.starts_with("http://") && !self.page_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "page URL must be http(s): {}",
                self.page_url
            )));
        }

        if self.record && self.output_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "recording enabled but output path is empty".to_string(),
            ));
        }

        Ok(())
    }
}
