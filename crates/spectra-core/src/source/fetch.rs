//! Raw byte fetching for audio sources

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SourceError;

/// Fetches the raw bytes behind a source string
///
/// Runs on tokio's blocking pool, so implementations may block.
pub trait ByteFetcher: Send + Sync {
    fn fetch(&self, src: &str) -> Result<Arc<[u8]>, SourceError>;
}

/// Default fetcher: HTTP(S) via ureq, everything else from disk
pub struct SourceFetcher {
    agent: ureq::Agent,
}

impl SourceFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn fetch_http(&self, url: &str) -> Result<Arc<[u8]>, SourceError> {
        log::info!("Fetching audio from {}", url);

        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(status, _) => SourceError::HttpStatus {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(t) => SourceError::Http {
                url: url.to_string(),
                message: t.to_string(),
            },
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| SourceError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        log::debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.into())
    }

    fn fetch_file(&self, path: &Path) -> Result<Arc<[u8]>, SourceError> {
        log::info!("Reading audio from {:?}", path);
        let bytes = std::fs::read(path).map_err(|e| SourceError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(bytes.into())
    }
}

impl Default for SourceFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ByteFetcher for SourceFetcher {
    fn fetch(&self, src: &str) -> Result<Arc<[u8]>, SourceError> {
        if is_remote(src) {
            self.fetch_http(src)
        } else {
            self.fetch_file(&local_path(src))
        }
    }
}

fn is_remote(src: &str) -> bool {
    let lower = src.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn local_path(src: &str) -> PathBuf {
    PathBuf::from(src.strip_prefix("file://").unwrap_or(src))
}

/// File extension of a source, used as a probe hint for the decoder
///
/// Query strings and fragments are ignored, so
/// `https://host/a/track.mp3?token=x` yields `mp3`.
pub fn extension_hint(src: &str) -> Option<String> {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extension_hint() {
        assert_eq!(extension_hint("song.WAV"), Some("wav".to_string()));
        assert_eq!(
            extension_hint("https://cdn.example.com/a/b/track.mp3?sig=abc#t=1"),
            Some("mp3".to_string())
        );
        assert_eq!(extension_hint("/tmp/no_extension"), None);
        assert_eq!(extension_hint("/tmp/.hidden"), None);
    }

    #[test]
    fn test_fetch_local_file_and_file_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"RIFFdata").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let fetcher = SourceFetcher::default();
        assert_eq!(&*fetcher.fetch(&path).unwrap(), b"RIFFdata");
        assert_eq!(&*fetcher.fetch(&format!("file://{}", path)).unwrap(), b"RIFFdata");
    }

    #[test]
    fn test_fetch_missing_file_is_error() {
        let err = SourceFetcher::default()
            .fetch("/definitely/not/here.wav")
            .unwrap_err();
        assert!(matches!(err, SourceError::FileRead { .. }));
    }

    #[test]
    fn test_remote_detection() {
        assert!(is_remote("HTTPS://example.com/x.ogg"));
        assert!(!is_remote("file:///tmp/x.ogg"));
        assert!(!is_remote("relative/x.ogg"));
    }
}
