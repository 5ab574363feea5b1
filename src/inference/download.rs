//! Remote model fetch
//!
//! Downloads a GGUF file from a model hub into the local cache, reporting
//! cumulative progress as bytes arrive.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::inference::engine::EngineError;
use crate::inference::model::validate_gguf;
use crate::inference::options::ModelSource;
use crate::inference::progress::{ProgressSink, StopSignal};

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

/// Fetches model files into a cache directory
#[derive(Debug, Clone)]
pub struct ModelFetcher {
    client: reqwest::Client,
    endpoint: String,
    cache_dir: PathBuf,
}

impl ModelFetcher {
    pub fn new(endpoint: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download URL for a model file
    pub fn url_for(&self, source: &ModelSource) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            self.endpoint, source.repo_id, source.file_name
        )
    }

    /// Local path the model file is cached at
    pub fn cache_path(&self, source: &ModelSource) -> PathBuf {
        let repo_dir = source
            .repo_id
            .split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .collect::<Vec<_>>()
            .join("--");
        let file_name = Path::new(&source.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model.gguf".to_string());
        self.cache_dir.join(repo_dir).join(file_name)
    }

    /// Makes sure the model is on disk and returns its path.
    ///
    /// A cached file with a valid header is reused without touching the
    /// network and reported as a single complete progress update.
    pub async fn fetch(
        &self,
        source: &ModelSource,
        progress: &ProgressSink,
        stop: &StopSignal,
    ) -> Result<PathBuf, EngineError> {
        let dest = self.cache_path(source);

        if let Some(size) = cached_size(&dest) {
            tracing::info!("Using cached model {}", dest.display());
            progress.report(size, size);
            return Ok(dest);
        }

        if stop.is_stopped() {
            return Err(EngineError::Cancelled);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let url = self.url_for(source);
        tracing::info!("Downloading model from {}", url);

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::Download(e.to_string()))?;

        let total = response.content_length().unwrap_or(0);
        let part = part_path(&dest);

        let result = match write_body(&mut response, &part, total, progress, stop).await {
            Ok(loaded) => tokio::fs::rename(&part, &dest)
                .await
                .map(|_| loaded)
                .map_err(io_error),
            Err(e) => Err(e),
        };

        match result {
            Ok(loaded) => {
                tracing::info!("Downloaded {} bytes to {}", loaded, dest.display());
                Ok(dest)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

/// Streams the response body into `part`, returning the byte count.
///
/// The file is closed on return, whatever the outcome.
async fn write_body(
    response: &mut reqwest::Response,
    part: &Path,
    total: u64,
    progress: &ProgressSink,
    stop: &StopSignal,
) -> Result<u64, EngineError> {
    let mut file = tokio::fs::File::create(part).await.map_err(io_error)?;
    let mut loaded = 0u64;
    progress.report(loaded, total);

    loop {
        if stop.is_stopped() {
            tracing::info!("Model download cancelled at {} bytes", loaded);
            return Err(EngineError::Cancelled);
        }

        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => return Err(EngineError::Download(e.to_string())),
        };

        file.write_all(&chunk).await.map_err(io_error)?;
        loaded += chunk.len() as u64;
        progress.report(loaded, total);
    }

    file.flush().await.map_err(io_error)?;
    Ok(loaded)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn cached_size(path: &Path) -> Option<u64> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    match validate_gguf(path) {
        Ok(_) => Some(metadata.len()),
        Err(e) => {
            tracing::warn!("Ignoring cached model {}: {}", path.display(), e);
            None
        }
    }
}

fn io_error(e: std::io::Error) -> EngineError {
    EngineError::Io(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::model::header_bytes;
    use crate::inference::progress::{LoadEvent, LoadProgress};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const WITH_LENGTH: &str = "HTTP/1.1 200 OK\r\nContent-Length: 64\r\nConnection: close\r\n\r\n";
    const WITHOUT_LENGTH: &str = "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n";

    /// Serves one request with `head`, then writes `chunks` with a pause
    /// between each and closes the connection.
    async fn serve_once(head: &'static str, chunks: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            socket.write_all(head.as_bytes()).await.unwrap();
            for chunk in chunks {
                if socket.write_all(&chunk).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}")
    }

    fn body_chunks() -> Vec<Vec<u8>> {
        let mut body = header_bytes(3, 4, 2);
        body.extend_from_slice(&[0u8; 40]);
        body.chunks(16).map(|c| c.to_vec()).collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LoadEvent>) -> Vec<(u64, u64)> {
        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LoadEvent::Progress(LoadProgress { loaded, total }) = event {
                steps.push((loaded, total));
            }
        }
        steps
    }

    fn source() -> ModelSource {
        ModelSource::new("owner/tiny-GGUF", "tiny.Q2_K.gguf")
    }

    #[test]
    fn test_url_for() {
        let fetcher = ModelFetcher::new("https://huggingface.co/", "/tmp/models");
        assert_eq!(
            fetcher.url_for(&source()),
            "https://huggingface.co/owner/tiny-GGUF/resolve/main/tiny.Q2_K.gguf"
        );
    }

    #[test]
    fn test_cache_path_flattens_repo() {
        let fetcher = ModelFetcher::new(DEFAULT_HUB_ENDPOINT, "/cache");
        assert_eq!(
            fetcher.cache_path(&source()),
            PathBuf::from("/cache/owner--tiny-GGUF/tiny.Q2_K.gguf")
        );

        let sneaky = ModelSource::new("../../etc", "../passwd");
        assert_eq!(
            fetcher.cache_path(&sneaky),
            PathBuf::from("/cache/etc/passwd")
        );
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/cache/a/m.gguf")),
            PathBuf::from("/cache/a/m.gguf.part")
        );
    }

    #[tokio::test]
    async fn test_cached_model_skips_download() {
        let dir = TempDir::new().unwrap();
        // Unroutable endpoint: any network access would fail the test
        let fetcher = ModelFetcher::new("http://127.0.0.1:9", dir.path());
        let dest = fetcher.cache_path(&source());
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        let mut bytes = header_bytes(3, 4, 2);
        bytes.extend_from_slice(&[0u8; 40]);
        std::fs::write(&dest, &bytes).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let path = fetcher
            .fetch(&source(), &ProgressSink::new(tx), &StopSignal::new())
            .await
            .unwrap();

        assert_eq!(path, dest);
        match rx.recv().await {
            Some(LoadEvent::Progress(LoadProgress { loaded, total })) => {
                assert_eq!(loaded, 64);
                assert_eq!(total, 64);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_before_download() {
        let dir = TempDir::new().unwrap();
        let fetcher = ModelFetcher::new("http://127.0.0.1:9", dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();
        let stop = StopSignal::new();
        stop.stop();

        let result = fetcher.fetch(&source(), &ProgressSink::new(tx), &stop).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let dir = TempDir::new().unwrap();
        let fetcher = ModelFetcher::new("http://127.0.0.1:9", dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = fetcher
            .fetch(&source(), &ProgressSink::new(tx), &StopSignal::new())
            .await;
        assert!(matches!(result, Err(EngineError::Download(_))));
        assert!(!part_path(&fetcher.cache_path(&source())).exists());
    }

    #[tokio::test]
    async fn test_download_reports_cumulative_progress() {
        let dir = TempDir::new().unwrap();
        let endpoint = serve_once(WITH_LENGTH, body_chunks()).await;
        let fetcher = ModelFetcher::new(endpoint, dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let path = fetcher
            .fetch(&source(), &ProgressSink::new(tx), &StopSignal::new())
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
        assert!(validate_gguf(&path).is_ok());
        assert!(!part_path(&path).exists());

        let steps = drain(&mut rx);
        assert_eq!(steps.first(), Some(&(0, 64)));
        assert_eq!(steps.last(), Some(&(64, 64)));
        assert!(steps.iter().all(|(_, total)| *total == 64));
        assert!(steps.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[tokio::test]
    async fn test_download_without_content_length() {
        let dir = TempDir::new().unwrap();
        let endpoint = serve_once(WITHOUT_LENGTH, body_chunks()).await;
        let fetcher = ModelFetcher::new(endpoint, dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let path = fetcher
            .fetch(&source(), &ProgressSink::new(tx), &StopSignal::new())
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
        let steps = drain(&mut rx);
        assert_eq!(steps.last(), Some(&(64, 0)));
        assert!(steps.iter().all(|(_, total)| *total == 0));
    }

    #[tokio::test]
    async fn test_stop_mid_download() {
        let dir = TempDir::new().unwrap();
        let endpoint = serve_once(WITH_LENGTH, body_chunks()).await;
        let fetcher = ModelFetcher::new(endpoint, dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop = StopSignal::new();

        let watcher_stop = stop.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let LoadEvent::Progress(LoadProgress { loaded, .. }) = event {
                    if loaded > 0 {
                        watcher_stop.stop();
                    }
                }
            }
        });

        let result = fetcher.fetch(&source(), &ProgressSink::new(tx), &stop).await;
        assert_eq!(result, Err(EngineError::Cancelled));

        let dest = fetcher.cache_path(&source());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let dir = TempDir::new().unwrap();
        let mut chunks = body_chunks();
        chunks.truncate(1);
        let endpoint = serve_once(WITH_LENGTH, chunks).await;
        let fetcher = ModelFetcher::new(endpoint, dir.path());
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = fetcher
            .fetch(&source(), &ProgressSink::new(tx), &StopSignal::new())
            .await;
        assert!(matches!(result, Err(EngineError::Download(_))));

        let dest = fetcher.cache_path(&source());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_part() {
        let dir = TempDir::new().unwrap();
        let endpoint = serve_once(WITH_LENGTH, body_chunks()).await;
        let fetcher = ModelFetcher::new(endpoint, dir.path());

        // A non-empty directory squatting on the destination blocks the rename
        let dest = fetcher.cache_path(&source());
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("occupied"), "x").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fetcher
            .fetch(&source(), &ProgressSink::new(tx), &StopSignal::new())
            .await;
        assert!(matches!(result, Err(EngineError::Io(_))));
        assert!(!part_path(&dest).exists());
    }
}
