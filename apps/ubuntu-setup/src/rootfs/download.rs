//! HTTP download of the rootfs archive with bounded retry.
//!
//! ## Retry Policy
//!
//! - At most [`DownloadPolicy::attempts`] attempts
//! - A fixed delay before every retry
//! - Each attempt streams into `<dest>.part` under its own request timeout
//! - Each completed transfer is verified; a verification failure counts as a
//!   failed attempt
//! - The partial file is removed after every failed attempt, and the verified
//!   file is renamed into place only on success

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::paths::partial_path;
use crate::config::DownloadPolicy;
use crate::errors::SetupError;

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

/// Downloads `url` to `dest`, retrying until `verify` accepts the file.
///
/// `verify` runs on a blocking thread against the partial file after every
/// completed transfer.
///
/// # Errors
///
/// Returns [`SetupError::DownloadFailed`] once every attempt has failed. No
/// partial or unverified file is left at `dest` in that case.
pub async fn download_verified<V>(
    url: &str,
    dest: &Path,
    policy: &DownloadPolicy,
    verify: V,
) -> Result<()>
where
    V: Fn(&Path) -> Result<(), SetupError> + Clone + Send + 'static,
{
    let partial = partial_path(dest);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    remove_if_exists(dest).await;

    let client = build_client(policy)?;
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        if attempt > 1 {
            println!("Retrying download (attempt {attempt}/{})...", policy.attempts);
            tokio::time::sleep(policy.retry_delay).await;
        }
        remove_if_exists(&partial).await;

        match attempt_once(&client, url, &partial, verify.clone()).await {
            Ok(()) => {
                tokio::fs::rename(&partial, dest).await.with_context(|| {
                    format!(
                        "Failed to rename {} to {}",
                        partial.display(),
                        dest.display()
                    )
                })?;
                debug!(attempt, "download verified");
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %format!("{e:#}"), "download attempt failed");
                eprintln!("Attempt {attempt}/{} failed: {e:#}", policy.attempts);
                remove_if_exists(&partial).await;
                last_error = Some(e);
            }
        }
    }

    Err(SetupError::DownloadFailed {
        attempts: policy.attempts,
        last_error: last_error.map_or_else(|| "no attempts made".to_string(), |e| format!("{e:#}")),
    }
    .into())
}

/// Fetches a small text document in a single attempt.
///
/// # Errors
///
/// Returns an error if the request fails or the server does not answer 2xx.
pub async fn fetch_text(url: &str, policy: &DownloadPolicy) -> Result<String> {
    let response = build_client(policy)?
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    if !response.status().is_success() {
        bail!("HTTP error {}: {url}", response.status());
    }

    response
        .text()
        .await
        .with_context(|| format!("Failed to read response from {url}"))
}

fn build_client(policy: &DownloadPolicy) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(policy.request_timeout)
        .connect_timeout(policy.connect_timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// One transfer followed by verification.
async fn attempt_once<V>(client: &reqwest::Client, url: &str, partial: &Path, verify: V) -> Result<()>
where
    V: Fn(&Path) -> Result<(), SetupError> + Send + 'static,
{
    transfer(client, url, partial).await?;

    let target: PathBuf = partial.to_path_buf();
    tokio::task::spawn_blocking(move || verify(&target))
        .await
        .context("Verification task panicked")??;
    Ok(())
}

/// Streams the response body into `dest`, returning the byte count.
async fn transfer(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    if !response.status().is_success() {
        bail!("HTTP error {}: {url}", response.status());
    }

    let expected = response.content_length();
    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create file: {}", dest.display()))?;
    let mut progress = Progress::new(expected);
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.with_context(|| format!("Connection lost while reading {url}"))?;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        progress.advance(chunk.len());
    }
    file.flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;
    progress.finish();

    match expected {
        Some(total) if total != progress.received => {
            bail!("Transfer incomplete: received {} of {total} bytes", progress.received)
        }
        _ => Ok(progress.received),
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed stale file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}

/// Single progress line on stdout, redrawn at most every [`REDRAW_INTERVAL`].
struct Progress {
    total: Option<u64>,
    received: u64,
    started: Instant,
    last_draw: Option<Instant>,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total,
            received: 0,
            started: Instant::now(),
            last_draw: None,
        }
    }

    fn advance(&mut self, bytes: usize) {
        self.received += bytes as u64;
        if self
            .last_draw
            .is_none_or(|at| at.elapsed() >= REDRAW_INTERVAL)
        {
            self.draw();
        }
    }

    fn finish(&mut self) {
        self.draw();
        println!();
    }

    fn draw(&mut self) {
        let line = progress_line(self.received, self.total, self.started.elapsed());
        print!("\r{line}");
        let _ = std::io::stdout().flush();
        self.last_draw = Some(Instant::now());
    }
}

/// Renders `  12.0 / 28.5 MiB  42%  1.5 MiB/s`, or without the total and
/// percentage when the server sent no length.
#[allow(clippy::cast_precision_loss)]
fn progress_line(received: u64, total: Option<u64>, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { mib(received) / secs } else { 0.0 };

    match total.filter(|t| *t > 0) {
        Some(total) => format!(
            "  {:.1} / {:.1} MiB  {:>3}%  {rate:.1} MiB/s",
            mib(received),
            mib(total),
            received.saturating_mul(100) / total
        ),
        None => format!("  {:.1} MiB  {rate:.1} MiB/s", mib(received)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write as _};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> DownloadPolicy {
        DownloadPolicy {
            attempts: 3,
            retry_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Serves `body` to every request on a local port and counts the hits.
    fn serve(body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/rootfs.tar.gz", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(body);
            }
        });

        (url, hits)
    }

    fn accept_all(_: &Path) -> Result<(), SetupError> {
        Ok(())
    }

    #[tokio::test]
    async fn verified_download_lands_at_destination() {
        let temp = assert_fs::TempDir::new().unwrap();
        let dest = temp.path().join("rootfs.tar.gz");
        let (url, hits) = serve(b"rootfs bytes");

        download_verified(&url, &dest, &fast_policy(), accept_all)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"rootfs bytes");
        assert!(!partial_path(&dest).exists());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn verification_failure_is_retried_then_fatal() {
        let temp = assert_fs::TempDir::new().unwrap();
        let dest = temp.path().join("rootfs.tar.gz");
        let (url, hits) = serve(b"tiny");

        let err = download_verified(&url, &dest, &fast_policy(), |path: &Path| {
            crate::rootfs::verify::check_size(path, 1024).map(|_| ())
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::DownloadFailed { attempts: 3, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn exhausted_retries_leave_no_partial_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let dest = temp.path().join("rootfs.tar.gz");
        std::fs::write(&dest, b"stale").unwrap();

        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/rootfs.tar.gz");

        let err = download_verified(&url, &dest, &fast_policy(), accept_all)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("after 3 attempts"));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let temp = assert_fs::TempDir::new().unwrap();
        let dest = temp.path().join("rootfs.tar.gz");
        let (url, hits) = serve(b"payload");
        let verifications = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&verifications);

        download_verified(&url, &dest, &fast_policy(), move |_: &Path| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SetupError::verification("gzip", "corrupt"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        assert!(dest.exists());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(verifications.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_text_returns_body() {
        let (url, _) = serve(b"abc  ubuntu-base.tar.gz\n");
        let text = fetch_text(&url, &fast_policy()).await.unwrap();
        assert!(text.contains("ubuntu-base.tar.gz"));
    }

    #[test]
    fn progress_line_with_known_length() {
        let line = progress_line(12 * 1024 * 1024, Some(24 * 1024 * 1024), Duration::from_secs(4));
        assert_eq!(line, "  12.0 / 24.0 MiB   50%  3.0 MiB/s");
    }

    #[test]
    fn progress_line_without_length() {
        let line = progress_line(512 * 1024, None, Duration::ZERO);
        assert_eq!(line, "  0.5 MiB  0.0 MiB/s");
    }
}
