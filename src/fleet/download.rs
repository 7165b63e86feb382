use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{FleetError, FleetResult};

use super::Progress;

/// Minimum advance, in percent, between two progress reports.
const PROGRESS_STEP: u64 = 5;

/// A body that delivers nothing for this long is abandoned.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Download `url` to `dest` without ever exposing a partial file at `dest`.
///
/// The body is streamed into `<dest>.tmp`, its length checked against
/// `Content-Length` when the server sent one, and only then renamed over
/// `dest`. Any failure removes the temporary file.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &Progress,
) -> FleetResult<()> {
    download_with_stall_timeout(client, url, dest, progress, STALL_TIMEOUT).await
}

pub(crate) async fn download_with_stall_timeout(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &Progress,
    stall: Duration,
) -> FleetResult<()> {
    let fail = |reason: String| FleetError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(format!("creating {}: {e}", parent.display())))?;
    }

    debug!(%url, dest = %dest.display(), "downloading");
    let resp = match tokio::time::timeout(stall, client.get(url).send()).await {
        Ok(sent) => sent.map_err(|e| fail(e.to_string()))?,
        Err(_) => return Err(fail(format!("no response within {}s", stall.as_secs_f32()))),
    };
    let status = resp.status();
    if !status.is_success() {
        return Err(fail(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string()));
    }

    let total = resp.content_length().filter(|len| *len > 0);
    let tmp = tmp_path(dest);

    let result = stream_to(resp, &tmp, total, progress, stall).await;
    let finished = match result {
        Ok(()) => tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| format!("failed to finalize download: {e}")),
        Err(reason) => Err(reason),
    };

    if let Err(reason) = finished {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(fail(reason));
    }
    Ok(())
}

async fn stream_to(
    resp: reqwest::Response,
    tmp: &Path,
    total: Option<u64>,
    progress: &Progress,
    stall: Duration,
) -> Result<(), String> {
    let mut out = tokio::fs::File::create(tmp)
        .await
        .map_err(|e| format!("creating {}: {e}", tmp.display()))?;

    let mut downloaded: u64 = 0;
    let mut last_pct: u64 = 0;
    let mut stream = resp.bytes_stream();

    loop {
        let chunk = match tokio::time::timeout(stall, stream.next()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(_) => {
                return Err(format!(
                    "download stalled after {downloaded} bytes ({}s without data)",
                    stall.as_secs_f32()
                ))
            }
        };
        let chunk = chunk.map_err(|e| format!("read failed: {e}"))?;
        out.write_all(&chunk)
            .await
            .map_err(|e| format!("write failed: {e}"))?;
        downloaded += chunk.len() as u64;

        if let Some(total) = total {
            let pct = downloaded.saturating_mul(100) / total;
            if pct >= last_pct + PROGRESS_STEP || (pct == 100 && last_pct != 100) {
                progress(&format!(
                    "{pct}% ({} / {})",
                    format_bytes(downloaded),
                    format_bytes(total)
                ));
                last_pct = pct;
            }
        }
    }

    out.flush().await.map_err(|e| format!("write failed: {e}"))?;
    out.sync_all()
        .await
        .map_err(|e| format!("write failed: {e}"))?;
    drop(out);

    match total {
        Some(total) if downloaded != total => Err(format!(
            "incomplete download: got {downloaded} bytes, expected {total}"
        )),
        _ => Ok(()),
    }
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Human-readable byte count in binary units (`1.5 MB` = 1.5 × 1024²).
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {suffix}B", bytes as f64 / div as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        (lines, move |line: &str| sink.lock().unwrap().push(line.to_string()))
    }

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn completes_and_reports_progress() {
        let body = vec![7u8; 256 * 1024];
        let served = body.clone();
        let base = serve(Router::new().route("/bin", get(move || async move { served }))).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("svc/bin");
        let (lines, sink) = recorder();
        download_file(&reqwest::Client::new(), &format!("{base}/bin"), &dest, &sink)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!tmp_path(&dest).exists());
        let lines = lines.lock().unwrap();
        assert_eq!(lines.last().unwrap(), "100% (256.0 KB / 256.0 KB)");
    }

    #[tokio::test]
    async fn http_error_leaves_existing_file() {
        let base = serve(Router::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bin");
        std::fs::write(&dest, "old").unwrap();

        let err = download_file(&reqwest::Client::new(), &format!("{base}/missing"), &dest, &|_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old");
        assert!(!tmp_path(&dest).exists());
    }

    #[tokio::test]
    async fn truncated_body_never_reaches_destination() {
        // Advertise more bytes than are sent, then close the connection.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\npartial")
                .await
                .unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bin");
        std::fs::write(&dest, "old").unwrap();
        let err = download_file(&reqwest::Client::new(), &format!("http://{addr}/bin"), &dest, &|_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::DownloadFailed { .. }));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old");
        assert!(!tmp_path(&dest).exists());
    }

    #[tokio::test]
    async fn stalled_body_is_abandoned() {
        // Headers and a few bytes, then silence with the connection held open.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npart")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bin");
        let started = std::time::Instant::now();
        let err = download_with_stall_timeout(
            &reqwest::Client::new(),
            &format!("http://{addr}/bin"),
            &dest,
            &|_| {},
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("stalled"), "{err}");
        assert!(!dest.exists());
        assert!(!tmp_path(&dest).exists());
    }
}
