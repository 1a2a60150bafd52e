// src/fetch/mod.rs

use futures_util::StreamExt;
use reqwest::Client;
use std::{path::Path, time::Duration, time::Instant};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, instrument};

use crate::{
    error::TransferError,
    retry::{retry, RetryPolicy},
};

/// HTTP client with connect and whole-request timeouts.
pub fn build_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
}

/// GET `url` and stream the body into `dest`, chunk by chunk. The status is
/// checked before `dest` is touched; once the body starts, `dest` is truncated
/// and rewritten. Returns the number of bytes written.
pub async fn download_to_file(
    client: &Client,
    url: &str,
    dest: &Path,
) -> Result<u64, TransferError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|source| TransferError::Connection {
            url: url.to_string(),
            source,
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(TransferError::Status {
            url: url.to_string(),
            status,
        });
    }

    let sink_err = |source: std::io::Error| TransferError::Sink {
        path: dest.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(dest).await.map_err(sink_err)?;
    let mut stream = resp.bytes_stream();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| TransferError::Connection {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(sink_err)?;
        total += chunk.len() as u64;
    }

    file.flush().await.map_err(sink_err)?;
    file.sync_all().await.map_err(sink_err)?;
    Ok(total)
}

/// [`download_to_file`] under `policy`. Every attempt rewrites `dest` from the
/// start, so a half-written file from a failed attempt is never reused.
#[instrument(level = "info", skip(client, policy, dest), fields(dest = %dest.display()))]
pub async fn fetch(
    client: &Client,
    url: &str,
    dest: &Path,
    policy: RetryPolicy,
) -> Result<u64, TransferError> {
    let start = Instant::now();
    let bytes = retry(policy, "download", move |attempt| {
        debug!(attempt, "downloading");
        download_to_file(client, url, dest)
    })
    .await?;
    info!(bytes, elapsed = ?start.elapsed(), "downloaded");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;
    use tokio::{io::AsyncReadExt, net::TcpListener};

    /// Serve `body` with status 200 to every connection.
    async fn serve(body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/feed.csv.gz")
    }

    fn client() -> Client {
        build_client(Duration::from_secs(5), Duration::from_secs(10)).unwrap()
    }

    #[tokio::test]
    async fn test_download_writes_body() {
        let url = serve(b"payload").await;
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("feed.csv.gz");

        let n = download_to_file(&client(), &url, &dest).await.unwrap();
        assert_eq!(n, 7);
        assert_eq!(stdfs::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_unopenable_sink() {
        let url = serve(b"payload").await;
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        stdfs::write(&blocker, "x").unwrap();
        let dest = blocker.join("feed.csv.gz");

        let err = fetch(&client(), &url, &dest, RetryPolicy::immediate(2))
            .await
            .unwrap_err();
        match err {
            TransferError::Sink { path, .. } => assert_eq!(path, dest),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dest.exists());
        assert_eq!(stdfs::read_to_string(&blocker).unwrap(), "x");
    }
}
