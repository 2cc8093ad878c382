//! Feed download. Streams to disk with a size cap; the filename extension
//! comes from the `Content-Disposition` header when the upstream sends one.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{DataSet, ImportError};

/// Maximum allowed download size (500 MB).
const MAX_DOWNLOAD_SIZE: u64 = 500 * 1024 * 1024;

pub async fn download_to_file(
    client: &reqwest::Client,
    dataset: &DataSet,
    work_dir: &str,
) -> Result<PathBuf, ImportError> {
    tokio::fs::create_dir_all(work_dir).await?;

    let mut request = client.get(&dataset.source);
    if let Some(user_agent) = &dataset.user_agent {
        request = request.header(reqwest::header::USER_AGENT, user_agent);
    }

    let response = request
        .timeout(std::time::Duration::from_secs(600))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(ImportError::NetworkMessage(format!(
            "{} returned HTTP {}",
            dataset.source,
            response.status()
        )));
    }

    if let Some(content_length) = response.content_length() {
        if content_length > MAX_DOWNLOAD_SIZE {
            return Err(ImportError::NetworkMessage(format!(
                "download too large: {content_length} bytes (max {MAX_DOWNLOAD_SIZE})"
            )));
        }
    }

    let extension = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(extension_from_content_disposition)
        .or_else(|| extension_from_source(&dataset.source))
        .unwrap_or_else(|| "dat".to_string());

    let target = Path::new(work_dir).join(format!("{}.{}", dataset.identifier, extension));

    let mut total_bytes: u64 = 0;
    let mut file = tokio::fs::File::create(&target).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total_bytes += chunk.len() as u64;
        if total_bytes > MAX_DOWNLOAD_SIZE {
            drop(file);
            let _ = tokio::fs::remove_file(&target).await;
            return Err(ImportError::NetworkMessage(format!(
                "download exceeded size limit at {total_bytes} bytes"
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    info!(
        dataset = %dataset.identifier,
        size_kb = total_bytes / 1024,
        path = %target.display(),
        "Downloaded dataset source"
    );
    Ok(target)
}

/// Pull a file extension out of `Content-Disposition: attachment; filename="x.zip"`.
fn extension_from_content_disposition(header: &str) -> Option<String> {
    let filename = header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?
        .trim_matches('"');
    extension_of(filename)
}

fn extension_from_source(source: &str) -> Option<String> {
    // Strip any query string before looking at the path.
    let path = source.split(['?', '#']).next().unwrap_or(source);
    extension_of(path)
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_string())
}
