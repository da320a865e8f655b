use std::path::Path;

use serde::ser;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::AppResult;

/// Serialize an object to pretty JSON and write it to `output`, or to stdout.
#[tracing::instrument(name = "Writing JSON output", level = "debug", skip(obj))]
pub async fn write_json_output<P: AsRef<Path> + std::fmt::Debug, S: ser::Serialize>(
    output: Option<P>,
    obj: &S,
) -> AppResult<()> {
    let mut data = serde_json::to_string_pretty(obj)?;
    data.push('\n');
    match output {
        Some(path) => write_file(path, data).await,
        None => write_all(&mut tokio::io::stdout(), data).await,
    }
}

/// Write raw string data to a file, overwriting any existing content.
async fn write_file<P: AsRef<Path> + std::fmt::Debug>(output: P, data: String) -> AppResult<()> {
    if let Some(parent) = output.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .await?;
    write_all(&mut file, data).await
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, data: String) -> AppResult<()> {
    writer.write_all(data.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
