use std::path::Path;

use stitch_bundler::BundleRequest;
use tokio::io::AsyncReadExt;

use crate::error::{CliError, Result};

/// Read and parse a request file, or stdin for `-`.
pub async fn read_request(path: &Path) -> Result<BundleRequest> {
    let (source_name, raw) = if path == Path::new("-") {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        ("<stdin>".to_string(), raw)
    } else {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CliError::RequestNotFound(path.to_path_buf())
            } else {
                CliError::Io(e)
            }
        })?;
        (path.display().to_string(), raw)
    };

    let request: BundleRequest =
        serde_json::from_str(&raw).map_err(|source| CliError::InvalidRequest {
            source_name,
            source,
        })?;
    request.entrypoint()?;
    Ok(request)
}
