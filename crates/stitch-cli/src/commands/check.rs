use stitch_bundler::BundlerConfig;
use tracing::info;

use super::read_request;
use crate::cli::CheckArgs;
use crate::error::Result;

/// Load and validate configuration, then the request when one is given.
pub async fn check_execute(args: CheckArgs) -> Result<()> {
    let config = BundlerConfig::load(args.config.as_deref())?;
    info!(
        cdn = %config.cdn.base_url,
        extensions = ?config.resolve.extensions,
        "configuration is valid"
    );

    if let Some(path) = &args.request {
        let request = read_request(path).await?;
        info!(
            entrypoint = request.entrypoint()?,
            files = request.files.len(),
            "request is valid"
        );
    }

    println!("ok");
    Ok(())
}
