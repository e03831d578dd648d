use std::io::Write;
use std::time::Instant;

use stitch_bundler::{Bundle, BundlerConfig, BundlerService};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::read_request;
use crate::cli::BundleArgs;
use crate::error::{CliError, Result};

/// Bundle one request file.
pub async fn bundle_execute(args: BundleArgs, root: CancellationToken) -> Result<()> {
    let config = BundlerConfig::load(args.config.as_deref())?;
    let mut request = read_request(&args.request).await?;

    for (name, value) in &args.env {
        request.env.insert(name.clone(), value.clone());
    }
    if args.no_minify {
        request.options.minify = Some(false);
    }
    if args.no_sourcemap {
        request.options.sourcemap = Some(false);
    }
    if args.no_splitting {
        request.options.splitting = Some(false);
    }

    let service = BundlerService::new(config, root)?;
    let started = Instant::now();
    let result = service.bundle(request).await;
    service.dispose().await;
    let bundle = result?;

    for warning in &bundle.warnings {
        warn!(kind = %warning.kind, "{}", warning.message);
    }
    info!(
        files = bundle.output_files.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "bundled"
    );

    if let Some(dir) = &args.out_dir {
        let written = bundle.write_to_dir(dir)?;
        for path in &written {
            info!(path = %path.display(), "wrote");
        }
    }

    let mut stdout = std::io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &bundle)?;
        writeln!(stdout)?;
    } else if args.out_dir.is_none() {
        print_summary(&mut stdout, &bundle)
            .map_err(|e| CliError::Output(format!("stdout: {e}")))?;
    }
    Ok(())
}

fn print_summary(out: &mut impl Write, bundle: &Bundle) -> std::io::Result<()> {
    for file in &bundle.output_files {
        writeln!(out, "{}\t{} bytes", file.path, file.content.len())?;
    }
    if !bundle.warnings.is_empty() {
        writeln!(out, "{} warning(s)", bundle.warnings.len())?;
    }
    Ok(())
}
