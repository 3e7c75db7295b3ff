use std::env;
use std::io;
use std::os::fd::AsFd;
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::Parser;
use kmsflip::backend::gles::GlesFrameRenderer;
use kmsflip::backend::kms::{poll_readable, resolve_device, BlockingWait, Kms, UdevOpener};
use kmsflip::cli::{load_config, Cli, Settings};
use smithay::reexports::gbm::Device as GbmDevice;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "kmsflip=debug,kmsflip_config=debug";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    #[cfg(feature = "profile-with-tracy")]
    tracy_client::Client::start();

    let cli = Cli::parse();
    run(&cli)?;
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let settings = Settings::resolve(cli, &config)?;
    ensure!(
        settings.options.surfaceless,
        "surfaced presentation needs a renderer that draws into a GBM surface, \
         the GLES renderer only draws into surfaceless buffers"
    );

    let device = resolve_device(&UdevOpener::default(), settings.device.as_deref())?;
    let gbm = GbmDevice::new(device.clone()).context("error creating GBM device")?;

    let mut kms = Kms::new(device, &gbm, &settings.options)?;
    let mut renderer = GlesFrameRenderer::new(&gbm, kms.mode_size())?;

    info!("press Enter to stop");
    let stdin = io::stdin();
    let interrupted = || match poll_readable(stdin.as_fd(), Some(Duration::ZERO)) {
        Ok(ready) => ready,
        Err(err) => {
            warn!("error polling stdin: {err:?}");
            false
        }
    };

    let presented = kms.run(&mut renderer, &mut BlockingWait, settings.frames, interrupted)?;
    info!("presented {presented} frames");

    Ok(())
}
