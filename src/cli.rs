use std::path::{Path, PathBuf};

use anyhow::anyhow;
use clap::Parser;
use directories::ProjectDirs;
use kmsflip_config::{Config, ModifierConfig};
use smithay::backend::allocator::{Fourcc, Modifier};
use tracing::debug;

use crate::backend::kms::{parse_fourcc, KmsOptions};

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/kmsflip/config.kdl`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Primary DRM node to drive, e.g. `/dev/dri/card0`.
    #[arg(short, long)]
    pub device: Option<PathBuf>,
    /// Mode name as listed by the connector, e.g. `1920x1080`.
    #[arg(short, long)]
    pub mode: Option<String>,
    /// Vertical refresh the requested mode must have.
    #[arg(short, long, requires = "mode")]
    pub refresh: Option<u32>,
    /// Four-character code of the scanout format, e.g. `XR24`.
    #[arg(short, long)]
    pub format: Option<String>,
    /// Buffer modifier: `linear`, `invalid` or a number.
    #[arg(long)]
    pub modifier: Option<ModifierConfig>,
    /// Present from a renderer surface instead of a private buffer ring.
    #[arg(long)]
    pub surfaced: bool,
    /// Stop after this many frames.
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,
}

/// Everything needed to start presenting, with command line flags taking precedence over the
/// config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub device: Option<PathBuf>,
    pub options: KmsOptions,
    pub frames: Option<u64>,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        let (mode, refresh) = match (&cli.mode, &config.mode) {
            (Some(name), _) => (Some(name.clone()), cli.refresh.unwrap_or(0)),
            (None, Some(mode)) => (Some(mode.name.clone()), mode.refresh.unwrap_or(0)),
            (None, None) => (None, 0),
        };

        let format = match cli.format.as_deref().or(config.format.as_deref()) {
            Some(code) => parse_fourcc(code)?,
            None => Fourcc::Xrgb8888,
        };

        let modifier = cli.modifier.or(config.modifier).unwrap_or_default();

        Ok(Self {
            device: cli
                .device
                .clone()
                .or_else(|| config.device.as_ref().map(PathBuf::from)),
            options: KmsOptions {
                mode,
                refresh,
                format,
                modifier: Modifier::from(modifier.to_raw()),
                surfaceless: !(cli.surfaced || config.surfaced),
            },
            frames: cli.frames.or(config.frames),
        })
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "kmsflip")?;
    Some(dirs.config_dir().join("config.kdl"))
}

/// Loads the config at `path`, or at the default location.
///
/// A missing file at the default location is not an error.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.to_owned(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("no config file, using defaults");
                return Ok(Config::default());
            }
        },
    };

    Config::load(&path).map_err(|err| anyhow!("{err:?}"))
}
