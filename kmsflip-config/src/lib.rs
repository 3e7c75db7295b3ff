//! Configuration file for kmsflip.
//!
//! The file is KDL. Every node is optional:
//!
//! ```kdl
//! device "/dev/dri/card0"
//! mode "1920x1080" refresh=60
//! format "XR24"
//! modifier "linear"
//! surfaced
//! frames 600
//! ```

#[macro_use]
extern crate tracing;

use std::ffi::OsStr;
use std::path::Path;

use knuffel::errors::DecodeError;
use miette::{Context, IntoDiagnostic};

#[derive(knuffel::Decode, Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Primary DRM node to open. Devices are enumerated when unset.
    #[knuffel(child, unwrap(argument))]
    pub device: Option<String>,
    #[knuffel(child)]
    pub mode: Option<ModeConfig>,
    /// Four-character code of the scanout format, e.g. `XR24`.
    #[knuffel(child, unwrap(argument))]
    pub format: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub modifier: Option<ModifierConfig>,
    /// Present from a renderer-owned surface instead of a private buffer ring.
    #[knuffel(child)]
    pub surfaced: bool,
    /// Stop after this many frames.
    #[knuffel(child, unwrap(argument))]
    pub frames: Option<u64>,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ModeConfig {
    /// Mode name as reported by the connector, e.g. `1920x1080`.
    #[knuffel(argument)]
    pub name: String,
    /// Exact vertical refresh in Hz. Any refresh matches when unset.
    #[knuffel(property)]
    pub refresh: Option<u32>,
}

/// Buffer layout modifier requested for scanout buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModifierConfig {
    #[default]
    Linear,
    Invalid,
    Value(u64),
}

impl ModifierConfig {
    pub fn to_raw(self) -> u64 {
        match self {
            ModifierConfig::Linear => 0,
            ModifierConfig::Invalid => 0x00ff_ffff_ffff_ffff,
            ModifierConfig::Value(value) => value,
        }
    }
}

impl std::str::FromStr for ModifierConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("linear") {
            return Ok(Self::Linear);
        }
        if s.eq_ignore_ascii_case("invalid") {
            return Ok(Self::Invalid);
        }

        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else {
            s.parse()
        };

        match value {
            Ok(0) => Ok(Self::Linear),
            Ok(value) => Ok(Self::Value(value)),
            Err(_) => Err(format!(
                "invalid modifier `{s}`, expected `linear`, `invalid` or a number"
            )),
        }
    }
}

impl<S: knuffel::traits::ErrorSpan> knuffel::DecodeScalar<S> for ModifierConfig {
    fn type_check(
        type_name: &Option<knuffel::span::Spanned<knuffel::ast::TypeName, S>>,
        ctx: &mut knuffel::decode::Context<S>,
    ) {
        if let Some(type_name) = &type_name {
            ctx.emit_error(DecodeError::unexpected(
                type_name,
                "type name",
                "no type name expected for this node",
            ));
        }
    }

    fn raw_decode(
        val: &knuffel::span::Spanned<knuffel::ast::Literal, S>,
        ctx: &mut knuffel::decode::Context<S>,
    ) -> Result<ModifierConfig, DecodeError<S>> {
        match &**val {
            knuffel::ast::Literal::String(ref s) => match s.parse() {
                Ok(modifier) => Ok(modifier),
                Err(err) => {
                    ctx.emit_error(DecodeError::conversion(val, err));
                    Ok(ModifierConfig::default())
                }
            },
            _ => {
                ctx.emit_error(DecodeError::unsupported(
                    val,
                    "modifier must be a string",
                ));
                Ok(ModifierConfig::default())
            }
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let _span = tracy_client::span!("Config::load");

        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let filename = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("config.kdl");
        let config = Self::parse(filename, &contents).context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        let _span = tracy_client::span!("Config::parse");
        knuffel::parse(filename, text)
    }
}
