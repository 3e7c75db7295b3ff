//! Pure helper functions for the KMS backend.
//!
//! Nothing in here talks to a device.

use anyhow::{anyhow, ensure};
use smithay::backend::allocator::Fourcc;
use smithay::reexports::drm::control::{self, ModeTypeFlags};
use tracing::warn;

// =============================================================================
// Mode Selection
// =============================================================================

fn mode_area(mode: &control::Mode) -> u32 {
    let (w, h) = mode.size();
    u32::from(w) * u32::from(h)
}

fn mode_matches(mode: &control::Mode, name: &str, refresh: u32) -> bool {
    mode.name().to_bytes() == name.as_bytes() && (refresh == 0 || mode.vrefresh() == refresh)
}

/// Pick the mode to drive a connector with.
///
/// In order of preference:
/// - the mode called `name` (with vertical refresh `refresh`, unless zero),
/// - the first mode flagged as preferred,
/// - the largest mode by area, the earliest one on ties.
///
/// The returned flag is set when a named mode was asked for but not found.
pub fn pick_mode(
    modes: &[control::Mode],
    name: Option<&str>,
    refresh: u32,
) -> Option<(control::Mode, bool)> {
    let mut fallback = false;

    if let Some(name) = name {
        if let Some(mode) = modes.iter().find(|m| mode_matches(m, name, refresh)) {
            return Some((*mode, false));
        }

        warn!("requested mode {name} (refresh {refresh}) not found, using default mode");
        fallback = true;
    }

    if let Some(mode) = modes
        .iter()
        .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
    {
        return Some((*mode, fallback));
    }

    let mut best: Option<&control::Mode> = None;
    for mode in modes {
        if best.map_or(true, |best| mode_area(mode) > mode_area(best)) {
            best = Some(mode);
        }
    }

    best.map(|mode| (*mode, fallback))
}

// =============================================================================
// Format Parsing
// =============================================================================

/// Parse a four-character DRM format code such as `XR24`.
pub fn parse_fourcc(code: &str) -> anyhow::Result<Fourcc> {
    let bytes: [u8; 4] = code
        .as_bytes()
        .try_into()
        .map_err(|_| anyhow!("format {code:?} is not a four-character code"))?;
    ensure!(
        bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' '),
        "format {code:?} is not a four-character code"
    );

    Fourcc::try_from(u32::from_le_bytes(bytes)).map_err(|_| anyhow!("unknown format {code:?}"))
}

// =============================================================================
// Tests
// =============================================================================
