//! Type definitions for the KMS backend.
//!
//! This module contains the plain descriptors exchanged with a [`KmsDevice`], the selected
//! output topology and the constants used by the present loop.
//!
//! [`KmsDevice`]: super::devices::KmsDevice

use std::fmt;

use smithay::backend::allocator::{Fourcc, Modifier};
use smithay::reexports::drm::control::{self, connector, crtc, encoder, plane};

// =============================================================================
// Constants
// =============================================================================

/// Number of buffers in the surfaceless scanout ring.
pub const SURFACELESS_BUFFERS: usize = 2;

/// Interval between throughput reports.
pub const REPORT_INTERVAL_SECS: u64 = 2;

// =============================================================================
// KMS Objects
// =============================================================================

/// A KMS object that carries atomic properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KmsObject {
    Connector(connector::Handle),
    Crtc(crtc::Handle),
    Plane(plane::Handle),
}

impl KmsObject {
    pub fn id(self) -> u32 {
        match self {
            KmsObject::Connector(handle) => handle.into(),
            KmsObject::Crtc(handle) => handle.into(),
            KmsObject::Plane(handle) => handle.into(),
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            KmsObject::Connector(_) => "connector",
            KmsObject::Crtc(_) => "crtc",
            KmsObject::Plane(_) => "plane",
        }
    }
}

impl fmt::Display for KmsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

// =============================================================================
// Device Descriptors
// =============================================================================

/// Mode-setting resources of a device, in kernel order.
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub connectors: Vec<connector::Handle>,
    pub encoders: Vec<encoder::Handle>,
    pub crtcs: Vec<crtc::Handle>,
}

#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub handle: connector::Handle,
    pub name: String,
    pub state: connector::State,
    pub current_encoder: Option<encoder::Handle>,
    pub encoders: Vec<encoder::Handle>,
    pub modes: Vec<control::Mode>,
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderInfo {
    pub handle: encoder::Handle,
    pub crtc: Option<crtc::Handle>,
    /// Bit `i` is set when the CRTC at index `i` of [`Resources::crtcs`] can be driven.
    pub possible_crtcs: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaneInfo {
    pub handle: plane::Handle,
    /// Same layout as [`EncoderInfo::possible_crtcs`].
    pub possible_crtcs: u32,
}

// =============================================================================
// Output Topology
// =============================================================================

/// The display path chosen at setup. Never changes afterwards.
#[derive(Debug, Clone)]
pub struct Topology {
    pub connector: connector::Handle,
    pub connector_name: String,
    pub mode: control::Mode,
    pub crtc: crtc::Handle,
    /// Position of `crtc` in [`Resources::crtcs`].
    pub crtc_index: usize,
    pub encoder: Option<encoder::Handle>,
    pub plane: plane::Handle,
}

impl Topology {
    pub fn mode_size(&self) -> (u32, u32) {
        let (w, h) = self.mode.size();
        (u32::from(w), u32::from(h))
    }
}

// =============================================================================
// Options
// =============================================================================

/// Setup parameters, resolved from the config file and the command line.
#[derive(Debug, Clone)]
pub struct KmsOptions {
    pub mode: Option<String>,
    /// Required vertical refresh for `mode`. Zero matches any refresh.
    pub refresh: u32,
    pub format: Fourcc,
    pub modifier: Modifier,
    pub surfaceless: bool,
}

impl Default for KmsOptions {
    fn default() -> Self {
        Self {
            mode: None,
            refresh: 0,
            format: Fourcc::Xrgb8888,
            modifier: Modifier::Linear,
            surfaceless: true,
        }
    }
}
