use std::io;
use std::path::PathBuf;

use smithay::backend::allocator::{Fourcc, Modifier};
use smithay::reexports::drm::control::{connector, crtc};

use super::types::KmsObject;

/// Errors raised while setting up or driving the display pipeline.
#[derive(Debug, thiserror::Error)]
pub enum KmsError {
    #[error("{path:?} does not look like a modesetting device")]
    DeviceNotModesettable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no modesetting-capable DRM device found")]
    NoDeviceFound,

    #[error("no atomic modesetting support")]
    AtomicUnsupported(#[source] io::Error),

    #[error("no connected display")]
    NoConnectedDisplay,

    #[error("connector {} reports no modes", u32::from(*.0))]
    NoModeAvailable(connector::Handle),

    #[error("no CRTC reachable from connector {}", u32::from(*.0))]
    NoCrtcAvailable(connector::Handle),

    #[error("no plane can be bound to crtc {} (index {index})", u32::from(*.crtc))]
    NoSuitablePlane { crtc: crtc::Handle, index: usize },

    #[error("error getting properties of {object}")]
    PropertyQueryFailed {
        object: KmsObject,
        #[source]
        source: io::Error,
    },

    #[error("{object} has no {name} property")]
    MissingProperty {
        object: KmsObject,
        name: &'static str,
    },

    #[error("modifier {modifier:?} is not supported for {format:?}")]
    ModifierUnsupported {
        format: Fourcc,
        modifier: Modifier,
        #[source]
        source: io::Error,
    },

    #[error("error allocating {width}x{height} {format:?} buffer")]
    BufferAllocationFailed {
        width: u32,
        height: u32,
        format: Fourcc,
        #[source]
        source: io::Error,
    },

    #[error("no free front buffer")]
    FrontBufferUnavailable(#[source] io::Error),

    #[error("error creating framebuffer")]
    FramebufferCreateFailed(#[source] io::Error),

    #[error("error creating mode blob")]
    ModeBlobFailed(#[source] io::Error),

    #[error("atomic commit rejected (errno {})", .0.raw_os_error().unwrap_or(0))]
    CommitRejected(#[source] io::Error),

    #[error("native fences unsupported: {0}")]
    FenceUnsupported(&'static str),

    #[error("error waiting for fence")]
    FenceWait(#[source] io::Error),

    #[error("error rendering frame: {0:#}")]
    RenderFailed(anyhow::Error),
}

impl KmsError {
    /// Whether the error only affects the current frame.
    ///
    /// The present loop drops the frame and carries on for these; anything else ends it.
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            KmsError::FrontBufferUnavailable(_)
                | KmsError::FramebufferCreateFailed(_)
                | KmsError::ModeBlobFailed(_)
                | KmsError::CommitRejected(_)
                | KmsError::RenderFailed(_)
        )
    }
}

pub type KmsResult<T> = Result<T, KmsError>;
