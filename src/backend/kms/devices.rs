//! DRM device access and discovery.
//!
//! [`KmsDevice`] is the narrow set of kernel calls the pipeline needs. It is implemented for
//! smithay's [`DrmDeviceFd`]; the rest of the backend only talks to the trait.
//!
//! [`resolve_device`] picks the device to drive:
//! - an explicit path is opened and must expose mode-setting resources,
//! - otherwise the primary nodes of the seat are tried in order and the first usable one wins.

use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr;

use smithay::backend::drm::{DrmDeviceFd, DrmNode, NodeType};
use smithay::backend::udev;
use smithay::reexports::drm::control::atomic::AtomicModeReq;
use smithay::reexports::drm::control::{
    self, connector, encoder, framebuffer, plane, property, Device as ControlDevice, FbCmd2Flags,
    ResourceHandles,
};
use smithay::reexports::drm::{ClientCapability, Device as BasicDevice};
use smithay::reexports::rustix::fs::{self as rfs, Mode as FileMode, OFlags};
use smithay::utils::DeviceFd;
use tracing::{debug, info, warn};

use super::buffers::FramebufferRequest;
use super::commit::CommitTransaction;
use super::error::{KmsError, KmsResult};
use super::types::{ConnectorInfo, EncoderInfo, KmsObject, PlaneInfo, Resources};

// =============================================================================
// KmsDevice
// =============================================================================

/// Kernel mode-setting calls used by the pipeline.
///
/// Clones refer to the same open device.
pub trait KmsDevice: Clone {
    fn enable_capability(&self, cap: ClientCapability) -> io::Result<()>;

    fn resources(&self) -> io::Result<Resources>;
    fn connector_info(&self, connector: connector::Handle) -> io::Result<ConnectorInfo>;
    fn encoder_info(&self, encoder: encoder::Handle) -> io::Result<EncoderInfo>;
    fn plane_list(&self) -> io::Result<Vec<plane::Handle>>;
    fn plane_info(&self, plane: plane::Handle) -> io::Result<PlaneInfo>;

    /// Property ids and current values of `object`, in kernel order.
    fn object_properties(
        &self,
        object: KmsObject,
    ) -> io::Result<Vec<(property::Handle, property::RawValue)>>;
    fn property_name(&self, property: property::Handle) -> io::Result<String>;

    fn create_mode_blob(&self, mode: &control::Mode) -> io::Result<property::RawValue>;
    fn destroy_blob(&self, blob: property::RawValue) -> io::Result<()>;

    fn add_framebuffer(
        &self,
        request: &FramebufferRequest,
        with_modifiers: bool,
    ) -> io::Result<framebuffer::Handle>;
    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()>;

    /// Submits `txn`. Returns the out-fence the kernel wrote if one was requested.
    fn commit(&self, txn: &CommitTransaction) -> io::Result<Option<OwnedFd>>;
}

pub(super) fn format_connector_name(connector: &connector::Info) -> String {
    format!("{}-{}", connector.interface().as_str(), connector.interface_id())
}

/// Converts a kernel CRTC filter into a bitmask over `resources.crtcs()`.
fn crtc_mask(resources: &ResourceHandles, filter: control::CrtcListFilter) -> u32 {
    let allowed = resources.filter_crtcs(filter);
    resources
        .crtcs()
        .iter()
        .enumerate()
        .filter(|(_, crtc)| allowed.contains(crtc))
        .fold(0, |mask, (idx, _)| mask | (1 << idx))
}

impl KmsDevice for DrmDeviceFd {
    fn enable_capability(&self, cap: ClientCapability) -> io::Result<()> {
        BasicDevice::set_client_capability(self, cap, true)
    }

    fn resources(&self) -> io::Result<Resources> {
        let res = ControlDevice::resource_handles(self)?;
        Ok(Resources {
            connectors: res.connectors().to_vec(),
            encoders: res.encoders().to_vec(),
            crtcs: res.crtcs().to_vec(),
        })
    }

    fn connector_info(&self, connector: connector::Handle) -> io::Result<ConnectorInfo> {
        let info = ControlDevice::get_connector(self, connector, false)?;
        Ok(ConnectorInfo {
            handle: connector,
            name: format_connector_name(&info),
            state: info.state(),
            current_encoder: info.current_encoder(),
            encoders: info.encoders().to_vec(),
            modes: info.modes().to_vec(),
        })
    }

    fn encoder_info(&self, encoder: encoder::Handle) -> io::Result<EncoderInfo> {
        let info = ControlDevice::get_encoder(self, encoder)?;
        let res = ControlDevice::resource_handles(self)?;
        Ok(EncoderInfo {
            handle: encoder,
            crtc: info.crtc(),
            possible_crtcs: crtc_mask(&res, info.possible_crtcs()),
        })
    }

    fn plane_list(&self) -> io::Result<Vec<plane::Handle>> {
        ControlDevice::plane_handles(self)
    }

    fn plane_info(&self, plane: plane::Handle) -> io::Result<PlaneInfo> {
        let info = ControlDevice::get_plane(self, plane)?;
        let res = ControlDevice::resource_handles(self)?;
        Ok(PlaneInfo {
            handle: plane,
            possible_crtcs: crtc_mask(&res, info.possible_crtcs()),
        })
    }

    fn object_properties(
        &self,
        object: KmsObject,
    ) -> io::Result<Vec<(property::Handle, property::RawValue)>> {
        let props = match object {
            KmsObject::Connector(handle) => ControlDevice::get_properties(self, handle)?,
            KmsObject::Crtc(handle) => ControlDevice::get_properties(self, handle)?,
            KmsObject::Plane(handle) => ControlDevice::get_properties(self, handle)?,
        };
        Ok(props.into_iter().collect())
    }

    fn property_name(&self, property: property::Handle) -> io::Result<String> {
        let info = ControlDevice::get_property(self, property)?;
        Ok(info.name().to_string_lossy().into_owned())
    }

    fn create_mode_blob(&self, mode: &control::Mode) -> io::Result<property::RawValue> {
        match ControlDevice::create_property_blob(self, mode)? {
            property::Value::Blob(id) => Ok(id),
            other => Err(io::Error::other(format!(
                "unexpected blob value: {other:?}"
            ))),
        }
    }

    fn destroy_blob(&self, blob: property::RawValue) -> io::Result<()> {
        ControlDevice::destroy_property_blob(self, blob)
    }

    fn add_framebuffer(
        &self,
        request: &FramebufferRequest,
        with_modifiers: bool,
    ) -> io::Result<framebuffer::Handle> {
        let flags = if with_modifiers {
            FbCmd2Flags::MODIFIERS
        } else {
            FbCmd2Flags::empty()
        };
        ControlDevice::add_planar_framebuffer(self, request, flags)
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        ControlDevice::destroy_framebuffer(self, fb)
    }

    fn commit(&self, txn: &CommitTransaction) -> io::Result<Option<OwnedFd>> {
        let mut req = AtomicModeReq::new();
        for assignment in txn.assignments() {
            let value = property::Value::Unknown(assignment.value);
            match assignment.object {
                KmsObject::Connector(handle) => req.add_property(handle, assignment.property, value),
                KmsObject::Crtc(handle) => req.add_property(handle, assignment.property, value),
                KmsObject::Plane(handle) => req.add_property(handle, assignment.property, value),
            }
        }

        // The kernel writes an s32 descriptor here once the commit is accepted.
        let mut out_fence: i32 = -1;
        if let Some((crtc, prop)) = txn.out_fence() {
            let ptr = ptr::addr_of_mut!(out_fence) as u64;
            req.add_property(crtc, prop, property::Value::UnsignedRange(ptr));
        }

        ControlDevice::atomic_commit(self, txn.flags(), req)?;

        if out_fence < 0 {
            return Ok(None);
        }
        // SAFETY: a successful commit hands us a freshly created sync_file descriptor.
        Ok(Some(unsafe { OwnedFd::from_raw_fd(out_fence) }))
    }
}

// =============================================================================
// Device Discovery
// =============================================================================

/// A device node found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub path: PathBuf,
    /// Whether the device has a primary (modesetting) node.
    pub has_primary_node: bool,
}

/// Lists and opens display devices.
pub trait DeviceOpener {
    type Device: KmsDevice;

    fn candidates(&self) -> io::Result<Vec<DeviceCandidate>>;
    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}

/// Opens DRM nodes directly and enumerates the GPUs of a seat through udev.
#[derive(Debug, Clone)]
pub struct UdevOpener {
    seat: String,
}

impl UdevOpener {
    pub fn new(seat: impl Into<String>) -> Self {
        Self { seat: seat.into() }
    }
}

impl Default for UdevOpener {
    fn default() -> Self {
        Self::new("seat0")
    }
}

impl DeviceOpener for UdevOpener {
    type Device = DrmDeviceFd;

    fn candidates(&self) -> io::Result<Vec<DeviceCandidate>> {
        let _span = tracy_client::span!("UdevOpener::candidates");

        let paths = udev::all_gpus(&self.seat)?;
        let candidates = paths
            .into_iter()
            .map(|path| {
                let primary = DrmNode::from_path(&path)
                    .ok()
                    .and_then(|node| node.node_with_type(NodeType::Primary))
                    .and_then(Result::ok)
                    .and_then(|node| node.dev_path());

                match primary {
                    Some(primary) => DeviceCandidate {
                        path: primary,
                        has_primary_node: true,
                    },
                    None => DeviceCandidate {
                        path,
                        has_primary_node: false,
                    },
                }
            })
            .collect();

        Ok(candidates)
    }

    fn open(&self, path: &Path) -> io::Result<DrmDeviceFd> {
        let _span = tracy_client::span!("UdevOpener::open");

        let flags = OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY;
        let fd = rfs::open(path, flags, FileMode::empty())?;
        Ok(DrmDeviceFd::new(DeviceFd::from(fd)))
    }
}

/// Opens the device to drive.
///
/// Devices that get rejected are dropped, closing their descriptor, before the next one is
/// tried.
pub fn resolve_device<O: DeviceOpener>(
    opener: &O,
    explicit_path: Option<&Path>,
) -> KmsResult<O::Device> {
    let _span = tracy_client::span!("resolve_device");

    if let Some(path) = explicit_path {
        let device = opener
            .open(path)
            .map_err(|source| KmsError::DeviceNotModesettable {
                path: path.to_owned(),
                source,
            })?;

        return match device.resources() {
            Ok(_) => {
                info!("using DRM device {path:?}");
                Ok(device)
            }
            Err(source) => {
                if source.raw_os_error() == Some(libc::EOPNOTSUPP) {
                    warn!("{path:?} does not look like a modeset device");
                }
                Err(KmsError::DeviceNotModesettable {
                    path: path.to_owned(),
                    source,
                })
            }
        };
    }

    let candidates = match opener.candidates() {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!("error enumerating DRM devices: {err:?}");
            return Err(KmsError::NoDeviceFound);
        }
    };

    for candidate in candidates {
        if !candidate.has_primary_node {
            debug!("{:?} has no primary node, skipping", candidate.path);
            continue;
        }

        let device = match opener.open(&candidate.path) {
            Ok(device) => device,
            Err(err) => {
                debug!("error opening {:?}: {err:?}", candidate.path);
                continue;
            }
        };

        match device.resources() {
            Ok(_) => {
                info!("using DRM device {:?}", candidate.path);
                return Ok(device);
            }
            Err(err) => {
                debug!("{:?} has no modesetting resources: {err:?}", candidate.path);
            }
        }
    }

    Err(KmsError::NoDeviceFound)
}
