//! Output topology selection.
//!
//! Walks the device graph to find a connected connector, its mode, a CRTC one of its encoders
//! can drive, and a plane that can be bound to that CRTC.

use smithay::reexports::drm::control::{connector, crtc, encoder, plane, PlaneType};
use tracing::{debug, info, warn};

use super::devices::KmsDevice;
use super::error::{KmsError, KmsResult};
use super::helpers::pick_mode;
use super::properties::PropertyTable;
use super::types::{ConnectorInfo, KmsObject, Resources, Topology};

/// Selects the display path for `device`.
///
/// Planes are only enumerated once universal planes are enabled, so this must run after the
/// client capabilities are set.
pub fn select_output<D: KmsDevice>(
    device: &D,
    mode_name: Option<&str>,
    refresh: u32,
) -> KmsResult<Topology> {
    let _span = tracy_client::span!("select_output");

    let resources = device.resources().map_err(|err| {
        warn!("error getting resources: {err:?}");
        KmsError::NoConnectedDisplay
    })?;

    let connector = find_connector(device, &resources)?;
    debug!("using connector {}", connector.name);

    let (mode, fallback) =
        pick_mode(&connector.modes, mode_name, refresh).ok_or(KmsError::NoModeAvailable(
            connector.handle,
        ))?;
    if fallback {
        debug!("fell back to the default mode of {}", connector.name);
    }

    let (crtc, crtc_index, encoder) = find_crtc(device, &resources, &connector)?;
    let plane = find_plane(device, crtc, crtc_index)?;

    info!(
        "{}: mode {}x{}@{}, crtc {:?} (index {crtc_index}), plane {:?}",
        connector.name,
        mode.size().0,
        mode.size().1,
        mode.vrefresh(),
        crtc,
        plane,
    );

    Ok(Topology {
        connector: connector.handle,
        connector_name: connector.name,
        mode,
        crtc,
        crtc_index,
        encoder,
        plane,
    })
}

/// First connector reporting a connected display.
pub(super) fn find_connector<D: KmsDevice>(
    device: &D,
    resources: &Resources,
) -> KmsResult<ConnectorInfo> {
    for &handle in &resources.connectors {
        match device.connector_info(handle) {
            Ok(info) if info.state == connector::State::Connected => return Ok(info),
            Ok(_) => (),
            Err(err) => warn!("error getting connector {handle:?}: {err:?}"),
        }
    }

    Err(KmsError::NoConnectedDisplay)
}

/// Index of `crtc` in the device CRTC list.
pub(super) fn crtc_index(resources: &Resources, crtc: crtc::Handle) -> Option<usize> {
    resources.crtcs.iter().position(|&c| c == crtc)
}

/// CRTC to drive `connector` with, its index and the encoder in between.
///
/// The CRTC already bound to the current encoder is kept. Otherwise the encoders are tried in
/// order, each with the lowest CRTC index it can drive.
pub(super) fn find_crtc<D: KmsDevice>(
    device: &D,
    resources: &Resources,
    connector: &ConnectorInfo,
) -> KmsResult<(crtc::Handle, usize, Option<encoder::Handle>)> {
    if let Some(handle) = connector.current_encoder {
        match device.encoder_info(handle) {
            Ok(encoder) => {
                if let Some(crtc) = encoder.crtc {
                    if let Some(idx) = crtc_index(resources, crtc) {
                        return Ok((crtc, idx, Some(handle)));
                    }
                    warn!("current crtc {crtc:?} is not in the resource list");
                }
            }
            Err(err) => warn!("error getting encoder {handle:?}: {err:?}"),
        }
    }

    for &handle in &connector.encoders {
        let encoder = match device.encoder_info(handle) {
            Ok(encoder) => encoder,
            Err(err) => {
                warn!("error getting encoder {handle:?}: {err:?}");
                continue;
            }
        };

        let found = resources
            .crtcs
            .iter()
            .enumerate()
            .find(|(idx, _)| *idx < 32 && encoder.possible_crtcs & (1 << idx) != 0);
        if let Some((idx, &crtc)) = found {
            return Ok((crtc, idx, Some(handle)));
        }
    }

    Err(KmsError::NoCrtcAvailable(connector.handle))
}

/// Plane to scan out from on the CRTC at `crtc_index`.
///
/// The first compatible plane is kept unless a compatible primary plane turns up.
pub(super) fn find_plane<D: KmsDevice>(
    device: &D,
    crtc: crtc::Handle,
    crtc_index: usize,
) -> KmsResult<plane::Handle> {
    let planes = device.plane_list().map_err(|err| {
        warn!("error getting plane handles: {err:?}");
        KmsError::NoSuitablePlane {
            crtc,
            index: crtc_index,
        }
    })?;

    let mut candidate = None;
    for handle in planes {
        let info = match device.plane_info(handle) {
            Ok(info) => info,
            Err(err) => {
                warn!("error getting plane {handle:?}: {err:?}");
                continue;
            }
        };

        if crtc_index >= 32 || info.possible_crtcs & (1 << crtc_index) == 0 {
            continue;
        }

        candidate.get_or_insert(handle);

        match PropertyTable::load(device, KmsObject::Plane(handle)) {
            Ok(props) => {
                if props.value("type") == Some(PlaneType::Primary as u64) {
                    return Ok(handle);
                }
            }
            Err(err) => debug!("couldn't read plane type: {err}"),
        }
    }

    candidate.ok_or(KmsError::NoSuitablePlane {
        crtc,
        index: crtc_index,
    })
}
