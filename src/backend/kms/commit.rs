//! Atomic commit construction and submission.
//!
//! One transaction is built per frame. The first one also performs the modeset: it binds the
//! connector to the CRTC, uploads the mode and activates the CRTC.

use std::os::fd::AsRawFd;

use smithay::reexports::drm::control::{self, crtc, framebuffer, property, AtomicCommitFlags};
use tracing::{trace, warn};

use super::devices::KmsDevice;
use super::error::{KmsError, KmsResult};
use super::fence::SyncFence;
use super::properties::{PropertyCache, PropertyTable};
use super::types::{KmsObject, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAssignment {
    pub object: KmsObject,
    pub property: property::Handle,
    pub value: property::RawValue,
}

/// A batch of property assignments submitted as one atomic commit.
#[derive(Debug, Clone)]
pub struct CommitTransaction {
    assignments: Vec<PropertyAssignment>,
    out_fence: Option<(crtc::Handle, property::Handle)>,
    flags: AtomicCommitFlags,
}

impl CommitTransaction {
    pub fn new(flags: AtomicCommitFlags) -> Self {
        Self {
            assignments: Vec::new(),
            out_fence: None,
            flags,
        }
    }

    pub fn assignments(&self) -> &[PropertyAssignment] {
        &self.assignments
    }

    /// CRTC and `OUT_FENCE_PTR` property the kernel should write an out-fence through.
    pub fn out_fence(&self) -> Option<(crtc::Handle, property::Handle)> {
        self.out_fence
    }

    pub fn flags(&self) -> AtomicCommitFlags {
        self.flags
    }

    pub fn get(&self, object: KmsObject, property: property::Handle) -> Option<property::RawValue> {
        self.assignments
            .iter()
            .find(|a| a.object == object && a.property == property)
            .map(|a| a.value)
    }

    pub fn add(&mut self, object: KmsObject, property: property::Handle, value: property::RawValue) {
        self.assignments.push(PropertyAssignment {
            object,
            property,
            value,
        });
    }

    /// Sets a property the commit cannot do without.
    pub fn set(
        &mut self,
        table: &PropertyTable,
        name: &'static str,
        value: property::RawValue,
    ) -> KmsResult<()> {
        let property = table.require(name)?;
        self.add(table.object(), property, value);
        Ok(())
    }

    /// Sets a property if the object has it. Returns whether it was set.
    pub fn set_optional(
        &mut self,
        table: &PropertyTable,
        name: &str,
        value: property::RawValue,
    ) -> bool {
        match table.lookup(name) {
            Some(property) => {
                self.add(table.object(), property, value);
                true
            }
            None => {
                warn!("{} has no {name} property, skipping", table.object());
                false
            }
        }
    }

    /// Asks for an out-fence on `crtc` if its table has `OUT_FENCE_PTR`.
    pub fn request_out_fence(&mut self, crtc: crtc::Handle, table: &PropertyTable) -> bool {
        match table.lookup("OUT_FENCE_PTR") {
            Some(property) => {
                self.out_fence = Some((crtc, property));
                true
            }
            None => {
                warn!("{} has no OUT_FENCE_PTR property, skipping", table.object());
                false
            }
        }
    }
}

/// Builds the transaction for one frame.
///
/// `mode_blob` is set on the first frame only and turns the commit into a modeset.
pub fn build_transaction(
    topology: &Topology,
    props: &PropertyCache,
    framebuffer: framebuffer::Handle,
    mode_blob: Option<property::RawValue>,
    in_fence: Option<&SyncFence>,
    want_out_fence: bool,
) -> KmsResult<CommitTransaction> {
    let mut flags = AtomicCommitFlags::NONBLOCK;
    if mode_blob.is_some() {
        flags |= AtomicCommitFlags::ALLOW_MODESET;
    }

    let mut txn = CommitTransaction::new(flags);
    let crtc_id = u64::from(u32::from(topology.crtc));

    if let Some(blob) = mode_blob {
        txn.set(&props.connector, "CRTC_ID", crtc_id)?;
        txn.set(&props.crtc, "MODE_ID", blob)?;
        txn.set(&props.crtc, "ACTIVE", 1)?;
    }

    let (w, h) = topology.mode_size();
    let (w, h) = (u64::from(w), u64::from(h));
    let plane = &props.plane;
    txn.set(plane, "FB_ID", u64::from(u32::from(framebuffer)))?;
    txn.set(plane, "CRTC_ID", crtc_id)?;
    // Source coordinates are 16.16 fixed point.
    txn.set(plane, "SRC_X", 0)?;
    txn.set(plane, "SRC_Y", 0)?;
    txn.set(plane, "SRC_W", w << 16)?;
    txn.set(plane, "SRC_H", h << 16)?;
    txn.set(plane, "CRTC_X", 0)?;
    txn.set(plane, "CRTC_Y", 0)?;
    txn.set(plane, "CRTC_W", w)?;
    txn.set(plane, "CRTC_H", h)?;

    if let Some(fence) = in_fence {
        txn.set_optional(plane, "IN_FENCE_FD", fence.as_raw_fd() as property::RawValue);
    }
    if want_out_fence {
        txn.request_out_fence(topology.crtc, &props.crtc);
    }

    Ok(txn)
}

/// A mode property blob, destroyed when dropped.
///
/// The CRTC keeps its own reference once a commit using the blob went through.
struct ModeBlob<'a, D: KmsDevice> {
    device: &'a D,
    id: property::RawValue,
}

impl<'a, D: KmsDevice> ModeBlob<'a, D> {
    fn new(device: &'a D, mode: &control::Mode) -> KmsResult<Self> {
        let id = device
            .create_mode_blob(mode)
            .map_err(KmsError::ModeBlobFailed)?;
        Ok(Self { device, id })
    }
}

impl<D: KmsDevice> Drop for ModeBlob<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.device.destroy_blob(self.id) {
            warn!("error destroying mode blob: {err:?}");
        }
    }
}

/// Per-frame inputs of [`commit`].
pub struct CommitRequest<'a> {
    pub framebuffer: framebuffer::Handle,
    pub frame: u64,
    /// Render fence the plane update waits on. Taken (and closed) when the commit succeeds.
    pub in_fence: &'a mut Option<SyncFence>,
    pub want_out_fence: bool,
    pub allow_modeset: bool,
}

/// Builds and submits the transaction for one frame.
///
/// Returns the out-fence signalling when this commit took effect, if one was requested and
/// supported.
pub fn commit<D: KmsDevice>(
    device: &D,
    topology: &Topology,
    props: &PropertyCache,
    request: CommitRequest<'_>,
) -> KmsResult<Option<SyncFence>> {
    let _span = tracy_client::span!("commit");

    let blob = if request.allow_modeset {
        Some(ModeBlob::new(device, &topology.mode)?)
    } else {
        None
    };

    let txn = build_transaction(
        topology,
        props,
        request.framebuffer,
        blob.as_ref().map(|blob| blob.id),
        request.in_fence.as_ref(),
        request.want_out_fence,
    )?;

    trace!(
        "frame {}: committing {} properties, flags {:?}",
        request.frame,
        txn.assignments().len(),
        txn.flags()
    );

    let out_fence = device.commit(&txn).map_err(KmsError::CommitRejected)?;

    // The kernel holds its own reference now.
    request.in_fence.take();

    Ok(out_fence.map(SyncFence::new))
}
