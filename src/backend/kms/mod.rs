//! Direct-to-display backend over atomic KMS.
//!
//! This module uses the **subsystem ownership pattern**:
//! - `devices.rs` - device access and discovery
//! - `outputs.rs` - connector, mode, CRTC and plane selection
//! - `properties.rs` - atomic property tables
//! - `buffers.rs` - scanout buffers and their framebuffers
//! - `commit.rs` - per-frame atomic transactions
//! - `fence.rs` - native fences and waiting on them
//!
//! `Kms` is a thin coordinator that owns the results of setup and sequences every frame:
//! render, wait for the previous flip to retire, commit, and release the buffer that left the
//! screen.

mod buffers;
mod commit;
mod devices;
mod error;
mod fence;
mod helpers;
mod outputs;
mod properties;
mod render;
mod types;

#[cfg(test)]
pub(crate) mod testing;

use std::io;
use std::time::Instant;

use smithay::reexports::drm::ClientCapability;
use tracing::{debug, info, warn};

pub use buffers::{
    allocate_buffer, allocate_surface, create_framebuffer, BufferAllocator, BufferId, BufferPool,
    FramebufferRequest, FrontBufferSource, OwnedFramebuffer, ScanoutBuffer,
};
pub use commit::{build_transaction, commit, CommitRequest, CommitTransaction, PropertyAssignment};
pub use devices::{resolve_device, DeviceCandidate, DeviceOpener, KmsDevice, UdevOpener};
pub use error::{KmsError, KmsResult};
pub use fence::{poll_readable, BlockingWait, FenceWaiter, SyncFence};
pub use helpers::{parse_fourcc, pick_mode};
pub use outputs::select_output;
pub use properties::{PropertyCache, PropertyEntry, PropertyTable};
pub use render::{FrameRenderer, RenderTarget, Throughput, ThroughputReport};
pub use types::{
    ConnectorInfo, EncoderInfo, KmsObject, KmsOptions, PlaneInfo, Resources, Topology,
    SURFACELESS_BUFFERS,
};

/// Enables the client capabilities atomic plane updates need.
fn enable_capabilities<D: KmsDevice>(device: &D) -> KmsResult<()> {
    if let Err(err) = device.enable_capability(ClientCapability::UniversalPlanes) {
        warn!("error enabling universal planes: {err:?}");
    }

    device
        .enable_capability(ClientCapability::Atomic)
        .map_err(KmsError::AtomicUnsupported)
}

/// The presentation pipeline of one output.
pub struct Kms<D: KmsDevice, A: BufferAllocator> {
    // Field order is drop order: the locked front buffer goes back to its surface before the
    // pool drops the framebuffers and the surface.
    on_screen: Option<A::Buffer>,
    /// Out-fence of the last successful commit.
    pending_flip: Option<SyncFence>,
    pool: BufferPool<D, A>,
    props: PropertyCache,
    topology: Topology,
    device: D,
    allow_modeset: bool,
    frame: u64,
    throughput: Throughput,
}

impl<D: KmsDevice, A: BufferAllocator> Kms<D, A> {
    pub fn new(device: D, allocator: &A, options: &KmsOptions) -> KmsResult<Self> {
        let _span = tracy_client::span!("Kms::new");

        enable_capabilities(&device)?;

        let topology = select_output(&device, options.mode.as_deref(), options.refresh)?;
        let props = PropertyCache::load(&device, &topology)?;

        let size = topology.mode_size();
        let pool = if options.surfaceless {
            BufferPool::surfaceless(
                device.clone(),
                allocator,
                size,
                options.format,
                options.modifier,
                SURFACELESS_BUFFERS,
            )?
        } else {
            BufferPool::surfaced(
                device.clone(),
                allocator,
                size,
                options.format,
                options.modifier,
            )?
        };

        Ok(Self {
            on_screen: None,
            pending_flip: None,
            pool,
            props,
            topology,
            device,
            allow_modeset: true,
            frame: 0,
            throughput: Throughput::new(Instant::now()),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Size of the chosen mode, which is also the size of every scanout buffer.
    pub fn mode_size(&self) -> (u32, u32) {
        self.topology.mode_size()
    }

    pub fn properties(&self) -> &PropertyCache {
        &self.props
    }

    /// Number of frames started so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Checks that render fences can gate the plane update and that flips report completion.
    pub fn check_fence_support<R: FrameRenderer<A>>(&self, renderer: &R) -> KmsResult<()> {
        if !renderer.supports_native_fences() {
            return Err(KmsError::FenceUnsupported(
                "renderer cannot export native fences",
            ));
        }
        if self.props.plane.lookup("IN_FENCE_FD").is_none() {
            return Err(KmsError::FenceUnsupported("plane has no IN_FENCE_FD property"));
        }
        if self.props.crtc.lookup("OUT_FENCE_PTR").is_none() {
            return Err(KmsError::FenceUnsupported("crtc has no OUT_FENCE_PTR property"));
        }
        Ok(())
    }

    /// Renders and presents one frame.
    ///
    /// When the frame is dropped early, the out-fence of the previous flip is kept so the next
    /// frame still waits for it.
    pub fn present_frame<R, W>(&mut self, renderer: &mut R, waiter: &mut W) -> KmsResult<()>
    where
        R: FrameRenderer<A>,
        W: FenceWaiter,
    {
        let _span = tracy_client::span!("Kms::present_frame");

        let frame = self.frame;
        self.frame += 1;

        let mut prev_flip = self.pending_flip.take();
        let res = self.present(frame, renderer, waiter, &mut prev_flip);
        if prev_flip.is_some() {
            self.pending_flip = prev_flip;
        }
        res
    }

    fn present<R, W>(
        &mut self,
        frame: u64,
        renderer: &mut R,
        waiter: &mut W,
        prev_flip: &mut Option<SyncFence>,
    ) -> KmsResult<()>
    where
        R: FrameRenderer<A>,
        W: FenceWaiter,
    {
        if let Some(fence) = prev_flip.as_ref() {
            if let Err(err) = renderer.wait_for_scanout(fence) {
                warn!("error queueing GPU wait for the previous flip: {err:?}");
            }
        }

        let mut locked = None;
        let (render_fence, fb) = if self.pool.is_surfaceless() {
            let slot = self.pool.slot_for_frame(frame);
            let buffer = self.pool.buffer(slot).ok_or_else(|| {
                KmsError::FrontBufferUnavailable(io::Error::other(format!(
                    "ring slot {slot} is empty"
                )))
            })?;
            let render_fence = renderer
                .render(RenderTarget::Buffer { slot, buffer }, frame)
                .map_err(KmsError::RenderFailed)?;
            let fb = self.pool.framebuffer_for_slot(slot)?;
            (render_fence, fb)
        } else {
            let surface = self.pool.surface_mut().ok_or_else(|| {
                KmsError::FrontBufferUnavailable(io::Error::other("pool has no surface"))
            })?;
            let render_fence = renderer
                .render(RenderTarget::Surface(surface), frame)
                .map_err(KmsError::RenderFailed)?;
            let buffer = self.pool.lock_front_buffer()?;
            let fb = self.pool.framebuffer_for(&buffer)?;
            locked = Some(buffer);
            (render_fence, fb)
        };

        // Never queue a flip while the previous one is still pending.
        if let Some(fence) = prev_flip.take() {
            waiter.wait(&fence).map_err(KmsError::FenceWait)?;
        }

        let mut in_fence = Some(render_fence);
        let out_fence = commit(
            &self.device,
            &self.topology,
            &self.props,
            CommitRequest {
                framebuffer: fb,
                frame,
                in_fence: &mut in_fence,
                want_out_fence: true,
                allow_modeset: self.allow_modeset,
            },
        )?;

        if self.allow_modeset {
            debug!("modeset on {} done", self.topology.connector_name);
            self.allow_modeset = false;
        }
        self.pending_flip = out_fence;

        if let Some(report) = self.throughput.frame(Instant::now()) {
            info!(
                "Rendered {} frames in {:.2} sec ({:.2} fps)",
                report.frames,
                report.elapsed.as_secs_f64(),
                report.fps()
            );
        }

        // The previously locked buffer left the screen with this flip.
        if locked.is_some() {
            self.on_screen = locked;
        }

        Ok(())
    }

    /// Presents frames until `frames` were attempted or `interrupted` returns true.
    ///
    /// Frames failing with a per-frame error are dropped. Returns the number of frames that
    /// made it to the screen.
    pub fn run<R, W>(
        &mut self,
        renderer: &mut R,
        waiter: &mut W,
        frames: Option<u64>,
        mut interrupted: impl FnMut() -> bool,
    ) -> KmsResult<u64>
    where
        R: FrameRenderer<A>,
        W: FenceWaiter,
    {
        let _span = tracy_client::span!("Kms::run");

        self.check_fence_support(renderer)?;
        self.throughput = Throughput::new(Instant::now());

        let mut attempted = 0;
        let mut presented = 0;
        while frames.map_or(true, |limit| attempted < limit) {
            if interrupted() {
                info!("user interrupted");
                break;
            }

            attempted += 1;
            match self.present_frame(renderer, waiter) {
                Ok(()) => presented += 1,
                Err(err) if err.is_per_frame() => {
                    warn!("dropping frame {}: {err:?}", self.frame - 1);
                }
                Err(err) => return Err(err),
            }
        }

        self.finish(waiter)?;
        Ok(presented)
    }

    /// Waits until the last flip retired.
    pub fn finish<W: FenceWaiter>(&mut self, waiter: &mut W) -> KmsResult<()> {
        if let Some(fence) = self.pending_flip.take() {
            waiter.wait(&fence).map_err(KmsError::FenceWait)?;
        }
        Ok(())
    }
}
