//! Scanout buffers and the kernel framebuffers wrapping them.
//!
//! This module uses the **pool ownership pattern**:
//! - `BufferPool` owns every scanout buffer it allocated (surfaceless) or the GBM surface the
//!   renderer draws into (surfaced),
//! - each pool entry owns at most one `OwnedFramebuffer`, created the first time the buffer is
//!   presented and removed when the entry drops.

use std::io;
use std::os::fd::AsFd;

use smithay::backend::allocator::{Fourcc, Modifier};
use smithay::reexports::drm::buffer::{self, PlanarBuffer};
use smithay::reexports::drm::control::framebuffer;
use smithay::reexports::gbm::{self, AsRaw, BufferObject, BufferObjectFlags};
use tracing::{debug, info, trace, warn};

use super::devices::KmsDevice;
use super::error::{KmsError, KmsResult};

/// Identity of a buffer allocation, stable for the allocation's lifetime.
pub type BufferId = usize;

// =============================================================================
// Allocator Seams
// =============================================================================

/// A GPU buffer that can be scanned out.
pub trait ScanoutBuffer: PlanarBuffer {
    fn id(&self) -> BufferId;
}

/// Renderer-owned surface handing out its most recently finished buffer.
///
/// Dropping a locked buffer releases it back to the surface.
pub trait FrontBufferSource {
    type Buffer: ScanoutBuffer;

    fn lock_front_buffer(&mut self) -> io::Result<Self::Buffer>;
}

pub trait BufferAllocator {
    type Buffer: ScanoutBuffer;
    type Surface: FrontBufferSource<Buffer = Self::Buffer>;

    fn new_buffer_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: &[Modifier],
    ) -> io::Result<Self::Buffer>;

    fn new_buffer(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferObjectFlags,
    ) -> io::Result<Self::Buffer>;

    fn new_surface_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: &[Modifier],
    ) -> io::Result<Self::Surface>;

    fn new_surface(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferObjectFlags,
    ) -> io::Result<Self::Surface>;
}

impl ScanoutBuffer for BufferObject<()> {
    // A gbm surface keeps its buffer objects until the surface is destroyed, and the pool drops
    // its cached framebuffers together with the surface. The pointer cannot be reused for
    // another buffer while it keys a framebuffer.
    fn id(&self) -> BufferId {
        self.as_raw() as BufferId
    }
}

impl FrontBufferSource for gbm::Surface<()> {
    type Buffer = BufferObject<()>;

    fn lock_front_buffer(&mut self) -> io::Result<BufferObject<()>> {
        // SAFETY: the present loop only locks after the renderer finished a frame into this
        // surface.
        unsafe { gbm::Surface::lock_front_buffer(self) }
            .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "no free front buffer"))
    }
}

impl<T: AsFd + 'static> BufferAllocator for gbm::Device<T> {
    type Buffer = BufferObject<()>;
    type Surface = gbm::Surface<()>;

    fn new_buffer_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: &[Modifier],
    ) -> io::Result<Self::Buffer> {
        self.create_buffer_object_with_modifiers(width, height, format, modifiers.iter().copied())
    }

    fn new_buffer(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferObjectFlags,
    ) -> io::Result<Self::Buffer> {
        self.create_buffer_object(width, height, format, usage)
    }

    fn new_surface_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: &[Modifier],
    ) -> io::Result<Self::Surface> {
        self.create_surface_with_modifiers(width, height, format, modifiers.iter().copied())
    }

    fn new_surface(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferObjectFlags,
    ) -> io::Result<Self::Surface> {
        self.create_surface(width, height, format, usage)
    }
}

// =============================================================================
// Allocation
// =============================================================================

fn scanout_usage() -> BufferObjectFlags {
    BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING
}

/// Allocates one scanout buffer.
///
/// The explicit modifier is tried first. Only the linear modifier may fall back to the
/// driver's implicit layout.
pub fn allocate_buffer<A: BufferAllocator>(
    allocator: &A,
    (width, height): (u32, u32),
    format: Fourcc,
    modifier: Modifier,
) -> KmsResult<A::Buffer> {
    let _span = tracy_client::span!("allocate_buffer");

    match allocator.new_buffer_with_modifiers(width, height, format, &[modifier]) {
        Ok(buffer) => return Ok(buffer),
        Err(source) if modifier != Modifier::Linear => {
            return Err(KmsError::ModifierUnsupported {
                format,
                modifier,
                source,
            });
        }
        Err(err) => {
            warn!("modifiers failed, falling back to implicit layout: {err:?}");
        }
    }

    allocator
        .new_buffer(width, height, format, scanout_usage())
        .map_err(|source| KmsError::BufferAllocationFailed {
            width,
            height,
            format,
            source,
        })
}

/// Allocates the renderer surface, with the same modifier policy as [`allocate_buffer`].
pub fn allocate_surface<A: BufferAllocator>(
    allocator: &A,
    (width, height): (u32, u32),
    format: Fourcc,
    modifier: Modifier,
) -> KmsResult<A::Surface> {
    let _span = tracy_client::span!("allocate_surface");

    match allocator.new_surface_with_modifiers(width, height, format, &[modifier]) {
        Ok(surface) => return Ok(surface),
        Err(source) if modifier != Modifier::Linear => {
            return Err(KmsError::ModifierUnsupported {
                format,
                modifier,
                source,
            });
        }
        Err(err) => {
            warn!("modifiers failed, falling back to implicit layout: {err:?}");
        }
    }

    allocator
        .new_surface(width, height, format, scanout_usage())
        .map_err(|source| KmsError::BufferAllocationFailed {
            width,
            height,
            format,
            source,
        })
}

// =============================================================================
// Framebuffers
// =============================================================================

/// Plane layout handed to the kernel when creating a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferRequest {
    pub size: (u32, u32),
    pub format: Fourcc,
    pub modifier: Option<Modifier>,
    pub handles: [Option<buffer::Handle>; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
}

impl FramebufferRequest {
    pub fn from_buffer<B: PlanarBuffer + ?Sized>(buffer: &B) -> Self {
        Self {
            size: buffer.size(),
            format: buffer.format(),
            modifier: buffer.modifier(),
            handles: buffer.handles(),
            pitches: buffer.pitches(),
            offsets: buffer.offsets(),
        }
    }

    /// The modifier, unless it is absent or the zero (linear) modifier.
    pub fn explicit_modifier(&self) -> Option<Modifier> {
        self.modifier.filter(|modifier| u64::from(*modifier) != 0)
    }

    /// First plane only, at offset zero, without a modifier.
    pub fn single_plane(&self) -> Self {
        Self {
            size: self.size,
            format: self.format,
            modifier: None,
            handles: [self.handles[0], None, None, None],
            pitches: [self.pitches[0], 0, 0, 0],
            offsets: [0; 4],
        }
    }
}

impl PlanarBuffer for FramebufferRequest {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> Fourcc {
        self.format
    }

    fn modifier(&self) -> Option<Modifier> {
        self.modifier
    }

    fn pitches(&self) -> [u32; 4] {
        self.pitches
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        self.handles
    }

    fn offsets(&self) -> [u32; 4] {
        self.offsets
    }
}

/// Creates a framebuffer for `buffer`.
///
/// Buffers with an explicit modifier go through the modifier-aware path first; the
/// single-plane path is the fallback for everything else.
pub fn create_framebuffer<D: KmsDevice, B: PlanarBuffer + ?Sized>(
    device: &D,
    buffer: &B,
) -> KmsResult<framebuffer::Handle> {
    let _span = tracy_client::span!("create_framebuffer");

    let request = FramebufferRequest::from_buffer(buffer);

    if let Some(modifier) = request.explicit_modifier() {
        info!("using modifier {modifier:?}");
        match device.add_framebuffer(&request, true) {
            Ok(fb) => return Ok(fb),
            Err(err) => warn!("modifiers failed: {err:?}"),
        }
    }

    device
        .add_framebuffer(&request.single_plane(), false)
        .map_err(KmsError::FramebufferCreateFailed)
}

/// A kernel framebuffer, removed when dropped.
#[derive(Debug)]
pub struct OwnedFramebuffer<D: KmsDevice> {
    device: D,
    handle: framebuffer::Handle,
}

impl<D: KmsDevice> OwnedFramebuffer<D> {
    pub fn new(device: D, handle: framebuffer::Handle) -> Self {
        Self { device, handle }
    }

    pub fn handle(&self) -> framebuffer::Handle {
        self.handle
    }
}

impl<D: KmsDevice> Drop for OwnedFramebuffer<D> {
    fn drop(&mut self) {
        trace!("removing framebuffer {:?}", self.handle);
        if let Err(err) = self.device.remove_framebuffer(self.handle) {
            warn!("error removing framebuffer: {err:?}");
        }
    }
}

// =============================================================================
// BufferPool
// =============================================================================

struct PoolEntry<D: KmsDevice, B> {
    // Declared first so the framebuffer goes away before its buffer.
    framebuffer: Option<OwnedFramebuffer<D>>,
    id: BufferId,
    /// Owned in surfaceless mode. Surface buffers belong to the surface.
    buffer: Option<B>,
}

/// Returns the framebuffer in `slot`, creating it for `buffer` if the slot is empty.
fn ensure_framebuffer<D: KmsDevice, B: ScanoutBuffer>(
    slot: &mut Option<OwnedFramebuffer<D>>,
    device: &D,
    buffer: &B,
) -> KmsResult<framebuffer::Handle> {
    if let Some(fb) = slot {
        return Ok(fb.handle());
    }

    let handle = create_framebuffer(device, buffer)?;
    debug!("created framebuffer {handle:?} for buffer {:#x}", buffer.id());
    *slot = Some(OwnedFramebuffer::new(device.clone(), handle));
    Ok(handle)
}

/// Scanout buffers of one output and their framebuffers.
pub struct BufferPool<D: KmsDevice, A: BufferAllocator> {
    entries: Vec<PoolEntry<D, A::Buffer>>,
    surface: Option<A::Surface>,
    device: D,
}

impl<D: KmsDevice, A: BufferAllocator> BufferPool<D, A> {
    /// A fixed ring of `count` buffers, presented in turn.
    pub fn surfaceless(
        device: D,
        allocator: &A,
        size: (u32, u32),
        format: Fourcc,
        modifier: Modifier,
        count: usize,
    ) -> KmsResult<Self> {
        let _span = tracy_client::span!("BufferPool::surfaceless");

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let buffer = allocate_buffer(allocator, size, format, modifier)?;
            entries.push(PoolEntry {
                framebuffer: None,
                id: buffer.id(),
                buffer: Some(buffer),
            });
        }

        Ok(Self {
            entries,
            surface: None,
            device,
        })
    }

    /// Buffers come from a renderer surface through front-buffer locking.
    pub fn surfaced(
        device: D,
        allocator: &A,
        size: (u32, u32),
        format: Fourcc,
        modifier: Modifier,
    ) -> KmsResult<Self> {
        let _span = tracy_client::span!("BufferPool::surfaced");

        let surface = allocate_surface(allocator, size, format, modifier)?;
        Ok(Self {
            entries: Vec::new(),
            surface: Some(surface),
            device,
        })
    }

    pub fn is_surfaceless(&self) -> bool {
        self.surface.is_none()
    }

    /// Ring slot presenting `frame`.
    pub fn slot_for_frame(&self, frame: u64) -> usize {
        (frame % self.entries.len().max(1) as u64) as usize
    }

    pub fn buffer(&self, slot: usize) -> Option<&A::Buffer> {
        self.entries.get(slot)?.buffer.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut A::Surface> {
        self.surface.as_mut()
    }

    pub fn lock_front_buffer(&mut self) -> KmsResult<A::Buffer> {
        let Some(surface) = &mut self.surface else {
            return Err(KmsError::FrontBufferUnavailable(io::Error::new(
                io::ErrorKind::Unsupported,
                "pool has no surface",
            )));
        };

        surface
            .lock_front_buffer()
            .map_err(KmsError::FrontBufferUnavailable)
    }

    /// Framebuffer of the ring buffer in `slot`, created on first use.
    pub fn framebuffer_for_slot(&mut self, slot: usize) -> KmsResult<framebuffer::Handle> {
        let Some(entry) = self.entries.get_mut(slot) else {
            return Err(KmsError::FramebufferCreateFailed(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no buffer in slot {slot}"),
            )));
        };

        let PoolEntry {
            framebuffer,
            buffer,
            ..
        } = entry;
        let Some(buffer) = buffer.as_ref() else {
            return Err(KmsError::FramebufferCreateFailed(io::Error::new(
                io::ErrorKind::NotFound,
                format!("slot {slot} holds no buffer"),
            )));
        };

        ensure_framebuffer(framebuffer, &self.device, buffer)
    }

    /// Framebuffer of a buffer locked from the surface, created the first time it is seen.
    pub fn framebuffer_for(&mut self, buffer: &A::Buffer) -> KmsResult<framebuffer::Handle> {
        let id = buffer.id();
        let idx = match self.entries.iter().position(|entry| entry.id == id) {
            Some(idx) => idx,
            None => {
                self.entries.push(PoolEntry {
                    framebuffer: None,
                    id,
                    buffer: None,
                });
                self.entries.len() - 1
            }
        };

        ensure_framebuffer(&mut self.entries[idx].framebuffer, &self.device, buffer)
    }

    pub fn framebuffer_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.framebuffer.is_some())
            .count()
    }
}
