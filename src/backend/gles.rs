//! GLES renderer drawing straight into the scanout buffers.

use anyhow::{anyhow, bail, Context};
use smithay::backend::allocator::dmabuf::{Dmabuf, DmabufFlags};
use smithay::backend::allocator::{Fourcc, Modifier};
use smithay::backend::drm::DrmDeviceFd;
use smithay::backend::egl::fence::EGLFence;
use smithay::backend::egl::{EGLContext, EGLDisplay};
use smithay::backend::renderer::gles::GlesRenderer;
use smithay::backend::renderer::sync::SyncPoint;
use smithay::backend::renderer::{Bind, Color32F, Frame, Renderer};
use smithay::reexports::drm::buffer::PlanarBuffer;
use smithay::reexports::gbm::{BufferObject, Device as GbmDevice};
use smithay::utils::{Physical, Rectangle, Size, Transform};
use tracing::debug;

use crate::backend::kms::{FrameRenderer, RenderTarget, SyncFence};

/// Frames per full color cycle.
const CYCLE: u64 = 360;

pub struct GlesFrameRenderer {
    renderer: GlesRenderer,
    size: Size<i32, Physical>,
    /// Exported ring buffers, by slot.
    dmabufs: Vec<Option<Dmabuf>>,
}

impl GlesFrameRenderer {
    pub fn new(gbm: &GbmDevice<DrmDeviceFd>, (width, height): (u32, u32)) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GlesFrameRenderer::new");

        let display =
            unsafe { EGLDisplay::new(gbm.clone()) }.context("error creating EGL display")?;
        let context = EGLContext::new(&display).context("error creating EGL context")?;
        let renderer =
            unsafe { GlesRenderer::new(context) }.context("error creating GLES renderer")?;

        let width = i32::try_from(width).context("mode width out of range")?;
        let height = i32::try_from(height).context("mode height out of range")?;

        Ok(Self {
            renderer,
            size: Size::from((width, height)),
            dmabufs: Vec::new(),
        })
    }

    fn dmabuf(&mut self, slot: usize, buffer: &BufferObject<()>) -> anyhow::Result<Dmabuf> {
        if let Some(Some(dmabuf)) = self.dmabufs.get(slot) {
            return Ok(dmabuf.clone());
        }

        let dmabuf = export_dmabuf(buffer)?;
        debug!("exported ring slot {slot} as dmabuf");

        if self.dmabufs.len() <= slot {
            self.dmabufs.resize(slot + 1, None);
        }
        self.dmabufs[slot] = Some(dmabuf.clone());
        Ok(dmabuf)
    }
}

fn export_dmabuf(buffer: &BufferObject<()>) -> anyhow::Result<Dmabuf> {
    let (width, height) = PlanarBuffer::size(buffer);
    let format: Fourcc = PlanarBuffer::format(buffer);
    let modifier = PlanarBuffer::modifier(buffer).unwrap_or(Modifier::Invalid);

    let mut builder = Dmabuf::builder(
        (width as i32, height as i32),
        format,
        modifier,
        DmabufFlags::empty(),
    );

    let handles = PlanarBuffer::handles(buffer);
    let pitches = PlanarBuffer::pitches(buffer);
    let offsets = PlanarBuffer::offsets(buffer);
    for idx in 0..handles.iter().filter(|h| h.is_some()).count() {
        let fd = buffer
            .fd_for_plane(idx as i32)
            .with_context(|| format!("error exporting plane {idx}"))?;
        builder.add_plane(fd, idx as u32, offsets[idx], pitches[idx]);
    }

    builder.build().ok_or_else(|| anyhow!("buffer has no planes"))
}

/// Clear color of `frame`, cycling through the hues.
fn frame_color(frame: u64) -> [f32; 4] {
    let t = (frame % CYCLE) as f32 / CYCLE as f32 * 3.;
    let (r, g, b) = match t {
        t if t < 1. => (1. - t, t, 0.),
        t if t < 2. => (0., 2. - t, t - 1.),
        t => (t - 2., 0., 3. - t),
    };
    [r, g, b, 1.]
}

impl FrameRenderer<GbmDevice<DrmDeviceFd>> for GlesFrameRenderer {
    fn supports_native_fences(&self) -> bool {
        EGLFence::supports_importing(self.renderer.egl_context().display())
    }

    fn wait_for_scanout(&mut self, fence: &SyncFence) -> anyhow::Result<()> {
        let display = self.renderer.egl_context().display().clone();
        let fence = EGLFence::import(&display, fence.try_clone()?.into())
            .context("error importing out-fence")?;
        self.renderer
            .wait(&SyncPoint::from(fence))
            .context("error waiting for out-fence")?;
        Ok(())
    }

    fn render(
        &mut self,
        target: RenderTarget<'_, GbmDevice<DrmDeviceFd>>,
        frame: u64,
    ) -> anyhow::Result<SyncFence> {
        let _span = tracy_client::span!("GlesFrameRenderer::render");

        let RenderTarget::Buffer { slot, buffer } = target else {
            bail!("surface rendering is not supported by the GLES renderer");
        };

        let mut dmabuf = self.dmabuf(slot, buffer)?;
        let size = self.size;

        let mut fb = self
            .renderer
            .bind(&mut dmabuf)
            .context("error binding scanout buffer")?;
        let mut gles_frame = self
            .renderer
            .render(&mut fb, size, Transform::Normal)
            .context("error starting frame")?;

        let [r, g, b, a] = frame_color(frame);
        gles_frame
            .clear(Color32F::new(r, g, b, a), &[Rectangle::from_size(size)])
            .context("error clearing frame")?;
        let sync = gles_frame.finish().context("error finishing frame")?;

        let fd = sync
            .export()
            .ok_or_else(|| anyhow!("renderer produced no native fence"))?;
        Ok(SyncFence::new(fd))
    }
}
