//! Renderer interface and frame pacing statistics.

use std::time::{Duration, Instant};

use super::buffers::BufferAllocator;
use super::fence::SyncFence;
use super::types::REPORT_INTERVAL_SECS;

// =============================================================================
// Renderer Interface
// =============================================================================

/// Where the renderer draws the next frame.
pub enum RenderTarget<'a, A: BufferAllocator> {
    /// A buffer of the surfaceless ring.
    Buffer { slot: usize, buffer: &'a A::Buffer },
    /// The surface the next front buffer is locked from.
    Surface(&'a mut A::Surface),
}

/// Draws frames into the pipeline's buffers.
pub trait FrameRenderer<A: BufferAllocator> {
    /// Whether [`render`](Self::render) can produce native sync_file fences.
    fn supports_native_fences(&self) -> bool;

    /// Makes later GPU work wait for `fence`, the out-fence of the previous commit.
    ///
    /// The fence is only borrowed. Implementations that cannot wait on the GPU may do nothing;
    /// the present loop waits for it on the CPU before the next commit anyway.
    fn wait_for_scanout(&mut self, fence: &SyncFence) -> anyhow::Result<()> {
        let _ = fence;
        Ok(())
    }

    /// Renders frame number `frame` and returns the fence signalling its completion.
    fn render(&mut self, target: RenderTarget<'_, A>, frame: u64) -> anyhow::Result<SyncFence>;
}

// =============================================================================
// Throughput
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    pub frames: u64,
    pub elapsed: Duration,
}

impl ThroughputReport {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0. {
            self.frames as f64 / secs
        } else {
            0.
        }
    }
}

/// Counts presented frames and reports the rate periodically.
///
/// Measuring starts at the second frame, so that the first frame's setup cost is left out.
#[derive(Debug)]
pub struct Throughput {
    start: Instant,
    last_report: Instant,
    frames: u64,
    interval: Duration,
}

impl Throughput {
    pub fn new(now: Instant) -> Self {
        Self {
            start: now,
            last_report: now,
            frames: 0,
            interval: Duration::from_secs(REPORT_INTERVAL_SECS),
        }
    }

    /// Frames recorded so far, including the unmeasured first one.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Records one frame. Returns a report once per interval.
    pub fn frame(&mut self, now: Instant) -> Option<ThroughputReport> {
        self.frames += 1;

        if self.frames == 1 {
            self.start = now;
            self.last_report = now;
            return None;
        }

        if now.duration_since(self.last_report) < self.interval {
            return None;
        }

        self.last_report = now;
        Some(ThroughputReport {
            frames: self.frames - 1,
            elapsed: now.duration_since(self.start),
        })
    }
}
