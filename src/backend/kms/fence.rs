//! Native sync_file fences.
//!
//! A [`SyncFence`] owns its descriptor: it is closed exactly once, when the fence is dropped.
//! Handing a fence to the kernel through `IN_FENCE_FD` happens by borrowing it for the commit
//! and dropping it once the commit succeeded.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use rustix::event::{poll, PollFd, PollFlags, Timespec};
use rustix::io::Errno;

#[derive(Debug)]
pub struct SyncFence(OwnedFd);

impl SyncFence {
    pub fn new(fd: OwnedFd) -> Self {
        Self(fd)
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        self.0.try_clone().map(Self)
    }

    /// Whether the fence has signalled, without blocking.
    pub fn is_signalled(&self) -> io::Result<bool> {
        poll_readable(self.0.as_fd(), Some(Duration::ZERO))
    }

    /// Blocks until the fence signals. There is no timeout.
    pub fn wait(&self) -> io::Result<()> {
        let _span = tracy_client::span!("SyncFence::wait");

        while !poll_readable(self.0.as_fd(), None)? {}
        Ok(())
    }
}

impl AsFd for SyncFence {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for SyncFence {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl From<OwnedFd> for SyncFence {
    fn from(fd: OwnedFd) -> Self {
        Self(fd)
    }
}

impl From<SyncFence> for OwnedFd {
    fn from(fence: SyncFence) -> Self {
        fence.0
    }
}

/// Polls `fd` for readability, blocking for at most `timeout` (forever if `None`).
///
/// Interrupted polls report "not ready".
pub fn poll_readable(fd: BorrowedFd<'_>, timeout: Option<Duration>) -> io::Result<bool> {
    let timeout = timeout.map(|timeout| Timespec {
        tv_sec: timeout.as_secs() as _,
        tv_nsec: timeout.subsec_nanos() as _,
    });

    let mut fds = [PollFd::new(&fd, PollFlags::IN)];
    let ready = match poll(&mut fds, timeout.as_ref()) {
        Ok(ready) => ready,
        Err(Errno::INTR | Errno::AGAIN) => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    let revents = fds[0].revents();
    if revents.intersects(PollFlags::ERR | PollFlags::NVAL) {
        return Err(Errno::INVAL.into());
    }

    Ok(ready > 0)
}

/// Waits for the previous scanout to retire before the next commit.
pub trait FenceWaiter {
    fn wait(&mut self, fence: &SyncFence) -> io::Result<()>;
}

/// Waits on the CPU by polling the fence descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingWait;

impl FenceWaiter for BlockingWait {
    fn wait(&mut self, fence: &SyncFence) -> io::Result<()> {
        fence.wait()
    }
}
