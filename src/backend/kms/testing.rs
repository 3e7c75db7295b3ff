//! In-memory device, allocator and renderer for exercising the pipeline without hardware.
//!
//! The default device has one connected connector driven through one encoder, two CRTCs and
//! three planes:
//! - plane 40 only works with the first CRTC,
//! - planes 41 (overlay) and 42 (primary) work with the second CRTC, the only one the encoder
//!   can drive.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_char;
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::bail;
use smithay::backend::allocator::{Fourcc, Modifier};
use smithay::reexports::drm::buffer::{self, PlanarBuffer};
use smithay::reexports::drm::control::{
    self, connector, crtc, encoder, framebuffer, from_u32, plane, property, AtomicCommitFlags,
    ModeTypeFlags,
};
use smithay::reexports::drm::ClientCapability;
use smithay::reexports::gbm::BufferObjectFlags;

use super::buffers::{BufferAllocator, BufferId, FramebufferRequest, FrontBufferSource, ScanoutBuffer};
use super::commit::CommitTransaction;
use super::devices::{DeviceCandidate, DeviceOpener, KmsDevice};
use super::fence::{FenceWaiter, SyncFence};
use super::render::{FrameRenderer, RenderTarget};
use super::types::{ConnectorInfo, EncoderInfo, KmsObject, PlaneInfo, Resources};

pub const CONNECTOR: u32 = 10;
pub const ENCODER: u32 = 20;
pub const CRTC_A: u32 = 30;
pub const CRTC_B: u32 = 31;
pub const PLANE_INCOMPATIBLE: u32 = 40;
pub const PLANE_OVERLAY: u32 = 41;
pub const PLANE_PRIMARY: u32 = 42;

/// Planes made by [`MockState::with_planes`] start here.
const GENERATED_PLANES: u32 = 60;
/// Buffers a mock surface cycles through.
const SURFACE_BUFFERS: usize = 3;

// Plane properties come first so that `prop_id("CRTC_ID")` finds the plane's.
const PROPERTIES: &[(u32, &str)] = &[
    (300, "type"),
    (301, "FB_ID"),
    (302, "CRTC_ID"),
    (303, "SRC_X"),
    (304, "SRC_Y"),
    (305, "SRC_W"),
    (306, "SRC_H"),
    (307, "CRTC_X"),
    (308, "CRTC_Y"),
    (309, "CRTC_W"),
    (310, "CRTC_H"),
    (311, "IN_FENCE_FD"),
    (101, "CRTC_ID"),
    (201, "MODE_ID"),
    (202, "ACTIVE"),
    (203, "OUT_FENCE_PTR"),
];

const CONNECTOR_PROPS: &[u32] = &[101];
const CRTC_PROPS: &[u32] = &[201, 202, 203];
const PLANE_PROPS: &[u32] = &[300, 301, 302, 303, 304, 305, 306, 307, 308, 309, 310, 311];

fn handle<T: From<std::num::NonZeroU32>>(id: u32) -> T {
    from_u32(id).unwrap()
}

pub fn prop(id: u32) -> property::Handle {
    handle(id)
}

fn property_name(id: u32) -> Option<&'static str> {
    PROPERTIES
        .iter()
        .find(|(prop, _)| *prop == id)
        .map(|(_, name)| *name)
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn null_fd() -> OwnedFd {
    OwnedFd::from(File::open("/dev/null").unwrap())
}

/// A mode called `WxH`.
pub fn test_mode(w: u16, h: u16, refresh: u32, preferred: bool) -> control::Mode {
    // SAFETY: the struct is plain integers, all zeroes is a valid value.
    let mut info: drm_ffi::drm_mode_modeinfo = unsafe { std::mem::zeroed() };
    info.hdisplay = w;
    info.vdisplay = h;
    info.htotal = w;
    info.vtotal = h;
    info.vrefresh = refresh;
    info.clock = u32::from(w) * u32::from(h) * refresh / 1000;

    let mut ty = ModeTypeFlags::DRIVER;
    if preferred {
        ty |= ModeTypeFlags::PREFERRED;
    }
    info.type_ = ty.bits();

    let name = format!("{w}x{h}");
    for (dst, src) in info.name.iter_mut().zip(name.bytes()) {
        *dst = src as c_char;
    }

    control::Mode::from(info)
}

// =============================================================================
// Event Log
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AllocModifiers(Modifier),
    AllocImplicit,
    SurfaceModifiers(Modifier),
    SurfaceImplicit,
    AddFramebuffer {
        request: FramebufferRequest,
        modifiers: bool,
    },
    RemoveFramebuffer(u32),
    CreateBlob(u64),
    DestroyBlob(u64),
    Commit {
        modeset: bool,
        in_fence: bool,
        out_fence: bool,
    },
    Rejected {
        modeset: bool,
    },
    /// CPU wait on an out-fence.
    Wait,
    /// GPU wait on an out-fence.
    GpuWait,
    Render(u64),
    Lock(BufferId),
    Release(BufferId),
}

/// Shared, ordered record of what the mocks were asked to do.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn take(&self) -> Vec<Event> {
        self.0.take()
    }
}

// =============================================================================
// Device
// =============================================================================

#[derive(Debug)]
pub struct MockState {
    pub log: EventLog,
    /// Successful commits, in order.
    pub commits: RefCell<Vec<CommitTransaction>>,
    resources: Option<Resources>,
    connector: ConnectorInfo,
    encoder_crtc: Option<crtc::Handle>,
    encoder_mask: u32,
    planes: Vec<PlaneInfo>,
    properties: HashMap<KmsObject, Vec<(u32, u64)>>,
    broken_properties: Vec<KmsObject>,
    refuse_atomic: bool,
    reject_modifier_fbs: bool,
    reject_legacy_fbs: bool,
    commits_to_reject: Cell<usize>,
    next_id: Cell<u32>,
    added_fbs: Cell<usize>,
    removed_fbs: Cell<usize>,
}

fn plane_properties(ty: u64) -> Vec<(u32, u64)> {
    PLANE_PROPS
        .iter()
        .map(|&id| (id, if id == 300 { ty } else { 0 }))
        .collect()
}

impl MockState {
    pub fn single_output() -> Self {
        let planes = [
            (PLANE_INCOMPATIBLE, 0b01, 1),
            (PLANE_OVERLAY, 0b10, 0),
            (PLANE_PRIMARY, 0b10, 1),
        ];

        let mut properties = HashMap::new();
        properties.insert(
            KmsObject::Connector(handle(CONNECTOR)),
            CONNECTOR_PROPS.iter().map(|&id| (id, 0)).collect(),
        );
        for crtc in [CRTC_A, CRTC_B] {
            properties.insert(
                KmsObject::Crtc(handle(crtc)),
                CRTC_PROPS.iter().map(|&id| (id, 0)).collect(),
            );
        }
        for (plane, _, ty) in planes {
            properties.insert(KmsObject::Plane(handle(plane)), plane_properties(ty));
        }

        Self {
            log: EventLog::default(),
            commits: RefCell::new(Vec::new()),
            resources: Some(Resources {
                connectors: vec![handle(CONNECTOR)],
                encoders: vec![handle(ENCODER)],
                crtcs: vec![handle(CRTC_A), handle(CRTC_B)],
            }),
            connector: ConnectorInfo {
                handle: handle(CONNECTOR),
                name: String::from("HDMI-A-1"),
                state: connector::State::Connected,
                current_encoder: None,
                encoders: vec![handle(ENCODER)],
                modes: vec![
                    test_mode(1920, 1080, 60, false),
                    test_mode(1024, 768, 60, true),
                ],
            },
            encoder_crtc: None,
            encoder_mask: 0b10,
            planes: planes
                .iter()
                .map(|&(plane, mask, _)| PlaneInfo {
                    handle: handle(plane),
                    possible_crtcs: mask,
                })
                .collect(),
            properties,
            broken_properties: Vec::new(),
            refuse_atomic: false,
            reject_modifier_fbs: false,
            reject_legacy_fbs: false,
            commits_to_reject: Cell::new(0),
            next_id: Cell::new(500),
            added_fbs: Cell::new(0),
            removed_fbs: Cell::new(0),
        }
    }

    /// Replaces the planes with `(compatible with CRTC_A, type)` pairs.
    pub fn with_planes(planes: &[(bool, u64)]) -> Self {
        let mut state = Self::single_output();
        state
            .properties
            .retain(|object, _| !matches!(object, KmsObject::Plane(_)));
        state.planes.clear();

        for (idx, &(compatible, ty)) in planes.iter().enumerate() {
            let plane = Self::plane_handle(idx);
            state.planes.push(PlaneInfo {
                handle: plane,
                possible_crtcs: if compatible { 0b01 } else { 0b10 },
            });
            state
                .properties
                .insert(KmsObject::Plane(plane), plane_properties(ty));
        }

        state
    }

    pub fn plane_handle(idx: usize) -> plane::Handle {
        handle(GENERATED_PLANES + idx as u32)
    }

    pub fn without_resources(mut self) -> Self {
        self.resources = None;
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connector.state = connector::State::Disconnected;
        self
    }

    pub fn with_modes(mut self, modes: Vec<control::Mode>) -> Self {
        self.connector.modes = modes;
        self
    }

    /// Binds the connector's encoder to `crtc`.
    pub fn with_current_crtc(mut self, crtc: u32) -> Self {
        self.connector.current_encoder = Some(handle(ENCODER));
        self.encoder_crtc = Some(handle(crtc));
        self
    }

    pub fn with_encoder_mask(mut self, mask: u32) -> Self {
        self.encoder_mask = mask;
        self
    }

    pub fn with_plane_type(mut self, plane: u32, ty: u64) -> Self {
        if let Some(props) = self.properties.get_mut(&KmsObject::Plane(handle(plane))) {
            for (id, value) in props {
                if *id == 300 {
                    *value = ty;
                }
            }
        }
        self
    }

    pub fn with_broken_properties(mut self, object: KmsObject) -> Self {
        self.broken_properties.push(object);
        self
    }

    /// Removes the property called `name` from every object.
    pub fn without_property(mut self, name: &str) -> Self {
        for props in self.properties.values_mut() {
            props.retain(|(id, _)| property_name(*id) != Some(name));
        }
        self
    }

    pub fn without_fences(self) -> Self {
        self.without_property("IN_FENCE_FD")
            .without_property("OUT_FENCE_PTR")
    }

    pub fn refusing_atomic(mut self) -> Self {
        self.refuse_atomic = true;
        self
    }

    pub fn rejecting_modifier_framebuffers(mut self) -> Self {
        self.reject_modifier_fbs = true;
        self
    }

    pub fn rejecting_legacy_framebuffers(mut self) -> Self {
        self.reject_legacy_fbs = true;
        self
    }

    /// The next `count` commits fail with `EBUSY`.
    pub fn rejecting_commits(self, count: usize) -> Self {
        self.commits_to_reject.set(count);
        self
    }

    pub fn into_device(self) -> MockDevice {
        MockDevice {
            state: Rc::new(self),
        }
    }

    pub fn prop_id(&self, name: &str) -> u32 {
        PROPERTIES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(id, _)| *id)
            .unwrap()
    }

    /// One `object property = value` line per assignment.
    pub fn describe(&self, txn: &CommitTransaction) -> String {
        txn.assignments()
            .iter()
            .map(|a| {
                let name = property_name(a.property.into()).unwrap_or("?");
                format!("{} {name} = {}", a.object, a.value)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn added_framebuffers(&self) -> usize {
        self.added_fbs.get()
    }

    pub fn removed_framebuffers(&self) -> usize {
        self.removed_fbs.get()
    }

    fn next_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub state: Rc<MockState>,
}

impl KmsDevice for MockDevice {
    fn enable_capability(&self, cap: ClientCapability) -> io::Result<()> {
        if self.state.refuse_atomic && matches!(cap, ClientCapability::Atomic) {
            return Err(errno(libc::EOPNOTSUPP));
        }
        Ok(())
    }

    fn resources(&self) -> io::Result<Resources> {
        self.state
            .resources
            .clone()
            .ok_or_else(|| errno(libc::EOPNOTSUPP))
    }

    fn connector_info(&self, connector: connector::Handle) -> io::Result<ConnectorInfo> {
        if connector != self.state.connector.handle {
            return Err(errno(libc::ENOENT));
        }
        Ok(self.state.connector.clone())
    }

    fn encoder_info(&self, encoder: encoder::Handle) -> io::Result<EncoderInfo> {
        if encoder != handle(ENCODER) {
            return Err(errno(libc::ENOENT));
        }
        Ok(EncoderInfo {
            handle: encoder,
            crtc: self.state.encoder_crtc,
            possible_crtcs: self.state.encoder_mask,
        })
    }

    fn plane_list(&self) -> io::Result<Vec<plane::Handle>> {
        Ok(self.state.planes.iter().map(|info| info.handle).collect())
    }

    fn plane_info(&self, plane: plane::Handle) -> io::Result<PlaneInfo> {
        self.state
            .planes
            .iter()
            .find(|info| info.handle == plane)
            .copied()
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn object_properties(
        &self,
        object: KmsObject,
    ) -> io::Result<Vec<(property::Handle, property::RawValue)>> {
        if self.state.broken_properties.contains(&object) {
            return Err(errno(libc::EIO));
        }

        let props = self
            .state
            .properties
            .get(&object)
            .ok_or_else(|| errno(libc::ENOENT))?;
        Ok(props.iter().map(|&(id, value)| (prop(id), value)).collect())
    }

    fn property_name(&self, property: property::Handle) -> io::Result<String> {
        property_name(property.into())
            .map(String::from)
            .ok_or_else(|| errno(libc::ENOENT))
    }

    fn create_mode_blob(&self, _mode: &control::Mode) -> io::Result<property::RawValue> {
        let id = u64::from(self.state.next_id());
        self.state.log.push(Event::CreateBlob(id));
        Ok(id)
    }

    fn destroy_blob(&self, blob: property::RawValue) -> io::Result<()> {
        self.state.log.push(Event::DestroyBlob(blob));
        Ok(())
    }

    fn add_framebuffer(
        &self,
        request: &FramebufferRequest,
        with_modifiers: bool,
    ) -> io::Result<framebuffer::Handle> {
        self.state.log.push(Event::AddFramebuffer {
            request: *request,
            modifiers: with_modifiers,
        });

        let rejected = if with_modifiers {
            self.state.reject_modifier_fbs
        } else {
            self.state.reject_legacy_fbs
        };
        if rejected {
            return Err(errno(libc::EINVAL));
        }

        self.state.added_fbs.set(self.state.added_fbs.get() + 1);
        Ok(handle(self.state.next_id()))
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        self.state.removed_fbs.set(self.state.removed_fbs.get() + 1);
        self.state.log.push(Event::RemoveFramebuffer(fb.into()));
        Ok(())
    }

    fn commit(&self, txn: &CommitTransaction) -> io::Result<Option<OwnedFd>> {
        let modeset = txn.flags().contains(AtomicCommitFlags::ALLOW_MODESET);

        let to_reject = self.state.commits_to_reject.get();
        if to_reject > 0 {
            self.state.commits_to_reject.set(to_reject - 1);
            self.state.log.push(Event::Rejected { modeset });
            return Err(errno(libc::EBUSY));
        }

        let in_fence_prop = prop(self.state.prop_id("IN_FENCE_FD"));
        let in_fence = txn.assignments().iter().any(|a| a.property == in_fence_prop);
        let out_fence = txn.out_fence().is_some();

        self.state.log.push(Event::Commit {
            modeset,
            in_fence,
            out_fence,
        });
        self.state.commits.borrow_mut().push(txn.clone());

        Ok(out_fence.then(null_fd))
    }
}

// =============================================================================
// Opener
// =============================================================================

#[derive(Debug, Default)]
pub struct MockOpener {
    /// Devices without state only have a render node.
    devices: Vec<(PathBuf, Option<Rc<MockState>>)>,
    opened: RefCell<Vec<PathBuf>>,
}

impl MockOpener {
    pub fn with_device(mut self, path: impl Into<PathBuf>, state: Rc<MockState>) -> Self {
        self.devices.push((path.into(), Some(state)));
        self
    }

    pub fn with_render_only(mut self, path: impl Into<PathBuf>) -> Self {
        self.devices.push((path.into(), None));
        self
    }

    /// Paths passed to `open`, in order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.borrow().clone()
    }
}

impl DeviceOpener for MockOpener {
    type Device = MockDevice;

    fn candidates(&self) -> io::Result<Vec<DeviceCandidate>> {
        Ok(self
            .devices
            .iter()
            .map(|(path, state)| DeviceCandidate {
                path: path.clone(),
                has_primary_node: state.is_some(),
            })
            .collect())
    }

    fn open(&self, path: &Path) -> io::Result<MockDevice> {
        self.opened.borrow_mut().push(path.to_owned());

        match self.devices.iter().find(|(p, _)| p == path) {
            Some((_, Some(state))) => Ok(MockDevice {
                state: state.clone(),
            }),
            Some((_, None)) => Err(errno(libc::EACCES)),
            None => Err(errno(libc::ENOENT)),
        }
    }
}

// =============================================================================
// Allocator
// =============================================================================

#[derive(Debug)]
pub struct MockBuffer {
    pub id: BufferId,
    pub size: (u32, u32),
    pub format: Fourcc,
    pub modifier: Modifier,
    planes: usize,
    /// Set on buffers locked from a surface.
    release: Option<EventLog>,
}

impl PlanarBuffer for MockBuffer {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> Fourcc {
        self.format
    }

    fn modifier(&self) -> Option<Modifier> {
        match self.modifier {
            Modifier::Invalid => None,
            modifier => Some(modifier),
        }
    }

    fn pitches(&self) -> [u32; 4] {
        let mut pitches = [0; 4];
        for pitch in pitches.iter_mut().take(self.planes) {
            *pitch = self.size.0 * 4;
        }
        pitches
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        let mut handles = [None; 4];
        for (idx, h) in handles.iter_mut().enumerate().take(self.planes) {
            *h = Some(handle(1000 + self.id as u32 * 4 + idx as u32));
        }
        handles
    }

    fn offsets(&self) -> [u32; 4] {
        let mut offsets = [0; 4];
        for (idx, offset) in offsets.iter_mut().enumerate().take(self.planes) {
            *offset = idx as u32 * self.size.0 * self.size.1;
        }
        offsets
    }
}

impl ScanoutBuffer for MockBuffer {
    fn id(&self) -> BufferId {
        self.id
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        if let Some(log) = &self.release {
            log.push(Event::Release(self.id));
        }
    }
}

#[derive(Debug)]
pub struct MockSurface {
    log: EventLog,
    size: (u32, u32),
    format: Fourcc,
    modifier: Modifier,
    planes: usize,
    locks: usize,
}

impl FrontBufferSource for MockSurface {
    type Buffer = MockBuffer;

    fn lock_front_buffer(&mut self) -> io::Result<MockBuffer> {
        let id = self.locks % SURFACE_BUFFERS;
        self.locks += 1;
        self.log.push(Event::Lock(id));

        Ok(MockBuffer {
            id,
            size: self.size,
            format: self.format,
            modifier: self.modifier,
            planes: self.planes,
            release: Some(self.log.clone()),
        })
    }
}

#[derive(Debug)]
pub struct MockAllocator {
    pub log: EventLog,
    reject_modifiers: bool,
    reject_implicit: bool,
    planes: usize,
    next_id: Cell<BufferId>,
}

impl Default for MockAllocator {
    fn default() -> Self {
        Self::with_log(EventLog::default())
    }
}

impl MockAllocator {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            reject_modifiers: false,
            reject_implicit: false,
            planes: 1,
            next_id: Cell::new(100),
        }
    }

    pub fn rejecting_modifiers(mut self) -> Self {
        self.reject_modifiers = true;
        self
    }

    pub fn rejecting_implicit(mut self) -> Self {
        self.reject_implicit = true;
        self
    }

    pub fn with_planes(mut self, planes: usize) -> Self {
        self.planes = planes;
        self
    }

    /// Number of distinct buffers a surface hands out.
    pub fn surface_buffers(&self) -> usize {
        SURFACE_BUFFERS
    }

    fn buffer(&self, width: u32, height: u32, format: Fourcc, modifier: Modifier) -> MockBuffer {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        MockBuffer {
            id,
            size: (width, height),
            format,
            modifier,
            planes: self.planes,
            release: None,
        }
    }

    fn surface(&self, width: u32, height: u32, format: Fourcc, modifier: Modifier) -> MockSurface {
        MockSurface {
            log: self.log.clone(),
            size: (width, height),
            format,
            modifier,
            planes: self.planes,
            locks: 0,
        }
    }
}

impl BufferAllocator for MockAllocator {
    type Buffer = MockBuffer;
    type Surface = MockSurface;

    fn new_buffer_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: &[Modifier],
    ) -> io::Result<MockBuffer> {
        let modifier = modifiers[0];
        self.log.push(Event::AllocModifiers(modifier));
        if self.reject_modifiers {
            return Err(errno(libc::EINVAL));
        }
        Ok(self.buffer(width, height, format, modifier))
    }

    fn new_buffer(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        _usage: BufferObjectFlags,
    ) -> io::Result<MockBuffer> {
        self.log.push(Event::AllocImplicit);
        if self.reject_implicit {
            return Err(errno(libc::EINVAL));
        }
        Ok(self.buffer(width, height, format, Modifier::Invalid))
    }

    fn new_surface_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        modifiers: &[Modifier],
    ) -> io::Result<MockSurface> {
        let modifier = modifiers[0];
        self.log.push(Event::SurfaceModifiers(modifier));
        if self.reject_modifiers {
            return Err(errno(libc::EINVAL));
        }
        Ok(self.surface(width, height, format, modifier))
    }

    fn new_surface(
        &self,
        width: u32,
        height: u32,
        format: Fourcc,
        _usage: BufferObjectFlags,
    ) -> io::Result<MockSurface> {
        self.log.push(Event::SurfaceImplicit);
        if self.reject_implicit {
            return Err(errno(libc::EINVAL));
        }
        Ok(self.surface(width, height, format, Modifier::Invalid))
    }
}

// =============================================================================
// Renderer
// =============================================================================

#[derive(Debug)]
pub struct MockRenderer {
    log: EventLog,
    fences: bool,
    fail_at: Option<u64>,
}

impl MockRenderer {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fences: true,
            fail_at: None,
        }
    }

    pub fn without_fences(mut self) -> Self {
        self.fences = false;
        self
    }

    pub fn failing_at(mut self, frame: u64) -> Self {
        self.fail_at = Some(frame);
        self
    }
}

impl FrameRenderer<MockAllocator> for MockRenderer {
    fn supports_native_fences(&self) -> bool {
        self.fences
    }

    fn wait_for_scanout(&mut self, _fence: &SyncFence) -> anyhow::Result<()> {
        self.log.push(Event::GpuWait);
        Ok(())
    }

    fn render(
        &mut self,
        _target: RenderTarget<'_, MockAllocator>,
        frame: u64,
    ) -> anyhow::Result<SyncFence> {
        if self.fail_at == Some(frame) {
            bail!("context lost");
        }
        self.log.push(Event::Render(frame));
        Ok(SyncFence::new(null_fd()))
    }
}

#[derive(Debug)]
pub struct MockWaiter {
    log: EventLog,
}

impl MockWaiter {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl FenceWaiter for MockWaiter {
    fn wait(&mut self, _fence: &SyncFence) -> io::Result<()> {
        self.log.push(Event::Wait);
        Ok(())
    }
}
