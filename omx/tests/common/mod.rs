// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! In-process codec core used by the integration tests.
//!
//! [`FakeCore`] hands out [`FakeHardware`] instances that behave like a well
//! mannered codec component: commands are acknowledged from a worker thread,
//! buffer headers are real heap records, and input buffers are emptied right
//! away unless told otherwise. Knobs on [`FakeHardware`] simulate the
//! misbehaviour the lifecycle code has to survive.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    ffi::c_void,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

use omx::{
    Command, Component, ComponentConfig, ComponentHandle, CoreApi, CoreLoader, CoreRegistry,
    Direction, Error, ErrorCode, EventBridge, ExternalAllocator, NativeMemory, OmxResult, Parent,
    Port, State, Timeouts,
};
use parking_lot::Mutex;

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

pub const CORE_PATH: &str = "/fake/libOmxCore.so";
pub const COMPONENT_NAME: &str = "OMX.fake.video.decoder";
pub const MISSING_COMPONENT: &str = "OMX.fake.missing";
pub const INPUT: u32 = 0;
pub const OUTPUT: u32 = 1;
pub const PRODUCED_LEN: u32 = 16;

pub fn init_logging() {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .init();
    });
}

/// Buffer layout of one fake port.
#[derive(Debug, Clone, Copy)]
pub struct PortSetup {
    pub index: u32,
    pub direction: Direction,
    pub count: u32,
    pub min: u32,
    pub size: u32,
}

impl PortSetup {
    pub fn input(count: u32) -> Self {
        Self {
            index: INPUT,
            direction: Direction::Input,
            count,
            min: 2,
            size: 4096,
        }
    }

    pub fn output(count: u32) -> Self {
        Self {
            index: OUTPUT,
            direction: Direction::Output,
            count,
            min: 2,
            size: 8192,
        }
    }

    fn definition(&self) -> omx_sys::ParamPortDefinition {
        omx_sys::ParamPortDefinition {
            nPortIndex: self.index,
            eDir: self.direction.as_raw(),
            nBufferCountActual: self.count,
            nBufferCountMin: self.min,
            nBufferSize: self.size,
            bEnabled: omx_sys::OMX_TRUE,
            ..Default::default()
        }
    }
}

/// A codec core module with init/deinit bookkeeping.
pub struct FakeCore {
    pub inits: AtomicUsize,
    pub deinits: AtomicUsize,
    /// Init while initialized or deinit while not initialized.
    pub violations: AtomicUsize,
    pub fail_init: AtomicBool,
    initialized: AtomicBool,
    ports: Vec<PortSetup>,
    hardware: Mutex<Vec<Arc<FakeHardware>>>,
}

impl FakeCore {
    pub fn new(ports: Vec<PortSetup>) -> Arc<Self> {
        Arc::new(Self {
            inits: AtomicUsize::new(0),
            deinits: AtomicUsize::new(0),
            violations: AtomicUsize::new(0),
            fail_init: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            ports,
            hardware: Mutex::new(Vec::new()),
        })
    }

    /// The most recently created component instance.
    pub fn last_hardware(&self) -> Arc<FakeHardware> {
        self.hardware
            .lock()
            .last()
            .cloned()
            .expect("no component was created")
    }
}

impl CoreApi for FakeCore {
    fn init(&self) -> OmxResult {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(ErrorCode::INSUFFICIENT_RESOURCES);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deinit(&self) -> OmxResult {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.deinits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_handle(
        &self,
        name: &str,
        bridge: Arc<EventBridge>,
    ) -> omx::Result<Box<dyn ComponentHandle>> {
        if name == MISSING_COMPONENT {
            return Err(Error::Omx(ErrorCode(omx_sys::OMX_ErrorComponentNotFound)));
        }
        let hardware = FakeHardware::new(bridge, &self.ports);
        self.hardware.lock().push(hardware.clone());
        Ok(Box::new(FakeHandle(hardware)))
    }
}

/// Loader handing out one shared [`FakeCore`] for every path but missing ones.
#[derive(Clone)]
pub struct FakeLoader {
    pub core: Arc<FakeCore>,
    pub loads: Arc<AtomicUsize>,
}

impl FakeLoader {
    pub fn new(core: Arc<FakeCore>) -> Self {
        Self {
            core,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CoreLoader for FakeLoader {
    fn load(&self, path: &Path) -> omx::Result<Arc<dyn CoreApi>> {
        if path.to_string_lossy().contains("missing") {
            return Err(Error::Load {
                path: path.to_path_buf(),
                reason: "cannot open shared object file".to_string(),
            });
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.core.clone())
    }
}

enum Callback {
    Event(omx_sys::EventType, u32, u32),
    EmptyDone(usize),
    FillDone(usize),
}

struct HwPort {
    definition: omx_sys::ParamPortDefinition,
    /// Headers currently owned by the fake, in arrival order.
    held: VecDeque<usize>,
}

// Safety: the definition carries no pointers the fake dereferences.
unsafe impl Send for HwPort {}

struct LiveHeader {
    port: u32,
    // Backing store of allocate_buffer headers; None for use_buffer.
    _memory: Option<Vec<u8>>,
}

struct HwState {
    state: State,
    ports: Vec<HwPort>,
    live: HashMap<usize, LiveHeader>,
    role: Option<String>,
    unresponsive: bool,
    manual_flush: bool,
    hold_input: bool,
    freed: bool,
}

impl HwState {
    fn port_mut(&mut self, index: u32) -> OmxResult<&mut HwPort> {
        self.ports
            .iter_mut()
            .find(|port| port.definition.nPortIndex == index)
            .ok_or(ErrorCode::BAD_PORT_INDEX)
    }
}

/// One fake component instance.
pub struct FakeHardware {
    inner: Mutex<HwState>,
    callbacks: mpsc::Sender<Callback>,
    pub commands: AtomicUsize,
    pub fills: AtomicUsize,
    pub empties: AtomicUsize,
    pub allocations: AtomicUsize,
    pub uses: AtomicUsize,
    pub frees: AtomicUsize,
}

impl FakeHardware {
    fn new(bridge: Arc<EventBridge>, ports: &[PortSetup]) -> Arc<Self> {
        let (callbacks, receiver) = mpsc::channel();
        std::thread::spawn(move || {
            for callback in receiver {
                match callback {
                    Callback::Event(event, data1, data2) => bridge.on_event(event, data1, data2),
                    Callback::EmptyDone(token) => bridge.on_empty_buffer_done(token as omx_sys::Ptr),
                    Callback::FillDone(token) => bridge.on_fill_buffer_done(token as omx_sys::Ptr),
                }
            }
        });

        Arc::new(Self {
            inner: Mutex::new(HwState {
                state: State::Loaded,
                ports: ports
                    .iter()
                    .map(|setup| HwPort {
                        definition: setup.definition(),
                        held: VecDeque::new(),
                    })
                    .collect(),
                live: HashMap::new(),
                role: None,
                unresponsive: false,
                manual_flush: false,
                hold_input: false,
                freed: false,
            }),
            callbacks,
            commands: AtomicUsize::new(0),
            fills: AtomicUsize::new(0),
            empties: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            uses: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        })
    }

    fn send(&self, callback: Callback) {
        // The worker only goes away together with the hardware.
        let _ = self.callbacks.send(callback);
    }

    fn ack(&self, command: omx_sys::CommandType, param: u32) {
        self.send(Callback::Event(omx_sys::OMX_EventCmdComplete, command, param));
    }

    /// Returns up to `max` held buffers of every port matching `index`.
    fn return_held(&self, hw: &mut HwState, index: u32, max: usize, filled: u32) -> usize {
        let mut returned = 0;
        for port in hw
            .ports
            .iter_mut()
            .filter(|port| index == omx_sys::OMX_ALL || port.definition.nPortIndex == index)
        {
            while returned < max {
                let Some(address) = port.held.pop_front() else {
                    break;
                };
                // Safety: held headers are live until freed.
                let header = unsafe { &mut *(address as *mut omx_sys::BufferHeader) };
                header.nOffset = 0;
                header.nFilledLen = filled.min(header.nAllocLen);
                let token = header.pAppPrivate as usize;
                if port.definition.eDir == omx_sys::OMX_DirInput {
                    header.nFilledLen = 0;
                    self.send(Callback::EmptyDone(token));
                } else {
                    self.send(Callback::FillDone(token));
                }
                returned += 1;
            }
        }
        returned
    }

    /// Fills up to `count` held output buffers and returns them.
    pub fn produce(&self, port: u32, count: usize) -> usize {
        let mut hw = self.inner.lock();
        self.return_held(&mut hw, port, count, PRODUCED_LEN)
    }

    /// Returns up to `count` held buffers of `port` without producing data.
    pub fn return_buffers(&self, port: u32, count: usize) -> usize {
        let mut hw = self.inner.lock();
        self.return_held(&mut hw, port, count, 0)
    }

    pub fn held(&self, port: u32) -> usize {
        self.inner
            .lock()
            .port_mut(port)
            .map_or(0, |port| port.held.len())
    }

    /// State changes are accepted but never acknowledged.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.inner.lock().unresponsive = unresponsive;
    }

    /// Flushes are acknowledged without returning held buffers.
    pub fn set_manual_flush(&self, manual: bool) {
        self.inner.lock().manual_flush = manual;
    }

    /// Input buffers stay with the fake until returned explicitly.
    pub fn set_hold_input(&self, hold: bool) {
        self.inner.lock().hold_input = hold;
    }

    /// Changes the buffer requirements of `port`, as a format change would.
    pub fn set_buffer_requirements(&self, port: u32, count: u32, size: u32) {
        let mut hw = self.inner.lock();
        if let Ok(port) = hw.port_mut(port) {
            port.definition.nBufferCountActual = count;
            port.definition.nBufferSize = size;
        }
    }

    pub fn emit_settings_changed(&self, port: u32) {
        self.send(Callback::Event(omx_sys::OMX_EventPortSettingsChanged, port, 0));
    }

    pub fn emit_error(&self, code: ErrorCode) {
        self.send(Callback::Event(omx_sys::OMX_EventError, code.raw(), 0));
    }

    pub fn role(&self) -> Option<String> {
        self.inner.lock().role.clone()
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub fn live_buffers(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_freed(&self) -> bool {
        self.inner.lock().freed
    }

    fn register(
        &self,
        port: u32,
        app_private: omx_sys::Ptr,
        size: u32,
        memory: Option<Vec<u8>>,
        external: *mut u8,
    ) -> OmxResult<*mut omx_sys::BufferHeader> {
        let mut hw = self.inner.lock();
        let port_def = hw.port_mut(port)?.definition;
        let mut header = omx_sys::BufferHeader {
            nSize: std::mem::size_of::<omx_sys::BufferHeader>() as u32,
            nVersion: omx_sys::VersionType::current(),
            pBuffer: external,
            nAllocLen: size,
            pAppPrivate: app_private,
            ..Default::default()
        };
        if port_def.eDir == omx_sys::OMX_DirInput {
            header.nInputPortIndex = port;
        } else {
            header.nOutputPortIndex = port;
        }
        let mut memory = memory;
        if let Some(memory) = memory.as_mut() {
            header.pBuffer = memory.as_mut_ptr();
        }
        let header = Box::into_raw(Box::new(header));
        hw.live.insert(
            header as usize,
            LiveHeader {
                port,
                _memory: memory,
            },
        );
        Ok(header)
    }
}

/// The [`ComponentHandle`] side of a [`FakeHardware`].
pub struct FakeHandle(Arc<FakeHardware>);

impl ComponentHandle for FakeHandle {
    fn send_command(&self, command: Command) -> OmxResult {
        let hardware = &self.0;
        hardware.commands.fetch_add(1, Ordering::SeqCst);
        let mut hw = hardware.inner.lock();
        let (raw, param) = command.as_raw();
        match command {
            Command::StateSet(target) => {
                if hw.unresponsive {
                    return Ok(());
                }
                if hw.state == State::Executing && target < State::Executing {
                    hardware.return_held(&mut hw, omx_sys::OMX_ALL, usize::MAX, 0);
                }
                hw.state = target;
                hardware.ack(raw, param);
            }
            Command::Flush(port) => {
                if port != omx_sys::OMX_ALL {
                    hw.port_mut(port)?;
                }
                if !hw.manual_flush {
                    hardware.return_held(&mut hw, port, usize::MAX, 0);
                }
                hardware.ack(raw, param);
            }
            Command::PortDisable(port) => {
                hw.port_mut(port)?;
                hardware.return_held(&mut hw, port, usize::MAX, 0);
                hw.port_mut(port)?.definition.bEnabled = omx_sys::OMX_FALSE;
                hardware.ack(raw, param);
            }
            Command::PortEnable(port) => {
                hw.port_mut(port)?.definition.bEnabled = omx_sys::OMX_TRUE;
                hardware.ack(raw, param);
            }
        }
        Ok(())
    }

    unsafe fn get_parameter(&self, index: omx_sys::IndexType, param: *mut c_void) -> OmxResult {
        match index {
            omx_sys::OMX_IndexParamPortDefinition => {
                // Safety: the caller passes a port definition for this index.
                let definition = unsafe { &mut *(param as *mut omx_sys::ParamPortDefinition) };
                let mut hw = self.0.inner.lock();
                let current = hw.port_mut(definition.nPortIndex)?.definition;
                let (size, version) = (definition.nSize, definition.nVersion);
                *definition = current;
                definition.nSize = size;
                definition.nVersion = version;
                Ok(())
            }
            _ => Err(ErrorCode::UNSUPPORTED_INDEX),
        }
    }

    unsafe fn set_parameter(&self, index: omx_sys::IndexType, param: *mut c_void) -> OmxResult {
        match index {
            omx_sys::OMX_IndexParamPortDefinition => {
                // Safety: see get_parameter.
                let definition = unsafe { &*(param as *const omx_sys::ParamPortDefinition) };
                let mut hw = self.0.inner.lock();
                let port = hw.port_mut(definition.nPortIndex)?;
                if definition.nBufferCountActual < port.definition.nBufferCountMin {
                    return Err(ErrorCode::BAD_PARAMETER);
                }
                port.definition.nBufferCountActual = definition.nBufferCountActual;
                Ok(())
            }
            omx_sys::OMX_IndexParamStandardComponentRole => {
                // Safety: the caller passes a role record for this index.
                let role = unsafe { &*(param as *const omx_sys::ParamComponentRole) };
                let len = role
                    .cRole
                    .iter()
                    .position(|byte| *byte == 0)
                    .unwrap_or(role.cRole.len());
                let role = String::from_utf8_lossy(&role.cRole[..len]).into_owned();
                if role.starts_with("unsupported") {
                    return Err(ErrorCode(omx_sys::OMX_ErrorUnsupportedSetting));
                }
                self.0.inner.lock().role = Some(role);
                Ok(())
            }
            _ => Err(ErrorCode::UNSUPPORTED_INDEX),
        }
    }

    unsafe fn get_config(&self, _index: omx_sys::IndexType, _config: *mut c_void) -> OmxResult {
        Err(ErrorCode::UNSUPPORTED_INDEX)
    }

    unsafe fn set_config(&self, _index: omx_sys::IndexType, _config: *mut c_void) -> OmxResult {
        Err(ErrorCode::UNSUPPORTED_INDEX)
    }

    fn get_state(&self) -> OmxResult<State> {
        Ok(self.0.inner.lock().state)
    }

    fn allocate_buffer(
        &self,
        port: u32,
        app_private: omx_sys::Ptr,
        size: u32,
    ) -> OmxResult<*mut omx_sys::BufferHeader> {
        let header = self.0.register(
            port,
            app_private,
            size,
            Some(vec![0; size as usize]),
            std::ptr::null_mut(),
        )?;
        self.0.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(header)
    }

    unsafe fn use_buffer(
        &self,
        port: u32,
        app_private: omx_sys::Ptr,
        size: u32,
        memory: *mut u8,
    ) -> OmxResult<*mut omx_sys::BufferHeader> {
        let header = self.0.register(port, app_private, size, None, memory)?;
        self.0.uses.fetch_add(1, Ordering::SeqCst);
        Ok(header)
    }

    unsafe fn free_buffer(&self, port: u32, header: *mut omx_sys::BufferHeader) -> OmxResult {
        let mut hw = self.0.inner.lock();
        let live = hw
            .live
            .remove(&(header as usize))
            .ok_or(ErrorCode::BAD_PARAMETER)?;
        if live.port != port {
            return Err(ErrorCode::BAD_PORT_INDEX);
        }
        for held in hw.ports.iter_mut() {
            held.held.retain(|address| *address != header as usize);
        }
        // Safety: the header was created by Box::into_raw in register.
        drop(unsafe { Box::from_raw(header) });
        self.0.frees.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn empty_this_buffer(&self, header: *mut omx_sys::BufferHeader) -> OmxResult {
        let hardware = &self.0;
        let mut hw = hardware.inner.lock();
        let port = hw
            .live
            .get(&(header as usize))
            .map(|live| live.port)
            .ok_or(ErrorCode::BAD_PARAMETER)?;
        hardware.empties.fetch_add(1, Ordering::SeqCst);
        let hold = hw.hold_input;
        hw.port_mut(port)?.held.push_back(header as usize);
        if !hold {
            hardware.return_held(&mut hw, port, usize::MAX, 0);
        }
        Ok(())
    }

    unsafe fn fill_this_buffer(&self, header: *mut omx_sys::BufferHeader) -> OmxResult {
        let hardware = &self.0;
        let mut hw = hardware.inner.lock();
        let port = hw
            .live
            .get(&(header as usize))
            .map(|live| live.port)
            .ok_or(ErrorCode::BAD_PARAMETER)?;
        hardware.fills.fetch_add(1, Ordering::SeqCst);
        hw.port_mut(port)?.held.push_back(header as usize);
        Ok(())
    }

    fn free(self: Box<Self>) -> OmxResult {
        self.0.inner.lock().freed = true;
        Ok(())
    }
}

/// Externally allocated memory backed by a plain vector.
pub struct TestMemory {
    data: Box<[u8]>,
    live: Arc<AtomicUsize>,
}

impl NativeMemory for TestMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    fn stride(&self) -> u32 {
        64
    }
}

impl Drop for TestMemory {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Allocator counting its live allocations.
#[derive(Default)]
pub struct TestAllocator {
    pub live: Arc<AtomicUsize>,
    pub allocated: AtomicUsize,
}

impl ExternalAllocator for TestAllocator {
    fn allocate(
        &self,
        definition: &omx_sys::ParamPortDefinition,
    ) -> omx::Result<Box<dyn NativeMemory>> {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestMemory {
            data: vec![0; definition.nBufferSize as usize].into_boxed_slice(),
            live: self.live.clone(),
        }))
    }
}

/// A component with an input and an output port on a private registry.
pub struct TestComponent {
    pub registry: CoreRegistry,
    pub core: Arc<FakeCore>,
    pub hardware: Arc<FakeHardware>,
    pub parent: Arc<dyn Parent>,
    pub component: Component,
    pub input: Port,
    pub output: Port,
}

pub fn test_config() -> ComponentConfig {
    ComponentConfig::new(CORE_PATH, COMPONENT_NAME)
        .with_role("video_decoder.avc")
        .with_timeouts(Timeouts::uniform(Duration::from_secs(5)))
}

/// Creates a component with both ports added, still in `Loaded`.
pub fn setup_test(
    test: &str,
    ports: Vec<PortSetup>,
    config: ComponentConfig,
    allocator: Option<Arc<dyn ExternalAllocator>>,
) -> TestComponent {
    init_logging();

    let core = FakeCore::new(ports);
    let registry = CoreRegistry::new(FakeLoader::new(core.clone()));
    let parent: Arc<dyn Parent> = Arc::new(format!("{test}-{}", uuid::Uuid::new_v4()));
    let component =
        Component::with_allocator(&registry, parent.clone(), &config, allocator).unwrap();
    let hardware = core.last_hardware();
    let input = component.add_port(INPUT).unwrap();
    let output = component.add_port(OUTPUT).unwrap();

    TestComponent {
        registry,
        core,
        hardware,
        parent,
        component,
        input,
        output,
    }
}

/// Like [`setup_test`] with three buffers per port, then brought to `Executing`.
pub fn running_component(test: &str) -> TestComponent {
    let test = setup_test(
        test,
        vec![PortSetup::input(3), PortSetup::output(3)],
        test_config(),
        None,
    );
    start(&test);
    test
}

/// Walks the component to `Executing` and stops flushing both ports.
pub fn start(test: &TestComponent) {
    let timeout = Some(Duration::from_secs(5));
    test.component.request_state(State::Idle).unwrap();
    test.input.allocate_buffers().unwrap();
    test.output.allocate_buffers().unwrap();
    assert_eq!(test.component.await_state(timeout).unwrap(), State::Idle);
    test.component.request_state(State::Executing).unwrap();
    assert_eq!(test.component.await_state(timeout).unwrap(), State::Executing);
    test.input.set_flushing(false).unwrap();
    test.output.set_flushing(false).unwrap();
}

/// Polls `condition` until it holds or two seconds passed.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
