/// Scanner session lifecycle: binding the shared event buffer to the native scanner
///
/// The session owns the [`EventDispatcher`] so callback registrations outlive
/// any number of `free`/`init` cycles. Each `init` starts a new binding
/// generation; notifications carrying an older generation are rejected, and
/// the buffer is reference counted so a `free` racing an in-flight dispatch
/// never releases memory the dispatcher is still reading.
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::bluetooth::dispatcher::EventDispatcher;
use crate::bluetooth::layout::{EventBuffer, BEACON_INFO_SIZE};
use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::models::{ByteOrder, ScanMode, SessionState};

/// Opaque id the backend assigns to an allocated scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHandle(pub u64);

/// Everything a backend needs to run a scanner for one allocation
pub struct ScannerBinding {
    pub buffer: Arc<EventBuffer>,
    pub device: u16,
    pub mode: ScanMode,
    pub sink: NotificationSink,
}

/// Platform adapter for the native scanning process
pub trait ScannerBackend: Send + Sync {
    /// Start scanning on `binding.device`, writing events into `binding.buffer`
    /// and announcing each one through `binding.sink`.
    fn alloc(&self, binding: ScannerBinding) -> Result<BackendHandle, ScanError>;

    /// Stop the scanner and release the backend's reference to the buffer
    fn free(&self, handle: BackendHandle) -> Result<(), ScanError>;

    /// Verbose output from the native scanner; no effect on decoding
    fn enable_debug(&self, flag: bool);
}

struct Binding {
    state: SessionState,
    generation: u64,
    buffer: Option<Arc<EventBuffer>>,
    handle: Option<BackendHandle>,
    mode: Option<ScanMode>,
    device: Option<u16>,
}

struct SessionCore {
    dispatcher: EventDispatcher,
    binding: RwLock<Binding>,
}

impl SessionCore {
    fn read(&self) -> RwLockReadGuard<'_, Binding> {
        self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Binding> {
        self.binding.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle the native scanner thread calls once per event written to the buffer
#[derive(Clone)]
pub struct NotificationSink {
    core: Arc<SessionCore>,
    generation: u64,
}

impl NotificationSink {
    /// True while the allocation this sink was created for is still bound
    pub fn is_current(&self) -> bool {
        let binding = self.core.read();
        binding.state == SessionState::Allocated && binding.generation == self.generation
    }

    /// Dispatch the event the scanner just wrote.
    ///
    /// Returns `Ok(true)` without dispatching when the allocation has been
    /// freed or replaced, telling the stale scanner to stop.
    pub fn notify(&self) -> Result<bool, ScanError> {
        let buffer = {
            let binding = self.core.read();
            match &binding.buffer {
                Some(buffer)
                    if binding.state == SessionState::Allocated
                        && binding.generation == self.generation =>
                {
                    Arc::clone(buffer)
                }
                _ => {
                    debug!(
                        "Dropping notification for generation {} (current {}, {:?})",
                        self.generation, binding.generation, binding.state
                    );
                    return Ok(true);
                }
            }
        };
        self.core.dispatcher.notify(&buffer)
    }
}

/// Parse the device index from an interface name such as `hci0`
pub fn parse_device_index(hci_device: &str) -> Result<u16, ScanError> {
    let prefix_len = hci_device
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .len();
    hci_device[prefix_len..].parse().map_err(|_| {
        ScanError::Config(format!(
            "device '{}' does not end with a device number",
            hci_device
        ))
    })
}

pub struct ScannerSession<B: ScannerBackend> {
    backend: B,
    core: Arc<SessionCore>,
    debug: AtomicBool,
}

impl<B: ScannerBackend> ScannerSession<B> {
    pub fn new(backend: B, scanner_id: &str) -> Self {
        let core = SessionCore {
            dispatcher: EventDispatcher::new(scanner_id),
            binding: RwLock::new(Binding {
                state: SessionState::Unallocated,
                generation: 0,
                buffer: None,
                handle: None,
                mode: None,
                device: None,
            }),
        };
        ScannerSession {
            backend,
            core: Arc::new(core),
            debug: AtomicBool::new(false),
        }
    }

    /// Callback registration, shared across buffer reallocations
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.core.dispatcher
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> SessionState {
        self.core.read().state
    }

    /// Mode chosen by the most recent `init`
    pub fn mode(&self) -> Option<ScanMode> {
        self.core.read().mode
    }

    pub fn device(&self) -> Option<u16> {
        self.core.read().device
    }

    /// Allocate a buffer and bind it to the scanner on `device`.
    ///
    /// The scanner runs in general mode if an advertising event callback is
    /// registered at this moment, otherwise in beacon-only mode.
    ///
    /// # Errors
    /// [`ScanError::Lifecycle`] if the session is already allocated, or the
    /// backend's error if it cannot start the scanner.
    pub fn init(&self, device: u16, capacity: usize, order: ByteOrder) -> Result<(), ScanError> {
        let mode = if self.core.dispatcher.has_advert_event_callback() {
            ScanMode::General
        } else {
            ScanMode::BeaconOnly
        };
        let buffer = Arc::new(EventBuffer::new(capacity, order));

        let (generation, previous) = {
            let mut binding = self.core.write();
            if binding.state == SessionState::Allocated {
                return Err(ScanError::Lifecycle {
                    operation: "init",
                    state: binding.state,
                });
            }
            let previous = (binding.state, binding.mode, binding.device);
            binding.generation += 1;
            binding.state = SessionState::Allocated;
            binding.buffer = Some(Arc::clone(&buffer));
            binding.mode = Some(mode);
            binding.device = Some(device);
            (binding.generation, previous)
        };

        let sink = NotificationSink {
            core: Arc::clone(&self.core),
            generation,
        };
        let result = self.backend.alloc(ScannerBinding {
            buffer,
            device,
            mode,
            sink,
        });

        match result {
            Ok(handle) => {
                let superseded = {
                    let mut binding = self.core.write();
                    if binding.generation == generation {
                        binding.handle = Some(handle);
                        false
                    } else {
                        true
                    }
                };
                if superseded {
                    // Freed while the backend was starting
                    warn!("Scanner on device {} freed during init", device);
                    self.backend.free(handle)?;
                } else {
                    info!(
                        "Scanner allocated on device {} ({:?}, {} byte {:?} buffer)",
                        device, mode, capacity, order
                    );
                }
                Ok(())
            }
            Err(e) => {
                let mut binding = self.core.write();
                if binding.generation == generation {
                    let (state, mode, device) = previous;
                    binding.generation += 1;
                    binding.state = state;
                    binding.mode = mode;
                    binding.device = device;
                    binding.buffer = None;
                }
                error!("Failed to allocate scanner on device {}: {}", device, e);
                Err(e)
            }
        }
    }

    /// Legacy beacon-only setup: an 80 byte little endian buffer
    pub fn init_legacy(&self, device: u16) -> Result<(), ScanError> {
        self.init(device, BEACON_INFO_SIZE, ByteOrder::LittleEndian)
    }

    pub fn init_from_config(&self, config: &ScannerConfig) -> Result<(), ScanError> {
        let device = parse_device_index(&config.hci_device)?;
        self.enable_debug_mode(config.debug);
        self.init(device, config.buffer_size, config.byte_order)
    }

    /// Unbind and release the buffer. Callback registrations are kept.
    ///
    /// If the backend fails to stop the scanner the session stays allocated,
    /// still bound to the running scanner, so `free` can be retried.
    ///
    /// # Errors
    /// [`ScanError::Lifecycle`] unless the session is allocated, or the
    /// backend's error if it cannot stop the scanner.
    pub fn free(&self) -> Result<(), ScanError> {
        let (generation, buffer, handle) = {
            let mut binding = self.core.write();
            if binding.state != SessionState::Allocated {
                return Err(ScanError::Lifecycle {
                    operation: "free",
                    state: binding.state,
                });
            }
            let generation = binding.generation;
            binding.state = SessionState::Freed;
            binding.generation += 1;
            (generation, binding.buffer.take(), binding.handle.take())
        };

        if let Some(handle) = handle {
            if let Err(e) = self.backend.free(handle) {
                let mut binding = self.core.write();
                // Nothing re-bound the session while the backend was busy
                if binding.generation == generation + 1 {
                    binding.state = SessionState::Allocated;
                    binding.generation = generation;
                    binding.buffer = buffer;
                    binding.handle = Some(handle);
                }
                error!("Failed to free scanner {}: {}", handle.0, e);
                return Err(e);
            }
        }
        info!("Scanner freed");
        Ok(())
    }

    pub fn enable_debug_mode(&self, flag: bool) {
        self.debug.store(flag, Ordering::SeqCst);
        self.backend.enable_debug(flag);
    }

    pub fn debug_mode(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }
}

impl<B: ScannerBackend> Drop for ScannerSession<B> {
    fn drop(&mut self) {
        if self.state() == SessionState::Allocated {
            if let Err(e) = self.free() {
                error!("Failed to free scanner on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Backend that records calls and keeps the last binding
    #[derive(Default)]
    struct RecordingBackend {
        bindings: Mutex<Vec<(u16, ScanMode, NotificationSink)>>,
        freed: Mutex<Vec<BackendHandle>>,
        debug: AtomicBool,
        fail_alloc: AtomicBool,
        fail_next_free: AtomicBool,
    }

    impl ScannerBackend for RecordingBackend {
        fn alloc(&self, binding: ScannerBinding) -> Result<BackendHandle, ScanError> {
            if self.fail_alloc.load(Ordering::SeqCst) {
                return Err(ScanError::Backend("no such device".to_string()));
            }
            let mut bindings = self.bindings.lock().unwrap();
            bindings.push((binding.device, binding.mode, binding.sink));
            Ok(BackendHandle(bindings.len() as u64))
        }

        fn free(&self, handle: BackendHandle) -> Result<(), ScanError> {
            if self.fail_next_free.swap(false, Ordering::SeqCst) {
                return Err(ScanError::Backend("device busy".to_string()));
            }
            self.freed.lock().unwrap().push(handle);
            Ok(())
        }

        fn enable_debug(&self, flag: bool) {
            self.debug.store(flag, Ordering::SeqCst);
        }
    }

    #[test]
    fn mode_follows_advert_registration() {
        let session = ScannerSession::new(RecordingBackend::default(), "scanner");
        session.init_legacy(0).unwrap();
        assert_eq!(session.mode(), Some(ScanMode::BeaconOnly));
        session.free().unwrap();

        session.dispatcher().set_advert_event_callback(|_| Ok(false));
        session.init(1, 512, ByteOrder::BigEndian).unwrap();
        assert_eq!(session.mode(), Some(ScanMode::General));
        assert_eq!(session.device(), Some(1));
    }

    #[test]
    fn lifecycle_transitions() {
        let session = ScannerSession::new(RecordingBackend::default(), "scanner");
        assert_eq!(session.state(), SessionState::Unallocated);
        assert!(matches!(session.free(), Err(ScanError::Lifecycle { .. })));

        session.init_legacy(0).unwrap();
        assert_eq!(session.state(), SessionState::Allocated);
        assert!(matches!(
            session.init_legacy(0),
            Err(ScanError::Lifecycle {
                operation: "init",
                ..
            })
        ));

        session.free().unwrap();
        assert_eq!(session.state(), SessionState::Freed);
        assert_eq!(
            *session.backend().freed.lock().unwrap(),
            vec![BackendHandle(1)]
        );

        session.init_legacy(0).unwrap();
        assert_eq!(session.state(), SessionState::Allocated);
    }

    #[test]
    fn stale_sink_is_rejected_after_reinit() {
        let session = ScannerSession::new(RecordingBackend::default(), "scanner");
        session.init_legacy(0).unwrap();
        session.free().unwrap();
        session.init_legacy(0).unwrap();

        let bindings = session.backend().bindings.lock().unwrap();
        let (stale, current) = (&bindings[0].2, &bindings[1].2);
        assert!(!stale.is_current());
        assert!(current.is_current());
        assert!(stale.notify().unwrap());
        assert_eq!(session.dispatcher().event_count(), 0);

        assert!(!current.notify().unwrap());
        assert_eq!(session.dispatcher().event_count(), 1);
    }

    #[test]
    fn failed_alloc_restores_state() {
        let session = ScannerSession::new(RecordingBackend::default(), "scanner");
        session.backend().fail_alloc.store(true, Ordering::SeqCst);
        assert!(matches!(session.init_legacy(0), Err(ScanError::Backend(_))));
        assert_eq!(session.state(), SessionState::Unallocated);
        assert_eq!(session.mode(), None);
        assert_eq!(session.device(), None);

        session.backend().fail_alloc.store(false, Ordering::SeqCst);
        session.init_legacy(0).unwrap();
        assert_eq!(session.state(), SessionState::Allocated);
    }

    #[test]
    fn failed_alloc_after_free_keeps_previous_binding_info() {
        let session = ScannerSession::new(RecordingBackend::default(), "scanner");
        session.init_legacy(2).unwrap();
        session.free().unwrap();

        session.backend().fail_alloc.store(true, Ordering::SeqCst);
        session.dispatcher().set_advert_event_callback(|_| Ok(false));
        assert!(session.init(5, 512, ByteOrder::BigEndian).is_err());
        assert_eq!(session.state(), SessionState::Freed);
        assert_eq!(session.mode(), Some(ScanMode::BeaconOnly));
        assert_eq!(session.device(), Some(2));
    }

    #[test]
    fn failed_backend_free_keeps_session_allocated() {
        let session = ScannerSession::new(RecordingBackend::default(), "scanner");
        session.init_legacy(0).unwrap();

        session.backend().fail_next_free.store(true, Ordering::SeqCst);
        assert!(matches!(session.free(), Err(ScanError::Backend(_))));
        assert_eq!(session.state(), SessionState::Allocated);

        // The running scanner is still the bound one
        {
            let bindings = session.backend().bindings.lock().unwrap();
            assert!(bindings[0].2.is_current());
            assert!(!bindings[0].2.notify().unwrap());
        }

        session.free().unwrap();
        assert_eq!(session.state(), SessionState::Freed);
        assert_eq!(
            *session.backend().freed.lock().unwrap(),
            vec![BackendHandle(1)]
        );

        session.init_legacy(0).unwrap();
        session.free().unwrap();
        assert_eq!(
            *session.backend().freed.lock().unwrap(),
            vec![BackendHandle(1), BackendHandle(2)]
        );
    }

    #[test]
    fn debug_flag_is_forwarded() {
        let session = ScannerSession::new(RecordingBackend::default(), "scanner");
        session.enable_debug_mode(true);
        assert!(session.debug_mode());
        assert!(session.backend().debug.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Unallocated);
    }

    #[test]
    fn device_index_from_interface_name() {
        assert_eq!(parse_device_index("hci0").unwrap(), 0);
        assert_eq!(parse_device_index("hci12").unwrap(), 12);
        assert_eq!(parse_device_index("3").unwrap(), 3);
        assert!(matches!(parse_device_index("hci"), Err(ScanError::Config(_))));
    }
}
