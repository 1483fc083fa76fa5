/// In-process scanner backend that plays the role of the native scanning process
///
/// Events are supplied as already-encoded buffer images (see
/// [`crate::bluetooth::layout`]); `deliver` writes each one into the bound
/// buffer and notifies the session on the calling thread, exactly as the
/// native scanner thread would.
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::bluetooth::scanner::{BackendHandle, NotificationSink, ScannerBackend, ScannerBinding};
use crate::error::ScanError;
use crate::models::ScanMode;

struct Active {
    handle: BackendHandle,
    binding: ScannerBinding,
}

#[derive(Default)]
struct LoopbackState {
    active: Mutex<Option<Active>>,
    next_handle: AtomicU64,
    debug: AtomicBool,
    delivered: AtomicU64,
}

/// Cloneable handle; every clone drives the same simulated scanner
#[derive(Clone, Default)]
pub struct LoopbackBackend {
    state: Arc<LoopbackState>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Mode requested by the current allocation
    pub fn bound_mode(&self) -> Option<ScanMode> {
        self.lock_active().as_ref().map(|active| active.binding.mode)
    }

    pub fn debug_enabled(&self) -> bool {
        self.state.debug.load(Ordering::SeqCst)
    }

    /// Events written into a bound buffer so far
    pub fn delivered(&self) -> u64 {
        self.state.delivered.load(Ordering::SeqCst)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.state
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `event` into the bound buffer and notify the session.
    ///
    /// Bytes past the event are zeroed. Returns the session's stop signal.
    ///
    /// # Errors
    /// [`ScanError::Backend`] if no scanner is allocated,
    /// [`ScanError::Bounds`] if the event does not fit the buffer, or any
    /// error the session's dispatch returns.
    pub fn deliver(&self, event: &[u8]) -> Result<bool, ScanError> {
        let (buffer, sink): (_, NotificationSink) = {
            let active = self.lock_active();
            let active = active
                .as_ref()
                .ok_or_else(|| ScanError::Backend("scanner not allocated".to_string()))?;
            (Arc::clone(&active.binding.buffer), active.binding.sink.clone())
        };

        buffer.fill(|bytes| {
            if event.len() > bytes.len() {
                return Err(ScanError::bounds(0, event.len(), bytes.len()));
            }
            bytes[..event.len()].copy_from_slice(event);
            bytes[event.len()..].fill(0);
            Ok(())
        })?;
        self.state.delivered.fetch_add(1, Ordering::SeqCst);

        if self.debug_enabled() {
            debug!("loopback: delivered {} byte event", event.len());
        }
        sink.notify()
    }
}

impl ScannerBackend for LoopbackBackend {
    fn alloc(&self, binding: ScannerBinding) -> Result<BackendHandle, ScanError> {
        let mut active = self.lock_active();
        if active.is_some() {
            return Err(ScanError::Backend("scanner already running".to_string()));
        }
        let handle = BackendHandle(self.state.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        info!(
            "loopback: scanner {} started on device {} in {:?} mode",
            handle.0, binding.device, binding.mode
        );
        *active = Some(Active { handle, binding });
        Ok(handle)
    }

    fn free(&self, handle: BackendHandle) -> Result<(), ScanError> {
        let mut active = self.lock_active();
        match active.as_ref() {
            Some(current) if current.handle == handle => {
                *active = None;
                info!("loopback: scanner {} stopped", handle.0);
                Ok(())
            }
            _ => Err(ScanError::Backend(format!(
                "unknown scanner handle {}",
                handle.0
            ))),
        }
    }

    fn enable_debug(&self, flag: bool) {
        self.state.debug.store(flag, Ordering::SeqCst);
    }
}
