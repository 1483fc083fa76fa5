/// Priority dispatch of scanner notifications to the registered callbacks
///
/// At most one callback runs per notification, chosen in this order:
/// 1. advertising event callback: decode errors and callback errors are returned to the caller
/// 2. raw event callback: failures are logged and the notification yields `false`
/// 3. beacon callback, or an info log of the record when none is set: failures are
///    logged and the notification yields `false`
use log::{debug, error, info};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::bluetooth::layout::{decode_advertising_event, decode_legacy, EventBuffer, EventView};
use crate::error::ScanError;
use crate::models::{AdvertisingEvent, Beacon};

/// Callback outcome: `Ok(true)` asks the scanner to stop, `Ok(false)` to continue
pub type CallbackResult = Result<bool, Box<dyn std::error::Error + Send + Sync>>;

pub type AdvertEventCallback = dyn Fn(&AdvertisingEvent) -> CallbackResult + Send + Sync;
/// The view is only valid for the duration of the call; copy out anything to keep
pub type RawEventCallback = dyn Fn(EventView<'_>) -> CallbackResult + Send + Sync;
pub type BeaconEventCallback = dyn Fn(&Beacon) -> CallbackResult + Send + Sync;

/// Stop signal for a notification whose raw or beacon callback failed
const STOP_ON_FAILURE: bool = false;

/// Immutable snapshot of the callback slots, replaced wholesale on every change
#[derive(Clone)]
struct Registrations {
    advert: Option<Arc<AdvertEventCallback>>,
    raw: Option<Arc<RawEventCallback>>,
    beacon: Option<Arc<BeaconEventCallback>>,
    scanner_id: Arc<str>,
}

pub struct EventDispatcher {
    registrations: RwLock<Arc<Registrations>>,
    event_count: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new("")
    }
}

impl EventDispatcher {
    pub fn new(scanner_id: &str) -> Self {
        let registrations = Registrations {
            advert: None,
            raw: None,
            beacon: None,
            scanner_id: Arc::from(scanner_id),
        };
        EventDispatcher {
            registrations: RwLock::new(Arc::new(registrations)),
            event_count: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Arc<Registrations> {
        Arc::clone(
            &self
                .registrations
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn update(&self, change: impl FnOnce(&mut Registrations)) {
        let mut slot = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Registrations::clone(&slot);
        change(&mut next);
        *slot = Arc::new(next);
    }

    pub fn set_advert_event_callback<F>(&self, callback: F)
    where
        F: Fn(&AdvertisingEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.update(|regs| regs.advert = Some(Arc::new(callback)));
    }

    pub fn clear_advert_event_callback(&self) {
        self.update(|regs| regs.advert = None);
    }

    pub fn has_advert_event_callback(&self) -> bool {
        self.snapshot().advert.is_some()
    }

    pub fn set_raw_event_callback<F>(&self, callback: F)
    where
        F: Fn(EventView<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        self.update(|regs| regs.raw = Some(Arc::new(callback)));
    }

    pub fn clear_raw_event_callback(&self) {
        self.update(|regs| regs.raw = None);
    }

    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&Beacon) -> CallbackResult + Send + Sync + 'static,
    {
        self.update(|regs| regs.beacon = Some(Arc::new(callback)));
    }

    pub fn clear_event_callback(&self) {
        self.update(|regs| regs.beacon = None);
    }

    pub fn set_scanner_id(&self, scanner_id: &str) {
        self.update(|regs| regs.scanner_id = Arc::from(scanner_id));
    }

    pub fn scanner_id(&self) -> String {
        self.snapshot().scanner_id.to_string()
    }

    /// Number of notifications received, whichever path handled them
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    /// Dispatch the event currently held in `buffer`
    pub fn notify(&self, buffer: &EventBuffer) -> Result<bool, ScanError> {
        buffer.with_view(|view| self.dispatch(view))
    }

    /// Dispatch one event to the highest priority registered callback.
    ///
    /// # Errors
    /// Only the advertising event path returns errors: [`ScanError::Bounds`]
    /// for a malformed buffer, [`ScanError::Callback`] if the callback fails.
    pub fn dispatch(&self, view: EventView<'_>) -> Result<bool, ScanError> {
        let seq = self.event_count.fetch_add(1, Ordering::SeqCst) + 1;
        let regs = self.snapshot();

        if let Some(callback) = &regs.advert {
            debug!("event({}): dispatching to advert event callback", seq);
            let event = decode_advertising_event(view)?;
            return callback(&event).map_err(ScanError::Callback);
        }

        if let Some(callback) = &regs.raw {
            debug!("event({}): dispatching to raw event callback", seq);
            return Ok(dispatch_raw(seq, callback.as_ref(), view));
        }

        Ok(dispatch_legacy(seq, &regs, view))
    }
}

fn dispatch_raw(seq: u64, callback: &RawEventCallback, view: EventView<'_>) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback(view))) {
        Ok(Ok(stop)) => stop,
        Ok(Err(e)) => {
            error!("event({}): error during dispatch to raw event callback: {}", seq, e);
            STOP_ON_FAILURE
        }
        Err(panic) => {
            error!(
                "event({}): raw event callback panicked: {}",
                seq,
                panic_message(panic.as_ref())
            );
            STOP_ON_FAILURE
        }
    }
}

fn dispatch_legacy(seq: u64, regs: &Registrations, view: EventView<'_>) -> bool {
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<bool, ScanError> {
        let record = decode_legacy(view)?;
        let beacon = Beacon::from_record(&regs.scanner_id, &record);
        match &regs.beacon {
            Some(callback) => callback(&beacon).map_err(ScanError::Callback),
            None => {
                info!("event({}): {}", seq, record);
                info!("{}", beacon);
                Ok(false)
            }
        }
    }));

    match outcome {
        Ok(Ok(stop)) => stop,
        Ok(Err(e)) => {
            error!("event({}): error during beacon dispatch: {}", seq, e);
            STOP_ON_FAILURE
        }
        Err(panic) => {
            error!(
                "event({}): beacon callback panicked: {}",
                seq,
                panic_message(panic.as_ref())
            );
            STOP_ON_FAILURE
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::ad_structure::gap;
    use crate::bluetooth::layout::{encode_advertising_event, encode_legacy};
    use crate::models::{AdStructure, AddressType, BeaconInfoRecord, ByteOrder};
    use std::sync::atomic::AtomicUsize;

    fn advert_bytes() -> Vec<u8> {
        let event = AdvertisingEvent {
            address: [1, 2, 3, 4, 5, 6],
            address_type: AddressType::Public,
            count: 1,
            rssi: -55,
            time: 1_000,
            data: vec![AdStructure::new(gap::FLAGS, vec![0x06])],
        };
        encode_advertising_event(&event, ByteOrder::LittleEndian).unwrap()
    }

    fn legacy_bytes() -> Vec<u8> {
        let record = BeaconInfoRecord {
            uuid: "DAF246CEF20311E4B116123B93F75CBA".to_string(),
            major: 1,
            minor: 2,
            rssi: -70,
            ..Default::default()
        };
        encode_legacy(&record, ByteOrder::LittleEndian)
    }

    fn view(bytes: &[u8]) -> EventView<'_> {
        EventView::new(bytes, ByteOrder::LittleEndian)
    }

    #[test]
    fn advert_callback_receives_decoded_event() {
        let dispatcher = EventDispatcher::new("scanner");
        dispatcher.set_advert_event_callback(|event| Ok(event.rssi == -55));
        assert!(dispatcher.dispatch(view(&advert_bytes())).unwrap());
    }

    #[test]
    fn raw_callback_sees_undecoded_bytes() {
        let bytes = legacy_bytes();
        let dispatcher = EventDispatcher::new("scanner");
        dispatcher.set_raw_event_callback(|view| Ok(view.len() == 80));
        assert!(dispatcher.dispatch(view(&bytes)).unwrap());
    }

    #[test]
    fn raw_callback_error_continues_scanning() {
        let dispatcher = EventDispatcher::new("scanner");
        dispatcher.set_raw_event_callback(|_| Err("boom".into()));
        assert!(!dispatcher.dispatch(view(&legacy_bytes())).unwrap());
    }

    #[test]
    fn raw_callback_panic_is_contained() {
        let dispatcher = EventDispatcher::new("scanner");
        dispatcher.set_raw_event_callback(|_| panic!("callback bug"));
        assert!(!dispatcher.dispatch(view(&legacy_bytes())).unwrap());
        assert_eq!(dispatcher.event_count(), 1);
    }

    #[test]
    fn beacon_callback_gets_scanner_id() {
        let dispatcher = EventDispatcher::new("scanner-7");
        dispatcher.set_event_callback(|beacon| Ok(beacon.scanner_id == "scanner-7" && beacon.minor == 2));
        assert!(dispatcher.dispatch(view(&legacy_bytes())).unwrap());
    }

    #[test]
    fn no_callback_logs_and_continues() {
        let dispatcher = EventDispatcher::default();
        assert!(!dispatcher.dispatch(view(&legacy_bytes())).unwrap());
    }

    #[test]
    fn legacy_decode_failure_is_swallowed() {
        let dispatcher = EventDispatcher::new("scanner");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        dispatcher.set_event_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });
        assert!(!dispatcher.dispatch(view(&[0u8; 10])).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn advert_callback_error_propagates() {
        let dispatcher = EventDispatcher::new("scanner");
        dispatcher.set_advert_event_callback(|_| Err("rejected".into()));
        assert!(matches!(
            dispatcher.dispatch(view(&advert_bytes())),
            Err(ScanError::Callback(_))
        ));
    }

    #[test]
    fn clearing_advert_callback_falls_back_to_raw() {
        let dispatcher = EventDispatcher::new("scanner");
        dispatcher.set_advert_event_callback(|_| Ok(false));
        dispatcher.set_raw_event_callback(|_| Ok(true));
        assert!(!dispatcher.dispatch(view(&advert_bytes())).unwrap());
        dispatcher.clear_advert_event_callback();
        assert!(!dispatcher.has_advert_event_callback());
        assert!(dispatcher.dispatch(view(&advert_bytes())).unwrap());
    }

    #[test]
    fn registration_change_inside_callback_applies_to_next_event() {
        let dispatcher = Arc::new(EventDispatcher::new("scanner"));
        let raw_calls = Arc::new(AtomicUsize::new(0));

        let handle = Arc::downgrade(&dispatcher);
        let seen = Arc::clone(&raw_calls);
        dispatcher.set_advert_event_callback(move |_| {
            let dispatcher = handle.upgrade().ok_or("dispatcher dropped")?;
            dispatcher.clear_advert_event_callback();
            let seen = Arc::clone(&seen);
            dispatcher.set_raw_event_callback(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });
            Ok(false)
        });

        assert!(!dispatcher.dispatch(view(&advert_bytes())).unwrap());
        assert_eq!(raw_calls.load(Ordering::SeqCst), 0);
        assert!(!dispatcher.has_advert_event_callback());

        assert!(dispatcher.dispatch(view(&advert_bytes())).unwrap());
        assert_eq!(raw_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.event_count(), 2);
    }

    #[test]
    fn counter_increments_on_every_path() {
        let dispatcher = EventDispatcher::new("scanner");
        dispatcher.dispatch(view(&legacy_bytes())).unwrap();
        dispatcher.set_raw_event_callback(|_| Ok(false));
        dispatcher.dispatch(view(&legacy_bytes())).unwrap();
        dispatcher.set_advert_event_callback(|_| Ok(false));
        dispatcher.dispatch(view(&advert_bytes())).unwrap();
        let _ = dispatcher.dispatch(view(&[0u8; 4]));
        assert_eq!(dispatcher.event_count(), 4);
    }
}
