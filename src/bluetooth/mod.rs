pub mod ad_structure;
pub mod dispatcher;
pub mod layout;
pub mod loopback;
pub mod scanner;
pub mod sensor;

pub use dispatcher::{CallbackResult, EventDispatcher};
pub use layout::{decode_advertising_event, decode_legacy, EventBuffer, EventView};
pub use loopback::LoopbackBackend;
pub use scanner::{NotificationSink, ScannerBackend, ScannerSession};
