// Transport layer: the session capability the dispatcher talks to, plus the
// upload gateway that sits in front of it.

pub mod bridge;
pub mod loopback;
pub mod transport;
pub mod upload;

pub use bridge::HttpBridgeTransport;
pub use loopback::{LoopbackTransport, RecordedSend, RecordedUpload};
pub use transport::{EventStream, PairingStream, SessionTransport};
pub use upload::{verify_receipt, RetryPolicy, UploadGateway};
