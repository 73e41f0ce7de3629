//! dap-transport — Debug Adapter Protocol transport layer.
//!
//! This crate implements the wire transport for talking to debug adapters:
//! Content-Length framing over a duplex byte stream, sequence numbering,
//! request/response correlation, and event/request routing. It carries no
//! knowledge of individual DAP commands; payloads are opaque JSON.

pub mod connection;
pub mod correlator;
pub mod decoder;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod router;
pub mod seq;
pub mod writer;

// Re-export key types for convenience.
pub use connection::{Connection, ConnectionConfig};
pub use correlator::RequestCorrelator;
pub use decoder::{Decoded, FrameDecoder, DEFAULT_MAX_BUFFER_SIZE};
pub use error::TransportError;
pub use protocol::{Event, ProtocolMessage, Request, Response};
pub use router::MessageRouter;
pub use seq::SequenceGenerator;
pub use writer::TransportWriter;
