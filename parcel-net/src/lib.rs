//! Wire contract for parcel: header and query names, JSON payloads, and the
//! transport seam the client drives

pub mod protocol;
pub mod transport;
pub mod wire;

pub use protocol::{encode_component, object_path};
pub use transport::*;
pub use wire::*;
