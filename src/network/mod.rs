//! Network Layer
//!
//! The transport contract, an in-process implementation of it, the wire
//! schemas, and room membership. Nothing here knows about smoothing or
//! ownership rules; that lives in `sync/`.

pub mod transport;
pub mod memory;
pub mod protocol;
pub mod session;

pub use transport::{Delivery, JoinOptions, PeerId, PresenceEvent, SessionTransport, TransportError};
pub use memory::{MemoryHub, MemoryTransport};
pub use protocol::{
    DiscreteEvent, EventKind, EventPayload, EventRecord, RecordError, SnapshotRecord, WorldOrigin,
};
pub use session::{Peer, PresenceChange, Session, SessionMode};
