//! # collab-client — client for a real-time collaborative editing service
//!
//! Locally captured edits ("patches") are buffered per file and coalesced
//! into the fewest possible downstream apply calls by a write-behind
//! queue, without losing, reordering, or duplicating a patch and without
//! blocking the edit path on slow I/O.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  offer_patch   ┌─────────────────┐
//! │ edit capture │ ─────────────► │ CoalescingQueue │ per-key buffer,
//! │ (caller)     │                │                 │ debounce + capacity
//! └──────────────┘                └────────┬────────┘
//!                                          │ apply_patch(key, batch)
//!                                          ▼
//!                                 ┌─────────────────┐
//!                                 │  PatchManager   │ durable apply,
//!                                 │  (boundary)     │ may fail, may block
//!                                 └────────┬────────┘
//!                                          │ WebSocket
//!                                          ▼
//!                                 ┌─────────────────┐
//!                                 │ editing service │
//!                                 └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`queue`] — the coalescing write-behind queue (the core)
//! - [`patch`] — opaque patch and file-key value types
//! - [`protocol`] — binary wire protocol (bincode-encoded WireMessage)
//! - [`request`] — request-id correlation for the connection
//! - [`session`] — observable session-state store
//! - [`client`] — WebSocket client wiring it all together
//!
//! ## Guarantees (per file key)
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Offer order preserved within and across flushes | per-key lock linearizes appends |
//! | At most one in-flight apply | in-flight flag, re-schedule on completion |
//! | Keys never interact | state and locking scoped per key |
//! | `offer` never blocks on downstream I/O | applies run on spawned tasks |

pub mod client;
pub mod patch;
pub mod protocol;
pub mod queue;
pub mod request;
pub mod session;

// Re-exports for convenience
pub use client::{
    ClientConfig, ClientContext, ConnectionState, RemotePatchManager, SyncClient,
};
pub use patch::{FileKey, Patch};
pub use protocol::{MessageType, ProtocolError, SessionUpdate, WireMessage};
pub use queue::{
    buffer::BatchBuffer, debounce::DebounceTimer, ApplyError, CoalescingQueue, FailurePolicy,
    FlushEvent, PatchManager, QueueConfig, QueueError, QueueStats,
};
pub use request::RequestManager;
pub use session::{SessionChange, SessionStore};
