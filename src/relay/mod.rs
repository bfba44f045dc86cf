//! Cross-platform relay core
//!
//! Cross-reference maps, reply resolution and the dispatcher that ties them
//! to the identity store and the platform senders.

pub mod crossref;
pub mod dispatcher;
pub mod resolver;
pub mod tags;
pub mod types;

pub use crossref::CrossRefMaps;
pub use dispatcher::{DispatchOutcome, DropReason, RelayDispatcher};
pub use resolver::{ReplyResolver, ResolvedReply};
pub use types::{DeliveryReceipt, InboundEvent, NativeId, Platform, Source};
