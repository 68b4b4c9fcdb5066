//! Domain models - occupancy data model and shared types
//!
//! - `types` - identifiers, slot lifecycle, closed tickets, entry signals
//! - `store` - the occupancy table, ticket pool and read snapshots

pub mod store;
pub mod types;

pub use store::{SlotStore, StoreSnapshot, Summary};
pub use types::{ClosedTicket, EntrySignal, Moment, Slot, SlotId, SlotPhase, TicketId};
