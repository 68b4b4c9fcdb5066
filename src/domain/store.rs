//! Occupancy table and ticket pool
//!
//! `SlotStore` is owned by the occupancy engine and mutated only from the
//! sensing loop. Everyone else sees `StoreSnapshot`s, which are built after a
//! transition has fully applied, so a reader never observes a half-updated
//! slot (e.g. occupied with no ticket).

use crate::domain::types::{ClosedTicket, Slot, SlotId, TicketId};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

/// Occupancy table, ticket pool and closed-ticket log
#[derive(Debug)]
pub struct SlotStore {
    slots: BTreeMap<SlotId, Slot>,
    /// Unassigned ticket IDs; BTreeSet keeps lowest-first allocation O(log n)
    pool: BTreeSet<TicketId>,
    closed: VecDeque<ClosedTicket>,
    closed_capacity: usize,
}

impl SlotStore {
    /// Build a store for a fixed set of bays.
    ///
    /// Duplicate IDs are collapsed. The pool is `[1, N]` for N distinct bays.
    pub fn new(slot_ids: &[SlotId], closed_capacity: usize) -> Self {
        let slots: BTreeMap<SlotId, Slot> =
            slot_ids.iter().map(|&id| (id, Slot::default())).collect();
        let pool = (1..=slots.len() as u32).map(TicketId).collect();
        Self {
            slots,
            pool,
            closed: VecDeque::with_capacity(closed_capacity.min(256)),
            closed_capacity: closed_capacity.max(1),
        }
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.keys().copied()
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.values().filter(|s| s.occupied).count()
    }

    pub fn free_count(&self) -> usize {
        self.total() - self.occupied_count()
    }

    /// Free bays in ascending order
    pub fn free_slots(&self) -> Vec<SlotId> {
        self.slots.iter().filter(|(_, s)| !s.occupied).map(|(&id, _)| id).collect()
    }

    pub fn available_tickets(&self) -> impl Iterator<Item = TicketId> + '_ {
        self.pool.iter().copied()
    }

    pub fn closed_tickets(&self) -> impl Iterator<Item = &ClosedTicket> {
        self.closed.iter()
    }

    /// Assign the lowest pooled ticket to a free bay.
    ///
    /// Returns `None` if the bay is unknown or already occupied.
    ///
    /// # Panics
    ///
    /// Panics if the pool is empty while a bay is free. The pool is sized to
    /// the bay count, so this only happens if the store is corrupted.
    pub fn open_ticket(&mut self, id: SlotId, time_in: DateTime<Local>) -> Option<TicketId> {
        let slot = self.slots.get_mut(&id)?;
        if slot.occupied {
            return None;
        }
        let Some(ticket) = self.pool.pop_first() else {
            panic!("ticket pool exhausted with {id} free: occupancy invariant violated");
        };
        slot.occupied = true;
        slot.ticket = Some(ticket);
        slot.time_in = Some(time_in);
        slot.free_since = None;
        Some(ticket)
    }

    /// Start the grace timer on an occupied bay. No-op if already running.
    pub fn mark_absent(&mut self, id: SlotId, now: Instant) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) if slot.occupied && slot.free_since.is_none() => {
                slot.free_since = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Cancel a running grace timer
    pub fn clear_absence(&mut self, id: SlotId) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) if slot.free_since.is_some() => {
                slot.free_since = None;
                true
            }
            _ => false,
        }
    }

    /// Free an occupied bay and return its ticket to the pool.
    ///
    /// Returns the released ticket and its time-in.
    pub fn release(&mut self, id: SlotId) -> Option<(TicketId, DateTime<Local>)> {
        let slot = self.slots.get_mut(&id)?;
        if !slot.occupied {
            return None;
        }
        let released = std::mem::take(slot);
        let ticket = released.ticket?;
        self.pool.insert(ticket);
        released.time_in.map(|time_in| (ticket, time_in))
    }

    /// Append to the closed-ticket log, evicting the oldest entry when full
    pub fn push_closed(&mut self, ticket: ClosedTicket) {
        if self.closed.len() == self.closed_capacity {
            self.closed.pop_front();
        }
        self.closed.push_back(ticket);
    }

    /// Pool and held tickets are disjoint and together cover `[1, N]`
    pub fn is_consistent(&self) -> bool {
        let mut seen: BTreeSet<TicketId> = self.pool.clone();
        for slot in self.slots.values() {
            match (slot.occupied, slot.ticket, slot.time_in) {
                (true, Some(ticket), Some(_)) => {
                    if !seen.insert(ticket) {
                        return false;
                    }
                }
                (false, None, None) if slot.free_since.is_none() => {}
                _ => return false,
            }
        }
        let expected: BTreeSet<TicketId> = (1..=self.slots.len() as u32).map(TicketId).collect();
        seen == expected
    }

    /// Copy the full state for readers
    pub fn snapshot(&self) -> StoreSnapshot {
        let slots = self
            .slots
            .iter()
            .map(|(&id, slot)| {
                let view = SlotView {
                    occupied: slot.occupied,
                    id: slot.ticket,
                    time_in: slot.time_in.map(|t| t.timestamp()),
                    time_out: None,
                };
                (id, view)
            })
            .collect();
        let occupied = self.occupied_count();
        StoreSnapshot {
            slots,
            closed_tickets: self.closed.iter().cloned().collect(),
            summary: Summary { total: self.total(), occupied, free: self.total() - occupied },
        }
    }
}

/// Read-only view of one bay, as served on `/data`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotView {
    pub occupied: bool,
    pub id: Option<TicketId>,
    /// Epoch seconds
    pub time_in: Option<i64>,
    pub time_out: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub occupied: usize,
    pub free: usize,
}

/// Consistent copy of the store published after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub slots: BTreeMap<SlotId, SlotView>,
    pub closed_tickets: Vec<ClosedTicket>,
    pub summary: Summary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_slots() -> SlotStore {
        SlotStore::new(&[SlotId(1), SlotId(2), SlotId(3)], 10)
    }

    fn closed(id: u32, slot: u16) -> ClosedTicket {
        ClosedTicket {
            id: TicketId(id),
            slot: SlotId(slot),
            duration_min: 1,
            fee: 0.5,
            time_in: "10:00:00".to_string(),
            time_out: "10:01:00".to_string(),
        }
    }

    #[test]
    fn test_new_store_pool_covers_slots() {
        let store = three_slots();
        assert_eq!(store.total(), 3);
        assert_eq!(store.free_count(), 3);
        let pool: Vec<_> = store.available_tickets().collect();
        assert_eq!(pool, vec![TicketId(1), TicketId(2), TicketId(3)]);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_duplicate_slot_ids_collapse() {
        let store = SlotStore::new(&[SlotId(2), SlotId(2), SlotId(7)], 10);
        assert_eq!(store.total(), 2);
        assert_eq!(store.available_tickets().count(), 2);
    }

    #[test]
    fn test_open_ticket_takes_lowest() {
        let mut store = three_slots();
        let now = Local::now();
        assert_eq!(store.open_ticket(SlotId(3), now), Some(TicketId(1)));
        assert_eq!(store.open_ticket(SlotId(1), now), Some(TicketId(2)));
        assert!(store.is_consistent());

        // Releasing 1 makes it the next allocation again
        assert_eq!(store.release(SlotId(3)).map(|(t, _)| t), Some(TicketId(1)));
        assert_eq!(store.open_ticket(SlotId(2), now), Some(TicketId(1)));
        assert!(store.is_consistent());
    }

    #[test]
    fn test_open_ticket_rejects_occupied_and_unknown() {
        let mut store = three_slots();
        let now = Local::now();
        store.open_ticket(SlotId(1), now);
        assert_eq!(store.open_ticket(SlotId(1), now), None);
        assert_eq!(store.open_ticket(SlotId(9), now), None);
        assert_eq!(store.available_tickets().count(), 2);
    }

    #[test]
    fn test_absence_markers() {
        let mut store = three_slots();
        let now = Instant::now();
        // Free bays never get a grace timer
        assert!(!store.mark_absent(SlotId(1), now));

        store.open_ticket(SlotId(1), Local::now());
        assert!(store.mark_absent(SlotId(1), now));
        assert!(!store.mark_absent(SlotId(1), now));
        assert!(store.clear_absence(SlotId(1)));
        assert!(!store.clear_absence(SlotId(1)));
    }

    #[test]
    fn test_release_clears_slot() {
        let mut store = three_slots();
        store.open_ticket(SlotId(2), Local::now());
        store.mark_absent(SlotId(2), Instant::now());

        let (ticket, _) = store.release(SlotId(2)).unwrap();
        assert_eq!(ticket, TicketId(1));
        let slot = store.slot(SlotId(2)).unwrap();
        assert!(!slot.occupied);
        assert!(slot.ticket.is_none());
        assert!(slot.time_in.is_none());
        assert!(slot.free_since.is_none());
        assert!(store.release(SlotId(2)).is_none());
        assert!(store.is_consistent());
    }

    #[test]
    fn test_closed_log_evicts_oldest() {
        let mut store = SlotStore::new(&[SlotId(1)], 2);
        store.push_closed(closed(1, 1));
        store.push_closed(closed(2, 1));
        store.push_closed(closed(3, 1));
        let ids: Vec<_> = store.closed_tickets().map(|t| t.id).collect();
        assert_eq!(ids, vec![TicketId(2), TicketId(3)]);
    }

    #[test]
    fn test_snapshot_summary_and_json_shape() {
        let mut store = three_slots();
        let now = Local::now();
        store.open_ticket(SlotId(1), now);
        store.open_ticket(SlotId(2), now);
        store.push_closed(closed(3, 3));

        let snap = store.snapshot();
        assert_eq!(snap.summary, Summary { total: 3, occupied: 2, free: 1 });

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["slots"]["1"]["occupied"], true);
        assert_eq!(json["slots"]["1"]["id"], 1);
        assert_eq!(json["slots"]["1"]["time_in"], now.timestamp());
        assert!(json["slots"]["3"]["id"].is_null());
        assert!(json["slots"]["3"]["time_out"].is_null());
        assert_eq!(json["closed_tickets"][0]["id"], 3);
        assert_eq!(json["summary"]["free"], 1);
    }
}
