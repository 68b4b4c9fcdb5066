//! Shared types for the parking gateway

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Physical bay number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SlotId(pub u16);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Reusable ticket number drawn from `[1, N]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct TicketId(pub u32);

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in time carried through one loop tick.
///
/// `mono` drives the grace timer, `wall` drives billing and the formatted
/// times shown to people. Both are captured together so a tick sees one
/// consistent "now".
#[derive(Debug, Clone, Copy)]
pub struct Moment {
    pub mono: Instant,
    pub wall: DateTime<Local>,
}

impl Moment {
    pub fn now() -> Self {
        Self { mono: Instant::now(), wall: Local::now() }
    }

    /// Same moment shifted forward on both clocks
    pub fn after(&self, elapsed: Duration) -> Self {
        let wall_delta = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        Self { mono: self.mono + elapsed, wall: self.wall + wall_delta }
    }
}

/// `HH:MM:SS` in local time
pub fn format_hms(wall: &DateTime<Local>) -> String {
    wall.format("%H:%M:%S").to_string()
}

/// Lifecycle phase of a single slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Free,
    Occupied,
    /// Occupied, but the sensor has read absent since `free_since`
    OccupiedPendingExit,
}

impl SlotPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotPhase::Free => "free",
            SlotPhase::Occupied => "occupied",
            SlotPhase::OccupiedPendingExit => "pending_exit",
        }
    }
}

/// One bay in the occupancy table
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub occupied: bool,
    pub ticket: Option<TicketId>,
    pub time_in: Option<DateTime<Local>>,
    /// Start of an unconfirmed departure (monotonic)
    pub free_since: Option<Instant>,
}

impl Slot {
    pub fn phase(&self) -> SlotPhase {
        match (self.occupied, self.free_since) {
            (false, _) => SlotPhase::Free,
            (true, None) => SlotPhase::Occupied,
            (true, Some(_)) => SlotPhase::OccupiedPendingExit,
        }
    }
}

/// A completed parking session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTicket {
    pub id: TicketId,
    pub slot: SlotId,
    pub duration_min: u64,
    pub fee: f64,
    pub time_in: String,
    pub time_out: String,
}

/// Debounced entry-sensor verdict for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySignal {
    /// A vehicle has been in front of the gate for enough consecutive ticks
    Detected,
    /// Nothing has been in front of the gate for enough consecutive ticks
    Clear,
}
