//! Sensor sampling and entry debounce
//!
//! Slot presence is passed through raw; departures are debounced later by the
//! occupancy grace timer. The entry range sensor is debounced here with two
//! consecutive-hit counters: a short run of close readings opens the gate, a
//! longer run of far readings closes it, so one car rolling past does not make
//! the barrier flutter.

use crate::domain::types::{EntrySignal, SlotId};
use crate::infra::config::Config;
use std::collections::BTreeSet;
use tracing::{info, trace, warn};

/// Raw per-bay presence input
pub trait PresenceSensor: Send {
    /// `true` when a vehicle is in the bay
    fn read(&mut self, slot: SlotId) -> anyhow::Result<bool>;
}

/// Raw entry range input
pub trait RangeSensor: Send {
    /// Distance in cm, `None` when no echo came back
    fn read_cm(&mut self) -> anyhow::Result<Option<f64>>;
}

/// Consecutive-hit debounce for the entry sensor
#[derive(Debug, Clone)]
pub struct EntryDebouncer {
    threshold_cm: f64,
    detect_needed: u32,
    miss_needed: u32,
    detect_hits: u32,
    miss_hits: u32,
}

impl EntryDebouncer {
    pub fn new(threshold_cm: f64, detect_needed: u32, miss_needed: u32) -> Self {
        Self {
            threshold_cm,
            detect_needed: detect_needed.max(1),
            miss_needed: miss_needed.max(1),
            detect_hits: 0,
            miss_hits: 0,
        }
    }

    /// Feed one reading; `None` means no valid detection this tick.
    ///
    /// The signal stays asserted for as long as the run continues, so a gate
    /// held shut by a full lot opens as soon as a bay frees up.
    pub fn observe(&mut self, distance_cm: Option<f64>) -> Option<EntrySignal> {
        match distance_cm {
            Some(d) if d < self.threshold_cm => {
                self.detect_hits = self.detect_hits.saturating_add(1);
                self.miss_hits = 0;
            }
            _ => {
                self.miss_hits = self.miss_hits.saturating_add(1);
                self.detect_hits = 0;
            }
        }

        if self.detect_hits >= self.detect_needed {
            Some(EntrySignal::Detected)
        } else if self.miss_hits >= self.miss_needed {
            Some(EntrySignal::Clear)
        } else {
            None
        }
    }

    pub fn detect_hits(&self) -> u32 {
        self.detect_hits
    }

    pub fn miss_hits(&self) -> u32 {
        self.miss_hits
    }
}

/// Everything read in one tick
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    pub presence: Vec<(SlotId, bool)>,
    pub entry: Option<EntrySignal>,
    /// Reads that failed or were out of range
    pub faults: u32,
    /// Sensors that went from ok to faulted this tick
    pub fault_onsets: u32,
}

pub struct SensorSampler {
    slots: Vec<SlotId>,
    presence: Box<dyn PresenceSensor>,
    range: Box<dyn RangeSensor>,
    debouncer: EntryDebouncer,
    max_range_cm: f64,
    range_faulted: bool,
    faulted_slots: BTreeSet<SlotId>,
}

impl SensorSampler {
    pub fn new(
        slots: Vec<SlotId>,
        presence: Box<dyn PresenceSensor>,
        range: Box<dyn RangeSensor>,
        debouncer: EntryDebouncer,
        max_range_cm: f64,
    ) -> Self {
        Self {
            slots,
            presence,
            range,
            debouncer,
            max_range_cm,
            range_faulted: false,
            faulted_slots: BTreeSet::new(),
        }
    }

    pub fn from_config(
        config: &Config,
        presence: Box<dyn PresenceSensor>,
        range: Box<dyn RangeSensor>,
    ) -> Self {
        let debouncer = EntryDebouncer::new(
            config.entry_distance_cm(),
            config.detect_hits(),
            config.miss_hits(),
        );
        Self::new(config.slot_ids().to_vec(), presence, range, debouncer, config.max_range_cm())
    }

    /// Read every sensor once. Never fails: a bad read is "no detection".
    ///
    /// Every faulted read is counted; only the change between ok and
    /// faulted is logged.
    pub fn sample(&mut self) -> SensorFrame {
        let mut faults = 0;
        let mut fault_onsets = 0;

        let (distance, range_error) = match self.range.read_cm() {
            Ok(Some(d)) if d.is_finite() && d > 0.0 && d <= self.max_range_cm => (Some(d), None),
            Ok(Some(d)) => (None, Some(format!("distance {d} cm out of range"))),
            Ok(None) => (None, None),
            Err(e) => (None, Some(format!("{e:#}"))),
        };
        match range_error {
            Some(error) => {
                faults += 1;
                if !self.range_faulted {
                    self.range_faulted = true;
                    fault_onsets += 1;
                    warn!(error = %error, "entry_range_faulted");
                } else {
                    trace!(error = %error, "entry_range_read_failed");
                }
            }
            None if self.range_faulted => {
                self.range_faulted = false;
                info!("entry_range_recovered");
            }
            None => {}
        }
        let entry = self.debouncer.observe(distance);

        let mut presence = Vec::with_capacity(self.slots.len());
        for &slot in &self.slots {
            let present = match self.presence.read(slot) {
                Ok(present) => {
                    if self.faulted_slots.remove(&slot) {
                        info!(slot = %slot, "presence_recovered");
                    }
                    present
                }
                Err(e) => {
                    faults += 1;
                    if self.faulted_slots.insert(slot) {
                        fault_onsets += 1;
                        warn!(slot = %slot, error = %format!("{e:#}"), "presence_faulted");
                    } else {
                        trace!(slot = %slot, error = %e, "presence_read_failed");
                    }
                    false
                }
            };
            presence.push((slot, present));
        }

        SensorFrame { presence, entry, faults, fault_onsets }
    }

    pub fn range_faulted(&self) -> bool {
        self.range_faulted
    }

    /// Bays whose last presence read failed
    pub fn faulted_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.faulted_slots.iter().copied()
    }

    pub fn debouncer(&self) -> &EntryDebouncer {
        &self.debouncer
    }
}
