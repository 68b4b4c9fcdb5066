//! Sensing loop: sampler, occupancy engine, gate and display
//!
//! One `ParkingLoop` owns every piece of mutable parking state. Each tick it
//! reads the sensors once, settles the gate against the current free count,
//! feeds every bay reading through the occupancy engine, and publishes a new
//! `StoreSnapshot` if a ticket opened or closed. Outbound messages go through
//! a non-blocking `NotificationSender`; nothing in a tick waits on I/O.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::store::StoreSnapshot;
use crate::domain::types::Moment;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::notify::NotificationSender;
use crate::services::display::{CharDisplay, DisplayPanel};
use crate::services::gate::{GateActuator, GateController};
use crate::services::occupancy::OccupancyEngine;
use crate::services::sampler::{PresenceSensor, RangeSensor, SensorSampler};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, trace};

/// Hardware the loop drives
pub struct Peripherals {
    pub presence: Box<dyn PresenceSensor>,
    pub range: Box<dyn RangeSensor>,
    pub actuator: Box<dyn GateActuator>,
    /// `None` runs without a display
    pub display: Option<Box<dyn CharDisplay>>,
}

pub struct ParkingLoop {
    pub(crate) sampler: SensorSampler,
    pub(crate) engine: OccupancyEngine,
    pub(crate) gate: GateController,
    pub(crate) display: Option<DisplayPanel>,
    /// Event message to show at the end of the current tick
    pub(crate) pending_flash: Option<(String, String)>,
    pub(crate) notifier: Option<NotificationSender>,
    pub(crate) snapshot_tx: watch::Sender<Arc<StoreSnapshot>>,
    pub(crate) metrics: Arc<Metrics>,
    poll_interval: Duration,
    pub(crate) notify_on_entry: bool,
    pub(crate) notify_slot_free: bool,
}

impl ParkingLoop {
    pub fn new(
        config: &Config,
        peripherals: Peripherals,
        notifier: Option<NotificationSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let engine = OccupancyEngine::from_config(config);
        let (snapshot_tx, _) = watch::channel(Arc::new(engine.store().snapshot()));
        let display = if config.display_enabled() {
            peripherals.display.map(|d| DisplayPanel::from_config(config, d))
        } else {
            None
        };

        Self {
            sampler: SensorSampler::from_config(config, peripherals.presence, peripherals.range),
            engine,
            gate: GateController::from_config(config, peripherals.actuator),
            display,
            pending_flash: None,
            notifier,
            snapshot_tx,
            metrics,
            poll_interval: Duration::from_millis(config.poll_interval_ms()),
            notify_on_entry: config.notify_on_entry(),
            notify_slot_free: config.notify_slot_free(),
        }
    }

    /// Receiver for the latest consistent snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn engine(&self) -> &OccupancyEngine {
        &self.engine
    }

    pub fn gate_is_open(&self) -> bool {
        self.gate.is_open()
    }

    /// Poll until shutdown. The gate is driven closed on the way in and out.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            slots = self.engine.store().total(),
            poll_ms = %self.poll_interval.as_millis(),
            grace_ms = %self.engine.exit_grace().as_millis(),
            "parking_loop_started"
        );
        if !self.gate.force_close() {
            self.metrics.record_actuator_fault();
        }

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Moment::now());
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !self.gate.force_close() {
            self.metrics.record_actuator_fault();
        }
        info!(occupied = self.engine.store().occupied_count(), "parking_loop_stopped");
    }

    /// One sensing pass at `now`
    pub fn tick(&mut self, now: Moment) {
        let start = Instant::now();

        let frame = self.sampler.sample();
        if frame.faults > 0 {
            self.metrics.record_sensor_faults(u64::from(frame.faults));
        }

        self.handle_entry_signal(frame.entry);

        let mut store_changed = false;
        for (slot, present) in frame.presence {
            if let Some(transition) = self.engine.observe(slot, present, &now) {
                store_changed |= self.handle_transition(transition);
            }
        }

        if store_changed {
            assert!(
                self.engine.store().is_consistent(),
                "ticket pool and occupied bays diverged"
            );
            self.publish();
        }

        self.refresh_display(now.mono);

        let latency_us = start.elapsed().as_micros() as u64;
        self.metrics.record_tick(latency_us);
        trace!(latency_us = %latency_us, "tick");
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.engine.store().snapshot()));
    }
}
