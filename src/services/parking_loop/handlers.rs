//! Side effects of gate decisions and slot transitions

use super::ParkingLoop;
use crate::domain::types::EntrySignal;
use crate::services::gate::GateDecision;
use crate::services::occupancy::SlotTransition;
use std::time::Instant;
use tracing::{info, warn};

impl ParkingLoop {
    /// Settle the gate for this tick against the current free count
    pub(crate) fn handle_entry_signal(&mut self, signal: Option<EntrySignal>) {
        let free = self.engine.store().free_count();
        let (decision, actuator_ok) = self.gate.apply(signal, free);

        match decision {
            GateDecision::Open => self.metrics.record_gate_open(),
            GateDecision::Close => self.metrics.record_gate_close(),
            GateDecision::DeniedFull => self.metrics.record_gate_denied(),
            GateDecision::Hold => {}
        }
        if !actuator_ok {
            self.metrics.record_actuator_fault();
        }
    }

    /// Apply the side effects of one transition.
    ///
    /// Returns true if the published snapshot is now stale.
    pub(crate) fn handle_transition(&mut self, transition: SlotTransition) -> bool {
        match transition {
            SlotTransition::Entered { slot, ticket, time_in } => {
                self.metrics.record_ticket_opened();
                self.queue_flash(format!("Car IN: {slot}"), "Updating...".to_string());

                if let Some(notifier) = &self.notifier {
                    if self.notify_on_entry {
                        notifier.car_entered(slot, ticket, &time_in);
                    }
                    if self.engine.store().free_count() == 0 {
                        info!(total = self.engine.store().total(), "lot_full");
                        notifier.lot_full();
                    }
                }
                true
            }
            SlotTransition::Exited(closed) => {
                self.metrics.record_ticket_closed();
                self.queue_flash(format!("Car OUT: {}", closed.slot), format!("Fee ${:.2}", closed.fee));

                if let Some(notifier) = &self.notifier {
                    notifier.ticket_closed(&closed);
                    if self.notify_slot_free {
                        notifier.slot_free(closed.slot);
                    }
                }
                true
            }
            SlotTransition::ExitCancelled { .. } => {
                self.metrics.record_exit_cancelled();
                false
            }
            SlotTransition::ExitPending { .. } => false,
        }
    }

    /// Later events in the same tick replace earlier ones
    fn queue_flash(&mut self, top: String, bottom: String) {
        if self.display.is_some() {
            self.pending_flash = Some((top, bottom));
        }
    }

    /// One display write per tick at most: the last event flash, else the summary
    pub(crate) fn refresh_display(&mut self, now: Instant) {
        let pending = self.pending_flash.take();
        let Some(display) = self.display.as_mut() else {
            return;
        };
        let result = match pending {
            Some((top, bottom)) => display.flash(&top, &bottom, now),
            None => {
                let free = self.engine.store().free_slots();
                display.refresh(&free, self.gate.is_open(), now).map(|_| ())
            }
        };
        if let Err(e) = result {
            self.metrics.record_display_fault();
            warn!(error = %e, "display_write_failed");
        }
    }
}
