//! Tests for the sensing loop

use super::*;
use crate::domain::types::{SlotId, TicketId};
use crate::io::notify::{create_notification_channel, Notification};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Simulated hardware shared between the fakes and the test body
#[derive(Default)]
struct Bench {
    present: HashMap<SlotId, bool>,
    distance_cm: Option<f64>,
    range_fails: bool,
    pulses: Vec<u32>,
    frames: Vec<[String; 2]>,
}

type SharedBench = Arc<parking_lot::Mutex<Bench>>;

struct BenchPresence(SharedBench);
struct BenchRange(SharedBench);
struct BenchServo(SharedBench);
struct BenchDisplay(SharedBench);

impl PresenceSensor for BenchPresence {
    fn read(&mut self, slot: SlotId) -> anyhow::Result<bool> {
        Ok(self.0.lock().present.get(&slot).copied().unwrap_or(false))
    }
}

impl RangeSensor for BenchRange {
    fn read_cm(&mut self) -> anyhow::Result<Option<f64>> {
        let bench = self.0.lock();
        if bench.range_fails {
            anyhow::bail!("echo timeout");
        }
        Ok(bench.distance_cm)
    }
}

impl GateActuator for BenchServo {
    fn set_pulse_us(&mut self, pulse_us: u32) -> anyhow::Result<()> {
        self.0.lock().pulses.push(pulse_us);
        Ok(())
    }
}

impl CharDisplay for BenchDisplay {
    fn show(&mut self, lines: &[String; 2]) -> anyhow::Result<()> {
        self.0.lock().frames.push(lines.clone());
        Ok(())
    }
}

/// Test harness that keeps the notification receiver alive so `try_send` succeeds
struct TestLoop {
    parking: ParkingLoop,
    bench: SharedBench,
    notify_rx: mpsc::Receiver<Notification>,
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    now: Moment,
}

impl std::ops::Deref for TestLoop {
    type Target = ParkingLoop;
    fn deref(&self) -> &Self::Target {
        &self.parking
    }
}

impl std::ops::DerefMut for TestLoop {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.parking
    }
}

impl TestLoop {
    fn set_present(&self, slot: u16, present: bool) {
        self.bench.lock().present.insert(SlotId(slot), present);
    }

    fn set_distance(&self, cm: Option<f64>) {
        self.bench.lock().distance_cm = cm;
    }

    /// Advance the clock by `ms` and run one tick
    fn step(&mut self, ms: u64) {
        self.now = self.now.after(millis(ms));
        let now = self.now;
        self.parking.tick(now);
    }

    fn notifications(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = self.notify_rx.try_recv() {
            out.push(msg.text);
        }
        out
    }

    fn pulses(&self) -> Vec<u32> {
        self.bench.lock().pulses.clone()
    }
}

fn create_test_loop() -> TestLoop {
    create_test_loop_with_config(Config::default())
}

fn create_test_loop_with_config(config: Config) -> TestLoop {
    let bench: SharedBench = Arc::default();
    let metrics = Arc::new(Metrics::new());
    let (notifier, notify_rx) =
        create_notification_channel(64, vec!["ops".to_string()], metrics.clone());
    let peripherals = Peripherals {
        presence: Box::new(BenchPresence(bench.clone())),
        range: Box::new(BenchRange(bench.clone())),
        actuator: Box::new(BenchServo(bench.clone())),
        display: Some(Box::new(BenchDisplay(bench.clone()))),
    };
    let parking = ParkingLoop::new(&config, peripherals, Some(notifier), metrics);
    let snapshots = parking.subscribe();
    TestLoop { parking, bench, notify_rx, snapshots, now: Moment::now() }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[test]
fn test_park_for_125_seconds_closes_ticket() {
    let mut t = create_test_loop();
    t.set_present(1, true);
    t.step(100);

    {
        let snap = t.snapshots.borrow();
        assert!(snap.slots[&SlotId(1)].occupied);
        assert_eq!(snap.slots[&SlotId(1)].id, Some(TicketId(1)));
    }

    // Car leaves 125 s after it arrived
    t.step(125_000);
    t.set_present(1, false);
    t.step(100);
    assert!(t.engine().store().slot(SlotId(1)).unwrap().occupied);
    t.step(1000);

    let snap = t.snapshots.borrow().clone();
    assert!(!snap.slots[&SlotId(1)].occupied);
    assert_eq!(snap.closed_tickets.len(), 1);
    let closed = &snap.closed_tickets[0];
    assert_eq!(closed.id, TicketId(1));
    assert_eq!(closed.slot, SlotId(1));
    assert_eq!(closed.duration_min, 2);
    assert_eq!(closed.fee, 1.0);

    let pool: Vec<_> = t.engine().store().available_tickets().collect();
    assert_eq!(pool, vec![TicketId(1), TicketId(2), TicketId(3)]);

    let texts = t.notifications();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("Car IN"));
    assert!(texts[1].starts_with("✅ Ticket CLOSED\nID:1\nSlot:S1\nDuration:2min\nFee:$1.00"));
}

#[test]
fn test_full_lot_keeps_gate_closed() {
    let mut t = create_test_loop();
    for slot in 1..=3 {
        t.set_present(slot, true);
    }
    t.step(100);
    assert_eq!(t.engine().store().free_count(), 0);
    assert!(t.notifications().iter().any(|m| m.contains("Parking is FULL")));

    t.set_distance(Some(5.0));
    for _ in 0..5 {
        t.step(100);
        assert!(!t.gate_is_open());
    }
    assert!(t.pulses().is_empty());
    assert_eq!(t.metrics.gate_denials(), 3);
}

#[test]
fn test_gate_opens_fast_and_closes_slow() {
    let mut t = create_test_loop();
    t.set_distance(Some(8.0));
    t.step(100);
    t.step(100);
    assert!(!t.gate_is_open());
    t.step(100);
    assert!(t.gate_is_open());
    assert_eq!(t.pulses(), vec![1900]);

    t.set_distance(None);
    for _ in 0..9 {
        t.step(100);
        assert!(t.gate_is_open());
    }
    t.step(100);
    assert!(!t.gate_is_open());
    assert_eq!(t.pulses(), vec![1900, 1100]);
}

#[test]
fn test_waiting_car_gets_in_once_a_bay_frees() {
    let mut t = create_test_loop();
    for slot in 1..=3 {
        t.set_present(slot, true);
    }
    t.step(100);
    t.set_distance(Some(5.0));
    for _ in 0..3 {
        t.step(100);
    }
    assert!(!t.gate_is_open());

    t.set_present(2, false);
    t.step(100);
    t.step(1000);
    assert_eq!(t.engine().store().free_slots(), vec![SlotId(2)]);
    // The gate is decided before bays are updated within a tick
    assert!(!t.gate_is_open());
    t.step(100);
    assert!(t.gate_is_open());
}

#[test]
fn test_flicker_shorter_than_grace_is_ignored() {
    let mut t = create_test_loop();
    t.set_present(1, true);
    t.step(100);
    let before = t.snapshots.borrow().clone();

    for _ in 0..10 {
        t.set_present(1, false);
        t.step(100);
        t.step(500);
        t.set_present(1, true);
        t.step(100);
    }

    assert_eq!(*t.snapshots.borrow().clone(), *before);
    assert_eq!(t.engine().store().closed_tickets().count(), 0);
    assert_eq!(t.metrics.report().exits_cancelled, 10);
    assert_eq!(t.notifications().len(), 1);
}

#[test]
fn test_dashboard_snapshot_counts() {
    let mut t = create_test_loop();
    t.set_present(1, true);
    t.set_present(3, true);
    t.step(100);

    let snap = t.snapshots.borrow().clone();
    assert_eq!(snap.summary.total, 3);
    assert_eq!(snap.summary.occupied, 2);
    assert_eq!(snap.summary.free, 1);
    // Bays are visited in order, so S1 gets ticket 1
    assert_eq!(snap.slots[&SlotId(1)].id, Some(TicketId(1)));
    assert_eq!(snap.slots[&SlotId(3)].id, Some(TicketId(2)));
}

#[test]
fn test_display_flashes_then_shows_summary() {
    let mut t = create_test_loop();
    t.set_present(1, true);
    t.step(100);
    t.step(100);
    t.step(500);

    let frames = t.bench.lock().frames.clone();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0][0].trim_end(), "Car IN: S1");
    assert_eq!(frames[0][1].trim_end(), "Updating...");
    assert_eq!(frames[1][0].trim_end(), "Free: S2 S3");
    assert_eq!(frames[1][1].trim_end(), "Gate: Closed");
}

#[test]
fn test_simultaneous_entries_write_display_once() {
    let mut t = create_test_loop();
    for slot in 1..=3 {
        t.set_present(slot, true);
    }
    t.step(100);

    let frames = t.bench.lock().frames.clone();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0][0].trim_end(), "Car IN: S3");

    // The summary waits out the refresh interval after the flash
    t.step(100);
    assert_eq!(t.bench.lock().frames.len(), 1);
    t.step(500);
    let frames = t.bench.lock().frames.clone();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1][0].trim_end(), "Free: FULL");
}

#[test]
fn test_exit_flash_shows_fee() {
    let mut t = create_test_loop();
    t.set_present(2, true);
    t.step(100);
    t.set_present(2, false);
    t.step(100);
    t.step(1000);

    let frames = t.bench.lock().frames.clone();
    let last = frames.last().unwrap();
    assert_eq!(last[0].trim_end(), "Car OUT: S2");
    assert_eq!(last[1].trim_end(), "Fee $0.50");
}

#[test]
fn test_range_faults_count_as_no_detection() {
    let mut t = create_test_loop();
    t.bench.lock().range_fails = true;
    t.set_present(1, true);
    for _ in 0..5 {
        t.step(100);
    }
    assert!(!t.gate_is_open());
    assert_eq!(t.metrics.sensor_faults(), 5);
    // Bays are still processed
    assert_eq!(t.engine().store().occupied_count(), 1);
}

#[test]
fn test_notification_toggles() {
    let mut t = create_test_loop();
    t.notify_on_entry = false;
    t.notify_slot_free = true;
    t.set_present(3, true);
    t.step(100);
    t.set_present(3, false);
    t.step(100);
    t.step(1000);

    let texts = t.notifications();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].starts_with("✅ Ticket CLOSED"));
    assert_eq!(texts[1], "🚗 Slot S3 is now FREE!");
}

#[test]
fn test_custom_bays_and_grace() {
    let config = Config::default().with_slot_ids(&[5, 7]).with_exit_grace_ms(3000);
    let mut t = create_test_loop_with_config(config);
    t.set_present(7, true);
    t.step(100);
    t.set_present(7, false);
    t.step(100);
    t.step(2000);
    assert_eq!(t.engine().store().occupied_count(), 1);
    t.step(1000);
    assert_eq!(t.engine().store().occupied_count(), 0);
    assert_eq!(t.snapshots.borrow().summary.total, 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown_and_closes_gate() {
    let mut t = create_test_loop();
    let (stop, shutdown) = watch::channel(false);
    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), t.parking.run(shutdown)).await.unwrap();
    assert_eq!(t.pulses(), vec![1100, 1100]);
}
