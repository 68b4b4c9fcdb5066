//! Services - parking logic and the sensing loop
//!
//! - `sampler` - Sensor reads and entry debounce
//! - `occupancy` - Per-slot state machine, ticketing and billing
//! - `gate` - Gate decisions and actuator driving
//! - `display` - Two-line status display
//! - `parking_loop` - Tick loop tying the above together

pub mod display;
pub mod gate;
pub mod occupancy;
pub mod parking_loop;
pub mod sampler;

pub use gate::{GateActuator, GateController, GateDecision};
pub use occupancy::{OccupancyEngine, SlotTransition};
pub use parking_loop::{ParkingLoop, Peripherals};
pub use sampler::{EntryDebouncer, PresenceSensor, RangeSensor, SensorSampler};
