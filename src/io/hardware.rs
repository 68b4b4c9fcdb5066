//! Linux hardware adapters
//!
//! - `SysfsPresence` - IR bay sensors on sysfs GPIO value files (active-low)
//! - `FileRange` - entry distance exported by the ultrasonic driver, in cm
//! - `PwmServo` - gate servo on a sysfs PWM `duty_cycle` file
//! - `LogDisplay` - renders the two display rows to the log

use crate::domain::types::SlotId;
use crate::infra::config::Config;
use crate::services::display::CharDisplay;
use crate::services::gate::GateActuator;
use crate::services::sampler::{PresenceSensor, RangeSensor};
use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub struct SysfsPresence {
    paths: HashMap<SlotId, PathBuf>,
}

impl SysfsPresence {
    pub fn new(paths: HashMap<SlotId, PathBuf>) -> Self {
        Self { paths }
    }

    pub fn from_config(config: &Config) -> Self {
        let paths = config
            .presence_paths()
            .iter()
            .map(|(&slot, path)| (slot, PathBuf::from(path)))
            .collect();
        Self::new(paths)
    }
}

impl PresenceSensor for SysfsPresence {
    fn read(&mut self, slot: SlotId) -> anyhow::Result<bool> {
        let path = self.paths.get(&slot).ok_or_else(|| anyhow!("no presence input for {slot}"))?;
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        // IR receivers pull the line low when the beam is reflected
        match raw.trim() {
            "0" => Ok(true),
            "1" => Ok(false),
            other => Err(anyhow!("unexpected gpio value {other:?} in {}", path.display())),
        }
    }
}

pub struct FileRange {
    path: PathBuf,
}

impl FileRange {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RangeSensor for FileRange {
    fn read_cm(&mut self) -> anyhow::Result<Option<f64>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let cm = raw
            .parse::<f64>()
            .with_context(|| format!("bad distance {raw:?} in {}", self.path.display()))?;
        Ok(Some(cm))
    }
}

pub struct PwmServo {
    duty_path: PathBuf,
}

impl PwmServo {
    pub fn new(duty_path: impl Into<PathBuf>) -> Self {
        Self { duty_path: duty_path.into() }
    }
}

impl GateActuator for PwmServo {
    fn set_pulse_us(&mut self, pulse_us: u32) -> anyhow::Result<()> {
        let duty_ns = u64::from(pulse_us) * 1000;
        fs::write(&self.duty_path, duty_ns.to_string())
            .with_context(|| format!("write {}", self.duty_path.display()))
    }
}

#[derive(Default)]
pub struct LogDisplay {
    last: Option<[String; 2]>,
}

impl CharDisplay for LogDisplay {
    fn show(&mut self, lines: &[String; 2]) -> anyhow::Result<()> {
        if self.last.as_ref() == Some(lines) {
            return Ok(());
        }
        info!(line1 = %lines[0].trim_end(), line2 = %lines[1].trim_end(), "display");
        self.last = Some(lines.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sysfs_presence_active_low() {
        let dir = TempDir::new().unwrap();
        let s1 = dir.path().join("gpio32");
        let s2 = dir.path().join("gpio33");
        fs::write(&s1, "0\n").unwrap();
        fs::write(&s2, "1\n").unwrap();

        let mut presence =
            SysfsPresence::new(HashMap::from([(SlotId(1), s1), (SlotId(2), s2)]));
        assert!(presence.read(SlotId(1)).unwrap());
        assert!(!presence.read(SlotId(2)).unwrap());
        assert!(presence.read(SlotId(3)).is_err());
    }

    #[test]
    fn test_file_range_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("distance");
        let mut range = FileRange::new(&path);

        assert!(range.read_cm().is_err());
        fs::write(&path, "12.5\n").unwrap();
        assert_eq!(range.read_cm().unwrap(), Some(12.5));
        fs::write(&path, "").unwrap();
        assert_eq!(range.read_cm().unwrap(), None);
        fs::write(&path, "n/a").unwrap();
        assert!(range.read_cm().is_err());
    }

    #[test]
    fn test_pwm_servo_writes_nanoseconds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("duty_cycle");
        let mut servo = PwmServo::new(&path);
        servo.set_pulse_us(1900).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1900000");
    }
}
