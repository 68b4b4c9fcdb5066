//! Two-line status display
//!
//! Shows the free bays and the gate state, redrawn at most once per refresh
//! interval. Entry and exit events flash a message immediately; the summary
//! comes back on the next refresh after that.

use crate::domain::types::SlotId;
use crate::infra::config::Config;
use std::time::{Duration, Instant};

/// Character display with two fixed-width rows
pub trait CharDisplay: Send {
    fn show(&mut self, lines: &[String; 2]) -> anyhow::Result<()>;
}

/// Truncate or pad to exactly `columns` characters
pub fn fit(text: &str, columns: usize) -> String {
    let mut out: String = text.chars().take(columns).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(columns - len));
    out
}

pub fn summary_lines(free: &[SlotId], gate_open: bool, columns: usize) -> [String; 2] {
    let top = if free.is_empty() {
        "Free: FULL".to_string()
    } else {
        let names: Vec<String> = free.iter().map(SlotId::to_string).collect();
        format!("Free: {}", names.join(" "))
    };
    let bottom = if gate_open { "Gate: Open" } else { "Gate: Closed" };
    [fit(&top, columns), fit(bottom, columns)]
}

pub struct DisplayPanel {
    display: Box<dyn CharDisplay>,
    columns: usize,
    refresh: Duration,
    last_update: Option<Instant>,
}

impl DisplayPanel {
    pub fn new(display: Box<dyn CharDisplay>, columns: usize, refresh: Duration) -> Self {
        Self { display, columns: columns.max(1), refresh, last_update: None }
    }

    pub fn from_config(config: &Config, display: Box<dyn CharDisplay>) -> Self {
        Self::new(
            display,
            config.display_columns(),
            Duration::from_millis(config.display_refresh_ms()),
        )
    }

    /// Show an event message now; holds until the next refresh is due
    pub fn flash(&mut self, top: &str, bottom: &str, now: Instant) -> anyhow::Result<()> {
        self.last_update = Some(now);
        self.display.show(&[fit(top, self.columns), fit(bottom, self.columns)])
    }

    /// Redraw the summary if the refresh interval has passed.
    ///
    /// Returns `Ok(true)` when something was drawn.
    pub fn refresh(&mut self, free: &[SlotId], gate_open: bool, now: Instant) -> anyhow::Result<bool> {
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < self.refresh {
                return Ok(false);
            }
        }
        self.last_update = Some(now);
        self.display.show(&summary_lines(free, gate_open, self.columns))?;
        Ok(true)
    }
}
