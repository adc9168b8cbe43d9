//! Fake sensor feed for hardware-free development. Pushes `SOIL:<raw>` lines
//! into the mock device link on the sample interval, with:
//! - a random walk plus a slow drying drift (evaporation)
//! - a closed-loop watering response: raw drops while the relay is on
//!
//! Raw readings are 10-bit ADC units as the firmware reports them; higher
//! raw value means drier soil.

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::link::SharedLink;
use crate::mqtt::RelayCommand;

const ADC_MIN: f64 = 0.0;
const ADC_MAX: f64 = 1023.0;

/// Raw units gained per sample while drying.
const DRY_DRIFT: f64 = 1.5;
/// Raw units lost per sample while the relay is on.
const WET_RATE: f64 = 60.0;
/// Half-width of the uniform per-sample walk.
const WALK: f64 = 4.0;

pub(crate) struct SoilSim {
    base: f64,
}

impl SoilSim {
    pub(crate) fn new() -> Self {
        // Start moderately moist so the first cycle takes a while to trigger.
        Self { base: 380.0 }
    }

    /// Advance one sample. `watering` reflects the current relay state.
    pub(crate) fn next_raw(&mut self, watering: bool) -> i64 {
        self.base += DRY_DRIFT + (fastrand::f64() - 0.5) * 2.0 * WALK;
        if watering {
            self.base -= WET_RATE;
        }
        self.base = self.base.clamp(ADC_MIN, ADC_MAX);
        self.base.round() as i64
    }
}

/// Feed the mock link with simulated sensor lines. Intended to be
/// `tokio::spawn`-ed from main when the `sim` feature is active.
pub(crate) async fn feed(link: SharedLink, sample_every: Duration) {
    let mut sim = SoilSim::new();
    info!(every_sec = sample_every.as_secs_f64(), "sim sensor feed started");

    loop {
        {
            let mut link = link.lock().await;
            let watering = link.writes.last() == Some(&RelayCommand::On);
            let raw = sim.next_raw(watering);
            link.push_line(format!("SOIL:{raw}"));
        }
        sleep(sample_every).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
