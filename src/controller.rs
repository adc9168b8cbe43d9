//! Automatic watering controller: watches moisture readings, launches timed
//! relay cycles, and arbitrates with manual commands arriving over MQTT.
//!
//! ## State machine
//!
//! ```text
//! Idle ──[reading > threshold]──▶ Cycling ──[watering elapsed]──▶ Settling
//!  ▲                              (relay ON)                     (relay OFF)
//!  └─────────────[settle elapsed — finalizer clears `active`]────────┘
//! ```
//!
//! The `active` flag is the only piece of state shared between the telemetry
//! loop (which triggers cycles) and the cycle task itself. The check-and-set
//! at launch and the clear at completion each happen atomically under one
//! mutex, so two cycles can never run at once, and the cycle never holds the
//! lock across its multi-second waits.
//!
//! Ownership of the clear is deliberately single-writer: a reading that shows
//! moisture has recovered while a cycle runs only logs; the cycle's own
//! finalizer is the one place `active` goes back to false, even when a relay
//! write inside the cycle fails.
//!
//! Manual commands bypass the state machine entirely: they write the relay
//! frame straight to the device link without touching `active`, so an
//! operator can always override what the automation is doing. Relay writes
//! from both paths land on the same physical device, last write wins.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info};

use crate::link::SharedLink;
use crate::mqtt::RelayCommand;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Cycle trigger and timing parameters. Tests shrink the durations to
/// milliseconds; production values come from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlConfig {
    /// Raw moisture value; a reading strictly greater than this starts a
    /// cycle (higher raw value = drier soil).
    pub threshold: i64,
    /// Relay-on duration per cycle.
    pub watering: Duration,
    /// Relay-off settling period before the controller goes back to idle.
    pub settle: Duration,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct WateringController {
    link: SharedLink,
    cfg: ControlConfig,
    /// True from the moment a cycle is launched until its finalizer runs.
    active: Arc<Mutex<bool>>,
}

impl WateringController {
    pub(crate) fn new(link: SharedLink, cfg: ControlConfig) -> Self {
        Self {
            link,
            cfg,
            active: Arc::new(Mutex::new(false)),
        }
    }

    /// Threshold check, called by the telemetry loop for every fresh reading.
    ///
    /// Launches a detached cycle task when the soil is dry and no cycle is
    /// running. The flag is set while the lock is held, before the task is
    /// spawned, so concurrent readings cannot double-launch.
    pub(crate) async fn on_reading(&self, moisture: i64) {
        if moisture > self.cfg.threshold {
            let mut active = self.active.lock().await;
            if *active {
                return; // cycle already in flight
            }
            *active = true;
            info!(moisture, threshold = self.cfg.threshold, "soil dry — starting watering cycle");

            let controller = self.clone();
            tokio::spawn(async move {
                controller.run_cycle().await;
            });
        } else {
            let active = self.active.lock().await;
            if *active {
                // Informational only. The running cycle owns the flag and
                // will wind down on its own schedule.
                info!(moisture, "moisture sufficient — cycle will finish on its own");
            }
        }
    }

    /// Manual override from an inbound command: a direct relay write,
    /// independent of whether a cycle is running.
    pub(crate) async fn manual_command(&self, cmd: RelayCommand) -> Result<()> {
        self.link.lock().await.write_relay(cmd)
    }

    pub(crate) async fn is_active(&self) -> bool {
        *self.active.lock().await
    }

    /// One full cycle: relay on, watering wait, relay off, settling wait.
    /// A write error abandons the rest of the sequence, but the finalizer
    /// below always clears `active` so a later dry reading can retrigger.
    async fn run_cycle(&self) {
        if let Err(e) = self.pulse().await {
            error!("watering cycle failed: {e:#}");
        }

        *self.active.lock().await = false;
        info!("watering cycle finished");
    }

    async fn pulse(&self) -> Result<()> {
        self.link.lock().await.write_relay(RelayCommand::On)?;
        info!(duration_sec = self.cfg.watering.as_secs_f64(), "relay on — watering");
        sleep(self.cfg.watering).await;

        self.link.lock().await.write_relay(RelayCommand::Off)?;
        info!(duration_sec = self.cfg.settle.as_secs_f64(), "relay off — settling");
        sleep(self.cfg.settle).await;

        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
