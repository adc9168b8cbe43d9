//! Telemetry loop: polls the device link for sensor lines, republishes
//! moisture readings over MQTT, and feeds them to the watering controller.

use std::time::Duration;

use rumqttc::{AsyncClient, QoS};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::controller::WateringController;
use crate::link::SharedLink;
use crate::mqtt::TelemetryMsg;

/// How long to wait between polls when the link has nothing buffered.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Backoff after a link read error before polling again.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ReadingError {
    #[error("invalid moisture value {0:?}")]
    InvalidReading(String),
}

/// Parse a sensor line. `SOIL:<int>` yields a reading; lines without the
/// prefix belong to other firmware chatter and are skipped.
pub(crate) fn parse_soil_line(line: &str) -> Result<Option<i64>, ReadingError> {
    let Some(rest) = line.strip_prefix("SOIL:") else {
        return Ok(None);
    };
    rest.trim()
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ReadingError::InvalidReading(rest.to_string()))
}

/// Run the telemetry loop for the lifetime of the process. Intended to be
/// driven from main and raced against the shutdown signal.
pub(crate) async fn run(
    link: SharedLink,
    client: AsyncClient,
    telemetry_topic: String,
    controller: WateringController,
) {
    loop {
        let read = link.lock().await.try_read_line();
        match read {
            Ok(Some(line)) => handle_line(&line, &client, &telemetry_topic, &controller).await,
            Ok(None) => sleep(POLL_INTERVAL).await,
            Err(e) => {
                error!("device link read failed: {e:#}");
                sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Process one received line: parse, publish, feed the controller.
/// Per-reading failures are logged and dropped; the loop never dies to one
/// bad line.
async fn handle_line(
    line: &str,
    client: &AsyncClient,
    telemetry_topic: &str,
    controller: &WateringController,
) {
    let moisture = match parse_soil_line(line) {
        Ok(Some(moisture)) => moisture,
        Ok(None) => {
            debug!(line, "ignoring non-sensor line");
            return;
        }
        Err(e) => {
            warn!(line, "dropping reading: {e}");
            return;
        }
    };
    debug!(moisture, "sensor reading");

    match telemetry_payload(moisture) {
        Ok(payload) => {
            if let Err(e) = client
                .publish(telemetry_topic, QoS::AtLeastOnce, false, payload)
                .await
            {
                error!("telemetry publish failed: {e}");
            }
        }
        Err(e) => error!("telemetry encode failed: {e}"),
    }

    controller.on_reading(moisture).await;
}

/// Exact wire payload published for a reading: `{"soil_moisture":<value>}`.
fn telemetry_payload(moisture: i64) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&TelemetryMsg {
        soil_moisture: moisture,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
