mod config;
mod controller;
mod link;
mod mqtt;
#[cfg(all(feature = "sim", not(feature = "serial")))]
mod sim;
mod telemetry;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use controller::{ControlConfig, WateringController};
use link::{DeviceLink, SharedLink};
use mqtt::parse_relay_command;

/// How long the initial broker connection may take before startup fails.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env();

    // ── Device link ─────────────────────────────────────────────────
    let link: SharedLink = Arc::new(Mutex::new(
        DeviceLink::open(&cfg.serial_port, cfg.baud_rate).context("device link open failed")?,
    ));

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(&cfg.client_id, &cfg.mqtt_host, cfg.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    client
        .subscribe(&cfg.command_topic, QoS::AtLeastOnce)
        .await
        .context("mqtt subscribe failed")?;

    // A broker unreachable at startup is fatal; reconnect-with-backoff only
    // applies once a session has been established.
    tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
        .await
        .context("mqtt connect timed out")?
        .context("mqtt connect failed")?;

    info!(
        broker = %cfg.mqtt_host,
        command_topic = %cfg.command_topic,
        telemetry_topic = %cfg.telemetry_topic,
        "bridge starting"
    );

    // ── Watering controller ─────────────────────────────────────────
    let controller = WateringController::new(
        Arc::clone(&link),
        ControlConfig {
            threshold: cfg.moisture_threshold,
            watering: cfg.watering,
            settle: cfg.settle,
        },
    );

    // ── Command dispatch (the bus's inbound context) ────────────────
    let dispatch = tokio::spawn(command_loop(
        eventloop,
        controller.clone(),
        cfg.command_topic.clone(),
    ));

    // ── Simulated sensor feed (no hardware) ─────────────────────────
    #[cfg(all(feature = "sim", not(feature = "serial")))]
    tokio::spawn(sim::feed(Arc::clone(&link), Duration::from_secs(2)));

    // ── Telemetry loop until interrupted ────────────────────────────
    tokio::select! {
        _ = telemetry::run(
            Arc::clone(&link),
            client.clone(),
            cfg.telemetry_topic.clone(),
            controller,
        ) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received — shutting down");
        }
    }

    // ── Shutdown: every step attempted regardless of earlier failures
    // DISCONNECT must be queued while the dispatch task still drives the
    // event loop, then given a beat to flush, or it never leaves the channel.
    if let Err(e) = client.disconnect().await {
        warn!("mqtt disconnect failed: {e}");
    }
    sleep(Duration::from_millis(100)).await;
    dispatch.abort();
    link.lock().await.close();
    info!("bridge stopped");

    Ok(())
}

/// Poll the event loop until the broker acknowledges the session, surfacing
/// the first connection error instead of retrying.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            info!("mqtt connected");
            return Ok(());
        }
    }
}

/// Drive the MQTT event loop and dispatch inbound command messages. All
/// per-message failures are absorbed here; nothing propagates back into the
/// poll loop.
async fn command_loop(mut eventloop: EventLoop, controller: WateringController, command_topic: String) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if p.topic != command_topic {
                    debug!(topic = %p.topic, "unhandled topic");
                    continue;
                }
                match parse_relay_command(&p.payload) {
                    Ok(cmd) => {
                        info!(?cmd, "manual relay command");
                        if let Err(e) = controller.manual_command(cmd).await {
                            error!("relay write failed: {e:#}");
                        }
                    }
                    Err(e) => {
                        warn!(
                            payload = %String::from_utf8_lossy(&p.payload),
                            "dropping command: {e}"
                        );
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Startup connect ------------------------------------------------

    #[tokio::test]
    async fn startup_connect_failure_is_fatal_not_retried() {
        // Port 1 on loopback refuses immediately, so the first poll yields a
        // connection error that must surface rather than loop with backoff.
        let opts = MqttOptions::new("test-connect", "127.0.0.1", 1);
        let (_client, mut eventloop) = AsyncClient::new(opts, 10);

        let res =
            tokio::time::timeout(Duration::from_secs(5), wait_for_connack(&mut eventloop)).await;
        let res = res.expect("connect failure should surface, not retry");
        assert!(res.is_err());
    }

    // -- Shutdown ordering -----------------------------------------------

    #[tokio::test]
    async fn disconnect_needs_a_live_event_loop() {
        // Once the event loop is gone, a DISCONNECT request has nowhere to
        // go; shutdown therefore issues it before aborting the dispatch task.
        let opts = MqttOptions::new("test-shutdown", "127.0.0.1", 1883);
        let (client, eventloop) = AsyncClient::new(opts, 10);
        drop(eventloop);
        assert!(client.disconnect().await.is_err());
    }
}
