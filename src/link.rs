//! Device link to the sensor/actuator microcontroller. The `serial` feature
//! gates the real serialport driver; without it, a mock implementation backed
//! by in-memory queues stands in (it is also what the `sim` feed writes to).
//!
//! The link is shared by three contexts (the telemetry poll loop, the
//! command dispatch task, and any running watering cycle), so it lives behind
//! an async mutex. Every method under the lock is a short, bounded operation;
//! nothing holds the lock across a timed wait.

use crate::mqtt::RelayCommand;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) type SharedLink = Arc<Mutex<DeviceLink>>;

/// Actuator command frames, exactly as the firmware expects them.
const FRAME_RELAY_ON: &[u8] = b"RELAY_ON\n";
const FRAME_RELAY_OFF: &[u8] = b"RELAY_OFF\n";

// ---------------------------------------------------------------------------
// Real serial link (production — requires the `serial` feature + hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "serial")]
pub(crate) struct DeviceLink {
    port: Box<dyn serialport::SerialPort>,
    /// Bytes of a partially received line, carried across polls.
    pending: Vec<u8>,
}

#[cfg(feature = "serial")]
impl DeviceLink {
    pub(crate) fn open(path: &str, baud_rate: u32) -> Result<Self> {
        use anyhow::Context;

        let port = serialport::new(path, baud_rate)
            .timeout(std::time::Duration::from_millis(500))
            .open()
            .with_context(|| format!("open serial port {path} at {baud_rate} baud"))?;

        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }

    /// Drain whatever the port has buffered and return one complete line if a
    /// newline has arrived, `None` otherwise. Never waits for more input.
    pub(crate) fn try_read_line(&mut self) -> Result<Option<String>> {
        use std::io::Read;

        while self.port.bytes_to_read()? > 0 {
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'\n' {
                        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                        self.pending.clear();
                        return Ok(Some(line));
                    }
                    self.pending.push(byte[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    pub(crate) fn write_relay(&mut self, cmd: RelayCommand) -> Result<()> {
        use std::io::Write;

        let frame = match cmd {
            RelayCommand::On => FRAME_RELAY_ON,
            RelayCommand::Off => FRAME_RELAY_OFF,
        };
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        // Dropping the port handle closes it; nothing extra to do here, but
        // keeping the method gives shutdown an explicit step to log.
        tracing::info!("serial link closed");
    }
}

// ---------------------------------------------------------------------------
// Mock link (development & tests — no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "serial"))]
pub(crate) struct DeviceLink {
    /// Lines waiting to be "received"; tests and the sim feed push here.
    pub(crate) lines: std::collections::VecDeque<String>,
    /// Every relay frame written, in order.
    pub(crate) writes: Vec<RelayCommand>,
    /// When set, `write_relay` fails, for exercising cycle error paths.
    pub(crate) fail_writes: bool,
}

#[cfg(not(feature = "serial"))]
impl DeviceLink {
    pub(crate) fn open(path: &str, baud_rate: u32) -> Result<Self> {
        tracing::info!("[mock-serial] link on {path} at {baud_rate} baud (not wired)");
        Ok(Self {
            lines: std::collections::VecDeque::new(),
            writes: Vec::new(),
            fail_writes: false,
        })
    }

    pub(crate) fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
    }

    pub(crate) fn try_read_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front().map(|l| l.trim().to_string()))
    }

    pub(crate) fn write_relay(&mut self, cmd: RelayCommand) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("mock write failure");
        }
        let frame = match cmd {
            RelayCommand::On => FRAME_RELAY_ON,
            RelayCommand::Off => FRAME_RELAY_OFF,
        };
        tracing::debug!("[mock-serial] wrote {:?}", String::from_utf8_lossy(frame));
        self.writes.push(cmd);
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        tracing::info!("[mock-serial] link closed");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- DeviceLink (mock) --------------------------------------------------

    #[test]
    fn read_returns_none_when_empty() {
        let mut link = DeviceLink::open("/dev/null", 9600).unwrap();
        assert_eq!(link.try_read_line().unwrap(), None);
    }

    #[test]
    fn read_returns_pushed_lines_in_order() {
        let mut link = DeviceLink::open("/dev/null", 9600).unwrap();
        link.push_line("SOIL:500");
        link.push_line("SOIL:480");
        assert_eq!(link.try_read_line().unwrap().as_deref(), Some("SOIL:500"));
        assert_eq!(link.try_read_line().unwrap().as_deref(), Some("SOIL:480"));
        assert_eq!(link.try_read_line().unwrap(), None);
    }

    #[test]
    fn read_trims_line_endings() {
        let mut link = DeviceLink::open("/dev/null", 9600).unwrap();
        link.push_line("SOIL:500\r");
        assert_eq!(link.try_read_line().unwrap().as_deref(), Some("SOIL:500"));
    }

    #[test]
    fn write_records_commands() {
        let mut link = DeviceLink::open("/dev/null", 9600).unwrap();
        link.write_relay(RelayCommand::On).unwrap();
        link.write_relay(RelayCommand::Off).unwrap();
        assert_eq!(link.writes, vec![RelayCommand::On, RelayCommand::Off]);
    }

    #[test]
    fn write_fails_when_injected() {
        let mut link = DeviceLink::open("/dev/null", 9600).unwrap();
        link.fail_writes = true;
        assert!(link.write_relay(RelayCommand::On).is_err());
        assert!(link.writes.is_empty());
    }
}
