//! Scenario files.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// What the scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// The port's transmit pin is wired to its receive pin.
    Loopback,
    /// A scripted peer sends the payload to the port.
    Receive,
    /// Port and peer share one pin; the port sends, the peer replies.
    OneWire,
}

/// Receive and transmit pins.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Pins {
    /// Receive pin (also the shared pin in one-wire mode).
    pub rx: u8,
    /// Transmit pin. Ignored in one-wire mode.
    #[serde(default = "default_tx")]
    pub tx: u8,
    /// Optional transmit enable pin.
    pub tx_enable: Option<u8>,
}

/// Bytes to send, given as text or as raw values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Payload {
    /// UTF-8 text.
    pub text: Option<String>,
    /// Raw byte values, appended after `text`.
    #[serde(default)]
    pub bytes: Vec<u8>,
}

impl Payload {
    /// The bytes this payload describes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.text.as_deref().unwrap_or_default().as_bytes().to_vec();
        out.extend_from_slice(&self.bytes);
        out
    }
}

/// A complete scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Scenario {
    /// Name shown in the report.
    #[serde(default)]
    pub name: String,
    /// What to run.
    pub mode: Mode,
    /// Port baud rate.
    pub baud: u32,
    /// Peer baud rate, to model clock mismatch. Defaults to `baud`.
    pub peer_baud: Option<u32>,
    /// Board clock frequency.
    #[serde(default = "default_clock_hz")]
    pub clock_hz: u32,
    /// Inverted line logic.
    #[serde(default)]
    pub invert: bool,
    /// Cycles between an edge and its handler.
    #[serde(default)]
    pub isr_latency_cycles: u32,
    /// Counter value at power-up.
    #[serde(default)]
    pub start_counter: u32,
    /// Receive buffer size in bytes.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Edge buffer size. 0 picks ten edges per buffered byte.
    #[serde(default)]
    pub edge_capacity: usize,
    /// Stop-bit grace in bit periods.
    #[serde(default = "default_stop_bit_grace")]
    pub stop_bit_grace: u32,
    /// Pin assignment.
    pub pins: Pins,
    /// Bytes sent by the port (loopback, one-wire) or the peer (receive).
    pub payload: Payload,
    /// Peer's answer in one-wire mode.
    #[serde(default)]
    pub reply: Payload,
}

fn default_tx() -> u8 {
    5
}

fn default_clock_hz() -> u32 {
    80_000_000
}

fn default_buffer_capacity() -> usize {
    64
}

fn default_stop_bit_grace() -> u32 {
    2
}

impl Scenario {
    /// Reads and validates a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut scenario = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if scenario.name.is_empty() {
            scenario.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(scenario)
    }

    /// Parses and validates scenario text.
    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        if self.baud == 0 || self.peer_baud == Some(0) {
            bail!("baud rates must be non-zero");
        }
        if self.clock_hz / self.baud < 16 {
            bail!(
                "{} baud is too fast for a {} Hz clock",
                self.baud,
                self.clock_hz
            );
        }
        if self.payload.to_bytes().is_empty() && self.mode != Mode::OneWire {
            bail!("payload is empty");
        }
        if self.mode == Mode::OneWire && self.reply.to_bytes().is_empty() {
            bail!("one-wire scenarios need a reply");
        }
        Ok(())
    }

    /// Baud rate of the scripted peer.
    pub fn peer_baud(&self) -> u32 {
        self.peer_baud.unwrap_or(self.baud)
    }
}
