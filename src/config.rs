//! Launch configuration handed to the engine by the IDE-facing layer.

use serde::{Deserialize, Serialize};

use crate::error::{DebuggerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebuggingMode {
    /// Classic on-device debugging over the request/response channel.
    Remote,
    /// Event-driven debugging with out-of-place event handling.
    Edward,
    /// Sampling-style debugging of an unattended deployment.
    OutOfThings,
}

/// How to reach the target: a development VM over a socket, or a physical
/// board over a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Connection {
    Socket { host: String, port: u16 },
    Serial { port: String, baudrate: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnStartConfig {
    pub pause: bool,
    pub flash: bool,
    pub update_source: bool,
}

impl Default for OnStartConfig {
    fn default() -> Self {
        Self {
            pause: true,
            flash: true,
            update_source: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerConfig {
    pub program: String,
    pub mode: DebuggingMode,
    pub connection: Connection,
    #[serde(default)]
    pub on_start: OnStartConfig,
    /// Pause at every interrupt by installing callback-entry breakpoints
    /// right after connecting.
    #[serde(default)]
    pub break_on_interrupts: bool,
}

impl DebuggerConfig {
    pub fn from_json(text: &str) -> Result<DebuggerConfig> {
        let config: DebuggerConfig = serde_json::from_str(text)
            .map_err(|e| DebuggerError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(DebuggerError::InvalidConfiguration(
                "`program` must name the module to debug".to_string(),
            ));
        }
        match &self.connection {
            Connection::Socket { host, port } => {
                if host.is_empty() || *port == 0 {
                    return Err(DebuggerError::InvalidConfiguration(
                        "socket connection needs a host and a non-zero port".to_string(),
                    ));
                }
            }
            Connection::Serial { port, baudrate } => {
                if port.is_empty() || *baudrate == 0 {
                    return Err(DebuggerError::InvalidConfiguration(
                        "serial connection needs a device path and a baudrate".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
