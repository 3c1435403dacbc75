use serde::{Deserialize, Deserializer};

use crate::error::{DebuggerError, Result};

/// Raw frame kinds reported by the VM. Only function frames carry a
/// function id; guard frames mark callback/proxy re-entry points and never
/// map to source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Function,
    InitExpr,
    Block,
    Loop,
    If,
    ProxyGuard,
    CallbackGuard,
}

impl FrameType {
    pub fn from_code(code: u8) -> Option<FrameType> {
        match code {
            0 => Some(FrameType::Function),
            1 => Some(FrameType::InitExpr),
            2 => Some(FrameType::Block),
            3 => Some(FrameType::Loop),
            4 => Some(FrameType::If),
            254 => Some(FrameType::ProxyGuard),
            255 => Some(FrameType::CallbackGuard),
            _ => None,
        }
    }

    pub fn is_function(self) -> bool {
        self == FrameType::Function
    }

    pub fn is_guard(self) -> bool {
        matches!(self, FrameType::ProxyGuard | FrameType::CallbackGuard)
    }
}

/// Integers on the wire arrive either as JSON numbers or as hex strings
/// such as `"0x29"`, depending on the firmware revision.
fn parse_wire_u32(raw: &RawNum) -> std::result::Result<u32, String> {
    match raw {
        RawNum::Int(v) => u32::try_from(*v).map_err(|_| format!("integer out of range: {}", v)),
        RawNum::Text(s) => {
            let trimmed = s.trim();
            let parsed = if let Some(hex) = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
            {
                u32::from_str_radix(hex, 16)
            } else {
                trimmed.parse::<u32>()
            };
            parsed.map_err(|_| format!("malformed integer: {:?}", s))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNum {
    Int(u64),
    Text(String),
}

fn wire_u32<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    let raw = RawNum::deserialize(deserializer)?;
    parse_wire_u32(&raw).map_err(serde::de::Error::custom)
}

fn wire_u32_opt<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error> {
    let raw = Option::<RawNum>::deserialize(deserializer)?;
    raw.map(|r| parse_wire_u32(&r).map_err(serde::de::Error::custom))
        .transpose()
}

/// One value slot on the operand stack or in the global section.
#[derive(Debug, Clone, Deserialize)]
pub struct WireValue {
    #[serde(deserialize_with = "wire_u32")]
    pub idx: u32,
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl WireValue {
    /// Display form of the value; the engine never computes with it.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One raw frame of the VM's mixed function/block/guard stack.
#[derive(Debug, Clone, Deserialize)]
pub struct WireFrame {
    #[serde(deserialize_with = "wire_u32")]
    pub idx: u32,
    #[serde(rename = "type")]
    pub type_code: u8,
    #[serde(default, deserialize_with = "wire_u32_opt")]
    pub fidx: Option<u32>,
    #[serde(default = "minus_one")]
    pub sp: i64,
    #[serde(default = "minus_one")]
    pub fp: i64,
    #[serde(deserialize_with = "wire_u32")]
    pub ra: u32,
}

fn minus_one() -> i64 {
    -1
}

impl WireFrame {
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_code(self.type_code)
    }
}

/// An asynchronous event queued on the device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireEvent {
    pub topic: String,
    #[serde(default)]
    pub payload: String,
}

/// Maps one interrupt pin to entries of the indirect-call table.
#[derive(Debug, Clone, Deserialize)]
pub struct WireCallbackMapping {
    #[serde(deserialize_with = "wire_u32")]
    pub pin: u32,
    #[serde(default)]
    pub targets: Vec<u32>,
}

/// A structured inspection response. Every field is optional: the target
/// only answers what the matching [`StateRequest`](super::StateRequest)
/// asked for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireState {
    #[serde(default, deserialize_with = "wire_u32_opt")]
    pub pc: Option<u32>,
    #[serde(default)]
    pub stack: Option<Vec<WireValue>>,
    #[serde(default)]
    pub callstack: Option<Vec<WireFrame>>,
    #[serde(default)]
    pub globals: Option<Vec<WireValue>>,
    #[serde(default)]
    pub events: Option<Vec<WireEvent>>,
    #[serde(default)]
    pub callbacks: Option<Vec<WireCallbackMapping>>,
    #[serde(default)]
    pub table: Option<Vec<u32>>,
    #[serde(default, deserialize_with = "wire_u32_opt")]
    pub pcerror: Option<u32>,
    #[serde(default)]
    pub exception_msg: Option<String>,
}

impl WireState {
    pub fn from_json(text: &str) -> Result<WireState> {
        serde_json::from_str(text)
            .map_err(|e| DebuggerError::Transport(format!("malformed inspection response: {}", e)))
    }
}
