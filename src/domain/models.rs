use serde::{Deserialize, Serialize};
use std::fmt;

/// Session connection state, reported on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

/// Per-channel direction and trim applied by the application layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub motor_flip: [bool; 4],
    #[serde(default)]
    pub servo_flip: [bool; 4],
    #[serde(default)]
    pub servo_trim: [i32; 4],
}

impl ChannelSettings {
    pub fn motor_flip(&self, idx: usize) -> bool {
        self.motor_flip.get(idx).copied().unwrap_or(false)
    }

    pub fn servo_flip(&self, idx: usize) -> bool {
        self.servo_flip.get(idx).copied().unwrap_or(false)
    }

    pub fn servo_trim(&self, idx: usize) -> i32 {
        self.servo_trim.get(idx).copied().unwrap_or(0)
    }
}
