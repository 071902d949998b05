//! Function Info
//!
//! Decoded snapshot of which motor, servo and port out channels a bCore
//! reports as present.

use crate::infrastructure::bluetooth::protocol::MAX_FUNCTION_COUNT;

const IDX_MOTOR: usize = 0;
const IDX_SERVO_PORT_OUT: usize = 1;

const OFFSET_MOTOR: u8 = 0;
const OFFSET_SERVO: u8 = 0;
const OFFSET_PORT_OUT: u8 = 4;

/// Channel availability reported by the function characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionInfo {
    motor_ports: u8,
    servo_ports: u8,
    port_outs: u8,
}

impl FunctionInfo {
    /// Decode a raw function report. Missing bytes decode as "no ports".
    pub fn from_bytes(source: &[u8]) -> Self {
        Self {
            motor_ports: port_mask(source, IDX_MOTOR, OFFSET_MOTOR),
            servo_ports: port_mask(source, IDX_SERVO_PORT_OUT, OFFSET_SERVO),
            port_outs: port_mask(source, IDX_SERVO_PORT_OUT, OFFSET_PORT_OUT),
        }
    }

    pub fn motor_port_mask(&self) -> u8 {
        self.motor_ports
    }

    pub fn servo_port_mask(&self) -> u8 {
        self.servo_ports
    }

    pub fn port_out_mask(&self) -> u8 {
        self.port_outs
    }

    pub fn is_motor_port_enabled(&self, idx: usize) -> bool {
        is_port_enabled(self.motor_ports, idx)
    }

    pub fn is_servo_port_enabled(&self, idx: usize) -> bool {
        is_port_enabled(self.servo_ports, idx)
    }

    pub fn is_port_out_enabled(&self, idx: usize) -> bool {
        is_port_enabled(self.port_outs, idx)
    }

    /// Number of motor channels present
    pub fn motor_count(&self) -> usize {
        port_count(self.motor_ports)
    }

    /// Number of servo channels present
    pub fn servo_count(&self) -> usize {
        port_count(self.servo_ports)
    }

    /// Number of port out channels present
    pub fn port_out_count(&self) -> usize {
        port_count(self.port_outs)
    }

    /// Indices of the motor channels present, ascending
    pub fn motor_ports(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_FUNCTION_COUNT).filter(|&idx| self.is_motor_port_enabled(idx))
    }

    /// Indices of the servo channels present, ascending
    pub fn servo_ports(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_FUNCTION_COUNT).filter(|&idx| self.is_servo_port_enabled(idx))
    }

    /// Indices of the port out channels present, ascending
    pub fn port_out_ports(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_FUNCTION_COUNT).filter(|&idx| self.is_port_out_enabled(idx))
    }
}

fn port_mask(source: &[u8], index: usize, offset: u8) -> u8 {
    source
        .get(index)
        .map(|byte| (byte >> offset) & 0x0f)
        .unwrap_or(0)
}

fn is_port_enabled(mask: u8, idx: usize) -> bool {
    idx < MAX_FUNCTION_COUNT && (mask >> idx) & 0x01 == 0x01
}

fn port_count(mask: u8) -> usize {
    (0..MAX_FUNCTION_COUNT)
        .filter(|&idx| is_port_enabled(mask, idx))
        .count()
}
