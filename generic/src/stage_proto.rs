//! Wire protocol between the host and the stage controller.
//!
//! Inbound traffic is a fixed two byte command packet:
//!
//! ```text
//! byte0: [A1 A0][D][S12 S11 S10 S9 S8]   A1A0 = axis select, D = direction
//! byte1: [S7 S6 S5 S4 S3 S2 S1 S0]       low byte of the step count
//! ```
//!
//! Outbound traffic is a single [`StatusByte`] at a time, sent asynchronously
//! with respect to the command stream.
use bitfield::bitfield;

use crate::stage_error::StageError;

pub const COMMAND_PACKET_LEN: usize = 2;

/// Largest step count the 13 bit field can carry.
pub const MAX_STEP_COUNT: u16 = 0x1FFF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    X,
    Y,
    Z,
    /// Flips the spindle output. Also stands for "no axis selected".
    ToggleSpindle,
}

impl Axis {
    pub fn from_select_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b10 => Axis::X,
            0b01 => Axis::Y,
            0b11 => Axis::Z,
            _ => Axis::ToggleSpindle,
        }
    }

    pub fn select_bits(self) -> u8 {
        match self {
            Axis::X => 0b10,
            Axis::Y => 0b01,
            Axis::Z => 0b11,
            Axis::ToggleSpindle => 0b00,
        }
    }

    /// Whether a command for this axis is followed by a step burst.
    pub fn is_motion(self) -> bool {
        !matches!(self, Axis::ToggleSpindle)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Direction line low.
    Reverse,
    /// Direction line high.
    Forward,
}

impl Direction {
    pub fn from_level(high: bool) -> Self {
        if high {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, Direction::Forward)
    }

    pub fn inverted(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

bitfield! {
    /// First byte of a command packet.
    #[derive(Clone, Copy, Eq, PartialEq)]
    pub struct CommandHeader(u8);
    impl Debug;
    u8;
    pub axis_select, set_axis_select: 7, 6;
    pub direction, set_direction: 5;
    pub steps_high, set_steps_high: 4, 0;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandPacket {
    pub axis: Axis,
    pub direction: Direction,
    /// 0..=MAX_STEP_COUNT. Ignored for `Axis::ToggleSpindle`.
    pub steps: u16,
}

impl CommandPacket {
    pub fn new(axis: Axis, direction: Direction, steps: u16) -> Result<Self, StageError> {
        if steps > MAX_STEP_COUNT {
            return Err(StageError::StepCountOutOfRange(steps));
        }
        Ok(CommandPacket { axis, direction, steps })
    }

    /// Every 2-bit axis pattern is meaningful, so decoding cannot fail.
    pub fn decode(bytes: [u8; COMMAND_PACKET_LEN]) -> Self {
        let header = CommandHeader(bytes[0]);
        CommandPacket {
            axis: Axis::from_select_bits(header.axis_select()),
            direction: Direction::from_level(header.direction()),
            steps: u16::from_be_bytes([header.steps_high(), bytes[1]]),
        }
    }

    pub fn encode(&self) -> [u8; COMMAND_PACKET_LEN] {
        let [high, low] = self.steps.to_be_bytes();
        let mut header = CommandHeader(0);
        header.set_axis_select(self.axis.select_bits());
        header.set_direction(self.direction.is_high());
        header.set_steps_high(high);
        [header.0, low]
    }

    /// Host side: a toggle command never produces a `StepsComplete` byte, so
    /// the host must not wait for one.
    pub fn expects_ack(&self) -> bool {
        self.axis.is_motion()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StatusByte {
    /// Sent on entry of the endstop handler, before any backoff.
    EndstopHit = 0xA0,
    FrameError = 0xA1,
    OverrunError = 0xA2,
    /// A received byte was dropped.
    BufferOverflow = 0xA3,
    /// Sent after every executed burst, including one cut short by an endstop.
    StepsComplete = 0xAA,
}

impl StatusByte {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl From<StatusByte> for u8 {
    fn from(status: StatusByte) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for StatusByte {
    type Error = StageError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0xA0 => Ok(StatusByte::EndstopHit),
            0xA1 => Ok(StatusByte::FrameError),
            0xA2 => Ok(StatusByte::OverrunError),
            0xA3 => Ok(StatusByte::BufferOverflow),
            0xAA => Ok(StatusByte::StepsComplete),
            other => Err(StageError::UnknownStatusByte(other)),
        }
    }
}
