//! The one motion record shared by the sequencer and the endstop interrupt.
//!
//! Stored as a `Cell` behind a critical-section mutex: every read and write is
//! a whole-value copy taken with interrupts masked, so whatever the interrupt
//! writes is what the foreground sees on its next access.
use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use generic::stage_proto::{Axis, CommandPacket, Direction};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionSnapshot {
    /// Last decoded axis. `ToggleSpindle` means no burst is pending.
    pub axis: Axis,
    pub direction: Direction,
    pub remaining: u16,
}

impl MotionSnapshot {
    pub const IDLE: MotionSnapshot =
        MotionSnapshot { axis: Axis::ToggleSpindle, direction: Direction::Reverse, remaining: 0 };
}

pub struct MotionState {
    cell: Mutex<Cell<MotionSnapshot>>,
}

impl Default for MotionState {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionState {
    pub const fn new() -> Self {
        MotionState { cell: Mutex::new(Cell::new(MotionSnapshot::IDLE)) }
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        critical_section::with(|cs| self.cell.borrow(cs).get())
    }

    pub fn remaining(&self) -> u16 {
        self.snapshot().remaining
    }

    pub fn update_in<F>(&self, cs: CriticalSection, f: F) -> MotionSnapshot
    where
        F: FnOnce(&mut MotionSnapshot),
    {
        let cell = self.cell.borrow(cs);
        let mut snapshot = cell.get();
        f(&mut snapshot);
        cell.set(snapshot);
        snapshot
    }

    /// Records a decoded command. A toggle leaves the step count alone.
    pub fn load_command_in(&self, cs: CriticalSection, packet: &CommandPacket) -> MotionSnapshot {
        self.update_in(cs, |motion| {
            motion.axis = packet.axis;
            motion.direction = packet.direction;
            if packet.axis.is_motion() {
                motion.remaining = packet.steps;
            }
        })
    }

    /// Counts one emitted pulse. Saturates, since the endstop handler may
    /// have zeroed the count while the pulse was in flight.
    pub fn complete_step(&self) -> u16 {
        critical_section::with(|cs| {
            self.update_in(cs, |motion| motion.remaining = motion.remaining.saturating_sub(1))
                .remaining
        })
    }

    pub fn force_stop_in(&self, cs: CriticalSection) {
        self.update_in(cs, |motion| motion.remaining = 0);
    }

    pub fn set_direction_in(&self, cs: CriticalSection, direction: Direction) {
        self.update_in(cs, |motion| motion.direction = direction);
    }
}
