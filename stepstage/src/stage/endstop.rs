//! Endstop safety handler.
//!
//! Runs from the endstop interrupt and preempts the sequencer at any point,
//! including in the middle of a step pulse. It reports the hit, reverses the
//! direction line and keeps stepping until every switch reads clear, then
//! zeroes the remaining step count so the interrupted burst ends on its next
//! check instead of driving back into the switch.
//!
//! The backoff loop has no step limit and no timeout. A switch that stays
//! asserted keeps the handler, and therefore the controller, in this loop.
use bitflags::bitflags;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;

use generic::stage_proto::{Direction, StatusByte};

use crate::common::output_port::{OutputPort, PortPins};
use crate::common::uart_comm::SerialTransport;
use crate::stage::motion_state::MotionState;
use crate::stage::step_engine::pulse;

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct EndstopSet: u8 {
        const X = 0b001;
        const Y = 0b010;
        const Z = 0b100;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EndstopSet {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "EndstopSet({=u8:#b})", self.bits());
    }
}

pub trait EndstopLines {
    fn read(&mut self) -> EndstopSet;
}

/// Three switch inputs with a common polarity.
pub struct Endstops<X, Y, Z> {
    x: X,
    y: Y,
    z: Z,
    active_high: bool,
}

impl<X: InputPin, Y: InputPin, Z: InputPin> Endstops<X, Y, Z> {
    pub fn new(x: X, y: Y, z: Z, active_high: bool) -> Self {
        Endstops { x, y, z, active_high }
    }

    pub fn pins_mut(&mut self) -> (&mut X, &mut Y, &mut Z) {
        (&mut self.x, &mut self.y, &mut self.z)
    }
}

// A line that cannot be read counts as pressed.
fn asserted<I: InputPin>(pin: &mut I, active_high: bool) -> bool {
    pin.is_high().map(|high| high == active_high).unwrap_or(true)
}

impl<X: InputPin, Y: InputPin, Z: InputPin> EndstopLines for Endstops<X, Y, Z> {
    fn read(&mut self) -> EndstopSet {
        let mut set = EndstopSet::empty();
        set.set(EndstopSet::X, asserted(&mut self.x, self.active_high));
        set.set(EndstopSet::Y, asserted(&mut self.y, self.active_high));
        set.set(EndstopSet::Z, asserted(&mut self.z, self.active_high));
        set
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BackoffReport {
    /// Switches seen on entry.
    pub triggered: EndstopSet,
    /// Direction used for the backoff.
    pub direction: Direction,
    pub backoff_pulses: u32,
    /// Output writes that failed along the way. The backoff carries on.
    pub port_faults: u32,
}

pub struct EndstopSafetyHandler<'a, P> {
    motion: &'a MotionState,
    port: &'a OutputPort<P>,
}

impl<'a, P: PortPins> EndstopSafetyHandler<'a, P> {
    pub fn new(motion: &'a MotionState, port: &'a OutputPort<P>) -> Self {
        EndstopSafetyHandler { motion, port }
    }

    /// The whole body is one critical section with respect to the motion
    /// record and the output port.
    pub fn handle<E, T, D>(&self, endstops: &mut E, transport: &mut T, delay: &mut D) -> BackoffReport
    where
        E: EndstopLines,
        T: SerialTransport,
        D: DelayNs,
    {
        critical_section::with(|cs| {
            transport.send_status(StatusByte::EndstopHit);
            let triggered = endstops.read();
            let mut port_faults: u32 = 0;

            let direction = match self.port.modify_in(cs, |bits| {
                let reversed = bits.direction().inverted();
                bits.set_direction(reversed);
            }) {
                Ok(bits) => bits.direction(),
                Err(err) => {
                    error!("[STAGE] endstop: failed to reverse direction: {}", err);
                    port_faults += 1;
                    self.motion.snapshot().direction.inverted()
                }
            };
            self.motion.set_direction_in(cs, direction);
            warn!("[STAGE] endstop hit {}, backing off {}", triggered, direction);

            let mut backoff_pulses: u32 = 0;
            while !endstops.read().is_empty() {
                match pulse(self.port, delay) {
                    Ok(()) => backoff_pulses = backoff_pulses.wrapping_add(1),
                    Err(err) => {
                        error!("[STAGE] endstop: backoff pulse failed: {}", err);
                        port_faults = port_faults.wrapping_add(1);
                    }
                }
            }

            self.motion.force_stop_in(cs);
            info!("[STAGE] endstop clear after {} backoff pulses", backoff_pulses);
            BackoffReport { triggered, direction, backoff_pulses, port_faults }
        })
    }
}
