//! The stage output register: step, direction, three axis enables and the
//! spindle toggle. The foreground loop and the endstop interrupt both drive
//! overlapping lines of it, so every change goes through [`OutputPort::modify`],
//! a read-modify-write of a shadow copy inside a critical section.
use core::cell::RefCell;

use bitfield::bitfield;
use critical_section::{CriticalSection, Mutex};
use embedded_hal::digital::{OutputPin, PinState};

use generic::stage_error::StageError;
use generic::stage_proto::{Axis, Direction};

bitfield! {
    #[derive(Clone, Copy, Default, Eq, PartialEq)]
    pub struct PortBits(u8);
    impl Debug;
    u8;
    pub step, set_step: 0;
    pub dir, set_dir: 1;
    pub x_enable, set_x_enable: 2;
    pub y_enable, set_y_enable: 3;
    pub z_enable, set_z_enable: 4;
    pub toggle, set_toggle: 5;
}

#[cfg(feature = "defmt")]
impl defmt::Format for PortBits {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "PortBits({=u8:#b})", self.0);
    }
}

impl PortBits {
    /// Step idles high since the driver steps on the falling edge.
    pub const POWER_ON: PortBits = PortBits(0b0000_0001);

    /// Selects exactly one axis enable, or flips the toggle line for
    /// `Axis::ToggleSpindle` without touching the enables.
    pub fn select_axis(&mut self, axis: Axis) {
        match axis {
            Axis::X => self.set_enables(true, false, false),
            Axis::Y => self.set_enables(false, true, false),
            Axis::Z => self.set_enables(false, false, true),
            Axis::ToggleSpindle => {
                let toggle = self.toggle();
                self.set_toggle(!toggle);
            }
        }
    }

    pub fn disable_axes(&mut self) {
        self.set_enables(false, false, false);
    }

    pub fn enabled_axis(&self) -> Option<Axis> {
        match (self.x_enable(), self.y_enable(), self.z_enable()) {
            (true, false, false) => Some(Axis::X),
            (false, true, false) => Some(Axis::Y),
            (false, false, true) => Some(Axis::Z),
            _ => None,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::from_level(self.dir())
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.set_dir(direction.is_high());
    }

    fn set_enables(&mut self, x: bool, y: bool, z: bool) {
        self.set_x_enable(x);
        self.set_y_enable(y);
        self.set_z_enable(z);
    }
}

/// Hardware behind a [`PortBits`] shadow.
pub trait PortPins {
    /// Drives the lines that differ between `previous` and `next`.
    fn write(&mut self, previous: PortBits, next: PortBits) -> Result<(), StageError>;
}

pub struct StagePins<O: OutputPin> {
    step: O,
    dir: O,
    x_enable: O,
    y_enable: O,
    z_enable: O,
    toggle: O,
}

impl<O: OutputPin> StagePins<O> {
    pub fn new(step: O, dir: O, x_enable: O, y_enable: O, z_enable: O, toggle: O) -> Self {
        StagePins { step, dir, x_enable, y_enable, z_enable, toggle }
    }
}

fn drive<O: OutputPin>(pin: &mut O, previous: bool, next: bool) -> Result<(), StageError> {
    if previous == next {
        return Ok(());
    }
    pin.set_state(PinState::from(next)).map_err(|_| StageError::GpioPinError)
}

impl<O: OutputPin> PortPins for StagePins<O> {
    fn write(&mut self, previous: PortBits, next: PortBits) -> Result<(), StageError> {
        drive(&mut self.x_enable, previous.x_enable(), next.x_enable())?;
        drive(&mut self.y_enable, previous.y_enable(), next.y_enable())?;
        drive(&mut self.z_enable, previous.z_enable(), next.z_enable())?;
        drive(&mut self.toggle, previous.toggle(), next.toggle())?;
        drive(&mut self.dir, previous.dir(), next.dir())?;
        // Step last, so direction is settled before an edge.
        drive(&mut self.step, previous.step(), next.step())
    }
}

struct PortState<P> {
    bits: PortBits,
    pins: P,
}

pub struct OutputPort<P> {
    inner: Mutex<RefCell<Option<PortState<P>>>>,
}

impl<P> Default for OutputPort<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> OutputPort<P> {
    /// A port with no hardware yet, for use in a `static`.
    pub const fn new() -> Self {
        OutputPort { inner: Mutex::new(RefCell::new(None)) }
    }
}

impl<P: PortPins> OutputPort<P> {
    pub fn with_pins(pins: P) -> Result<Self, StageError> {
        let port = Self::new();
        port.attach(pins)?;
        Ok(port)
    }

    /// Takes ownership of the pins and drives every line to `PortBits::POWER_ON`.
    pub fn attach(&self, mut pins: P) -> Result<(), StageError> {
        let bits = PortBits::POWER_ON;
        pins.write(PortBits(!bits.0), bits)?;
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).replace(PortState { bits, pins });
        });
        Ok(())
    }

    pub fn read(&self) -> Result<PortBits, StageError> {
        critical_section::with(|cs| {
            self.inner.borrow_ref(cs).as_ref().map(|state| state.bits).ok_or(StageError::PortNotAttached)
        })
    }

    pub fn modify<F>(&self, f: F) -> Result<PortBits, StageError>
    where
        F: FnOnce(&mut PortBits),
    {
        critical_section::with(|cs| self.modify_in(cs, f))
    }

    /// Same as [`OutputPort::modify`] for callers already holding a critical
    /// section. Returns the new register value.
    pub fn modify_in<F>(&self, cs: CriticalSection, f: F) -> Result<PortBits, StageError>
    where
        F: FnOnce(&mut PortBits),
    {
        let mut guard = self.inner.borrow_ref_mut(cs);
        let state = guard.as_mut().ok_or(StageError::PortNotAttached)?;
        let mut next = state.bits;
        f(&mut next);
        state.pins.write(state.bits, next)?;
        state.bits = next;
        Ok(next)
    }
}
