use embedded_hal::delay::DelayNs;

use generic::stage_error::StageError;

use crate::bsp::config::{STEP_HOLD_TIME, STEP_PULSE_WIDTH};
use crate::common::output_port::{OutputPort, PortPins};
use crate::stage::motion_state::MotionState;

/// One step: falling edge, `STEP_PULSE_WIDTH` low, rising edge, then
/// `STEP_HOLD_TIME` high. Blocks for the whole period.
pub fn pulse<P, D>(port: &OutputPort<P>, delay: &mut D) -> Result<(), StageError>
where
    P: PortPins,
    D: DelayNs,
{
    port.modify(|bits| bits.set_step(false))?;
    delay.delay_us(STEP_PULSE_WIDTH.to_micros());
    port.modify(|bits| bits.set_step(true))?;
    delay.delay_us(STEP_HOLD_TIME.to_micros());
    Ok(())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BurstOutcome {
    /// Toggle command, nothing to step and nothing to acknowledge.
    NoMotion,
    /// The count reached zero, either by stepping or because the endstop
    /// handler zeroed it. The two are not told apart.
    Completed { pulses: u16 },
}

pub struct StepPulseEngine<'a, P, D> {
    motion: &'a MotionState,
    port: &'a OutputPort<P>,
    delay: D,
}

impl<'a, P, D> StepPulseEngine<'a, P, D>
where
    P: PortPins,
    D: DelayNs,
{
    pub fn new(motion: &'a MotionState, port: &'a OutputPort<P>, delay: D) -> Self {
        StepPulseEngine { motion, port, delay }
    }

    /// Steps until the shared remaining count is zero, then drops all axis
    /// enables. The count is re-read before every pulse.
    pub fn execute(&mut self) -> Result<BurstOutcome, StageError> {
        let start = self.motion.snapshot();
        if !start.axis.is_motion() {
            return Ok(BurstOutcome::NoMotion);
        }

        info!("[STAGE] burst: {} steps on {}, {}", start.remaining, start.axis, start.direction);
        let mut pulses: u16 = 0;
        while self.motion.remaining() > 0 {
            pulse(self.port, &mut self.delay)?;
            self.motion.complete_step();
            pulses = pulses.saturating_add(1);
        }

        self.port.modify(|bits| bits.disable_axes())?;
        debug!("[STAGE] burst done after {} pulses", pulses);
        Ok(BurstOutcome::Completed { pulses })
    }

    pub fn release(self) -> D {
        self.delay
    }
}
