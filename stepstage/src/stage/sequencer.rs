use embedded_hal::delay::DelayNs;

use generic::stage_proto::{StatusByte, COMMAND_PACKET_LEN};

use crate::common::output_port::{OutputPort, PortPins};
use crate::common::uart_comm::SerialTransport;
use crate::stage::command_decoder::CommandDecoder;
use crate::stage::motion_state::MotionState;
use crate::stage::step_engine::{BurstOutcome, StepPulseEngine};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    AwaitByte0,
    AwaitByte1 { b0: u8 },
    Decode { bytes: [u8; COMMAND_PACKET_LEN] },
    Execute,
    Acknowledge,
}

/// Reports any error flags of one poll to the host and returns the byte if
/// it arrived clean.
fn poll_clean_byte<T: SerialTransport>(transport: &mut T) -> Option<u8> {
    let poll = transport.receive_byte();
    for error in poll.flags.transport_errors() {
        if let Some(status) = error.status_byte() {
            warn!("[STAGE] receive error {}", error);
            transport.send_status(status);
        }
    }
    poll.clean_byte()
}

/// Foreground loop: receive, decode, execute, acknowledge.
pub struct Sequencer<'a, P, T, D> {
    motion: &'a MotionState,
    port: &'a OutputPort<P>,
    transport: T,
    delay: D,
    state: SequencerState,
}

impl<'a, P, T, D> Sequencer<'a, P, T, D>
where
    P: PortPins,
    T: SerialTransport,
    D: DelayNs,
{
    pub fn new(motion: &'a MotionState, port: &'a OutputPort<P>, transport: T, delay: D) -> Self {
        Sequencer { motion, port, transport, delay, state: SequencerState::AwaitByte0 }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Performs one transition and returns the new state.
    pub fn step(&mut self) -> SequencerState {
        self.state = match self.state {
            SequencerState::AwaitByte0 => match poll_clean_byte(&mut self.transport) {
                Some(b0) => SequencerState::AwaitByte1 { b0 },
                None => SequencerState::AwaitByte0,
            },
            SequencerState::AwaitByte1 { b0 } => match poll_clean_byte(&mut self.transport) {
                Some(b1) => SequencerState::Decode { bytes: [b0, b1] },
                None => SequencerState::AwaitByte1 { b0 },
            },
            SequencerState::Decode { bytes } => {
                if let Err(err) = CommandDecoder::new(self.motion, self.port).decode(bytes) {
                    error!("[STAGE] failed to apply command {}: {}", bytes, err);
                }
                SequencerState::Execute
            }
            SequencerState::Execute => self.execute(),
            SequencerState::Acknowledge => {
                self.transport.send_status(StatusByte::StepsComplete);
                SequencerState::AwaitByte0
            }
        };
        self.state
    }

    fn execute(&mut self) -> SequencerState {
        let mut engine = StepPulseEngine::new(self.motion, self.port, &mut self.delay);
        match engine.execute() {
            Ok(BurstOutcome::NoMotion) => SequencerState::AwaitByte0,
            Ok(BurstOutcome::Completed { .. }) => SequencerState::Acknowledge,
            Err(err) => {
                error!("[STAGE] burst aborted: {}", err);
                if let Err(err) = self.port.modify(|bits| bits.disable_axes()) {
                    error!("[STAGE] failed to release axes: {}", err);
                }
                SequencerState::Acknowledge
            }
        }
    }

    pub fn run(&mut self) -> ! {
        info!("[STAGE] sequencer running");
        loop {
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::uart_comm::{RxPoll, SharedSerial};
    use crate::stage::endstop::{EndstopSafetyHandler, EndstopSet};
    use crate::stage::mock_hw::{Line, PinTrace, RecordingDelay, ScriptedEndstops, ScriptedSerial};
    use core::cell::RefCell;
    use generic::rx_flags::RxFlags;
    use generic::stage_proto::{Axis, Direction};

    /// Steps until all scripted input is consumed and the sequencer is back
    /// to waiting for a packet.
    fn drain<P: PortPins, D: DelayNs>(seq: &mut Sequencer<P, ScriptedSerial, D>) {
        while !(seq.state() == SequencerState::AwaitByte0 && seq.transport.is_exhausted()) {
            seq.step();
        }
    }

    #[test]
    fn test_state_walk() {
        let trace = PinTrace::new();
        let port = OutputPort::with_pins(trace.stage_pins()).unwrap();
        let motion = MotionState::new();
        let serial = ScriptedSerial::with_bytes(&[0x40, 0x02]);
        let mut seq = Sequencer::new(&motion, &port, serial, RecordingDelay::new());

        assert_eq!(seq.state(), SequencerState::AwaitByte0);
        assert_eq!(seq.step(), SequencerState::AwaitByte1 { b0: 0x40 });
        assert_eq!(seq.step(), SequencerState::Decode { bytes: [0x40, 0x02] });
        assert_eq!(seq.step(), SequencerState::Execute);
        assert_eq!(seq.step(), SequencerState::Acknowledge);
        assert_eq!(seq.step(), SequencerState::AwaitByte0);
        assert_eq!(seq.step(), SequencerState::AwaitByte0);

        assert_eq!(trace.falling_edges(Line::Step), 2);
        assert_eq!(seq.transport.sent(), vec![0xAA]);
    }

    #[test]
    fn test_waits_for_second_byte() {
        let trace = PinTrace::new();
        let port = OutputPort::with_pins(trace.stage_pins()).unwrap();
        let motion = MotionState::new();
        let serial = ScriptedSerial::with_input(&[
            RxPoll::data(0x80),
            RxPoll::no_data(),
            RxPoll::no_data(),
            RxPoll::data(0x01),
        ]);
        let mut seq = Sequencer::new(&motion, &port, serial, RecordingDelay::new());

        assert_eq!(seq.step(), SequencerState::AwaitByte1 { b0: 0x80 });
        assert_eq!(seq.step(), SequencerState::AwaitByte1 { b0: 0x80 });
        assert_eq!(seq.step(), SequencerState::AwaitByte1 { b0: 0x80 });
        assert_eq!(seq.step(), SequencerState::Decode { bytes: [0x80, 0x01] });
    }

    #[test]
    fn test_receive_errors_reported_and_skipped() {
        let trace = PinTrace::new();
        let port = OutputPort::with_pins(trace.stage_pins()).unwrap();
        let motion = MotionState::new();
        let serial = ScriptedSerial::with_input(&[
            RxPoll::error(RxFlags::FRAME_ERROR),
            RxPoll::data(0xC0),
            RxPoll::error(RxFlags::OVERRUN_ERROR | RxFlags::BUFFER_OVERFLOW),
            RxPoll::data(0x01),
        ]);
        let mut seq = Sequencer::new(&motion, &port, serial, RecordingDelay::new());
        drain(&mut seq);

        assert_eq!(motion.snapshot().axis, Axis::Z);
        assert_eq!(trace.falling_edges(Line::Step), 1);
        assert_eq!(seq.transport.sent(), vec![0xA1, 0xA2, 0xA3, 0xAA]);
    }

    #[test]
    fn test_toggle_is_not_acknowledged() {
        let trace = PinTrace::new();
        let port = OutputPort::with_pins(trace.stage_pins()).unwrap();
        let motion = MotionState::new();
        let serial = ScriptedSerial::with_bytes(&[0x00, 0x00, 0x00, 0x00]);
        let mut seq = Sequencer::new(&motion, &port, serial, RecordingDelay::new());

        assert_eq!(seq.step(), SequencerState::AwaitByte1 { b0: 0x00 });
        assert_eq!(seq.step(), SequencerState::Decode { bytes: [0x00, 0x00] });
        assert_eq!(seq.step(), SequencerState::Execute);
        assert_eq!(seq.step(), SequencerState::AwaitByte0);
        assert_eq!(trace.level(Line::Toggle), Some(true));

        drain(&mut seq);
        assert_eq!(trace.level(Line::Toggle), Some(false));
        assert_eq!(trace.falling_edges(Line::Step), 0);
        assert!(seq.transport.sent().is_empty());
    }

    #[test]
    fn test_zero_step_motion_is_acknowledged() {
        let trace = PinTrace::new();
        let port = OutputPort::with_pins(trace.stage_pins()).unwrap();
        let motion = MotionState::new();
        let serial = ScriptedSerial::with_bytes(&[0x80, 0x00]);
        let mut seq = Sequencer::new(&motion, &port, serial, RecordingDelay::new());
        drain(&mut seq);

        assert_eq!(trace.falling_edges(Line::Step), 0);
        assert_eq!(trace.level(Line::XEnable), Some(false));
        assert_eq!(seq.transport.sent(), vec![0xAA]);
    }

    #[test]
    fn test_end_to_end_full_burst() {
        let trace = PinTrace::new();
        let port = OutputPort::with_pins(trace.stage_pins()).unwrap();
        let motion = MotionState::new();
        let serial = ScriptedSerial::with_bytes(&[0xB5, 0x3C]);
        let mut seq = Sequencer::new(&motion, &port, serial, RecordingDelay::new());

        seq.step();
        seq.step();
        assert_eq!(seq.step(), SequencerState::Execute);
        assert_eq!(trace.level(Line::XEnable), Some(true));
        assert_eq!(trace.level(Line::Dir), Some(true));

        assert_eq!(seq.step(), SequencerState::Acknowledge);
        assert_eq!(trace.falling_edges(Line::Step), 5436);
        // X stayed the only enabled axis for the whole burst.
        assert_eq!(trace.writes(Line::YEnable), 1);
        assert_eq!(trace.writes(Line::ZEnable), 1);
        assert_eq!(trace.level(Line::XEnable), Some(false));

        assert_eq!(seq.step(), SequencerState::AwaitByte0);
        assert_eq!(seq.transport.sent(), vec![0xAA]);
    }

    #[test]
    fn test_end_to_end_endstop_mid_burst() {
        let trace = PinTrace::new();
        let port = OutputPort::with_pins(trace.stage_pins()).unwrap();
        let motion = MotionState::new();
        let shared = SharedSerial::new();
        shared.attach(ScriptedSerial::with_bytes(&[0xB5, 0x3C]));

        // Fires the endstop handler during the hold time of the 11th step
        // pulse, with the switch reading pressed for 5 polls.
        let fired = RefCell::new(None);
        let handler = EndstopSafetyHandler::new(&motion, &port);
        let delay = RecordingDelay::with_hook(|call| {
            if call == 21 {
                let mut endstops = ScriptedEndstops::asserted_for(EndstopSet::X, 5);
                let mut serial = &shared;
                let report = handler.handle(&mut endstops, &mut serial, &mut RecordingDelay::new());
                fired.replace(Some(report));
            }
        });
        let mut seq = Sequencer::new(&motion, &port, &shared, delay);

        seq.step();
        seq.step();
        seq.step();
        assert_eq!(seq.step(), SequencerState::Acknowledge);

        let report = fired.borrow().expect("handler did not run");
        assert_eq!(report.backoff_pulses, 4);
        assert_eq!(report.direction, Direction::Reverse);
        // 11 pulses of the burst, the in-flight one included, plus the backoff.
        assert_eq!(trace.falling_edges(Line::Step), 11 + 4);
        assert_eq!(motion.remaining(), 0);
        assert_eq!(trace.level(Line::Dir), Some(false));
        assert_eq!(trace.level(Line::XEnable), Some(false));

        assert_eq!(seq.step(), SequencerState::AwaitByte0);
        // Both notifications reach the host for the same burst.
        assert_eq!(shared.with(|s| s.sent()), Some(vec![0xA0, 0xAA]));
    }
}
