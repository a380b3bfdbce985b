use generic::stage_error::StageError;
use generic::stage_proto::{CommandPacket, COMMAND_PACKET_LEN};

use crate::common::output_port::{OutputPort, PortPins};
use crate::stage::motion_state::{MotionSnapshot, MotionState};

/// Turns a received packet into output levels and a motion record.
pub struct CommandDecoder<'a, P> {
    motion: &'a MotionState,
    port: &'a OutputPort<P>,
}

impl<'a, P: PortPins> CommandDecoder<'a, P> {
    pub fn new(motion: &'a MotionState, port: &'a OutputPort<P>) -> Self {
        CommandDecoder { motion, port }
    }

    pub fn decode(&self, bytes: [u8; COMMAND_PACKET_LEN]) -> Result<CommandPacket, StageError> {
        let packet = CommandPacket::decode(bytes);
        let motion = self.apply(&packet)?;
        debug!("[STAGE] decoded {} -> {}", packet, motion);
        Ok(packet)
    }

    /// Axis select, direction and step count are written together, with the
    /// endstop interrupt held off.
    pub fn apply(&self, packet: &CommandPacket) -> Result<MotionSnapshot, StageError> {
        critical_section::with(|cs| {
            self.port.modify_in(cs, |bits| {
                bits.select_axis(packet.axis);
                bits.set_direction(packet.direction);
            })?;
            Ok(self.motion.load_command_in(cs, packet))
        })
    }
}
