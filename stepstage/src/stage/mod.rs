pub mod command_decoder;
pub mod endstop;
pub mod motion_state;
pub mod sequencer;
pub mod step_engine;

#[cfg(test)]
pub(crate) mod mock_hw;
