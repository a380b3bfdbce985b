#![cfg_attr(not(test), no_std)]

pub mod rx_flags;
pub mod stage_error;
pub mod stage_proto;
