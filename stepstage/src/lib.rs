#![cfg_attr(not(test), no_std)]

#[cfg(feature = "rp2040")]
use defmt_rtt as _;
#[cfg(feature = "rp2040")]
use panic_probe as _;

#[macro_use]
mod fmt;

pub mod bsp;
pub mod common;
pub mod stage;
