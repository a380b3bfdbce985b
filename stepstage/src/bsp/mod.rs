pub mod config;

#[cfg(feature = "rp2040")]
mod board_helper;
#[cfg(feature = "rp2040")]
pub mod board;
#[cfg(feature = "rp2040")]
pub use board::*;
