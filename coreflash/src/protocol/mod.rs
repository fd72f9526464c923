//! Protocol implementations.

pub mod crc;
pub mod stm32;

pub use crc::crc16;
