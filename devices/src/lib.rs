#[allow(clippy::cast_possible_truncation)]
pub mod bitwise;

pub mod bus;
pub mod config;
pub mod device;
pub mod diagnostics;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unreadable_literal)]
pub mod hardware;

pub use bus::Bus;
pub use device::{Device, Fault, Width};
pub use diagnostics::{AccessError, Capture, Diagnostics};
