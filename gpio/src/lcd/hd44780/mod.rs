//! HD44780 LCD module.
//!
//! The controller is driven over its 4-bit parallel interface: three control lines (RS, R/W, E)
//! and the upper four data lines (D4-D7), all bit-banged through [GpioPort](crate::GpioPort)s.
//! See [driver::HD44780Driver] for the instruction set and [driver::GpioHD44780Driver] for the
//! wire protocol.

pub mod driver;
pub mod text;
