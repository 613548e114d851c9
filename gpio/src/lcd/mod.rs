//! Character LCD drivers.
pub mod hd44780;
