use crate::lcd::hd44780::driver::timing;
use crate::{GpioError, GpioResult};
use serde::{Deserialize, Serialize};

/// Wiring of an HD44780 in 4-bit mode.
///
/// All fields are bit masks on their port. RS, R/W and E live on the control port; the data
/// nibble and the busy flag on the data port. The two ports may be the same port.
///
/// The defaults describe the reference board: RS, R/W and E on bits 4, 3 and 2 of the control
/// port, D4-D7 on the upper nibble of the data port, and no busy flag polling.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LcdConfig {
    /// Register select.
    pub rs_bit: u8,
    /// Read/write. Must be wired for busy flag polling, otherwise tie the display's R/W to GND.
    pub rw_bit: u8,
    /// Enable.
    pub e_bit: u8,
    /// Four contiguous bits carrying D4-D7.
    pub data_mask: u8,
    /// The bit where D7, the busy flag, is read. Always the top bit of `data_mask`.
    pub status_bit: u8,
    /// Whether to poll the busy flag instead of waiting a fixed time after every transfer.
    pub use_busy_flag: bool,
    /// How many busy status reads to tolerate before giving up, at least one. `None` polls
    /// forever.
    pub max_busy_polls: Option<u32>,
}

impl Default for LcdConfig {
    fn default() -> Self {
        LcdConfig {
            rs_bit: 1 << 4,
            rw_bit: 1 << 3,
            e_bit: 1 << 2,
            data_mask: 0xF0,
            status_bit: 0x80,
            use_busy_flag: false,
            max_busy_polls: None,
        }
    }
}

impl LcdConfig {
    /// Checks that the masks describe a possible wiring.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if a control mask is not a single bit, control masks overlap,
    ///   the data mask is not four contiguous bits, the status bit is not the D7 line, or the
    ///   busy poll limit is zero.
    pub fn validate(&self) -> GpioResult<()> {
        let control = [self.rs_bit, self.rw_bit, self.e_bit];
        if control.iter().any(|bit| bit.count_ones() != 1) {
            return Err(GpioError::InvalidArgument);
        }
        if self.control_mask().count_ones() != 3 {
            return Err(GpioError::InvalidArgument);
        }
        if self.data_mask.count_ones() != 4 || self.data_mask >> self.data_shift() != 0x0F {
            return Err(GpioError::InvalidArgument);
        }
        if self.status_bit != 1 << (self.data_shift() + 3) {
            return Err(GpioError::InvalidArgument);
        }
        if self.max_busy_polls == Some(0) {
            return Err(GpioError::InvalidArgument);
        }
        Ok(())
    }

    /// All control bits together.
    pub fn control_mask(&self) -> u8 {
        self.rs_bit | self.rw_bit | self.e_bit
    }

    /// Position of D4 on the data port.
    pub fn data_shift(&self) -> u32 {
        self.data_mask.trailing_zeros()
    }

    /// Places a nibble on the data port bits.
    pub fn nibble_to_port(&self, nibble: u8) -> u8 {
        (nibble << self.data_shift()) & self.data_mask
    }

    /// Extracts the nibble from a data port value.
    pub fn port_to_nibble(&self, value: u8) -> u8 {
        (value & self.data_mask) >> self.data_shift()
    }

    /// The settling strategy this wiring allows.
    pub fn wait_policy(&self) -> WaitPolicy {
        if self.use_busy_flag {
            WaitPolicy::BusyFlag {
                max_polls: self.max_busy_polls,
            }
        } else {
            WaitPolicy::FixedDelay { micros: timing::SETTLE }
        }
    }
}

/// How the driver waits for the controller after each transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitPolicy {
    /// Wait a fixed time that covers every instruction but clear and home.
    FixedDelay { micros: u32 },
    /// Read the busy flag until it clears. Hangs when R/W is not wired and `max_polls` is `None`.
    BusyFlag { max_polls: Option<u32> },
}
