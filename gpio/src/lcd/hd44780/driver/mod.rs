//! HD44780 driver interface.
//!
//! [HD44780Driver] holds the instruction set as default methods on top of two raw operations,
//! [HD44780Driver::send_command] and [HD44780Driver::send_data]. [GpioHD44780Driver] implements
//! them by bit-banging the 4-bit interface.

mod config;
mod gpio;

use crate::lcd::hd44780::text::{ProgramMemory, TextSource};
use crate::{GpioError, GpioResult};
pub use config::*;
pub use gpio::*;
use std::fmt::Debug;

/// Minimum waits of the HD44780 protocol, in microseconds.
pub mod timing {
    /// After power is applied, before the first instruction.
    pub const POWER_ON: u32 = 15_000;
    /// After the first 8-bit interface reset. The datasheet asks for 4.1 ms.
    pub const RESET_FIRST: u32 = 5_000;
    /// After the second 8-bit interface reset. The datasheet asks for 100 us.
    pub const RESET_SECOND: u32 = 120;
    /// After the third 8-bit interface reset.
    pub const RESET_THIRD: u32 = 2_000;
    /// After switching to the 4-bit interface.
    pub const INTERFACE_SWITCH: u32 = 2_000;
    /// After any other instruction or data write, when the busy flag is not polled.
    pub const SETTLE: u32 = 2_000;
    /// High time of E. The datasheet asks for 230 ns.
    pub const ENABLE_PULSE: u32 = 1;
    /// Between raising E and sampling the status nibble.
    pub const STATUS_SETTLE: u32 = 1;
}

/// DDRAM offset of the second display line.
pub const LINE_OFFSET: u8 = 0x40;

/// Instruction bytes and their flag bits.
pub mod command {
    pub const CLEAR_DISPLAY: u8 = 0x01;
    pub const RETURN_HOME: u8 = 0x02;

    pub const ENTRY_MODE: u8 = 0x04;
    pub const ENTRY_INCREMENT: u8 = 0x02;
    pub const ENTRY_SHIFT: u8 = 0x01;

    pub const DISPLAY_CONTROL: u8 = 0x08;
    pub const DISPLAY_ON: u8 = 0x04;
    pub const CURSOR_ON: u8 = 0x02;
    pub const BLINK_ON: u8 = 0x01;

    pub const SHIFT: u8 = 0x10;
    pub const SHIFT_DISPLAY: u8 = 0x08;
    pub const SHIFT_RIGHT: u8 = 0x04;

    pub const FUNCTION_SET: u8 = 0x20;
    pub const EIGHT_BIT: u8 = 0x10;
    pub const TWO_LINES: u8 = 0x08;
    pub const FONT_5X10: u8 = 0x04;

    pub const SET_CGRAM_ADDRESS: u8 = 0x40;
    pub const SET_DDRAM_ADDRESS: u8 = 0x80;

    /// `bit` if `on`, else nothing.
    pub const fn flag(on: bool, bit: u8) -> u8 {
        if on { bit } else { 0 }
    }
}

use command::*;

pub trait HD44780Driver: Debug {
    /// Brings the controller from any power-on state into 4-bit, two-line mode with the display,
    /// cursor and blinking turned on.
    fn init(&mut self) -> GpioResult<()>;

    /// Blanks DDRAM and homes the cursor. Takes 1.52 ms on the controller side.
    fn clear_display(&mut self) -> GpioResult<()> {
        self.send_command(CLEAR_DISPLAY)
    }

    /// Homes the cursor and undoes any display shift.
    fn return_home(&mut self) -> GpioResult<()> {
        self.send_command(RETURN_HOME)
    }

    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> GpioResult<()> {
        self.send_command(
            ENTRY_MODE
                | flag(cursor_direction == CursorDirection::Right, ENTRY_INCREMENT)
                | flag(shift, ENTRY_SHIFT),
        )
    }

    fn set_display_control(
        &mut self,
        display_on: bool,
        cursor_on: bool,
        blink_on: bool,
    ) -> GpioResult<()> {
        self.send_command(
            DISPLAY_CONTROL
                | flag(display_on, DISPLAY_ON)
                | flag(cursor_on, CURSOR_ON)
                | flag(blink_on, BLINK_ON),
        )
    }

    /// Moves the cursor, or the whole display when `display_shift` is set, by one position.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> GpioResult<()> {
        self.send_command(
            SHIFT
                | flag(display_shift, SHIFT_DISPLAY)
                | flag(direction == CursorDirection::Right, SHIFT_RIGHT),
        )
    }

    /// Sets the interface width, line count and font.
    ///
    /// This driver only speaks 4-bit, so `eight_bit` must stay `false` after [Self::init].
    fn function_set(&mut self, eight_bit: bool, two_lines: bool, large_font: bool) -> GpioResult<()> {
        self.send_command(
            FUNCTION_SET
                | flag(eight_bit, EIGHT_BIT)
                | flag(two_lines, TWO_LINES)
                | flag(large_font, FONT_5X10),
        )
    }

    /// # Errors
    /// - `GpioError::InvalidArgument` if the address does not fit in 6 bits.
    fn set_cgram_address(&mut self, address: u8) -> GpioResult<()> {
        if address >= SET_CGRAM_ADDRESS {
            return Err(GpioError::InvalidArgument);
        }
        self.send_command(SET_CGRAM_ADDRESS | address)
    }

    /// # Errors
    /// - `GpioError::InvalidArgument` if the address does not fit in 7 bits.
    fn set_ddram_address(&mut self, address: u8) -> GpioResult<()> {
        if address >= SET_DDRAM_ADDRESS {
            return Err(GpioError::InvalidArgument);
        }
        self.send_command(SET_DDRAM_ADDRESS | address)
    }

    /// Moves the cursor to `row` (0 or 1) and `col` (0-15 on a 16 column display).
    ///
    /// Nothing is checked: out of range positions land wherever the controller puts them.
    fn move_to(&mut self, row: u8, col: u8) -> GpioResult<()> {
        let position = row.wrapping_mul(LINE_OFFSET).wrapping_add(col);
        self.send_command(SET_DDRAM_ADDRESS | position)
    }

    /// Writes a zero-terminated string at the cursor. The terminator is not sent.
    fn write_string(&mut self, text: TextSource<'_>) -> GpioResult<()> {
        for byte in text.bytes() {
            self.send_data(byte?)?;
        }
        Ok(())
    }

    /// Writes a zero-terminated string stored in program memory at `address`.
    fn write_string_p(&mut self, memory: &dyn ProgramMemory, address: usize) -> GpioResult<()> {
        self.write_string(TextSource::Program { memory, address })
    }

    // Raw transfers, everything above goes through these two.

    /// Writes `command` to the instruction register (RS low) and waits until it is done.
    fn send_command(&mut self, command: u8) -> GpioResult<()>;

    /// Writes `data` to DDRAM or CGRAM at the address counter (RS high) and waits until it is done.
    fn send_data(&mut self, data: u8) -> GpioResult<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    Left,
    Right,
}
