pub mod delay;
pub mod gpiod;
pub mod lcd;
pub mod raw;
pub mod sim;

use bitvec::vec::BitVec;
use std::fmt::Debug;
use std::sync::atomic::AtomicU8;
use thiserror::Error;

/// Number of bits in one I/O port.
pub const PORT_WIDTH: usize = 8;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("controller still busy after {0} status reads")]
    BusyTimeout(u32),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

/// Tracks which bits of a port are owned by a driver.
///
/// Several drivers may share one physical port, each owning a disjoint set of bits.
pub struct PinClaims {
    used_pins: BitVec<AtomicU8>,
}

impl PinClaims {
    pub fn new() -> Self {
        Self {
            used_pins: BitVec::repeat(false, PORT_WIDTH),
        }
    }

    /// Claims every bit set in `mask`.
    ///
    /// # Errors
    /// - `GpioError::AlreadyInUse` if any of the bits is already claimed. Nothing is claimed then.
    pub fn claim(&self, mask: u8) -> GpioResult<()> {
        if bits(mask).any(|index| self.used_pins[index]) {
            return Err(GpioError::AlreadyInUse);
        }

        for index in bits(mask) {
            self.used_pins.set_aliased(index, true);
        }
        Ok(())
    }

    /// Releases every bit set in `mask`.
    pub fn release(&self, mask: u8) {
        for index in bits(mask) {
            self.used_pins.set_aliased(index, false);
        }
    }

    /// Gets the currently claimed bits as a mask.
    pub fn claimed(&self) -> u8 {
        (0..PORT_WIDTH)
            .filter(|&index| self.used_pins[index])
            .fold(0, |mask, index| mask | (1 << index))
    }
}

impl Default for PinClaims {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for PinClaims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PinClaims({:08b})", self.claimed())
    }
}

/// Iterates over the indices of the bits set in `mask`, LSb first.
pub fn bits(mask: u8) -> impl Iterator<Item = usize> {
    (0..PORT_WIDTH).filter(move |&index| mask & (1 << index) != 0)
}

/// An 8-bit I/O port, modelled after the usual microcontroller register triple:
/// an output latch, a direction register and an input register.
///
/// All methods take `&self`, so a single port can be shared by several drivers as long as they
/// stay within their own bits (see [PinClaims]).
pub trait GpioPort: Debug {
    /// Reads the output latch.
    fn read_output(&self) -> GpioResult<u8>;
    /// Writes the whole output latch.
    fn write_output(&self, value: u8) -> GpioResult<()>;
    /// Reads the current pin levels.
    fn read_input(&self) -> GpioResult<u8>;
    /// Reads the direction register. A set bit is an output.
    fn direction(&self) -> GpioResult<u8>;
    /// Writes the whole direction register.
    fn set_direction(&self, value: u8) -> GpioResult<()>;
    /// Gets the claims of this port.
    fn claims(&self) -> &PinClaims;

    /// Drives the bits in `mask` high, leaving the others untouched.
    fn set_bits(&self, mask: u8) -> GpioResult<()> {
        let value = self.read_output()?;
        self.write_output(value | mask)
    }

    /// Drives the bits in `mask` low, leaving the others untouched.
    fn clear_bits(&self, mask: u8) -> GpioResult<()> {
        let value = self.read_output()?;
        self.write_output(value & !mask)
    }

    /// Replaces the bits in `mask` with the corresponding bits of `value`.
    fn write_masked(&self, mask: u8, value: u8) -> GpioResult<()> {
        let current = self.read_output()?;
        self.write_output((current & !mask) | (value & mask))
    }

    /// Switches the bits in `mask` to output.
    fn make_output(&self, mask: u8) -> GpioResult<()> {
        let direction = self.direction()?;
        self.set_direction(direction | mask)
    }

    /// Switches the bits in `mask` to input.
    fn make_input(&self, mask: u8) -> GpioResult<()> {
        let direction = self.direction()?;
        self.set_direction(direction & !mask)
    }
}
