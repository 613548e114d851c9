//! Memory-mapped port registers.
//!
//! A port is a triple of consecutive byte registers, as on AVR microcontrollers: the input
//! register (PINx), the direction register (DDRx) and the output latch (PORTx). The registers
//! are mapped from a file, usually `/dev/mem`, but any file exposing the same layout works,
//! e.g. the shared register file of an emulator.
use crate::{GpioPort, GpioResult, PinClaims};
use memmap2::{MmapOptions, MmapRaw};
use std::fmt::{Debug, Formatter};
use std::fs::OpenOptions;
use std::path::Path;

pub struct RawGpioPort {
    mmap: MmapRaw,
    base: u64,
    claims: PinClaims,
}

impl RawGpioPort {
    const PIN: usize = 0;
    const DDR: usize = 1;
    const PORT: usize = 2;
    const REGISTER_COUNT: usize = 3;

    /// Data-space address of PINB on the ATmega328P.
    pub const ATMEGA328P_PORTB: u64 = 0x23;
    /// Data-space address of PIND on the ATmega328P.
    pub const ATMEGA328P_PORTD: u64 = 0x29;

    /// Maps the port whose input register is at offset `base` of the file at `path`.
    pub fn open(path: impl AsRef<Path>, base: u64) -> GpioResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;

        let mmap = MmapOptions::new()
            .offset(base)
            .len(Self::REGISTER_COUNT)
            .map_raw(&file)?;

        Ok(RawGpioPort {
            mmap,
            base,
            claims: PinClaims::new(),
        })
    }

    pub fn new_mem(base: u64) -> GpioResult<Self> {
        Self::open("/dev/mem", base)
    }

    fn read_register(&self, register: usize) -> u8 {
        let register_ptr = unsafe { self.mmap.as_ptr().add(register) };
        unsafe { register_ptr.read_volatile() }
    }

    fn write_register(&self, register: usize, value: u8) {
        let register_ptr = unsafe { self.mmap.as_mut_ptr().add(register) };
        unsafe { register_ptr.write_volatile(value) };
    }
}

impl Debug for RawGpioPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawGpioPort({:#x})", self.base)
    }
}

impl GpioPort for RawGpioPort {
    fn read_output(&self) -> GpioResult<u8> {
        Ok(self.read_register(Self::PORT))
    }

    fn write_output(&self, value: u8) -> GpioResult<()> {
        self.write_register(Self::PORT, value);
        Ok(())
    }

    fn read_input(&self) -> GpioResult<u8> {
        Ok(self.read_register(Self::PIN))
    }

    fn direction(&self) -> GpioResult<u8> {
        Ok(self.read_register(Self::DDR))
    }

    fn set_direction(&self, value: u8) -> GpioResult<()> {
        self.write_register(Self::DDR, value);
        Ok(())
    }

    fn claims(&self) -> &PinClaims {
        &self.claims
    }
}
