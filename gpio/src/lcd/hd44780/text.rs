//! Sources of zero-terminated text.
//!
//! Strings either sit in directly addressable memory, or in a read-only program image that can
//! only be read one byte at a time. Both are walked by the same [TextBytes] iterator, so the
//! output loop exists once.
use crate::{GpioError, GpioResult};
use std::ffi::CStr;
use std::fmt::Debug;

/// Read-only memory that has to be fetched byte by byte.
pub trait ProgramMemory: Debug {
    /// Reads the byte at `address`.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the address is outside the memory.
    fn read_byte(&self, address: usize) -> GpioResult<u8>;
}

/// A program image stored in a byte slice, typically a `static`.
#[derive(Copy, Clone, Debug)]
pub struct FlashImage<'a> {
    bytes: &'a [u8],
}

impl<'a> FlashImage<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        FlashImage { bytes }
    }

    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ProgramMemory for FlashImage<'_> {
    fn read_byte(&self, address: usize) -> GpioResult<u8> {
        self.bytes
            .get(address)
            .copied()
            .ok_or(GpioError::InvalidArgument)
    }
}

/// Where a string lives.
#[derive(Copy, Clone, Debug)]
pub enum TextSource<'a> {
    /// Directly addressable bytes. Ends at the first zero byte or at the end of the slice.
    Direct(&'a [u8]),
    /// A string in program memory starting at `address`. Ends at the first zero byte.
    Program {
        memory: &'a dyn ProgramMemory,
        address: usize,
    },
}

impl<'a> TextSource<'a> {
    /// Iterates over the bytes of the string, without the terminator.
    pub fn bytes(&self) -> TextBytes<'a> {
        TextBytes {
            source: *self,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> From<&'a [u8]> for TextSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        TextSource::Direct(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for TextSource<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        TextSource::Direct(bytes)
    }
}

impl<'a> From<&'a str> for TextSource<'a> {
    fn from(text: &'a str) -> Self {
        TextSource::Direct(text.as_bytes())
    }
}

impl<'a> From<&'a CStr> for TextSource<'a> {
    fn from(text: &'a CStr) -> Self {
        TextSource::Direct(text.to_bytes())
    }
}

/// Iterator over the bytes of a [TextSource].
///
/// Stops after the first fetch error.
#[derive(Debug)]
pub struct TextBytes<'a> {
    source: TextSource<'a>,
    offset: usize,
    done: bool,
}

impl Iterator for TextBytes<'_> {
    type Item = GpioResult<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let byte = match self.source {
            TextSource::Direct(bytes) => bytes.get(self.offset).copied().unwrap_or(0),
            TextSource::Program { memory, address } => {
                match memory.read_byte(address + self.offset) {
                    Ok(byte) => byte,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }
        };

        if byte == 0 {
            self.done = true;
            return None;
        }

        self.offset += 1;
        Some(Ok(byte))
    }
}
