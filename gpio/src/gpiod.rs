//! Port implementation on top of the Linux GPIO character device, using the gpiod library.
//!
//! Each of the eight port bits can be mapped to a line of one chip. Unmapped bits behave like
//! unconnected input pins: they read as low and cannot be made outputs.
use crate::{GpioError, GpioPort, GpioResult, PORT_WIDTH, PinClaims, bits};
use std::cell::{Cell, RefCell};
use std::fmt::{Debug, Formatter};

enum GpiodLine {
    Input(gpiod::Lines<gpiod::Input>),
    Output(gpiod::Lines<gpiod::Output>),
}

/// An 8-bit port made of single gpiod lines.
pub struct GpiodPort {
    chip: gpiod::Chip,
    lines: [Option<u32>; PORT_WIDTH],
    requests: RefCell<[Option<GpiodLine>; PORT_WIDTH]>,
    output: Cell<u8>,
    direction: Cell<u8>,
    claims: PinClaims,
}

impl GpiodPort {
    /// Creates a port from `chip`, where bit `i` is line `lines[i]`.
    ///
    /// All mapped lines start as inputs.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if a line does not exist or is mapped twice.
    /// - `GpioError::Io` if a line cannot be requested, e.g. because another process holds it.
    pub fn new(chip: gpiod::Chip, lines: [Option<u32>; PORT_WIDTH]) -> GpioResult<Self> {
        check_lines(&lines, chip.num_lines() as usize)?;

        let port = GpiodPort {
            chip,
            lines,
            requests: RefCell::new(std::array::from_fn(|_| None)),
            output: Cell::new(0),
            direction: Cell::new(0),
            claims: PinClaims::new(),
        };

        for index in 0..PORT_WIDTH {
            port.request(index, false)?;
        }
        Ok(port)
    }

    /// Opens the chip at `path`, e.g. `/dev/gpiochip0`.
    pub fn open(path: &str, lines: [Option<u32>; PORT_WIDTH]) -> GpioResult<Self> {
        Self::new(gpiod::Chip::new(path)?, lines)
    }

    fn request(&self, index: usize, output: bool) -> GpioResult<()> {
        let Some(line) = self.lines[index] else {
            return Ok(());
        };

        let mut requests = self.requests.borrow_mut();
        // The line has to be released before it can be requested again
        requests[index] = None;

        let request = if output {
            let lines = self.chip.request_lines(
                gpiod::Options::output([line]).consumer(env!("CARGO_PKG_NAME")),
            )?;
            lines.set_values([self.output.get() & (1 << index) != 0])?;
            GpiodLine::Output(lines)
        } else {
            GpiodLine::Input(self.chip.request_lines(
                gpiod::Options::input([line]).consumer(env!("CARGO_PKG_NAME")),
            )?)
        };
        requests[index] = Some(request);
        Ok(())
    }
}

fn check_lines(lines: &[Option<u32>; PORT_WIDTH], count: usize) -> GpioResult<()> {
    let mapped: Vec<u32> = lines.iter().flatten().copied().collect();

    if mapped.iter().any(|&line| line as usize >= count) {
        return Err(GpioError::InvalidArgument);
    }

    for (i, line) in mapped.iter().enumerate() {
        if mapped[i + 1..].contains(line) {
            return Err(GpioError::InvalidArgument);
        }
    }
    Ok(())
}

fn unmapped(lines: &[Option<u32>; PORT_WIDTH]) -> u8 {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.is_none())
        .fold(0, |mask, (index, _)| mask | (1 << index))
}

impl Debug for GpiodPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodPort({}{:?})", self.chip.name(), self.lines)
    }
}

impl GpioPort for GpiodPort {
    fn read_output(&self) -> GpioResult<u8> {
        Ok(self.output.get())
    }

    fn write_output(&self, value: u8) -> GpioResult<()> {
        let changed = self.output.replace(value) ^ value;
        let requests = self.requests.borrow();

        for index in bits(changed) {
            if let Some(GpiodLine::Output(lines)) = &requests[index] {
                lines.set_values([value & (1 << index) != 0])?;
            }
        }
        Ok(())
    }

    fn read_input(&self) -> GpioResult<u8> {
        let requests = self.requests.borrow();
        let mut value = 0u8;

        for (index, request) in requests.iter().enumerate() {
            let high = match request {
                Some(GpiodLine::Input(lines)) => lines.get_values([false])?[0],
                Some(GpiodLine::Output(_)) => self.output.get() & (1 << index) != 0,
                None => false,
            };
            if high {
                value |= 1 << index;
            }
        }
        Ok(value)
    }

    fn direction(&self) -> GpioResult<u8> {
        Ok(self.direction.get())
    }

    fn set_direction(&self, value: u8) -> GpioResult<()> {
        if value & unmapped(&self.lines) != 0 {
            return Err(GpioError::NotSupported);
        }
        let changed = self.direction.get() ^ value;

        for index in bits(changed) {
            self.request(index, value & (1 << index) != 0)?;
        }
        self.direction.set(value);
        Ok(())
    }

    fn claims(&self) -> &PinClaims {
        &self.claims
    }
}
