//! In-memory ports wired to a simulated HD44780.
//!
//! [SimBus] owns two ports, a control port and a data port, laid out by an [LcdConfig], and
//! a model of the controller listening on them. The model latches a nibble on every falling
//! edge of E while R/W is low, drives the data lines on every rising edge of E while R/W is
//! high, and starts in 8-bit mode like a freshly powered controller.
//!
//! Everything seen on the wires is recorded as [BusEvent]s, down to every single write of the
//! control port. [SimDelay] records waits in the same log instead of sleeping, so tests can
//! check the protocol timing exactly.
use crate::delay::DelayNs;
use crate::lcd::hd44780::driver::LcdConfig;
use crate::lcd::hd44780::driver::command::{
    BLINK_ON, CLEAR_DISPLAY, CURSOR_ON, DISPLAY_CONTROL, DISPLAY_ON, EIGHT_BIT, ENTRY_INCREMENT,
    ENTRY_MODE, FUNCTION_SET, RETURN_HOME, SET_CGRAM_ADDRESS, SET_DDRAM_ADDRESS, SHIFT,
    SHIFT_DISPLAY, SHIFT_RIGHT, TWO_LINES,
};
use crate::{GpioPort, GpioResult, PinClaims};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::time::Duration;

const CONTROL: usize = 0;
const DATA: usize = 1;

/// Something that happened on the simulated bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusEvent {
    /// A write of the control port, whether it changed anything or not.
    Control(u8),
    /// A nibble latched by the controller.
    Nibble { rs: bool, value: u8 },
    /// A complete instruction (`rs == false`) or data byte executed by the controller. In 8-bit
    /// mode every nibble is one, with the low data lines read as zero.
    Byte { rs: bool, value: u8 },
    /// A nibble driven by the controller on a read pulse. `low` tells which half of the register
    /// it was.
    Read { rs: bool, low: bool, value: u8 },
    /// A wait through [SimDelay].
    Delay(Duration),
}

/// A byte executed by the controller, with the total wait since the previous one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transfer {
    pub rs: bool,
    pub value: u8,
    pub delay_before: Duration,
}

/// Interface state of the controller when the simulation starts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PowerOnState {
    /// 8-bit interface, as after a clean power-on reset.
    #[default]
    EightBit,
    /// 4-bit interface, as after a microcontroller reset without a display power cycle.
    FourBit,
    /// 4-bit interface with the high nibble of a transfer already latched.
    FourBitHalfway(u8),
}

/// A snapshot of the controller registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControllerState {
    pub four_bit: bool,
    pub two_lines: bool,
    pub display_on: bool,
    pub cursor_on: bool,
    pub blink_on: bool,
    pub increment: bool,
    pub address: u8,
}

#[derive(Debug)]
struct Controller {
    four_bit: bool,
    pending: Option<u8>,
    read_low: bool,
    busy_polls: u32,
    busy_remaining: u32,
    address: u8,
    cgram_mode: bool,
    increment: bool,
    two_lines: bool,
    display_on: bool,
    cursor_on: bool,
    blink_on: bool,
    ddram: [u8; 0x80],
    cgram: [u8; 0x40],
}

impl Controller {
    fn new() -> Self {
        Controller {
            four_bit: false,
            pending: None,
            read_low: false,
            busy_polls: 0,
            busy_remaining: 0,
            address: 0,
            cgram_mode: false,
            increment: true,
            two_lines: false,
            display_on: false,
            cursor_on: false,
            blink_on: false,
            ddram: [b' '; 0x80],
            cgram: [0; 0x40],
        }
    }

    fn write_nibble(&mut self, rs: bool, nibble: u8) -> Option<u8> {
        self.read_low = false;
        let value = if self.four_bit {
            match self.pending.take() {
                None => {
                    self.pending = Some(nibble);
                    return None;
                }
                Some(high) => (high << 4) | nibble,
            }
        } else {
            nibble << 4
        };
        self.execute(rs, value);
        Some(value)
    }

    fn read_nibble(&mut self, rs: bool) -> (bool, u8) {
        let busy = self.busy_remaining > 0;
        let byte = if rs {
            self.memory()[self.address as usize]
        } else {
            ((busy as u8) << 7) | (self.address & 0x7F)
        };

        let low = self.four_bit && self.read_low;
        if self.four_bit {
            self.read_low = !self.read_low;
        }
        if !low && !rs && busy {
            self.busy_remaining -= 1;
        }

        if low {
            (true, byte & 0x0F)
        } else {
            (false, byte >> 4)
        }
    }

    fn memory(&self) -> &[u8] {
        if self.cgram_mode {
            &self.cgram
        } else {
            &self.ddram
        }
    }

    fn address_mask(&self) -> u8 {
        if self.cgram_mode { 0x3F } else { 0x7F }
    }

    fn advance(&mut self, forward: bool) {
        let address = if forward {
            self.address.wrapping_add(1)
        } else {
            self.address.wrapping_sub(1)
        };
        self.address = address & self.address_mask();
    }

    fn execute(&mut self, rs: bool, value: u8) {
        self.busy_remaining = self.busy_polls;

        if rs {
            let index = self.address as usize;
            if self.cgram_mode {
                self.cgram[index] = value;
            } else {
                self.ddram[index] = value;
            }
            self.advance(self.increment);
            return;
        }

        match value {
            v if v & SET_DDRAM_ADDRESS != 0 => {
                self.cgram_mode = false;
                self.address = v & 0x7F;
            }
            v if v & SET_CGRAM_ADDRESS != 0 => {
                self.cgram_mode = true;
                self.address = v & 0x3F;
            }
            v if v & FUNCTION_SET != 0 => {
                let four_bit = v & EIGHT_BIT == 0;
                if four_bit != self.four_bit {
                    self.four_bit = four_bit;
                    self.pending = None;
                }
                self.two_lines = v & TWO_LINES != 0;
            }
            v if v & SHIFT != 0 => {
                // Display shifts are not modelled, only cursor moves
                if v & SHIFT_DISPLAY == 0 {
                    self.advance(v & SHIFT_RIGHT != 0);
                }
            }
            v if v & DISPLAY_CONTROL != 0 => {
                self.display_on = v & DISPLAY_ON != 0;
                self.cursor_on = v & CURSOR_ON != 0;
                self.blink_on = v & BLINK_ON != 0;
            }
            v if v & ENTRY_MODE != 0 => {
                self.increment = v & ENTRY_INCREMENT != 0;
            }
            v if v & RETURN_HOME != 0 => {
                self.cgram_mode = false;
                self.address = 0;
            }
            CLEAR_DISPLAY => {
                self.ddram.fill(b' ');
                self.cgram_mode = false;
                self.address = 0;
                self.increment = true;
            }
            _ => {}
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct PortRegisters {
    output: u8,
    direction: u8,
}

#[derive(Debug)]
struct SimState {
    config: LcdConfig,
    ports: [PortRegisters; 2],
    enable: bool,
    driven: Option<u8>,
    enable_pulses: usize,
    elapsed: Duration,
    controller: Controller,
    events: Vec<BusEvent>,
}

impl SimState {
    fn write_output(&mut self, port: usize, value: u8) {
        self.ports[port].output = value;
        if port == CONTROL {
            self.events.push(BusEvent::Control(value));
            self.control_changed();
        }
    }

    fn read_input(&self, port: usize) -> u8 {
        let registers = self.ports[port];
        let pins = match (port, self.driven) {
            (DATA, Some(nibble)) => self.config.nibble_to_port(nibble),
            _ => 0,
        };
        (registers.output & registers.direction) | (pins & !registers.direction)
    }

    fn control_changed(&mut self) {
        let control = self.ports[CONTROL].output;
        let rs = control & self.config.rs_bit != 0;
        let rw = control & self.config.rw_bit != 0;
        let enable = control & self.config.e_bit != 0;

        if enable == self.enable {
            return;
        }
        self.enable = enable;

        if enable {
            self.enable_pulses += 1;
            if rw {
                let (low, value) = self.controller.read_nibble(rs);
                self.driven = Some(value);
                self.events.push(BusEvent::Read { rs, low, value });
            }
            return;
        }

        self.driven = None;
        if !rw {
            let nibble = self.config.port_to_nibble(self.ports[DATA].output);
            self.events.push(BusEvent::Nibble { rs, value: nibble });
            if let Some(value) = self.controller.write_nibble(rs, nibble) {
                self.events.push(BusEvent::Byte { rs, value });
            }
        }
    }
}

/// A simulated HD44780 with its two ports. See the [module documentation](self).
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
    claims: [Rc<PinClaims>; 2],
}

impl SimBus {
    pub fn new(config: LcdConfig) -> Self {
        SimBus {
            state: Rc::new(RefCell::new(SimState {
                config,
                ports: [PortRegisters::default(); 2],
                enable: false,
                driven: None,
                enable_pulses: 0,
                elapsed: Duration::ZERO,
                controller: Controller::new(),
                events: Vec::new(),
            })),
            claims: [Rc::new(PinClaims::new()), Rc::new(PinClaims::new())],
        }
    }

    /// Sets how many status reads report busy after each executed byte. Defaults to 0.
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.state.borrow_mut().controller.busy_polls = polls;
        self
    }

    /// Sets the interface state the controller starts in.
    pub fn with_power_on(self, power_on: PowerOnState) -> Self {
        {
            let mut state = self.state.borrow_mut();
            let controller = &mut state.controller;
            match power_on {
                PowerOnState::EightBit => controller.four_bit = false,
                PowerOnState::FourBit => controller.four_bit = true,
                PowerOnState::FourBitHalfway(high) => {
                    controller.four_bit = true;
                    controller.pending = Some(high & 0x0F);
                }
            }
        }
        self
    }

    /// The port carrying RS, R/W and E.
    pub fn control(&self) -> SimPort {
        self.port(CONTROL)
    }

    /// The port carrying D4-D7.
    pub fn data(&self) -> SimPort {
        self.port(DATA)
    }

    fn port(&self, index: usize) -> SimPort {
        SimPort {
            index,
            state: self.state.clone(),
            claims: self.claims[index].clone(),
        }
    }

    /// A delay that records waits instead of sleeping.
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: self.state.clone(),
        }
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// The executed bytes, each with the sum of the waits since the previous one.
    pub fn transfers(&self) -> Vec<Transfer> {
        let mut waited = Duration::ZERO;
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match *event {
                BusEvent::Delay(duration) => {
                    waited += duration;
                    None
                }
                BusEvent::Byte { rs, value } => {
                    let transfer = Transfer {
                        rs,
                        value,
                        delay_before: waited,
                    };
                    waited = Duration::ZERO;
                    Some(transfer)
                }
                _ => None,
            })
            .collect()
    }

    /// Number of rising edges seen on E.
    pub fn enable_pulses(&self) -> usize {
        self.state.borrow().enable_pulses
    }

    /// Total time waited through [SimDelay].
    pub fn elapsed(&self) -> Duration {
        self.state.borrow().elapsed
    }

    pub fn controller(&self) -> ControllerState {
        let state = self.state.borrow();
        let controller = &state.controller;
        ControllerState {
            four_bit: controller.four_bit,
            two_lines: controller.two_lines,
            display_on: controller.display_on,
            cursor_on: controller.cursor_on,
            blink_on: controller.blink_on,
            increment: controller.increment,
            address: controller.address,
        }
    }

    /// The first `cols` characters of display line `row`.
    pub fn display_line(&self, row: u8, cols: usize) -> String {
        let state = self.state.borrow();
        let start = row as usize * 0x40;
        state.controller.ddram[start..start + cols]
            .iter()
            .map(|&byte| byte as char)
            .collect()
    }
}

impl Debug for SimBus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimBus({:?})", self.controller())
    }
}

/// One of the two ports of a [SimBus].
pub struct SimPort {
    index: usize,
    state: Rc<RefCell<SimState>>,
    claims: Rc<PinClaims>,
}

impl Debug for SimPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = if self.index == CONTROL { "control" } else { "data" };
        write!(f, "SimPort[{}]", name)
    }
}

impl GpioPort for SimPort {
    fn read_output(&self) -> GpioResult<u8> {
        Ok(self.state.borrow().ports[self.index].output)
    }

    fn write_output(&self, value: u8) -> GpioResult<()> {
        self.state.borrow_mut().write_output(self.index, value);
        Ok(())
    }

    fn read_input(&self) -> GpioResult<u8> {
        Ok(self.state.borrow().read_input(self.index))
    }

    fn direction(&self) -> GpioResult<u8> {
        Ok(self.state.borrow().ports[self.index].direction)
    }

    fn set_direction(&self, value: u8) -> GpioResult<()> {
        self.state.borrow_mut().ports[self.index].direction = value;
        Ok(())
    }

    fn claims(&self) -> &PinClaims {
        &self.claims
    }
}

/// Records waits in the [SimBus] event log.
pub struct SimDelay {
    state: Rc<RefCell<SimState>>,
}

impl Debug for SimDelay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDelay({:?})", self.state.borrow().elapsed)
    }
}

impl SimDelay {
    fn record(&mut self, duration: Duration) {
        let mut state = self.state.borrow_mut();
        state.elapsed += duration;
        state.events.push(BusEvent::Delay(duration));
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.record(Duration::from_nanos(ns.into()));
    }

    fn delay_us(&mut self, us: u32) {
        self.record(Duration::from_micros(us.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.record(Duration::from_millis(ms.into()));
    }
}
