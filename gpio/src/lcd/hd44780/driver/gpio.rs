use crate::delay::DelayNs;
use crate::lcd::hd44780::driver::command::{EIGHT_BIT, FUNCTION_SET};
use crate::lcd::hd44780::driver::{HD44780Driver, LcdConfig, WaitPolicy, timing};
use crate::{GpioError, GpioPort, GpioResult};
use log::{debug, trace, warn};
use std::fmt::{Debug, Formatter};

/// HD44780 driver bit-banging the 4-bit interface over one or two [GpioPort]s.
///
/// Every byte goes out as two nibbles, high nibble first, each latched by a pulse on E. After
/// each byte the driver waits according to its [WaitPolicy]: a fixed 2 ms, or polling the busy
/// flag, which needs the R/W line wired.
///
/// The driver claims its bits on both ports when created and releases them when dropped.
pub struct GpioHD44780Driver<'a> {
    control: &'a dyn GpioPort,
    data: &'a dyn GpioPort,
    delay: &'a mut dyn DelayNs,
    config: LcdConfig,
    wait: WaitPolicy,
}

impl Debug for GpioHD44780Driver<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioHD44780Driver")
            .field("control", &self.control)
            .field("data", &self.data)
            .field("config", &self.config)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl<'a> GpioHD44780Driver<'a> {
    /// Creates a new driver.
    ///
    /// # Parameters
    ///
    /// - `control`: port carrying RS, R/W and E.
    /// - `data`: port carrying D4-D7. May be the same port as `control`.
    /// - `delay`: used for every protocol wait.
    /// - `config`: the wiring, see [LcdConfig].
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the wiring is invalid.
    /// - `GpioError::AlreadyInUse` if any of the bits is claimed by someone else.
    pub fn new(
        control: &'a dyn GpioPort,
        data: &'a dyn GpioPort,
        delay: &'a mut dyn DelayNs,
        config: LcdConfig,
    ) -> GpioResult<Self> {
        config.validate()?;

        control.claims().claim(config.control_mask())?;
        if let Err(err) = data.claims().claim(config.data_mask) {
            control.claims().release(config.control_mask());
            return Err(err);
        }

        Ok(GpioHD44780Driver {
            control,
            data,
            delay,
            config,
            wait: config.wait_policy(),
        })
    }

    pub fn config(&self) -> &LcdConfig {
        &self.config
    }

    /// Latches one nibble (`0..=0xF`) into the controller. RS is left as it is.
    pub fn write_nibble(&mut self, nibble: u8) -> GpioResult<()> {
        if nibble > 0b1111 {
            return Err(GpioError::InvalidArgument);
        }

        let LcdConfig {
            rw_bit,
            e_bit,
            data_mask,
            ..
        } = self.config;

        trace!("Writing nibble: {:04b}", nibble);
        self.data
            .write_masked(data_mask, self.config.nibble_to_port(nibble))?;

        // R/W = 0, E = 0
        self.control.clear_bits(rw_bit | e_bit)?;
        // E must stay high for at least two port writes
        self.control.set_bits(e_bit)?;
        self.control.set_bits(e_bit)?;
        self.delay.delay_us(timing::ENABLE_PULSE);
        self.control.clear_bits(e_bit)?;
        Ok(())
    }

    /// Sends a byte as two nibbles, high nibble first.
    pub fn write_byte(&mut self, value: u8) -> GpioResult<()> {
        self.write_nibble(value >> 4)?;
        self.write_nibble(value & 0x0F)
    }

    /// Waits until the controller accepts the next transfer.
    pub fn wait_ready(&mut self) -> GpioResult<()> {
        match self.wait {
            WaitPolicy::FixedDelay { micros } => {
                self.delay.delay_us(micros);
                Ok(())
            }
            WaitPolicy::BusyFlag { max_polls } => self.poll_busy_flag(max_polls),
        }
    }

    fn poll_busy_flag(&mut self, max_polls: Option<u32>) -> GpioResult<()> {
        let LcdConfig {
            rs_bit,
            rw_bit,
            e_bit,
            data_mask,
            status_bit,
            ..
        } = self.config;

        // No pull-ups, then input
        self.data.clear_bits(data_mask)?;
        self.data.make_input(data_mask)?;

        // E = 0, RS = 0, R/W = 1
        self.control.clear_bits(e_bit | rs_bit)?;
        self.control.set_bits(rw_bit)?;

        let mut polls = 0u32;
        let result = loop {
            self.control.set_bits(e_bit)?;
            self.delay.delay_us(timing::STATUS_SETTLE);
            let busy = self.data.read_input()? & status_bit != 0;
            self.control.clear_bits(e_bit)?;
            // The low status nibble is never looked at, but it still has to be clocked out,
            // or the next read returns it instead of the busy flag.
            self.control.set_bits(e_bit)?;
            self.control.clear_bits(e_bit)?;
            polls += 1;

            if !busy {
                trace!("Busy flag cleared after {} reads", polls);
                break Ok(());
            }
            if max_polls.is_some_and(|max| polls >= max) {
                warn!("Controller still busy after {} reads, giving up", polls);
                break Err(GpioError::BusyTimeout(polls));
            }
        };

        self.control.clear_bits(rw_bit)?;
        self.data.make_output(data_mask)?;
        result
    }

    fn send(&mut self, data: u8, rs: bool) -> GpioResult<()> {
        trace!("Sending data: {:08b}, RS: {}", data, rs);

        // Set RS pin
        if rs {
            self.control.set_bits(self.config.rs_bit)?;
        } else {
            self.control.clear_bits(self.config.rs_bit)?;
        }

        self.write_byte(data)?;
        self.wait_ready()
    }
}

impl HD44780Driver for GpioHD44780Driver<'_> {
    /// Initializes the display by instruction.
    ///
    /// The controller may power up in any state, even halfway through a 4-bit transfer, so the
    /// 8-bit interface is selected three times with single nibbles before switching to 4-bit.
    /// The busy flag cannot be read during this phase, so every step uses a fixed wait.
    /// Then it sets two lines and turns the display, cursor and blinking on.
    fn init(&mut self) -> GpioResult<()> {
        let LcdConfig {
            rs_bit, data_mask, ..
        } = self.config;

        debug!("Initializing HD44780 with {:?}", self.config);

        self.data.make_output(data_mask)?;
        self.control.make_output(self.config.control_mask())?;
        self.control.clear_bits(rs_bit)?;

        self.delay.delay_us(timing::POWER_ON);

        // Only the high nibble of a function set is seen while the controller may be in 8-bit mode
        let reset = (FUNCTION_SET | EIGHT_BIT) >> 4;
        for wait in [timing::RESET_FIRST, timing::RESET_SECOND, timing::RESET_THIRD] {
            self.write_nibble(reset)?;
            self.delay.delay_us(wait);
        }

        self.write_nibble(FUNCTION_SET >> 4)?;
        self.delay.delay_us(timing::INTERFACE_SWITCH);

        self.function_set(false, true, false)?;
        self.set_display_control(true, true, true)?;

        debug!("HD44780 initialized");
        Ok(())
    }

    fn send_command(&mut self, command: u8) -> GpioResult<()> {
        self.send(command, false)
    }

    fn send_data(&mut self, data: u8) -> GpioResult<()> {
        self.send(data, true)
    }
}

impl Drop for GpioHD44780Driver<'_> {
    fn drop(&mut self) {
        self.control.claims().release(self.config.control_mask());
        self.data.claims().release(self.config.data_mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcd::hd44780::driver::CursorDirection;
    use crate::lcd::hd44780::text::FlashImage;
    use crate::sim::{BusEvent, SimBus};
    use std::time::Duration;

    fn micros(us: u32) -> Duration {
        Duration::from_micros(us.into())
    }

    fn busy_config(max_busy_polls: Option<u32>) -> LcdConfig {
        LcdConfig {
            use_busy_flag: true,
            max_busy_polls,
            ..LcdConfig::default()
        }
    }

    #[test]
    fn nibble_lands_on_data_bits_only() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        // Bits the LCD does not own
        data.write_output(0b0000_1010).unwrap();
        control.write_output(0b1110_0001).unwrap();

        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        for nibble in 0..=0xF {
            lcd.write_nibble(nibble).unwrap();
            assert_eq!(data.read_output().unwrap(), (nibble << 4) | 0b0000_1010);
            assert_eq!(control.read_output().unwrap() & !config.control_mask(), 0b1110_0001);
        }

        let latched: Vec<u8> = bus
            .events()
            .into_iter()
            .filter_map(|event| match event {
                BusEvent::Nibble { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(latched, (0..=0xF).collect::<Vec<u8>>());
    }

    #[test]
    fn nibble_pulses_enable_and_keeps_rw_low() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        control.set_bits(config.rw_bit).unwrap();

        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.write_nibble(0x5).unwrap();

        let output = control.read_output().unwrap();
        assert_eq!(output & (config.rw_bit | config.e_bit), 0);
        assert_eq!(bus.enable_pulses(), 1);

        // E is high for two port writes and the pulse wait, then falls
        let events = bus.events();
        let e_high = |event: &BusEvent| matches!(event, BusEvent::Control(value) if value & config.e_bit != 0);
        let rise = events.iter().position(|event| e_high(event)).unwrap();
        let fall = rise
            + events[rise..]
                .iter()
                .position(|event| matches!(event, BusEvent::Control(_)) && !e_high(event))
                .unwrap();
        let high = &events[rise..fall];
        assert!(high.iter().filter(|event| matches!(event, BusEvent::Control(_))).count() >= 2);
        assert!(high.contains(&BusEvent::Delay(micros(timing::ENABLE_PULSE))));
        assert!(matches!(events[fall], BusEvent::Control(value) if value & config.rw_bit == 0));
    }

    #[test]
    fn nibble_out_of_range_is_rejected() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        assert_eq!(lcd.write_nibble(0x10), Err(GpioError::InvalidArgument));
        assert!(bus.events().is_empty());
    }

    #[test]
    fn byte_is_sent_high_nibble_first() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();

        for value in [0x00u8, 0x28, 0x5A, 0xA5, 0xC0, 0xFF] {
            bus.clear_events();
            lcd.write_byte(value).unwrap();
            let nibbles: Vec<u8> = bus
                .events()
                .into_iter()
                .filter_map(|event| match event {
                    BusEvent::Nibble { value, .. } => Some(value),
                    _ => None,
                })
                .collect();
            assert_eq!(nibbles, vec![value >> 4, value & 0x0F]);
        }
    }

    #[test]
    fn register_select_is_held_through_transfers() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();
        bus.clear_events();

        lcd.send_command(0x01).unwrap();
        lcd.send_data(b'x').unwrap();
        lcd.send_command(0x80).unwrap();

        let nibbles: Vec<(bool, u8)> = bus
            .events()
            .into_iter()
            .filter_map(|event| match event {
                BusEvent::Nibble { rs, value } => Some((rs, value)),
                _ => None,
            })
            .collect();
        assert_eq!(
            nibbles,
            vec![
                (false, 0x0),
                (false, 0x1),
                (true, 0x7),
                (true, 0x8),
                (false, 0x8),
                (false, 0x0),
            ]
        );
    }

    #[test]
    fn fixed_delay_follows_every_transfer() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();

        lcd.send_data(b'A').unwrap();
        assert_eq!(bus.events().last(), Some(&BusEvent::Delay(micros(timing::SETTLE))));
    }

    #[test]
    fn move_to_addresses_both_lines() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();

        for ((row, col), command) in [((0, 0), 0x80), ((1, 0), 0xC0), ((0, 15), 0x8F), ((1, 15), 0xCF)] {
            bus.clear_events();
            lcd.move_to(row, col).unwrap();
            let transfers = bus.transfers();
            assert_eq!(transfers.len(), 1);
            assert!(!transfers[0].rs);
            assert_eq!(transfers[0].value, command);
        }
    }

    #[test]
    fn write_string_stops_before_terminator() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();
        bus.clear_events();

        lcd.write_string(b"AB\0".into()).unwrap();

        let transfers = bus.transfers();
        assert_eq!(transfers.len(), 2);
        assert!(transfers.iter().all(|transfer| transfer.rs));
        assert_eq!(transfers[0].value, b'A');
        assert_eq!(transfers[1].value, b'B');
    }

    #[test]
    fn write_string_p_reads_program_memory() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();

        let image = FlashImage::new(b"skip\0Hi!\0");
        lcd.write_string_p(&image, 5).unwrap();
        assert_eq!(bus.display_line(0, 3), "Hi!");
    }

    #[test]
    fn instruction_set_bytes() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();
        bus.clear_events();

        lcd.clear_display().unwrap();
        lcd.return_home().unwrap();
        lcd.set_entry_mode(CursorDirection::Right, false).unwrap();
        lcd.set_display_control(true, false, false).unwrap();
        lcd.cursor_shift(false, CursorDirection::Left).unwrap();
        lcd.function_set(false, true, true).unwrap();
        lcd.set_cgram_address(0x08).unwrap();
        lcd.set_ddram_address(0x41).unwrap();
        assert_eq!(lcd.set_cgram_address(0x40), Err(GpioError::InvalidArgument));
        assert_eq!(lcd.set_ddram_address(0x80), Err(GpioError::InvalidArgument));

        let commands: Vec<u8> = bus.transfers().iter().map(|t| t.value).collect();
        assert_eq!(commands, vec![0x01, 0x02, 0x06, 0x0C, 0x10, 0x2C, 0x48, 0xC1]);
    }

    #[test]
    fn busy_flag_is_polled_until_clear() {
        let config = busy_config(None);
        let bus = SimBus::new(config).with_busy_polls(3);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();
        bus.clear_events();

        lcd.send_data(b'A').unwrap();

        let reads: Vec<BusEvent> = bus
            .events()
            .into_iter()
            .filter(|event| matches!(event, BusEvent::Read { .. }))
            .collect();
        // Three busy polls and the one that sees the flag clear, two E pulses each
        assert_eq!(reads.len(), 8);
        for (index, pair) in reads.chunks(2).enumerate() {
            let busy = index < 3;
            assert!(
                matches!(pair[0], BusEvent::Read { rs: false, low: false, value } if (value & 0b1000 != 0) == busy)
            );
            assert!(matches!(pair[1], BusEvent::Read { rs: false, low: true, .. }));
        }

        // Pins are back to writing
        assert_eq!(data.direction().unwrap() & config.data_mask, config.data_mask);
        assert_eq!(control.read_output().unwrap() & config.rw_bit, 0);
        assert_eq!(bus.display_line(0, 1), "A");
    }

    #[test]
    fn busy_flag_poll_ends_at_once_when_idle() {
        let config = busy_config(None);
        let bus = SimBus::new(config).with_busy_polls(0);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();
        bus.clear_events();

        lcd.send_command(0x01).unwrap();
        let reads = bus
            .events()
            .iter()
            .filter(|event| matches!(event, BusEvent::Read { .. }))
            .count();
        assert_eq!(reads, 2);
    }

    #[test]
    fn busy_flag_poll_gives_up_after_limit() {
        let config = busy_config(Some(4));
        let bus = SimBus::new(config).with_busy_polls(10);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();

        lcd.write_nibble(0b0010).unwrap();
        assert_eq!(lcd.send_command(0x28), Err(GpioError::BusyTimeout(4)));
        assert_eq!(data.direction().unwrap() & config.data_mask, config.data_mask);
        assert_eq!(control.read_output().unwrap() & config.rw_bit, 0);
    }

    #[test]
    fn zero_busy_poll_limit_is_rejected() {
        let config = busy_config(Some(0));
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        assert_eq!(
            GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap_err(),
            GpioError::InvalidArgument
        );
        assert_eq!(control.claims().claimed(), 0);
    }

    #[test]
    fn bits_are_claimed_while_the_driver_lives() {
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let (control, data) = (bus.control(), bus.data());
        let mut delay = bus.delay();
        {
            let _lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
            assert_eq!(control.claims().claimed(), config.control_mask());
            assert_eq!(data.claims().claimed(), config.data_mask);
            assert_eq!(control.claims().claim(config.e_bit), Err(GpioError::AlreadyInUse));
        }
        assert_eq!(control.claims().claimed(), 0);
        assert_eq!(data.claims().claimed(), 0);
    }

    #[test]
    fn overlapping_shared_port_is_rejected() {
        // RS (bit 4) sits inside the data nibble once both groups share one port
        let config = LcdConfig::default();
        let bus = SimBus::new(config);
        let port = bus.control();
        let mut delay = bus.delay();
        assert_eq!(
            GpioHD44780Driver::new(&port, &port, &mut delay, config).unwrap_err(),
            GpioError::AlreadyInUse
        );
        assert_eq!(port.claims().claimed(), 0);
    }
}
