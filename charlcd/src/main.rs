mod config;

use crate::config::{Backend, Config, DelayKind};
use charlcd_gpio::GpioPort;
use charlcd_gpio::delay::{DelayNs, SleepDelay, SpinDelay};
use charlcd_gpio::gpiod::GpiodPort;
use charlcd_gpio::lcd::hd44780::driver::{GpioHD44780Driver, HD44780Driver, LcdConfig};
use charlcd_gpio::lcd::hd44780::text::FlashImage;
use charlcd_gpio::raw::RawGpioPort;
use charlcd_gpio::sim::SimBus;
use dotenv::dotenv;
use log::{debug, info};
use std::thread;
use sysinfo::System;

/// Both banner lines, zero-terminated, kept in read-only memory.
static PROGRAM_IMAGE: FlashImage = FlashImage::new(
    b">> at328-5.c  <<78901234\0>> USC EE459L <<78901234\0",
);
const LINE_1: usize = 0;
const LINE_2: usize = 25;

const DISPLAY_COLUMNS: usize = 16;

fn show_banner(
    control: &dyn GpioPort,
    data: &dyn GpioPort,
    delay: &mut dyn DelayNs,
    lcd_config: LcdConfig,
) -> eyre::Result<()> {
    let mut lcd = GpioHD44780Driver::new(control, data, delay, lcd_config)?;

    lcd.init()?;

    lcd.move_to(0, 0)?;
    lcd.write_string_p(&PROGRAM_IMAGE, LINE_1)?;

    lcd.move_to(1, 0)?;
    lcd.write_string_p(&PROGRAM_IMAGE, LINE_2)?;

    debug!("{:?} done.", lcd);
    Ok(())
}

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!(
        "charlcd starting on {} ({})",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR),
        System::cpu_arch(),
    );

    let config = Config::load()?;
    config.lcd.validate()?;

    info!(
        "LCD @ RS: {:#04x}, RW: {:#04x}, E: {:#04x}, Data: {:#04x}, busy flag: {}",
        config.lcd.rs_bit,
        config.lcd.rw_bit,
        config.lcd.e_bit,
        config.lcd.data_mask,
        config.lcd.use_busy_flag,
    );

    let mut delay: Box<dyn DelayNs> = match config.delay {
        DelayKind::Sleep => Box::new(SleepDelay),
        DelayKind::Spin => Box::new(SpinDelay),
    };

    match &config.backend {
        Backend::Sim { busy_polls } => {
            debug!("Initializing simulated display...");
            let bus = SimBus::new(config.lcd).with_busy_polls(*busy_polls);
            let (control, data) = (bus.control(), bus.data());
            let mut sim_delay = bus.delay();

            show_banner(&control, &data, &mut sim_delay, config.lcd)?;

            info!("| {} |", bus.display_line(0, DISPLAY_COLUMNS));
            info!("| {} |", bus.display_line(1, DISPLAY_COLUMNS));
            info!("Simulated waits: {:?}", bus.elapsed());
        }
        Backend::Raw {
            path,
            control_base,
            data_base,
        } => {
            debug!("Mapping port registers from {}...", path);
            let control = RawGpioPort::open(path, *control_base)?;
            debug!("{:?} initialized.", control);

            if control_base == data_base {
                show_banner(&control, &control, &mut *delay, config.lcd)?;
            } else {
                let data = RawGpioPort::open(path, *data_base)?;
                debug!("{:?} initialized.", data);
                show_banner(&control, &data, &mut *delay, config.lcd)?;
            }
        }
        Backend::Gpiod {
            chip,
            control_lines,
            data_lines,
        } => {
            debug!("Requesting lines from {}...", chip);
            let control = GpiodPort::open(chip, *control_lines)?;
            debug!("{:?} initialized.", control);
            let data = GpiodPort::open(chip, *data_lines)?;
            debug!("{:?} initialized.", data);

            show_banner(&control, &data, &mut *delay, config.lcd)?;
        }
    }

    info!("Banner written, idling.");

    loop {
        thread::park();
    }
}
