use charlcd_gpio::lcd::hd44780::driver::{GpioHD44780Driver, HD44780Driver, LcdConfig, timing};
use charlcd_gpio::lcd::hd44780::text::FlashImage;
use charlcd_gpio::sim::{SimBus, Transfer};
use std::time::Duration;

const LINE_1: &[u8] = b">> at328-5.c  <<78901234";
const LINE_2: &[u8] = b">> USC EE459L <<78901234";
static IMAGE: FlashImage = FlashImage::new(b">> at328-5.c  <<78901234\0>> USC EE459L <<78901234\0");

fn run_demo(config: LcdConfig, busy_polls: u32) -> SimBus {
    let bus = SimBus::new(config).with_busy_polls(busy_polls);
    let (control, data) = (bus.control(), bus.data());
    let mut delay = bus.delay();
    {
        let mut lcd = GpioHD44780Driver::new(&control, &data, &mut delay, config).unwrap();
        lcd.init().unwrap();
        lcd.move_to(0, 0).unwrap();
        lcd.write_string_p(&IMAGE, 0).unwrap();
        lcd.move_to(1, 0).unwrap();
        lcd.write_string_p(&IMAGE, LINE_1.len() + 1).unwrap();
    }
    bus
}

fn expected_bytes() -> Vec<(bool, u8)> {
    let mut expected = vec![
        (false, 0x30),
        (false, 0x30),
        (false, 0x30),
        (false, 0x20),
        (false, 0x28),
        (false, 0x0F),
        (false, 0x80),
    ];
    expected.extend(LINE_1.iter().map(|&byte| (true, byte)));
    expected.push((false, 0xC0));
    expected.extend(LINE_2.iter().map(|&byte| (true, byte)));
    expected
}

fn bytes(transfers: &[Transfer]) -> Vec<(bool, u8)> {
    transfers.iter().map(|t| (t.rs, t.value)).collect()
}

#[test]
fn demo_issues_the_expected_transfers() {
    let bus = run_demo(LcdConfig::default(), 0);
    let transfers = bus.transfers();

    assert_eq!(bytes(&transfers), expected_bytes());
    assert_eq!(transfers.iter().filter(|t| t.rs).count(), LINE_1.len() + LINE_2.len());
}

#[test]
fn demo_respects_minimum_delays() {
    let bus = run_demo(LcdConfig::default(), 0);
    let transfers = bus.transfers();

    let minimums = [
        Duration::from_millis(15),
        Duration::from_micros(4100),
        Duration::from_micros(100),
        Duration::from_micros(timing::RESET_THIRD.into()),
        Duration::from_micros(timing::INTERFACE_SWITCH.into()),
    ];
    for (transfer, minimum) in transfers.iter().zip(minimums) {
        assert!(transfer.delay_before >= minimum, "{:?} < {:?}", transfer, minimum);
    }
    // Every later transfer waits out the settling time of the previous one
    for transfer in &transfers[minimums.len()..] {
        assert!(transfer.delay_before >= Duration::from_millis(2), "{:?}", transfer);
    }
}

#[test]
fn demo_shows_both_lines() {
    let bus = run_demo(LcdConfig::default(), 0);

    assert_eq!(bus.display_line(0, 16), ">> at328-5.c  <<");
    assert_eq!(bus.display_line(1, 16), ">> USC EE459L <<");

    let controller = bus.controller();
    assert!(controller.four_bit);
    assert!(controller.two_lines);
    assert!(controller.display_on && controller.cursor_on && controller.blink_on);
}

#[test]
fn demo_with_busy_flag_issues_the_same_transfers() {
    let config = LcdConfig {
        use_busy_flag: true,
        ..LcdConfig::default()
    };
    let bus = run_demo(config, 2);

    assert_eq!(bytes(&bus.transfers()), expected_bytes());
    assert_eq!(bus.display_line(1, 16), ">> USC EE459L <<");
}
