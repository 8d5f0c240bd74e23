use std::net::Ipv4Addr;

use evg_driver::testing::{install_link, scripted, ScriptedLink};
use evg_driver::{regs, DeviceConfig, EvgDriver, EvgError};

fn driver_with(link: ScriptedLink) -> EvgDriver {
    let mut driver = EvgDriver::default();
    driver
        .configure(DeviceConfig::new(
            "EVG1",
            Ipv4Addr::LOCALHOST,
            2000,
            125_000_000,
        ))
        .unwrap();
    install_link(&driver, "EVG1", link).unwrap();
    driver
}

#[test]
fn counter_prescaler_programs_high_then_low_word() {
    // 0x0001_86A0 into counter 5: select high half, write it, select low
    // half, write it. Every step is verified.
    let (link, probe) = scripted();
    let link = link
        .expect_write_check(regs::MXC_CONTROL, regs::MXC_CONTROL_HIGH_WORD | 0x0005)
        .expect_write_check(regs::MXC_PRESCALER, 0x0001)
        .expect_write_check(regs::MXC_CONTROL, 0x0005)
        .expect_write_check(regs::MXC_PRESCALER, 0x86A0);
    let driver = driver_with(link);

    driver
        .open("EVG1")
        .unwrap()
        .set_counter_prescaler(5, 0x0001_86A0)
        .unwrap();
    probe.assert_drained();
}

#[test]
fn counter_prescaler_read_back_combines_both_halves() {
    let (link, probe) = scripted();
    let link = link
        .expect_write_check(regs::MXC_CONTROL, regs::MXC_CONTROL_HIGH_WORD | 0x0002)
        .expect_read(regs::MXC_PRESCALER, 0x0001)
        .expect_write_check(regs::MXC_CONTROL, 0x0002)
        .expect_read(regs::MXC_PRESCALER, 0x86A0);
    let driver = driver_with(link);

    let prescaler = driver
        .open("EVG1")
        .unwrap()
        .get_counter_prescaler(2)
        .unwrap();
    assert_eq!(prescaler, 0x0001_86A0);
    probe.assert_drained();
}

#[test]
fn failed_half_select_stops_the_sequence() {
    let (link, probe) = scripted();
    let link = link
        .expect_write(regs::MXC_CONTROL, regs::MXC_CONTROL_HIGH_WORD | 0x0001)
        .expect_read(regs::MXC_CONTROL, 0x0000);
    let driver = driver_with(link);

    let err = driver
        .open("EVG1")
        .unwrap()
        .set_counter_prescaler(1, 42)
        .unwrap_err();
    assert!(
        matches!(err, EvgError::VerifyMismatch { register: 0x2A, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(probe.requests().len(), 2);
    probe.assert_drained();
}

#[test]
fn counter_index_is_checked_before_any_traffic() {
    let (link, probe) = scripted();
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    for bad in [8u8, 9, 255] {
        let err = evg.set_counter_prescaler(bad, 1).unwrap_err();
        assert!(
            matches!(err, EvgError::InvalidArgument { .. }),
            "counter {bad}: unexpected error {err}"
        );
    }
    let err = evg.get_counter_prescaler(8).unwrap_err();
    assert!(matches!(err, EvgError::InvalidArgument { .. }));
    assert!(probe.requests().is_empty(), "no wire traffic expected");
}
