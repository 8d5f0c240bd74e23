use std::net::Ipv4Addr;

use evg_driver::testing::{install_link, scripted, ScriptedLink};
use evg_driver::{regs, DeviceConfig, EvgDriver, EvgError};
use evg_register_protocol::Access;

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
fn set_event_latches_address_then_writes_code() {
    let (link, probe) = scripted();
    let link = link
        .expect_write_check(regs::SEQ_ADDRESS0, 0x0005)
        .expect_write_check(regs::SEQ_CODE0, 0x007F);
    let driver = driver_with(link);

    driver.open("EVG1").unwrap().set_event(0, 5, 0x7F).unwrap();

    // Address-latch protocol: latch write and read-back, then code write
    // and read-back, with nothing in between.
    let requests = probe.requests();
    let summary: Vec<(Access, u16, u16)> = requests
        .iter()
        .map(|r| (r.access, r.register(), r.data))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Access::Write, regs::SEQ_ADDRESS0, 0x0005),
            (Access::Read, regs::SEQ_ADDRESS0, 0x0000),
            (Access::Write, regs::SEQ_CODE0, 0x007F),
            (Access::Read, regs::SEQ_CODE0, 0x0000),
        ]
    );
    probe.assert_drained();
}

#[test]
fn second_sequencer_uses_its_own_bank() {
    let (link, probe) = scripted();
    let link = link
        .expect_write_check(regs::SEQ_ADDRESS1, 0x0009)
        .expect_write_check(regs::SEQ_CODE1, 0x002A);
    let driver = driver_with(link);

    driver.open("EVG1").unwrap().set_event(1, 9, 0x2A).unwrap();
    probe.assert_drained();
}

#[test]
fn get_event_latches_then_reads() {
    let (link, probe) = scripted();
    let link = link
        .expect_write_check(regs::SEQ_ADDRESS0, 0x0005)
        .expect_read(regs::SEQ_CODE0, 0x007F);
    let driver = driver_with(link);

    let code = driver.open("EVG1").unwrap().get_event(0, 5).unwrap();
    assert_eq!(code, 0x7F);
    probe.assert_drained();
}

#[test]
fn failed_latch_aborts_before_the_code_register() {
    let (link, probe) = scripted();
    let link = link
        .expect_write(regs::SEQ_ADDRESS0, 0x0005)
        .expect_read(regs::SEQ_ADDRESS0, 0x0000);
    let driver = driver_with(link);

    let err = driver.open("EVG1").unwrap().set_event(0, 5, 0x7F).unwrap_err();
    assert!(
        matches!(err, EvgError::VerifyMismatch { register: 0x44, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(probe.requests().len(), 2);
    probe.assert_drained();
}

#[test]
fn transport_timeout_during_latch_aborts_and_unlocks() {
    let (link, probe) = scripted();
    let link = link
        .expect_write_timeout(regs::SEQ_ADDRESS0, 0x0005)
        .expect_write_check(regs::SEQ_ADDRESS0, 0x0006)
        .expect_write_check(regs::SEQ_CODE0, 0x0011);
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    let err = evg.set_event(0, 5, 0x7F).unwrap_err();
    assert!(
        matches!(err, EvgError::TransportTimeout { .. }),
        "unexpected error: {err}"
    );
    // The lock was released on the error path; the next operation proceeds.
    evg.set_event(0, 6, 0x11).unwrap();
    probe.assert_drained();
}

#[test]
fn ram_address_and_code_domains_are_checked_first() {
    let (link, probe) = scripted();
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    assert!(matches!(
        evg.set_event(0, 2048, 0x01).unwrap_err(),
        EvgError::InvalidArgument { .. }
    ));
    assert!(matches!(
        evg.set_event(0, 0, 0x80).unwrap_err(),
        EvgError::InvalidArgument { .. }
    ));
    assert!(matches!(
        evg.get_event(0, 4096).unwrap_err(),
        EvgError::InvalidArgument { .. }
    ));
    assert!(probe.requests().is_empty(), "no wire traffic expected");
}
