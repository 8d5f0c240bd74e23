use std::net::Ipv4Addr;

use evg_driver::testing::{install_link, scripted, ScriptedLink};
use evg_driver::{regs, CardRevision, DeviceConfig, EvgDriver, EvgError, TriggerSource};

fn driver_with(link: ScriptedLink) -> EvgDriver {
    driver_with_revision(link, CardRevision::Evg230)
}

fn driver_with_revision(link: ScriptedLink, revision: CardRevision) -> EvgDriver {
    let mut driver = EvgDriver::default();
    let mut config = DeviceConfig::new("EVG1", Ipv4Addr::LOCALHOST, 2000, 125_000_000);
    config.revision = revision;
    driver.configure(config).unwrap();
    install_link(&driver, "EVG1", link).unwrap();
    driver
}

#[test]
fn enable_sequencer_touches_only_its_bit() {
    let (link, probe) = scripted();
    let link = link
        .expect_read(regs::EVENT_ENABLE, 0x0000)
        .expect_write(regs::EVENT_ENABLE, regs::EVENT_ENABLE_SEQUENCER0)
        .expect_read(
            regs::EVENT_ENABLE,
            regs::EVENT_ENABLE_SEQUENCER0 | regs::EVENT_ENABLE_SEQUENCER1,
        )
        .expect_write(regs::EVENT_ENABLE, regs::EVENT_ENABLE_SEQUENCER0);
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    evg.enable_sequencer(0, true).unwrap();
    evg.enable_sequencer(1, false).unwrap();
    probe.assert_drained();
}

#[test]
fn is_sequencer_enabled_masks_the_bank_bit() {
    let (link, probe) = scripted();
    let link = link
        .expect_read(regs::EVENT_ENABLE, regs::EVENT_ENABLE_SEQUENCER1)
        .expect_read(regs::EVENT_ENABLE, regs::EVENT_ENABLE_SEQUENCER1);
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    assert!(!evg.is_sequencer_enabled(0).unwrap());
    assert!(evg.is_sequencer_enabled(1).unwrap());
    probe.assert_drained();
}

#[test]
fn ac_trigger_source_clears_vme_and_sets_the_routing_bit() {
    let (link, probe) = scripted();
    let link = link
        .expect_read(
            regs::EVENT_ENABLE,
            regs::EVENT_ENABLE_VME | regs::EVENT_ENABLE_SEQUENCER0,
        )
        .expect_write(regs::EVENT_ENABLE, regs::EVENT_ENABLE_SEQUENCER0)
        .expect_read(regs::AC_ENABLE, 0x0032)
        .expect_write(regs::AC_ENABLE, 0x0032 | regs::AC_ENABLE_SEQ0);
    let driver = driver_with(link);

    driver
        .open("EVG1")
        .unwrap()
        .set_sequencer_trigger_source(0, TriggerSource::AcMains)
        .unwrap();
    probe.assert_drained();
}

#[test]
fn software_trigger_source_sets_vme_and_clears_the_routing_bit() {
    let (link, probe) = scripted();
    let link = link
        .expect_read(regs::EVENT_ENABLE, regs::EVENT_ENABLE_SEQUENCER1)
        .expect_write(
            regs::EVENT_ENABLE,
            regs::EVENT_ENABLE_SEQUENCER1 | regs::EVENT_ENABLE_VME,
        )
        .expect_read(regs::AC_ENABLE, regs::AC_ENABLE_SEQ1 | regs::AC_ENABLE_SYNC)
        .expect_write(regs::AC_ENABLE, regs::AC_ENABLE_SYNC);
    let driver = driver_with(link);

    driver
        .open("EVG1")
        .unwrap()
        .set_sequencer_trigger_source(1, TriggerSource::Software)
        .unwrap();
    probe.assert_drained();
}

#[test]
fn trigger_source_read_back_decodes_the_routing_bit() {
    let (link, probe) = scripted();
    let link = link
        .expect_read(regs::AC_ENABLE, regs::AC_ENABLE_SEQ0)
        .expect_read(regs::AC_ENABLE, regs::AC_ENABLE_SEQ0);
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    assert_eq!(
        evg.get_sequencer_trigger_source(0).unwrap(),
        TriggerSource::AcMains
    );
    assert_eq!(
        evg.get_sequencer_trigger_source(1).unwrap(),
        TriggerSource::Software
    );
    probe.assert_drained();
}

#[test]
fn sequencer_prescaler_is_a_verified_write() {
    let (link, probe) = scripted();
    let link = link
        .expect_write_check(regs::SEQ_CLOCK_SEL1, 0x0007)
        .expect_write_check(regs::SEQ_CLOCK_SEL2, 0x0100)
        .expect_read(regs::SEQ_CLOCK_SEL1, 0x0007);
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    evg.set_sequencer_prescaler(0, 7).unwrap();
    evg.set_sequencer_prescaler(1, 0x0100).unwrap();
    assert_eq!(evg.get_sequencer_prescaler(0).unwrap(), 7);
    probe.assert_drained();
}

#[test]
fn trigger_pulses_the_bank_bit_without_read_back() {
    let (link, probe) = scripted();
    let link = link
        .expect_read(regs::CONTROL, regs::CONTROL_ENABLE)
        .expect_write(regs::CONTROL, regs::CONTROL_ENABLE | regs::CONTROL_VTRG1)
        .expect_read(regs::CONTROL, regs::CONTROL_ENABLE)
        .expect_write(regs::CONTROL, regs::CONTROL_ENABLE | regs::CONTROL_VTRG2);
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    evg.trigger_sequencer(0).unwrap();
    evg.trigger_sequencer(1).unwrap();
    probe.assert_drained();
}

#[test]
fn single_sequencer_revision_rejects_the_second_bank() {
    let (link, probe) = scripted();
    let driver = driver_with_revision(link, CardRevision::Evg200);
    let evg = driver.open("EVG1").unwrap();

    for result in [
        evg.enable_sequencer(1, true),
        evg.is_sequencer_enabled(1).map(|_| ()),
        evg.set_event(1, 0, 0x01),
        evg.trigger_sequencer(1),
        evg.set_sequencer_prescaler(1, 1),
    ] {
        let err = result.unwrap_err();
        assert!(
            matches!(err, EvgError::InvalidArgument { .. }),
            "unexpected error: {err}"
        );
    }
    assert!(probe.requests().is_empty(), "no wire traffic expected");
}

#[test]
fn out_of_range_sequencer_index_is_rejected() {
    let (link, probe) = scripted();
    let driver = driver_with(link);
    let evg = driver.open("EVG1").unwrap();

    let err = evg.enable_sequencer(2, true).unwrap_err();
    assert!(matches!(err, EvgError::InvalidArgument { .. }));
    assert!(probe.requests().is_empty());
}
