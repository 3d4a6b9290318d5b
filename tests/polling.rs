use lifeblue_lib::mock::{MockBehavior, MockTransport};
use lifeblue_lib::session::SessionState;
use lifeblue_lib::transport::NotifyHandle;
use lifeblue_lib::{BatteryCoordinator, Error, FragmentOutcome, FrameField, PollerConfig};

const TERMINATOR: u8 = 0x87;

fn short(value: u16) -> String {
    format!("{:04X}", value.swap_bytes())
}

fn long(value: u32) -> String {
    format!("{:08X}", value.swap_bytes())
}

/// 13.284 V, -2.15 A, 103 Ah, 42 cycles, 87 %, 20.0 C, four cells.
fn frame(status: u16, afe_status: u16) -> Vec<u8> {
    let mut text = String::new();
    text.push_str(&long(13_284));
    text.push_str(&long(-2_150i32 as u32));
    text.push_str(&long(103_000));
    text.push_str(&short(42));
    text.push_str(&short(87));
    text.push_str(&short(2731 + 200));
    text.push_str(&short(status));
    text.push_str(&short(afe_status));
    for cell in [3321, 3320, 3322, 3321] {
        text.push_str(&short(cell));
    }
    let mut bytes = text.into_bytes();
    bytes.push(TERMINATOR);
    bytes
}

fn coordinator(identities: &[&str]) -> (MockTransport, BatteryCoordinator<MockTransport>) {
    let transport = MockTransport::new();
    let mut coordinator =
        BatteryCoordinator::new(transport.clone(), PollerConfig::default()).unwrap();
    for identity in identities {
        coordinator.register_device(identity).unwrap();
    }
    (transport, coordinator)
}

fn current_handle(transport: &MockTransport) -> NotifyHandle {
    transport.subscription().expect("no active subscription")
}

#[test]
fn polls_every_battery_in_turn() {
    let (transport, mut coordinator) = coordinator(&["house", "starter"]);

    for _ in 0..2 {
        coordinator.tick();
        let handle = current_handle(&transport);
        let bytes = frame(0, 0);
        let (first, rest) = bytes.split_at(20);
        assert_eq!(coordinator.on_fragment(handle, first), FragmentOutcome::Pending);
        assert!(matches!(
            coordinator.on_fragment(handle, rest),
            FragmentOutcome::Decoded(_)
        ));
        assert_eq!(coordinator.session_state(), SessionState::Idle);
    }

    assert_eq!(transport.connect_log(), vec!["house", "starter"]);
    for battery in coordinator.batteries() {
        let telemetry = battery.telemetry().expect("telemetry stored");
        assert_eq!(telemetry.voltage_mv, 13_284);
        assert_eq!(telemetry.current_ma, -2_150);
        assert_eq!(telemetry.temperature_dc, 200);
        assert_eq!(telemetry.cells_mv, vec![3321, 3320, 3322, 3321]);
        assert!(!telemetry.flags.any());
    }

    // next cycle starts over with the first battery
    coordinator.tick();
    assert_eq!(transport.connected().as_deref(), Some("house"));
}

#[test]
fn flags_reach_the_record() {
    let (transport, mut coordinator) = coordinator(&["house"]);
    coordinator.tick();
    let handle = current_handle(&transport);
    let outcome = coordinator.on_fragment(handle, &frame(0x80 | 0x01, 0x20));
    assert_eq!(outcome, FragmentOutcome::Decoded(0));

    let flags = coordinator.telemetry(0).unwrap().flags;
    assert!(flags.cell_high_voltage);
    assert!(flags.high_temp_when_charge);
    assert!(flags.short_circuited);
    assert!(!flags.cell_low_voltage);
}

#[test]
fn failed_setup_requeues_and_moves_on() {
    let (transport, mut coordinator) = coordinator(&["house", "starter"]);
    transport.set_behavior(
        "house",
        MockBehavior {
            has_service: false,
            ..Default::default()
        },
    );

    coordinator.tick();
    assert!(coordinator.active().is_none());
    assert!(coordinator.queue().contains(0));

    coordinator.tick();
    assert_eq!(transport.connected().as_deref(), Some("starter"));
    assert_eq!(coordinator.active(), Some(1));
}

#[test]
fn lost_link_requeues_the_battery() {
    let (transport, mut coordinator) = coordinator(&["house", "starter"]);
    coordinator.tick();
    let stale = current_handle(&transport);
    transport.drop_link();

    coordinator.tick();
    assert_eq!(coordinator.active(), Some(1));
    assert!(coordinator.queue().contains(0));
    assert_eq!(coordinator.on_fragment(stale, &frame(0, 0)), FragmentOutcome::Stray);
}

#[test]
fn stray_fragments_are_ignored() {
    let (_transport, mut coordinator) = coordinator(&["house"]);
    assert_eq!(
        coordinator.on_fragment(NotifyHandle(0x42), b"1234"),
        FragmentOutcome::Stray
    );
    assert!(coordinator.batteries()[0].ring().is_empty());
}

#[test]
fn malformed_frame_keeps_old_telemetry() {
    let (transport, mut coordinator) = coordinator(&["house"]);
    coordinator.tick();
    let handle = current_handle(&transport);
    assert_eq!(
        coordinator.on_fragment(handle, &frame(0, 0)),
        FragmentOutcome::Decoded(0)
    );

    coordinator.tick();
    let handle = current_handle(&transport);
    match coordinator.on_fragment(handle, b"34ZZ\x87") {
        FragmentOutcome::Rejected(0, err) => assert_eq!(err.field, FrameField::Voltage),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(coordinator.telemetry(0).unwrap().voltage_mv, 13_284);
}

#[test]
fn overflow_requeues() {
    let transport = MockTransport::new();
    let config = PollerConfig {
        ring_capacity: 16,
        ..Default::default()
    };
    let mut coordinator = BatteryCoordinator::new(transport.clone(), config).unwrap();
    coordinator.register_device("house").unwrap();
    coordinator.tick();
    let handle = current_handle(&transport);

    assert_eq!(
        coordinator.on_fragment(handle, &[b'0'; 17]),
        FragmentOutcome::Overflow(0)
    );
    assert!(coordinator.queue().contains(0));
    assert!(transport.connected().is_none());
}

#[test]
fn registry_is_bounded() {
    let (_transport, mut coordinator) = coordinator(&[]);
    for n in 0..10 {
        coordinator.register_device(&format!("pack-{n}")).unwrap();
    }
    assert!(matches!(
        coordinator.register_device("one-too-many"),
        Err(Error::RegistryFull { capacity: 10 })
    ));
}

#[test]
fn reset_forgets_telemetry_but_keeps_identities() {
    let (transport, mut coordinator) = coordinator(&["house", "starter"]);
    coordinator.tick();
    let handle = current_handle(&transport);
    coordinator.on_fragment(handle, &frame(0, 0));

    coordinator.reset();
    assert!(coordinator.queue().is_empty());
    assert!(coordinator.batteries().iter().all(|b| b.telemetry().is_none()));
    assert_eq!(coordinator.batteries()[1].identity(), "starter");

    coordinator.tick();
    assert_eq!(transport.connected().as_deref(), Some("house"));
}
