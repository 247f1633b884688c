use std::collections::BTreeSet;
use btleplug::api::{CharPropFlags, Characteristic};
use uuid::Uuid;

use insole_link::device::connection::ConnectionConfig;
use insole_link::device::constants::make_insole_service_uuid;
use insole_link::device::types::{AdapterState, ConnectionState, Device, DeviceId, PlatformCommand, PlatformEvent, SessionId};
use insole_link::reading::classifier::{classify_magnitude, ClassifierMode};
use insole_link::reading::types::{Rgb, Severity, Zone};
use insole_link::session::{Session, SessionControl};

const FULL: &[u8] = br#"{"heel":"40","big_toe":"65","arch":"12","ball":"300","sole":"180","pitch":"3","roll":"-2"}"#;
const NO_ROLL: &[u8] = br#"{"heel":"99","big_toe":"99","arch":"99","ball":"99","sole":"99","pitch":"99"}"#;

fn insole(id: &str, rssi: i16) -> Device {
    Device {
        id: DeviceId::from(id),
        name: format!("GaitInsole {}", id),
        rssi,
        services: vec![make_insole_service_uuid()],
    }
}

fn notify_characteristic(uuid: u128) -> Characteristic {
    Characteristic {
        uuid: Uuid::from_u128(uuid),
        service_uuid: make_insole_service_uuid(),
        properties: CharPropFlags::NOTIFY | CharPropFlags::WRITE,
        descriptors: BTreeSet::new(),
    }
}

fn commands(session: &mut Session) -> Vec<PlatformCommand> {
    std::iter::from_fn(|| session.poll_command()).collect()
}

fn scanning() -> Session {
    let mut session = Session::new(ConnectionConfig::default(), ClassifierMode::Gradient);
    session.handle_event(PlatformEvent::AdapterStateChanged(AdapterState::PoweredOn));
    assert_eq!(commands(&mut session), vec![PlatformCommand::StartScan]);
    session
}

fn connect(session: &mut Session, id: &str) -> SessionId {
    session.control(SessionControl::Connect(DeviceId::from(id))).unwrap();

    let issued = commands(session);
    assert!(issued.contains(&PlatformCommand::StopScan));
    issued.into_iter()
        .find_map(|command| match command {
            PlatformCommand::Connect { session, .. } => Some(session),
            _ => None,
        })
        .unwrap()
}

fn bring_up(session: &mut Session, id: SessionId) {
    let service = make_insole_service_uuid();

    session.handle_event(PlatformEvent::Connected { session: id });
    assert_eq!(commands(session), vec![PlatformCommand::DiscoverServices { session: id, services: vec![service] }]);

    session.handle_event(PlatformEvent::ServicesDiscovered { session: id, services: vec![service] });
    assert_eq!(commands(session), vec![PlatformCommand::DiscoverCharacteristics { session: id, service }]);

    session.handle_event(PlatformEvent::CharacteristicsDiscovered {
        session: id,
        service,
        characteristics: vec![notify_characteristic(0x0f8a4b62_2f6a_4c59_a8c5_6b9e1d3c2a10)],
    });
    assert!(matches!(
        commands(session).as_slice(),
        [PlatformCommand::Subscribe { session, .. }] if *session == id
    ));
    assert_eq!(session.snapshot().state, ConnectionState::Subscribing);

    session.handle_event(PlatformEvent::Subscribed { session: id });
}

#[test]
fn rediscovered_insole_is_listed_once() {
    let mut session = scanning();

    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));
    session.handle_event(PlatformEvent::Discovered(insole("left", -40)));
    session.handle_event(PlatformEvent::Discovered(insole("right", -70)));
    session.handle_event(PlatformEvent::Discovered(Device {
        id: DeviceId::from("watch"),
        name: "Fitness Watch".to_string(),
        rssi: -30,
        services: vec![],
    }));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Scanning);
    assert_eq!(
        snapshot.devices.iter().map(|d| (d.id.0.as_str(), d.rssi)).collect::<Vec<_>>(),
        vec![("left", -60), ("right", -70)],
    );
}

#[test]
fn connects_and_classifies_notifications() {
    let mut session = scanning();
    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));

    let id = connect(&mut session, "left");
    bring_up(&mut session, id);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.active_device.map(|d| d.id), Some(DeviceId::from("left")));

    session.handle_event(PlatformEvent::Notification { session: id, value: FULL.to_vec() });

    let reading = session.reading().unwrap();
    assert_eq!(reading.ball, "300");
    assert_eq!(reading.roll, "-2");

    let ball = session.zone(Zone::Ball).unwrap();
    assert_eq!((ball.magnitude, ball.color, ball.severity), (300, Rgb::new(1.0, 0.0, 0.0), Severity::Critical));

    let big_toe = session.zone(Zone::BigToe).unwrap();
    assert_eq!((big_toe.color, big_toe.severity), (Rgb::new(0.0, 1.0, 0.0), Severity::Low));

    let roll = session.zone(Zone::Roll).unwrap();
    assert_eq!((roll.magnitude, roll.color), (0, Rgb::new(0.0, 0.0, 1.0)));

    assert_eq!(session.zone(Zone::Sole).unwrap().severity, Severity::Elevated);
    assert_eq!(session.snapshot().zones.len(), Zone::ALL.len());
}

#[test]
fn incomplete_payload_keeps_the_previous_reading() {
    let mut session = scanning();
    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));
    let id = connect(&mut session, "left");
    bring_up(&mut session, id);

    session.handle_event(PlatformEvent::Notification { session: id, value: FULL.to_vec() });
    let before = session.snapshot();

    session.handle_event(PlatformEvent::Notification { session: id, value: NO_ROLL.to_vec() });
    session.handle_event(PlatformEvent::Notification { session: id, value: b"\xff\xfe".to_vec() });

    assert_eq!(session.snapshot(), before);
    assert_eq!(session.manager().state(), ConnectionState::Connected);
}

#[test]
fn outbound_text_goes_to_the_data_channel() {
    let mut session = scanning();
    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));

    session.control(SessionControl::Send("calibrate".to_string())).unwrap();
    assert!(commands(&mut session).is_empty());

    let id = connect(&mut session, "left");
    bring_up(&mut session, id);

    session.control(SessionControl::Send("calibrate".to_string())).unwrap();
    match commands(&mut session).as_slice() {
        [PlatformCommand::Write { session, characteristic, data }] => {
            assert_eq!(*session, id);
            assert_eq!(characteristic.uuid, Uuid::from_u128(0x0f8a4b62_2f6a_4c59_a8c5_6b9e1d3c2a10));
            assert_eq!(data.as_slice(), b"calibrate");
        },
        other => panic!("unexpected commands {:?}", other),
    }
}

#[test]
fn disconnect_rescans_after_the_link_closes() {
    let mut session = scanning();
    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));
    let id = connect(&mut session, "left");
    bring_up(&mut session, id);

    session.control(SessionControl::Disconnect).unwrap();
    assert_eq!(commands(&mut session), vec![PlatformCommand::CancelConnection { session: id }]);
    assert_eq!(session.snapshot().state, ConnectionState::Idle);
    assert_eq!(session.snapshot().active_device, None);

    // late data from the released link is dropped
    session.handle_event(PlatformEvent::Notification { session: id, value: FULL.to_vec() });
    assert!(session.reading().is_none());

    session.handle_event(PlatformEvent::Disconnected { session: id });
    assert_eq!(commands(&mut session), vec![PlatformCommand::StartScan]);
    assert_eq!(session.snapshot().state, ConnectionState::Scanning);
}

#[test]
fn missing_service_fails_back_to_idle() {
    let mut session = scanning();
    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));
    let id = connect(&mut session, "left");

    session.handle_event(PlatformEvent::Connected { session: id });
    commands(&mut session);
    session.handle_event(PlatformEvent::ServicesDiscovered { session: id, services: vec![] });

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Idle);
    assert!(snapshot.last_error.unwrap().contains("not found"));
    assert_eq!(commands(&mut session), vec![PlatformCommand::CancelConnection { session: id }]);
}

#[test]
fn fall_flag_is_independent_of_readings() {
    let mut session = scanning();
    let mut updates = session.subscribe();

    session.control(SessionControl::SetFall(true)).unwrap();
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().fall);

    session.control(SessionControl::SetFall(true)).unwrap();
    assert!(!updates.has_changed().unwrap());

    session.control(SessionControl::SetFall(false)).unwrap();
    assert!(!session.fall());
}

#[test]
fn classification_matches_reference_points() {
    assert_eq!(classify_magnitude("65", ClassifierMode::Gradient).unwrap(), (65, Rgb::new(0.0, 1.0, 0.0)));
    assert_eq!(classify_magnitude("300", ClassifierMode::Gradient).unwrap(), (300, Rgb::new(1.0, 0.0, 0.0)));
    assert_eq!(classify_magnitude("150", ClassifierMode::Coarse).unwrap(), (150, Rgb::new(1.0, 1.0, 0.0)));
    assert!(classify_magnitude("heavy", ClassifierMode::Gradient).is_err());
}

#[test]
fn adapter_power_cycle_clears_and_restarts_discovery() {
    let mut session = scanning();
    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));
    assert_eq!(session.snapshot().devices.len(), 1);

    session.handle_event(PlatformEvent::AdapterStateChanged(AdapterState::PoweredOff));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Idle);
    assert!(snapshot.devices.is_empty());
    assert!(commands(&mut session).is_empty());

    // stray advertisements while the radio is off are ignored
    session.handle_event(PlatformEvent::Discovered(insole("left", -60)));
    assert!(session.snapshot().devices.is_empty());

    session.handle_event(PlatformEvent::AdapterStateChanged(AdapterState::PoweredOn));
    assert_eq!(commands(&mut session), vec![PlatformCommand::StartScan]);
    assert_eq!(session.snapshot().state, ConnectionState::Scanning);
}

#[test]
fn rejected_refresh_is_published() {
    let mut session = Session::new(ConnectionConfig::default(), ClassifierMode::Gradient);
    session.handle_event(PlatformEvent::AdapterStateChanged(AdapterState::Unauthorized));

    assert!(session.control(SessionControl::Refresh).is_err());
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Idle);
    assert!(snapshot.last_error.is_some());
}
