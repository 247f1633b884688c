use std::collections::HashMap;
use std::future::Future;
use btleplug::api::{Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::stream::{self, BoxStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::connection::ConnectionConfig;
use crate::device::constants::{CONNECT_DEADLINE, DISCONNECT_DEADLINE, EVENT_CHANNEL_SIZE, SCAN_RETRY_DELAY, WRITE_DEADLINE};
use crate::device::types::{AdapterState, Device, DeviceId, PlatformCommand, PlatformEvent, SessionId};
use crate::error::DeviceError;
use crate::reading::classifier::ClassifierMode;
use crate::session::{Session, SessionControl, SessionSnapshot};

/// A running device session, driven by btleplug on a tokio task.
pub struct SessionHandle {
    control: Sender<SessionControl>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<Result<(), DeviceError>>,
}

impl SessionHandle {
    pub async fn request(&mut self, control: SessionControl) -> Result<(), DeviceError> {
        self.control.send(control).await?;
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub async fn join(self) -> Result<(), DeviceError> {
        self.task.await.expect("Failed to join device session task")
    }
}

pub fn spawn_session(config: ConnectionConfig, mode: ClassifierMode, cancel: CancellationToken) -> SessionHandle {
    let session = Session::new(config, mode);
    let snapshot = session.subscribe();
    let (control, control_receiver) = channel::<SessionControl>(8);
    let task = spawn(run_session(session, control_receiver, cancel));

    SessionHandle { control, snapshot, task }
}

struct Link {
    session: SessionId,
    peripheral: Peripheral,
    cancel: CancellationToken,
}

struct BtleDriver {
    adapter: Option<Adapter>,
    // last power state reported by the adapter itself
    powered: bool,
    peripherals: HashMap<DeviceId, Peripheral>,
    link: Option<Link>,
    events: Sender<PlatformEvent>,
}

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId(format!("{:?}", id))
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff | CentralState::Unknown => AdapterState::PoweredOff,
    }
}

async fn with_deadline<T, F>(what: &str, deadline: u64, fut: F) -> Result<T, String>
    where F: Future<Output = btleplug::Result<T>>
{
    tokio::select! {
        _ = sleep(Duration::from_millis(deadline)) => Err(format!("{} took too long", what)),
        result = fut => result.map_err(|err| err.to_string()),
    }
}

async fn forward(events: &mut Sender<PlatformEvent>, event: PlatformEvent) {
    if let Err(err) = events.send(event).await {
        debug!("Session loop stopped before receiving a platform event: {}", err);
    }
}

impl BtleDriver {
    fn linked(&self, session: SessionId) -> Option<(Peripheral, CancellationToken)> {
        match &self.link {
            Some(link) if link.session == session => Some((link.peripheral.clone(), link.cancel.clone())),
            _ => {
                debug!("Dropping request for released session {:?}", session);
                None
            },
        }
    }

    async fn execute(&mut self, session: &mut Session) {
        while let Some(command) = session.poll_command() {
            if let Some(event) = self.run_command(command).await {
                session.handle_event(event);
            }
        }
    }

    // Quick requests complete inline and return their event; the others
    // report back through `self.events`.
    async fn run_command(&mut self, command: PlatformCommand) -> Option<PlatformEvent> {
        match command {
            PlatformCommand::StartScan => self.start_scan().await,
            PlatformCommand::StopScan => {
                if let Some(adapter) = &self.adapter {
                    if let Err(err) = adapter.stop_scan().await {
                        warn!("Failed to stop scanning: {:?}", err);
                    }
                }
                None
            },
            PlatformCommand::Connect { session, device } => {
                let Some(peripheral) = self.peripherals.get(&device).cloned() else {
                    return Some(PlatformEvent::ConnectFailed {
                        session,
                        reason: format!("peripheral {} is no longer known", device),
                    });
                };

                let cancel = CancellationToken::new();
                self.link = Some(Link { session, peripheral: peripheral.clone(), cancel: cancel.clone() });
                connect_task(cancel, peripheral, session, self.events.clone());
                None
            },
            PlatformCommand::DiscoverServices { session, services } => {
                let (peripheral, cancel) = self.linked(session)?;
                discover_services_task(cancel, peripheral, session, services, self.events.clone());
                None
            },
            PlatformCommand::DiscoverCharacteristics { session, service } => {
                let (peripheral, _) = self.linked(session)?;
                let found = peripheral.services().into_iter().find(|s| s.uuid == service);

                Some(match found {
                    Some(found) => PlatformEvent::CharacteristicsDiscovered {
                        session,
                        service,
                        characteristics: found.characteristics.into_iter().collect(),
                    },
                    None => PlatformEvent::CharacteristicDiscoveryFailed {
                        session,
                        service,
                        reason: "service disappeared".to_string(),
                    },
                })
            },
            PlatformCommand::Subscribe { session, characteristic } => {
                let (peripheral, cancel) = self.linked(session)?;
                read_notifications_task(cancel, peripheral, characteristic, session, self.events.clone());
                None
            },
            PlatformCommand::Write { session, characteristic, data } => {
                let (peripheral, _) = self.linked(session)?;
                write_task(peripheral, characteristic, data, session, self.events.clone());
                None
            },
            PlatformCommand::CancelConnection { session } => {
                match self.link.take() {
                    Some(link) if link.session == session => {
                        link.cancel.cancel();
                        disconnect_task(link.peripheral, session, self.events.clone());
                        None
                    },
                    other => {
                        // nothing to close, confirm right away
                        self.link = other;
                        Some(PlatformEvent::Disconnected { session })
                    },
                }
            },
        }
    }

    async fn start_scan(&mut self) -> Option<PlatformEvent> {
        let Some(adapter) = &self.adapter else {
            return Some(PlatformEvent::AdapterStateChanged(AdapterState::PoweredOff));
        };

        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        self.peripherals.clear();

        match adapter.start_scan(ScanFilter::default()).await {
            Ok(()) => None,
            Err(btleplug::Error::PermissionDenied) => {
                warn!("Scanning failed: permission denied");
                Some(PlatformEvent::AdapterStateChanged(AdapterState::Unauthorized))
            },
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                Some(PlatformEvent::AdapterStateChanged(AdapterState::PoweredOff))
            },
        }
    }

    async fn translate(&mut self, event: CentralEvent) -> Option<PlatformEvent> {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let adapter = self.adapter.as_ref()?;
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(peripheral) => peripheral,
                    Err(err) => {
                        warn!("Failed to look up peripheral {:?}: {}", id, err);
                        return None;
                    },
                };

                let properties = match peripheral.properties().await {
                    Ok(Some(properties)) => properties,
                    Ok(None) => {
                        debug!("Peripheral has no properties");
                        return None;
                    },
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                        return None;
                    },
                };

                let device = Device {
                    id: device_id(&id),
                    name: properties.local_name.unwrap_or_default(),
                    // i16::MIN when the platform did not report a signal strength
                    rssi: properties.rssi.unwrap_or(i16::MIN),
                    services: properties.services,
                };
                self.peripherals.insert(device.id.clone(), peripheral);
                Some(PlatformEvent::Discovered(device))
            },
            CentralEvent::StateUpdate(state) => {
                let state = adapter_state(state);
                info!("Adapter is now {:?}", state);
                self.powered = state == AdapterState::PoweredOn;
                Some(PlatformEvent::AdapterStateChanged(state))
            },
            CentralEvent::DeviceDisconnected(id) => {
                let linked = self.link.as_ref().is_some_and(|link| link.peripheral.id() == id);
                if !linked {
                    return None;
                }

                let link = self.link.take()?;
                warn!("Peripheral {:?} dropped the connection", id);
                link.cancel.cancel();
                Some(PlatformEvent::Disconnected { session: link.session })
            },
            _ => None,
        }
    }

    async fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
            if let Err(err) = link.peripheral.disconnect().await {
                warn!("Failed to disconnect on shutdown: {:?}", err);
            }
        }

        if let Some(adapter) = &self.adapter {
            if let Err(err) = adapter.stop_scan().await {
                debug!("Failed to stop scanning on shutdown: {:?}", err);
            }
        }
    }
}

fn connect_task(cancel: CancellationToken, peripheral: Peripheral, session: SessionId, mut events: Sender<PlatformEvent>) {
    spawn(async move {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            result = with_deadline("connecting", CONNECT_DEADLINE, peripheral.connect()) => match result {
                Ok(()) => PlatformEvent::Connected { session },
                Err(reason) => PlatformEvent::ConnectFailed { session, reason },
            },
        };

        forward(&mut events, event).await;
    });
}

fn discover_services_task(cancel: CancellationToken, peripheral: Peripheral, session: SessionId, services: Vec<Uuid>, mut events: Sender<PlatformEvent>) {
    spawn(async move {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            result = peripheral.discover_services() => match result {
                Ok(()) => PlatformEvent::ServicesDiscovered {
                    session,
                    services: peripheral.services()
                        .into_iter()
                        .map(|service| service.uuid)
                        .filter(|uuid| services.contains(uuid))
                        .collect(),
                },
                Err(err) => PlatformEvent::ServiceDiscoveryFailed { session, reason: err.to_string() },
            },
        };

        forward(&mut events, event).await;
    });
}

fn read_notifications_task(cancel: CancellationToken, peripheral: Peripheral, characteristic: Characteristic, session: SessionId, mut events: Sender<PlatformEvent>) {
    spawn(async move {
        // obtain the stream before subscribing so that no early notification is missed
        let mut notification_stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                forward(&mut events, PlatformEvent::SubscribeFailed { session, reason: err.to_string() }).await;
                return;
            },
        };

        if let Err(err) = peripheral.subscribe(&characteristic).await {
            forward(&mut events, PlatformEvent::SubscribeFailed { session, reason: err.to_string() }).await;
            return;
        }
        forward(&mut events, PlatformEvent::Subscribed { session }).await;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    Some(data) => {
                        if data.uuid.eq(&characteristic.uuid) {
                            forward(&mut events, PlatformEvent::Notification { session, value: data.value }).await;
                        }
                    },
                    None => {
                        debug!("Notification stream ended");
                        break 'mainloop;
                    },
                },
            }
        }
    });
}

fn write_task(peripheral: Peripheral, characteristic: Characteristic, data: Vec<u8>, session: SessionId, mut events: Sender<PlatformEvent>) {
    spawn(async move {
        let fut = peripheral.write(&characteristic, &data, WriteType::WithResponse);
        let result = with_deadline("sending to data characteristic", WRITE_DEADLINE, fut).await;

        forward(&mut events, PlatformEvent::WriteCompleted { session, result }).await;
    });
}

fn disconnect_task(peripheral: Peripheral, session: SessionId, mut events: Sender<PlatformEvent>) {
    spawn(async move {
        if let Err(reason) = with_deadline("disconnecting", DISCONNECT_DEADLINE, peripheral.disconnect()).await {
            warn!("Failed to disconnect: {}", reason);
        }

        forward(&mut events, PlatformEvent::Disconnected { session }).await;
    });
}

async fn run_session(mut session: Session, mut controls: Receiver<SessionControl>, cancel: CancellationToken) -> Result<(), DeviceError> {
    let manager = Manager::new().await?;
    let adapter = manager.adapters().await?.into_iter().next();
    let (event_sender, mut event_receiver) = channel::<PlatformEvent>(EVENT_CHANNEL_SIZE);

    let mut central_events: BoxStream<'static, CentralEvent> = match &adapter {
        Some(adapter) => adapter.events().await?,
        None => {
            warn!("No bluetooth adapter available");
            stream::pending().boxed()
        },
    };

    let initial_state = match &adapter {
        Some(adapter) => match adapter.adapter_state().await {
            Ok(state) => adapter_state(state),
            Err(err) => {
                warn!("Failed to query adapter state, assuming powered on: {:?}", err);
                AdapterState::PoweredOn
            },
        },
        None => AdapterState::PoweredOff,
    };
    let mut driver = BtleDriver {
        adapter,
        powered: initial_state == AdapterState::PoweredOn,
        peripherals: HashMap::new(),
        link: None,
        events: event_sender,
    };
    session.handle_event(PlatformEvent::AdapterStateChanged(initial_state));

    'mainloop: loop {
        driver.execute(&mut session).await;
        // the adapter is on but refused to scan
        let retry_scan = driver.powered && !session.manager().scanner().is_adapter_ready();

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            _ = sleep(Duration::from_millis(SCAN_RETRY_DELAY)), if retry_scan => {
                debug!("Retrying to scan");
                session.handle_event(PlatformEvent::AdapterStateChanged(AdapterState::PoweredOn));
            },
            Some(event) = central_events.next() => {
                if let Some(event) = driver.translate(event).await {
                    session.handle_event(event);
                }
            },
            Some(event) = event_receiver.next() => {
                session.handle_event(event);
            },
            Some(control) = controls.next() => {
                // failures are logged and published in the snapshot
                if let Err(err) = session.control(control) {
                    debug!("Control request rejected: {}", err);
                }
            },
            else => {
                break 'mainloop;
            },
        }
    }

    info!("Stopping device session");
    driver.shutdown().await;
    Ok(())
}
