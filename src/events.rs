// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event processing and observer dispatch.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bluetooth::{
    ConnectRequest, ConnectionEvent, ConnectionManager, ConnectionState, DeviceAddress,
    DeviceReply, LinkError, PlatformConnector,
};
use crate::state::AppState;
use crate::storage::ScheduleStore;

/// Consumer of link events.
///
/// Callbacks run one at a time on the dispatcher task, so implementations
/// need no locking of their own. They may call back into the
/// [`ConnectionManager`], including `disconnect()`.
pub trait ConnectionObserver: Send + 'static {
    fn connected(&mut self);
    fn disconnected(&mut self);
    fn error(&mut self, error: &LinkError);
    fn message(&mut self, text: &str);
}

/// Route one event to the matching callback.
pub fn dispatch<O: ConnectionObserver + ?Sized>(observer: &mut O, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Connected => observer.connected(),
        ConnectionEvent::Disconnected => observer.disconnected(),
        ConnectionEvent::Error(e) => observer.error(&e),
        ConnectionEvent::Message(text) => observer.message(&text),
    }
}

/// Drain `events` into `observer` on a dedicated task.
///
/// The task ends when every sender is gone and hands the observer back.
pub fn spawn_dispatcher<O: ConnectionObserver>(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    mut observer: O,
) -> JoinHandle<O> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            dispatch(&mut observer, event);
        }
        debug!("Event channel closed, dispatcher stopping");
        observer
    })
}

/// Send the stored schedule to the feeder.
///
/// Returns the number of entries sent.
pub fn sync_schedule<P: PlatformConnector>(
    manager: &ConnectionManager<P>,
    store: &dyn ScheduleStore,
) -> Result<usize> {
    let entries = store.list()?;
    manager.send_schedule(&entries)?;
    info!("Schedule sync queued: {} entries", entries.len());
    Ok(entries.len())
}

/// Start connecting to `address` and show it as `Connecting`.
///
/// The status is set before the attempt is spawned, so the attempt's own
/// `Connected` or `Error` always lands after it.
pub fn start_connect<P: PlatformConnector>(
    manager: &ConnectionManager<P>,
    state: &AppState,
    address: DeviceAddress,
) -> ConnectRequest {
    let current = manager.state();
    if current != ConnectionState::Idle {
        return ConnectRequest::AlreadyActive(current);
    }

    let previous = (state.get_status(), state.get_device());
    state.set_connecting(address);

    let request = manager.connect(address);
    if let ConnectRequest::AlreadyActive(_) = request {
        state.cancel_connecting(previous.0, previous.1);
    }
    request
}

/// Application-side handling of link events.
pub struct EventProcessor<P> {
    manager: ConnectionManager<P>,
    store: Arc<dyn ScheduleStore>,
    state: Arc<AppState>,
    sync_on_connect: bool,
}

impl<P: PlatformConnector> EventProcessor<P> {
    /// Create a new event processor.
    pub fn new(
        manager: ConnectionManager<P>,
        store: Arc<dyn ScheduleStore>,
        state: Arc<AppState>,
    ) -> Self {
        Self {
            manager,
            store,
            state,
            sync_on_connect: true,
        }
    }

    /// Enable or disable pushing the schedule after connecting.
    pub fn with_sync_on_connect(mut self, enabled: bool) -> Self {
        self.sync_on_connect = enabled;
        self
    }

    fn handle_reply(&self, reply: DeviceReply) {
        match reply {
            DeviceReply::Connected => info!("Feeder greeted us"),
            DeviceReply::TestOk => info!("Servo test passed"),
            DeviceReply::TestFailed => warn!("Servo test failed"),
            DeviceReply::FeedOk => info!("Feeding done"),
            DeviceReply::FeedFailed => warn!("Feeding failed"),
            DeviceReply::SchedulesUpdated(count) => {
                info!("Feeder stored {} feeding times", count)
            }
            DeviceReply::Schedules(snapshot) => {
                let times: Vec<&str> = snapshot.times().iter().map(|t| t.as_str()).collect();
                info!("Feeder schedule: [{}]", times.join(", "));
            }
            DeviceReply::UnknownCommand => warn!("Feeder did not recognise the command"),
            DeviceReply::JsonError => warn!("Feeder could not parse the schedule"),
            DeviceReply::Error(message) => error!("Feeder error: {}", message),
            DeviceReply::Other(text) => info!("Feeder: {}", text),
        }
    }
}

impl<P: PlatformConnector> ConnectionObserver for EventProcessor<P> {
    fn connected(&mut self) {
        info!("Feeder connected");
        self.state.set_connected();

        if self.sync_on_connect {
            if let Err(e) = sync_schedule(&self.manager, self.store.as_ref()) {
                error!("Failed to sync schedule: {}", e);
            }
        }
    }

    fn disconnected(&mut self) {
        info!("Feeder disconnected");
        self.state.set_disconnected();
    }

    fn error(&mut self, error: &LinkError) {
        error!("Connection error: {}", error);
        self.state.set_error(error.to_string());
    }

    fn message(&mut self, text: &str) {
        self.state.set_last_message(text.to_string());
        self.handle_reply(DeviceReply::parse(text));
    }
}
