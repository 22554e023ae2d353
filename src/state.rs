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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::DeviceAddress;

/// Connection status as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Feeder we are connected or connecting to.
    pub device: RwLock<Option<DeviceAddress>>,

    /// Last line received from the feeder.
    pub last_message: RwLock<Option<String>>,

    /// Last error reported by the link.
    pub last_error: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            device: RwLock::new(None),
            last_message: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self, device: DeviceAddress) {
        *self.connection_status.write() = ConnectionStatus::Connecting;
        *self.device.write() = Some(device);
    }

    /// Undo a `set_connecting` that did not start an attempt.
    ///
    /// Leaves the state alone if a link event has already replaced `Connecting`.
    pub fn cancel_connecting(&self, status: ConnectionStatus, device: Option<DeviceAddress>) {
        let mut current = self.connection_status.write();
        if *current == ConnectionStatus::Connecting {
            *current = status;
            *self.device.write() = device;
        }
    }

    pub fn set_connected(&self) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.last_error.write() = None;
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
    }

    /// Record an error; only a failed attempt changes the status.
    pub fn set_error(&self, message: String) {
        {
            let mut status = self.connection_status.write();
            if *status == ConnectionStatus::Connecting {
                *status = ConnectionStatus::Error;
            }
        }
        *self.last_error.write() = Some(message);
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_device(&self) -> Option<DeviceAddress> {
        *self.device.read()
    }

    pub fn set_last_message(&self, text: String) {
        *self.last_message.write() = Some(text);
    }

    pub fn get_last_message(&self) -> Option<String> {
        self.last_message.read().clone()
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// One-line summary for the console.
    pub fn summary(&self) -> String {
        let status = self.get_status();
        match (status, self.get_device()) {
            (ConnectionStatus::Disconnected, _) | (_, None) => status.as_str().to_string(),
            (_, Some(device)) => format!("{} ({})", status.as_str(), device),
        }
    }
}
