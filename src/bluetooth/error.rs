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

//! Error kinds surfaced by the feeder link.

use std::io;
use thiserror::Error;

/// Failures reported to the caller or the observer.
///
/// Raw I/O errors never escape the link; they are translated into one of
/// these kinds at the point where they occur.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The platform refused access to Bluetooth.
    #[error("Bluetooth permission denied ({0}). Allow Bluetooth access for this user and try again")]
    PermissionDenied(String),

    /// The handshake with the feeder failed.
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    /// The link dropped while connected.
    #[error("Connection lost: {0}")]
    UnexpectedLinkLoss(String),

    /// A write to a live link failed.
    #[error("Failed to send {what}: {cause}")]
    SendFailed { what: String, cause: String },

    /// Input is not a `XX:XX:XX:XX:XX:XX` MAC address.
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    /// A command token that cannot be framed on the wire.
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    /// A send was attempted without a connected link.
    #[error("Not connected to the feeder")]
    NotConnected,

    /// The writer queue is saturated.
    #[error("Send queue is full, try again")]
    QueueFull,
}

/// Failure returned by a [`PlatformConnector`](super::PlatformConnector).
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ConnectError> for LinkError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::PermissionDenied(cause) => LinkError::PermissionDenied(cause),
            ConnectError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                LinkError::PermissionDenied(e.to_string())
            }
            ConnectError::Io(e) => LinkError::ConnectFailed(e.to_string()),
        }
    }
}
