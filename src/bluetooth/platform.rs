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

//! Seam between the connection manager and the Bluetooth stack.

use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

use super::device::DeviceAddress;
use super::error::ConnectError;

/// A bidirectional byte stream to the feeder.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An established link, owned by whoever holds the box.
pub type Link = Box<dyn LinkStream>;

/// Opens links to remote devices.
///
/// Injected into [`ConnectionManager`](super::ConnectionManager) so tests can
/// substitute an in-memory stream for the radio.
pub trait PlatformConnector: Send + Sync + 'static {
    /// Resolve `address` into an open link.
    ///
    /// May block for as long as the underlying stack does; the manager bounds
    /// it with its own timeout and may drop the future to cancel it.
    fn connect(
        &self,
        address: DeviceAddress,
    ) -> impl Future<Output = Result<Link, ConnectError>> + Send;
}
