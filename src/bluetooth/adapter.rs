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

//! BlueZ-backed platform: adapter queries and RFCOMM client sockets.

use anyhow::Result;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, Session};
use std::io;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device::{DeviceAddress, PairedDevice};
use super::error::ConnectError;
use super::platform::{Link, PlatformConnector};

/// Standard SPP UUID advertised by the feeder.
///
/// Only logged: links go straight to the configured RFCOMM channel instead of
/// resolving the service through an SDP lookup.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Default RFCOMM channel of the feeder's SPP service.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Access to the default Bluetooth adapter.
pub struct BluerPlatform {
    _session: Session,
    adapter: Option<Adapter>,
    rfcomm_channel: u8,
}

impl BluerPlatform {
    /// Open a BlueZ session and look up the default adapter.
    ///
    /// A missing adapter is not an error here; it shows up as
    /// [`is_available`](Self::is_available) returning `false`.
    pub async fn new(rfcomm_channel: u8) -> Result<Self> {
        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match session.default_adapter().await {
            Ok(adapter) => {
                info!("Using Bluetooth adapter: {}", adapter.name());
                Some(adapter)
            }
            Err(e) => {
                warn!("No Bluetooth adapter available: {}", e);
                None
            }
        };

        Ok(Self {
            _session: session,
            adapter,
            rfcomm_channel,
        })
    }

    /// Whether Bluetooth hardware is present.
    pub fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    /// Whether the adapter is powered on.
    pub async fn is_enabled(&self) -> bool {
        let Some(adapter) = &self.adapter else {
            return false;
        };
        match adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("Failed to query adapter power state: {}", e);
                false
            }
        }
    }

    /// Get paired devices, ordered by label.
    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>> {
        let Some(adapter) = &self.adapter else {
            warn!("Listing paired devices without an adapter");
            return Ok(Vec::new());
        };

        let mut devices = Vec::new();
        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.name().await.unwrap_or_default();
                debug!("Paired device: {:?} [{}]", name, addr);
                devices.push(PairedDevice {
                    name,
                    address: addr.into(),
                });
            }
        }

        devices.sort_by_key(|device| device.label());
        info!("Found {} paired devices", devices.len());
        Ok(devices)
    }
}

impl PlatformConnector for BluerPlatform {
    async fn connect(&self, address: DeviceAddress) -> Result<Link, ConnectError> {
        if self.adapter.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no Bluetooth adapter").into());
        }

        // Nothing here ever starts discovery, so there is no scan to cancel.
        let target = SocketAddr::new(address.into(), self.rfcomm_channel);
        info!(
            "Opening RFCOMM link to {} on channel {} (service {})",
            address, self.rfcomm_channel, SPP_UUID
        );

        match Stream::connect(target).await {
            Ok(stream) => Ok(Box::new(stream)),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Err(ConnectError::PermissionDenied(e.to_string()))
            }
            Err(e) => Err(ConnectError::Io(e)),
        }
    }
}
