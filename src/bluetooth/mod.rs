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

//! Bluetooth communication module.
//!
//! Handles the RFCOMM client link to the feeder.

mod adapter;
mod connection;
mod device;
mod error;
mod platform;
pub mod protocol;
mod reassembler;

pub use adapter::{BluerPlatform, DEFAULT_RFCOMM_CHANNEL, SPP_UUID};
pub use connection::{
    ConnectRequest, ConnectionEvent, ConnectionManager, ConnectionState, LinkConfig,
};
pub use device::{DeviceAddress, PairedDevice};
pub use error::{ConnectError, LinkError};
pub use platform::{Link, LinkStream, PlatformConnector};
pub use protocol::{DeviceReply, FeederCommand, OutboundMessage, ScheduleSnapshot};
pub use reassembler::{LineReassembler, MAX_LINE_LEN};
