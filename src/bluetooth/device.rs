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

//! Device addresses and paired device records.

use std::fmt;
use std::str::FromStr;

use super::error::LinkError;

/// A validated Bluetooth MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Parse a manually entered address.
    ///
    /// Surrounding whitespace is ignored and lowercase hex is accepted, but
    /// the result must match `([0-9A-F]{2}:){5}[0-9A-F]{2}`.
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let normalized = input.trim().to_uppercase();
        let invalid = || LinkError::InvalidAddress(input.trim().to_string());

        let parts: Vec<&str> = normalized.split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self(octets))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl From<bluer::Address> for DeviceAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

impl From<DeviceAddress> for bluer::Address {
    fn from(addr: DeviceAddress) -> Self {
        bluer::Address::new(addr.0)
    }
}

/// A paired Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub name: Option<String>,
    pub address: DeviceAddress,
}

impl PairedDevice {
    /// Label for pickers: name and address, or just the address.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} [{}]", name, self.address),
            None => self.address.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_address() {
        let addr = DeviceAddress::parse("B8:27:EB:67:07:B9").unwrap();
        assert_eq!(addr.octets(), [0xB8, 0x27, 0xEB, 0x67, 0x07, 0xB9]);
        assert_eq!(addr.to_string(), "B8:27:EB:67:07:B9");
    }

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let addr: DeviceAddress = "  b8:27:eb:67:07:b9\n".parse().unwrap();
        assert_eq!(addr.to_string(), "B8:27:EB:67:07:B9");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "",
            "B8:27:EB:67:07",
            "B8:27:EB:67:07:B9:00",
            "B8-27-EB-67-07-B9",
            "B8:27:EB:67:07:G9",
            "B8:27:EB:67:7:B9",
            "B8:27:EB:67:007:B9",
            "+8:27:EB:67:07:B9",
        ] {
            assert!(
                matches!(DeviceAddress::parse(input), Err(LinkError::InvalidAddress(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_bluer_conversion() {
        let addr = DeviceAddress::parse("00:1A:7D:DA:71:13").unwrap();
        let bluer_addr: bluer::Address = addr.into();
        assert_eq!(DeviceAddress::from(bluer_addr), addr);
    }

    #[test]
    fn test_paired_device_label() {
        let address = DeviceAddress::parse("B8:27:EB:67:07:B9").unwrap();
        let named = PairedDevice {
            name: Some("FeederPi".to_string()),
            address,
        };
        assert_eq!(named.label(), "FeederPi [B8:27:EB:67:07:B9]");

        let anonymous = PairedDevice { name: None, address };
        assert_eq!(anonymous.label(), "B8:27:EB:67:07:B9");
    }
}
