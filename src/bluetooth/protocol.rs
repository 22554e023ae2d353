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

//! Feeder wire protocol.
//!
//! Every frame is one line of text terminated by `\n`. Outbound frames are
//! either a bare command token or a schedule snapshot such as
//! `{"schedules":["06:00","18:30"]}`.

use serde::{Deserialize, Serialize};

use super::error::LinkError;
use crate::schedule::{FeedTime, ScheduleEntry};

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Commands understood by the feeder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeederCommand {
    /// Run the servo once to check the mechanism.
    Test,
    /// Dispense a portion now.
    FeedNow,
    /// Ask the feeder for its stored schedule.
    GetSchedules,
    /// Any other token.
    Raw(String),
}

impl FeederCommand {
    /// Build a command from free text.
    ///
    /// Known tokens map to their variants; anything else becomes `Raw`.
    /// Tokens containing a newline would split the frame and are rejected.
    pub fn parse(token: &str) -> Result<Self, LinkError> {
        let token = token.trim();
        if token.is_empty() || token.contains(['\n', '\r']) {
            return Err(LinkError::InvalidCommand(token.to_string()));
        }

        Ok(match token {
            "TEST" => Self::Test,
            "FEED_NOW" => Self::FeedNow,
            "GET_SCHEDULES" => Self::GetSchedules,
            other => Self::Raw(other.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Test => "TEST",
            Self::FeedNow => "FEED_NOW",
            Self::GetSchedules => "GET_SCHEDULES",
            Self::Raw(token) => token,
        }
    }
}

/// The full schedule, sent in one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    schedules: Vec<FeedTime>,
}

impl ScheduleSnapshot {
    /// Snapshot of `entries` in ascending time order.
    pub fn from_entries(entries: &[ScheduleEntry]) -> Self {
        let mut schedules: Vec<FeedTime> = entries.iter().map(|e| e.time.clone()).collect();
        schedules.sort();
        Self { schedules }
    }

    pub fn times(&self) -> &[FeedTime] {
        &self.schedules
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Parse a schedule line as sent by either side.
    ///
    /// Accepts both the compact form and the spaced form the feeder uses when
    /// answering `GET_SCHEDULES`.
    pub fn decode(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Command(FeederCommand),
    Schedule(ScheduleSnapshot),
}

impl OutboundMessage {
    /// Short label for logs and error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Command(cmd) => format!("command {}", cmd.as_str()),
            Self::Schedule(_) => "schedule".to_string(),
        }
    }

    /// Serialize to wire bytes, newline included.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = match self {
            Self::Command(cmd) => cmd.as_str().as_bytes().to_vec(),
            // A Vec of validated HH:mm strings always serializes.
            Self::Schedule(snapshot) => serde_json::to_vec(snapshot).unwrap_or_default(),
        };
        frame.push(DELIMITER);
        frame
    }
}

/// Status lines sent by the feeder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceReply {
    /// Greeting after the feeder accepts the link.
    Connected,
    TestOk,
    TestFailed,
    FeedOk,
    FeedFailed,
    /// The feeder stored a new schedule with this many entries.
    SchedulesUpdated(usize),
    /// Answer to `GET_SCHEDULES`.
    Schedules(ScheduleSnapshot),
    UnknownCommand,
    JsonError,
    Error(String),
    Other(String),
}

impl DeviceReply {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "CONNECTED" => return Self::Connected,
            "TEST_OK" => return Self::TestOk,
            "TEST_FAILED" => return Self::TestFailed,
            "FEED_OK" => return Self::FeedOk,
            "FEED_FAILED" => return Self::FeedFailed,
            "UNKNOWN_COMMAND" => return Self::UnknownCommand,
            "JSON_ERROR" => return Self::JsonError,
            _ => {}
        }

        if let Some(count) = line.strip_prefix("SCHEDULES_UPDATED:") {
            if let Ok(count) = count.parse() {
                return Self::SchedulesUpdated(count);
            }
        }
        if let Some(message) = line.strip_prefix("ERROR:") {
            return Self::Error(message.to_string());
        }
        if line.starts_with('{') {
            if let Some(snapshot) = ScheduleSnapshot::decode(line) {
                return Self::Schedules(snapshot);
            }
        }

        Self::Other(line.to_string())
    }
}
