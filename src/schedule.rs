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

//! Feeding schedule entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from schedule validation and storage.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid time {0:?}, expected HH:mm")]
    InvalidTime(String),

    #[error("No schedule entry with id {0}")]
    NotFound(i64),

    #[error("Schedule entry has not been stored yet")]
    MissingId,

    #[error("Schedule storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// A zero-padded 24h `HH:mm` feeding time.
///
/// Lexicographic order equals chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedTime(String);

impl FeedTime {
    /// Validate against `([01]\d|2[0-3]):[0-5]\d`.
    pub fn parse(input: &str) -> Result<Self, ScheduleError> {
        let time = input.trim();
        let valid = match time.as_bytes() {
            [h1, h2, b':', m1, m2] => {
                let hour_ok = match h1 {
                    b'0' | b'1' => h2.is_ascii_digit(),
                    b'2' => (b'0'..=b'3').contains(h2),
                    _ => false,
                };
                hour_ok && (b'0'..=b'5').contains(m1) && m2.is_ascii_digit()
            }
            _ => false,
        };

        if valid {
            Ok(Self(time.to_string()))
        } else {
            Err(ScheduleError::InvalidTime(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FeedTime {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FeedTime {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FeedTime> for String {
    fn from(time: FeedTime) -> Self {
        time.0
    }
}

impl fmt::Display for FeedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One stored feeding time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Assigned by the store; `None` until inserted.
    pub id: Option<i64>,
    pub time: FeedTime,
}

impl ScheduleEntry {
    pub fn new(time: FeedTime) -> Self {
        Self { id: None, time }
    }

    pub fn with_id(id: i64, time: FeedTime) -> Self {
        Self { id: Some(id), time }
    }
}
