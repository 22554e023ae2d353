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

//! Reassembly of the RFCOMM byte stream into text lines.

use tracing::{debug, warn};

use super::protocol::DELIMITER;

/// Longest line kept while waiting for its delimiter.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Splits an unframed byte stream into newline-terminated messages.
///
/// Reads may end anywhere, including inside a multi-byte character; the
/// unterminated tail is carried over to the next call.
pub struct LineReassembler {
    buffer: Vec<u8>,
}

impl LineReassembler {
    /// Create a new line reassembler.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Process one read's worth of bytes.
    ///
    /// Returns every line completed by `data`, without the delimiter.
    /// Empty lines are returned as empty strings.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for segment in data.split_inclusive(|&b| b == DELIMITER) {
            match segment.split_last() {
                Some((&DELIMITER, body)) => {
                    self.buffer.extend_from_slice(body);
                    lines.push(String::from_utf8_lossy(&self.buffer).into_owned());
                    self.buffer.clear();
                }
                _ => self.buffer.extend_from_slice(segment),
            }
        }

        if self.buffer.len() > MAX_LINE_LEN {
            warn!(
                "Discarding {} bytes without a line delimiter",
                self.buffer.len()
            );
            self.reset();
        }

        if !lines.is_empty() {
            debug!("Reassembled {} lines, {} bytes pending", lines.len(), self.buffer.len());
        }

        lines
    }

    /// Drop any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}
