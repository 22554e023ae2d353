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

//! Line-oriented console front end.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bluetooth::DeviceAddress;
use crate::schedule::FeedTime;

pub const HELP: &str = "\
Commands:
  devices            list paired devices
  connect [ADDR]     connect to ADDR or the configured feeder
  disconnect         close the link
  test               run the servo test
  feed               feed now
  query              ask the feeder for its stored schedule
  sync               push the local schedule to the feeder
  list               show local feeding times
  add HH:MM          add a feeding time
  edit ID HH:MM      change a feeding time
  remove ID          delete a feeding time
  send TOKEN         send a raw command token
  status             show connection status
  help               show this text
  quit               exit";

/// Actions that can be triggered from the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    ListDevices,
    Connect(Option<DeviceAddress>),
    Disconnect,
    Test,
    FeedNow,
    QuerySchedule,
    SyncSchedule,
    ListSchedule,
    AddTime(FeedTime),
    EditTime(i64, FeedTime),
    RemoveTime(i64),
    SendRaw(String),
    Status,
    Help,
    Quit,
}

impl ConsoleAction {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let action = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("devices", []) => Self::ListDevices,
            ("connect", []) => Self::Connect(None),
            ("connect", [addr]) => Self::Connect(Some(DeviceAddress::parse(addr)?)),
            ("disconnect", []) => Self::Disconnect,
            ("test", []) => Self::Test,
            ("feed", []) => Self::FeedNow,
            ("query", []) => Self::QuerySchedule,
            ("sync", []) => Self::SyncSchedule,
            ("list", []) => Self::ListSchedule,
            ("add", [time]) => Self::AddTime(FeedTime::parse(time)?),
            ("edit", [id, time]) => Self::EditTime(parse_id(id)?, FeedTime::parse(time)?),
            ("remove", [id]) => Self::RemoveTime(parse_id(id)?),
            ("send", [token]) => Self::SendRaw(token.to_string()),
            ("status", []) => Self::Status,
            ("help", []) | ("?", []) => Self::Help,
            ("quit", []) | ("exit", []) => Self::Quit,
            (verb, _) => bail!("Unrecognised input '{}' (try 'help')", verb),
        };

        Ok(Some(action))
    }
}

fn parse_id(text: &str) -> Result<i64> {
    text.parse()
        .with_context(|| format!("'{}' is not a schedule id", text))
}

/// Read console actions from stdin.
///
/// End of input is reported as [`ConsoleAction::Quit`].
pub fn run_console() -> mpsc::UnboundedReceiver<ConsoleAction> {
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match ConsoleAction::parse(&line) {
                    Ok(Some(action)) => {
                        if action_tx.send(action).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{:#}", e),
                },
                Ok(None) => {
                    debug!("Console input closed");
                    let _ = action_tx.send(ConsoleAction::Quit);
                    break;
                }
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    let _ = action_tx.send(ConsoleAction::Quit);
                    break;
                }
            }
        }
    });

    info!("Console started, type 'help' for commands");
    action_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ConsoleAction {
        ConsoleAction::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("devices"), ConsoleAction::ListDevices);
        assert_eq!(parse("  FEED "), ConsoleAction::FeedNow);
        assert_eq!(parse("query"), ConsoleAction::QuerySchedule);
        assert_eq!(parse("exit"), ConsoleAction::Quit);
        assert!(ConsoleAction::parse("   ").unwrap().is_none());
    }

    #[test]
    fn test_parse_connect() {
        assert_eq!(parse("connect"), ConsoleAction::Connect(None));
        assert_eq!(
            parse("connect b8:27:eb:67:07:b9"),
            ConsoleAction::Connect(Some(DeviceAddress::parse("B8:27:EB:67:07:B9").unwrap()))
        );
        assert!(ConsoleAction::parse("connect feeder").is_err());
    }

    #[test]
    fn test_parse_schedule_edits() {
        assert_eq!(
            parse("add 07:45"),
            ConsoleAction::AddTime(FeedTime::parse("07:45").unwrap())
        );
        assert_eq!(
            parse("edit 3 19:00"),
            ConsoleAction::EditTime(3, FeedTime::parse("19:00").unwrap())
        );
        assert_eq!(parse("remove 3"), ConsoleAction::RemoveTime(3));

        assert!(ConsoleAction::parse("add 25:00").is_err());
        assert!(ConsoleAction::parse("edit x 19:00").is_err());
        assert!(ConsoleAction::parse("remove").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = ConsoleAction::parse("dance now").unwrap_err();
        assert!(err.to_string().contains("dance"));
    }

    #[test]
    fn test_send_keeps_token_case() {
        assert_eq!(
            parse("send GET_SCHEDULES"),
            ConsoleAction::SendRaw("GET_SCHEDULES".to_string())
        );
    }
}
