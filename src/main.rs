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
//! Feeder Link console application.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feeder_link::bluetooth::{
    BluerPlatform, ConnectRequest, ConnectionManager, DeviceAddress, FeederCommand,
};
use feeder_link::config::Config;
use feeder_link::events::{spawn_dispatcher, start_connect, sync_schedule, EventProcessor};
use feeder_link::schedule::ScheduleEntry;
use feeder_link::state::AppState;
use feeder_link::storage::{ScheduleStore, SqliteScheduleStore};
use feeder_link::ui::{self, ConsoleAction};

type Manager = ConnectionManager<BluerPlatform>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("feeder_link=info".parse()?),
        )
        .init();

    info!("Starting Feeder Link v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::load()?;
    info!("Configuration loaded");

    // Initialize storage
    let store: Arc<dyn ScheduleStore> = Arc::new(SqliteScheduleStore::new(&config.data_dir)?);
    info!("Schedule storage initialized");

    // Create application state
    let state = AppState::new();

    let platform = BluerPlatform::new(config.bluetooth.rfcomm_channel).await?;
    let (manager, events) = ConnectionManager::new(platform, config.link_config());

    let processor = EventProcessor::new(manager.clone(), store.clone(), state.clone())
        .with_sync_on_connect(config.schedule.sync_on_connect);
    let _dispatcher = spawn_dispatcher(events, processor);

    if config.bluetooth.auto_connect {
        match config.bluetooth.address() {
            Ok(Some(address)) => {
                connect_feeder(&manager, &state, address).await;
            }
            Ok(None) => warn!("auto_connect is set but no device_address is configured"),
            Err(e) => error!("{:#}", e),
        }
    }

    let mut action_rx = ui::run_console();
    info!("Ready.");

    loop {
        tokio::select! {
            Some(action) = action_rx.recv() => {
                if action == ConsoleAction::Quit {
                    info!("Quit requested");
                    break;
                }
                let result =
                    handle_action(action, &manager, &state, store.as_ref(), &mut config).await;
                if let Err(e) = result {
                    println!("{:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.disconnect();
    info!("Feeder Link stopped");
    Ok(())
}

async fn handle_action(
    action: ConsoleAction,
    manager: &Manager,
    state: &AppState,
    store: &dyn ScheduleStore,
    config: &mut Config,
) -> Result<()> {
    match action {
        ConsoleAction::ListDevices => {
            let devices = manager.platform().paired_devices().await?;
            if devices.is_empty() {
                println!("No paired devices");
            }
            for device in devices {
                println!("{}", device.label());
            }
        }
        ConsoleAction::Connect(Some(address)) => {
            let started = connect_feeder(manager, state, address).await;
            if started && config.bluetooth.device_address.is_none() {
                config.bluetooth.device_address = Some(address.to_string());
                config.save()?;
                info!("Saved {} as the default feeder", address);
            }
        }
        ConsoleAction::Connect(None) => match config.bluetooth.address()? {
            Some(address) => {
                connect_feeder(manager, state, address).await;
            }
            None => {
                println!("No feeder configured. Paired devices:");
                for device in manager.platform().paired_devices().await? {
                    println!("  {}", device.label());
                }
                println!("Use 'connect ADDR' to pick one.");
            }
        },
        ConsoleAction::Disconnect => manager.disconnect(),
        ConsoleAction::Test => manager.send_command(FeederCommand::Test)?,
        ConsoleAction::FeedNow => manager.send_command(FeederCommand::FeedNow)?,
        ConsoleAction::QuerySchedule => manager.send_command(FeederCommand::GetSchedules)?,
        ConsoleAction::SyncSchedule => {
            let count = sync_schedule(manager, store)?;
            println!("Sent {} feeding times", count);
        }
        ConsoleAction::ListSchedule => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("No feeding times");
            }
            for entry in entries {
                println!("{:>4}  {}", entry.id.unwrap_or_default(), entry.time);
            }
        }
        ConsoleAction::AddTime(time) => {
            let id = store.insert(&ScheduleEntry::new(time))?;
            println!("Added entry {}", id);
            schedule_changed(manager, store, config);
        }
        ConsoleAction::EditTime(id, time) => {
            store.update(&ScheduleEntry::with_id(id, time))?;
            schedule_changed(manager, store, config);
        }
        ConsoleAction::RemoveTime(id) => {
            let entry = store
                .list()?
                .into_iter()
                .find(|entry| entry.id == Some(id))
                .ok_or_else(|| anyhow::anyhow!("No schedule entry with id {}", id))?;
            store.delete(&entry)?;
            schedule_changed(manager, store, config);
        }
        ConsoleAction::SendRaw(token) => manager.send_raw(&token)?,
        ConsoleAction::Status => {
            println!("{}", state.summary());
            if let Some(text) = state.get_last_message() {
                println!("Last message: {}", text);
            }
            if let Some(err) = state.get_last_error() {
                println!("Last error: {}", err);
            }
        }
        ConsoleAction::Help => println!("{}", ui::HELP),
        ConsoleAction::Quit => {}
    }

    Ok(())
}

/// Check the adapter and start an attempt. Returns whether one was started.
async fn connect_feeder(manager: &Manager, state: &AppState, address: DeviceAddress) -> bool {
    let platform = manager.platform();
    if !platform.is_available() {
        error!("Bluetooth is not available on this machine");
        return false;
    }
    if !platform.is_enabled().await {
        error!("Bluetooth is turned off");
        return false;
    }

    match start_connect(manager, state, address) {
        ConnectRequest::Started => true,
        ConnectRequest::AlreadyActive(current) => {
            println!(
                "Link is {}, disconnect first",
                current.as_str().to_lowercase()
            );
            false
        }
    }
}

fn schedule_changed(manager: &Manager, store: &dyn ScheduleStore, config: &Config) {
    if !config.schedule.sync_on_change || !manager.is_connected() {
        return;
    }
    if let Err(e) = sync_schedule(manager, store) {
        error!("Failed to sync schedule: {:#}", e);
    }
}
