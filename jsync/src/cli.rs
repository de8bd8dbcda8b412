use anyhow::Result;
use async_channel::Receiver;
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use jsync_common::{DestinationId, FolderStatus};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::coordinator::{Coordinator, StatusReport};
use crate::daemon;
use crate::lifecycle::EngineEvent;

#[derive(Parser)]
#[command(name = "jsync")]
#[command(about = "Back up the open photo session to every enabled destination")]
#[command(version)]
pub struct Cli {
    /// Session folder or session file (overrides JSYNC_SESSION_DIR)
    #[arg(short, long, global = true)]
    pub session: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the session, selection, destinations and schedule
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Back up once and wait for every destination to finish
    Run,

    /// Stay running: scheduled backups, session refresh and notifications
    Watch,

    /// Add a destination folder; prompts when no path is given
    AddDestination { path: Option<String> },

    RemoveDestination { id: u64 },

    /// Include a destination in backups
    Enable { id: u64 },

    /// Exclude a destination from backups
    Disable { id: u64 },

    /// Mark or unmark a destination as default for new sessions
    ToggleDefault { id: u64 },

    /// Delete this session's copy at a destination
    DeleteBackup { id: u64 },

    /// Include or exclude a session item; the session path toggles everything
    Toggle { path: String },

    /// Configure scheduled backups
    Schedule {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,

        /// Minutes between backups
        #[arg(long)]
        interval: Option<u32>,
    },

    Notifications {
        #[arg(value_enum)]
        state: Switch,
    },
}

#[derive(ValueEnum, Clone, Copy)]
pub enum Switch {
    On,
    Off,
}

pub fn execute(
    command: Commands,
    coordinator: &mut Coordinator,
    runtime: &Runtime,
    events: &Receiver<EngineEvent>,
) -> Result<()> {
    let now = Utc::now();

    match command {
        Commands::Status { json } => {
            let status = coordinator.status(now);
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Commands::Run => runtime.block_on(daemon::run_once(coordinator, events))?,
        Commands::Watch => runtime.block_on(daemon::watch(coordinator, events))?,
        Commands::AddDestination { path } => {
            let added = match path {
                Some(path) => Some(coordinator.add_destination_path(&path)?),
                None => coordinator.add_destination()?,
            };
            match added {
                Some(id) => println!("Added destination {id}"),
                None => println!("No folder chosen"),
            }
        }
        Commands::RemoveDestination { id } => {
            let removed = coordinator.remove_destination(DestinationId(id))?;
            println!("Removed {} ({})", removed.label, removed.path);
        }
        Commands::Enable { id } => {
            coordinator.set_destination_enabled(DestinationId(id), true)?;
            println!("Destination {id} enabled");
        }
        Commands::Disable { id } => {
            coordinator.set_destination_enabled(DestinationId(id), false)?;
            println!("Destination {id} disabled");
        }
        Commands::ToggleDefault { id } => {
            if coordinator.toggle_default(DestinationId(id))? {
                println!("Destination {id} is now a default");
            } else {
                println!("Destination {id} is no longer a default");
            }
        }
        Commands::DeleteBackup { id } => {
            coordinator.delete_existing_backup(DestinationId(id))?;
            println!("Deleted backup at destination {id}");
        }
        Commands::Toggle { path } => {
            coordinator.toggle_path(&path)?;
            let state = if coordinator.is_selected(&path) {
                "included"
            } else {
                "excluded"
            };
            println!("{path}: {state}");
        }
        Commands::Schedule {
            enable,
            disable,
            interval,
        } => {
            let prefs = coordinator.preferences();
            let enabled = if enable {
                true
            } else if disable {
                false
            } else {
                prefs.scheduled_backup
            };
            let interval = interval.unwrap_or(prefs.interval_minutes);

            coordinator.set_schedule(enabled, interval, now)?;
            if enabled {
                println!("Scheduled backups every {interval} minute(s)");
            } else {
                println!("Scheduled backups disabled");
            }
        }
        Commands::Notifications { state } => {
            let enabled = matches!(state, Switch::On);
            coordinator.set_notifications_enabled(enabled)?;
            println!("Notifications {}", if enabled { "on" } else { "off" });
        }
    }

    coordinator.shutdown();
    Ok(())
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn print_status(status: &StatusReport) {
    match &status.session {
        Some(session) => {
            println!(
                "Session: {} ({}, {} images)",
                session.name, session.size_label, session.item_count
            );
            println!("Folder:  {}", session.root_path);
        }
        None => println!("Session: none"),
    }
    println!("{}", status.last_sync);
    println!(
        "Backup:  {} ({:.0}%)",
        status.phase, status.progress_percent
    );

    if let Some(root_status) = status.root_status {
        let summary = match root_status {
            FolderStatus::All => "everything",
            FolderStatus::Mixed => "partial",
            FolderStatus::None => "nothing",
        };
        println!();
        println!("Selection ({summary}):");
        for entry in &status.selection {
            let mark = if entry.selected { "x" } else { " " };
            println!("  [{mark}] {}", entry.label);
        }
    }

    println!();
    println!("Destinations:");
    if status.destinations.is_empty() {
        println!("  (none)");
    }
    for dest in &status.destinations {
        let mark = if dest.destination.enabled { "x" } else { " " };
        let mut tags = Vec::new();
        if dest.is_default {
            tags.push("default".to_string());
        }
        if dest.recently_backed_up {
            tags.push("backed up".to_string());
        }
        if dest.destination.has_existing_backup {
            tags.push("existing backup".to_string());
        }
        if let Some(progress) = &dest.progress {
            tags.push(format!("{:.1}% at {}", progress.percent, progress.rate));
        }

        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", tags.join(", "))
        };
        println!(
            "  [{mark}] {}  {} ({}) {}{}",
            dest.destination.id,
            dest.destination.label,
            dest.destination.kind.as_str(),
            dest.destination.path,
            tags
        );
    }
    if !status.stale_defaults.is_empty() {
        let ids: Vec<String> = status.stale_defaults.iter().map(|id| id.to_string()).collect();
        println!("  Defaults not in this session: {}", ids.join(", "));
    }

    println!();
    if status.schedule.enabled {
        let next = status
            .schedule
            .next_check
            .map(|at| format!(", next check {}", local_time(at)))
            .unwrap_or_default();
        println!(
            "Schedule: every {} minute(s){}{}",
            status.schedule.interval_minutes,
            if status.schedule.custom_interval {
                " (custom)"
            } else {
                ""
            },
            next
        );
    } else {
        println!("Schedule: off");
    }
    println!(
        "Notifications: {}",
        if status.notifications_enabled {
            "on"
        } else {
            "off"
        }
    );
}
