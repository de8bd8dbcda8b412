mod cli;
mod collaborators;
mod coordinator;
mod daemon;
mod engine;
mod lifecycle;
mod notifications;
mod refresh;
mod scheduler;
mod session_source;
mod store;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use jsync_common::JsyncConfig;

use coordinator::{Collaborators, Coordinator};
use engine::RcloneEngine;
use notifications::DesktopNotifier;
use session_source::{
    DirectorySessionProvider, FsBackupDeleter, FsDestinationParser, PromptFolderChooser,
};
use store::JsonFileStore;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut config = JsyncConfig::new();
    if let Some(session) = cli.session.clone() {
        config.session_dir = Some(session);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let (event_tx, event_rx) = async_channel::unbounded();

    let store = JsonFileStore::new(config.store_file.clone());
    log::debug!("Settings store: {}", store.path().display());

    let collaborators = Collaborators {
        sessions: Box::new(DirectorySessionProvider::new(config.session_dir.clone())),
        engine: Box::new(RcloneEngine::new(&config, runtime.handle().clone(), event_tx)),
        chooser: Box::new(PromptFolderChooser),
        parser: Box::new(FsDestinationParser),
        deleter: Box::new(FsBackupDeleter),
        store: Box::new(store),
        notifier: Box::new(DesktopNotifier::new()),
    };

    let mut coordinator = Coordinator::new(collaborators, &config, Utc::now());
    coordinator.refresh_session();

    cli::execute(cli.command, &mut coordinator, &runtime, &event_rx)
}
