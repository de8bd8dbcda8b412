//! Filesystem-backed collaborators
//!
//! The session comes from a configured folder (or the `.cosessiondb` file
//! inside it) instead of asking the host application.

use anyhow::{Context, Result, anyhow, bail};
use jsync_common::{
    DestinationDescriptor, ItemKind, SessionInfo, SessionItem, classify_destination, format_bytes,
    validate_session_name,
};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::collaborators::{BackupDeleter, DestinationParser, FolderChooser, SessionProvider};

const IMAGE_EXTENSIONS: &[&str] = &[
    "cr3", "cr2", "nef", "arw", "raf", "dng", "iiq", "eip", "jpg", "jpeg", "tif", "tiff", "mos",
    "3fr", "ari", "sr2", "srf", "rw2",
];

/// Folders every session has, listed even if they are not directories
const STANDARD_ITEMS: &[&str] = &["Capture", "Selects", "Output", "Trash"];

const SESSION_EXTENSIONS: &[&str] = &[".cosessiondb", ".cocatalog"];

pub struct DirectorySessionProvider {
    location: Option<PathBuf>,
}

impl DirectorySessionProvider {
    pub fn new(location: Option<PathBuf>) -> Self {
        Self { location }
    }

    /// Session folder and name for the configured location
    fn resolve(&self) -> Option<(PathBuf, String)> {
        let location = self.location.as_ref()?;
        if !location.exists() {
            log::debug!("Session location {} does not exist", location.display());
            return None;
        }

        let file_name = location.file_name()?.to_string_lossy().to_string();
        let name = strip_session_extension(&file_name).to_string();

        let mut folder = if location.is_dir() {
            location.clone()
        } else {
            location.parent()?.to_path_buf()
        };

        // A session file sitting next to its folder
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if folder_name != name && folder.join(&name).is_dir() {
            folder = folder.join(&name);
        }

        Some((folder, name))
    }
}

fn strip_session_extension(name: &str) -> &str {
    SESSION_EXTENSIONS
        .iter()
        .fold(name, |name, ext| name.strip_suffix(ext).unwrap_or(name))
}

fn folder_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn image_count(session: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(session.join("Capture")) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .count() as u32
}

impl SessionProvider for DirectorySessionProvider {
    fn current_session(&mut self) -> Result<Option<SessionInfo>> {
        let Some((folder, name)) = self.resolve() else {
            return Ok(None);
        };

        let root_path = folder
            .to_str()
            .ok_or_else(|| anyhow!("Session path is not valid UTF-8: {}", folder.display()))?
            .trim_end_matches('/')
            .to_string();

        Ok(Some(SessionInfo {
            name,
            size_label: format_bytes(folder_size(&folder)),
            item_count: image_count(&folder),
            root_path,
        }))
    }

    fn session_items(&mut self, root_path: &str) -> Result<Vec<SessionItem>> {
        let entries = fs::read_dir(root_path)
            .with_context(|| format!("Failed to read session folder {root_path}"))?;

        let mut items = Vec::new();
        for entry in entries.flatten() {
            let label = entry.file_name().to_string_lossy().to_string();
            if label.starts_with('.') {
                continue;
            }

            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            let is_standard = STANDARD_ITEMS.contains(&label.as_str());
            let is_session_db = label.ends_with(".cosessiondb");

            if is_dir || is_standard || is_session_db {
                items.push(SessionItem {
                    id: format!("{}/{}", root_path.trim_end_matches('/'), label),
                    label,
                    kind: if is_dir { ItemKind::Folder } else { ItemKind::File },
                });
            }
        }

        items.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(items)
    }
}

/// Classifies a chosen folder and checks it for an existing session copy
pub struct FsDestinationParser;

impl DestinationParser for FsDestinationParser {
    fn parse_destination(
        &self,
        path: &str,
        session: Option<&SessionInfo>,
    ) -> DestinationDescriptor {
        let (label, kind) = classify_destination(path);

        let has_existing_backup = session
            .filter(|s| validate_session_name(&s.name).is_ok())
            .is_some_and(|s| Path::new(path).join(&s.name).is_dir());

        DestinationDescriptor {
            path: path.to_string(),
            label,
            kind,
            has_existing_backup,
        }
    }
}

pub struct FsBackupDeleter;

impl BackupDeleter for FsBackupDeleter {
    fn delete_backup_at(&mut self, path: &str, session_name: &str) -> Result<()> {
        validate_session_name(session_name).map_err(|e| anyhow!(e))?;

        let target = Path::new(path).join(session_name);
        if !target.is_dir() {
            bail!("No backup of {session_name} at {path}");
        }

        fs::remove_dir_all(&target)
            .with_context(|| format!("Failed to remove {}", target.display()))?;
        Ok(())
    }
}

/// Reads a destination folder from standard input
pub struct PromptFolderChooser;

impl FolderChooser for PromptFolderChooser {
    fn pick_folder(&mut self) -> Option<String> {
        print!("Destination folder: ");
        std::io::stdout().flush().ok()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;

        let path = line.trim();
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    }
}
