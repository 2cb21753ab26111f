//! The bridge surface
//!
//! `Bridge` is the only way a UI session reaches the filesystem. It owns
//! the watch registry, the folder picker and the path policy, and is
//! shared across transport threads behind an `Arc`.

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::mover;
use crate::picker::{self, FolderPicker};
use crate::protocol::{Call, ErrorBody, Request, Response};
use crate::reader::{self, DirectoryEntry};
use crate::sandbox::PathPolicy;
use crate::watch::{NotificationSink, SessionId, WatchRegistry};
use serde_json::json;
use std::path::{Path, PathBuf};

pub struct Bridge {
    registry: WatchRegistry,
    picker: Box<dyn FolderPicker>,
    policy: PathPolicy,
    grant_picked: bool,
}

impl Bridge {
    /// Build a bridge from config with this build's default picker
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        Self::with_picker(config, picker::default_picker(&config.dialog))
    }

    pub fn with_picker(config: &Config, picker: Box<dyn FolderPicker>) -> std::io::Result<Self> {
        let policy = if config.sandbox.roots.is_empty() {
            PathPolicy::unrestricted()
        } else {
            PathPolicy::with_roots(&config.sandbox.roots)
        };
        Ok(Self {
            registry: WatchRegistry::new(&config.watch)?,
            picker,
            policy,
            grant_picked: config.sandbox.grant_picked,
        })
    }

    /// Attach a new UI session
    pub fn open_session(&self) -> SessionId {
        let session = SessionId::new();
        self.registry.open_session(&session);
        log::debug!("session {} opened", session);
        session
    }

    /// Detach a session, releasing every watch only it was holding
    pub fn close_session(&self, session: &SessionId) {
        self.registry.close_session(session);
        log::debug!("session {} closed", session);
    }

    /// `onDirectoryChanged`: set the session's notification sink
    pub fn on_directory_changed(&self, session: &SessionId, sink: NotificationSink) {
        self.registry.subscribe(session, sink);
    }

    /// `readDirectory`
    pub fn read_directory(&self, path: &Path) -> Result<Vec<DirectoryEntry>> {
        self.policy.check(path)?;
        Ok(reader::read_directory(path)?)
    }

    /// `openFolderDialog`: `None` when the user cancels
    pub fn open_folder_dialog(&self) -> Result<Option<PathBuf>> {
        let picked = self.picker.pick_folder()?;
        if let Some(ref dir) = picked {
            if self.grant_picked {
                self.policy.grant(dir);
            }
        }
        Ok(picked)
    }

    /// `watchDirectory`
    pub fn watch_directory(&self, session: &SessionId, path: &Path) -> Result<()> {
        self.policy.check(path)?;
        Ok(self.registry.watch(session, path)?)
    }

    /// `unwatchDirectory`: succeeds whether or not the path was watched
    pub fn unwatch_directory(&self, session: &SessionId, path: &Path) -> Result<()> {
        self.registry.unwatch(session, path);
        Ok(())
    }

    /// `moveFile`: returns the new location
    pub fn move_file(&self, source: &Path, dest_dir: &Path) -> Result<PathBuf> {
        self.policy.check(source)?;
        self.policy.check(dest_dir)?;
        Ok(mover::move_file(source, dest_dir)?)
    }

    /// Run one call and shape its result for the wire
    pub fn dispatch(&self, session: &SessionId, call: &Call) -> Result<serde_json::Value> {
        match call {
            Call::ReadDirectory { path } => Ok(json!(self.read_directory(path)?)),
            Call::OpenFolderDialog => {
                let picked = self.open_folder_dialog()?;
                Ok(json!(picked.map(|p| p.to_string_lossy().into_owned())))
            }
            Call::WatchDirectory { path } => {
                self.watch_directory(session, path)?;
                Ok(json!(true))
            }
            Call::UnwatchDirectory { path } => {
                self.unwatch_directory(session, path)?;
                Ok(json!(true))
            }
            Call::MoveFile {
                source_path,
                dest_directory,
            } => {
                self.move_file(source_path, dest_directory)?;
                Ok(json!(true))
            }
        }
    }

    /// Answer one request. Failures become error responses, never panics.
    pub fn handle(&self, session: &SessionId, request: &Request) -> Response {
        match self.dispatch(session, &request.call) {
            Ok(data) => Response::success(request.id, data),
            Err(e) => {
                log_failure(request.call.op(), &e);
                Response::failure(request.id, ErrorBody::from(&e))
            }
        }
    }

    /// Directories with a live watch
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.registry.watched_paths()
    }

    /// Release every watch; later watch calls fail
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

fn log_failure(op: &str, err: &BridgeError) {
    match err {
        BridgeError::Filesystem(_) => log::info!("{} failed: {}", op, err),
        BridgeError::Dialog(_) | BridgeError::Watch(_) => log::warn!("{} failed: {}", op, err),
    }
}
