//! dirbridge - Directory mirror bridge for sandboxed UIs
//!
//! A host process owns the filesystem; the UI only gets six operations.
//!
//! # Operations
//!
//! | Operation | Result |
//! |-----------|--------|
//! | `readDirectory(path)` | immediate children, directories first |
//! | `openFolderDialog()` | chosen path, or `null` when cancelled |
//! | `watchDirectory(path)` | `true`; changes arrive as notifications |
//! | `unwatchDirectory(path)` | `true`, also for paths never watched |
//! | `onDirectoryChanged` | per-session notification sink |
//! | `moveFile(src, destDir)` | `true`; never overwrites |
//!
//! # Quick Start
//!
//! ```no_run
//! use dirbridge::{Bridge, Config};
//! use std::path::Path;
//! use std::sync::mpsc;
//!
//! let bridge = Bridge::from_config(&Config::default()).unwrap();
//! let session = bridge.open_session();
//!
//! let (tx, rx) = mpsc::channel();
//! bridge.on_directory_changed(&session, tx);
//! bridge.watch_directory(&session, Path::new("/tmp/a")).unwrap();
//!
//! for entry in bridge.read_directory(Path::new("/tmp/a")).unwrap() {
//!     println!("{} {}", if entry.is_directory { "d" } else { "-" }, entry.name);
//! }
//!
//! let changed = rx.recv().unwrap();
//! println!("re-list {}", changed.path.display());
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod mover;
pub mod picker;
pub mod protocol;
pub mod reader;
pub mod sandbox;
pub mod serve;
pub mod stdio;
pub mod watch;

pub use bridge::Bridge;
pub use config::{Config, ConfigError, WatchBackend};
pub use error::{BridgeError, DialogError, ErrorKind, FilesystemError, FsErrorKind, WatchError};
pub use picker::{FolderPicker, StaticPicker, UnavailablePicker};
pub use protocol::{Call, ErrorBody, Outbound, Request, Response};
pub use reader::DirectoryEntry;
pub use sandbox::PathPolicy;
pub use watch::{ChangeNotification, NotificationSink, SessionId, WatchRegistry};
