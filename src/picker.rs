//! Folder selection
//!
//! `Ok(None)` means the user cancelled. Only a dialog that could not be
//! shown at all is an error.

use crate::config::DialogConfig;
use crate::error::DialogError;
use std::path::PathBuf;
use std::sync::Mutex;

/// Something that can ask the user for a directory
pub trait FolderPicker: Send + Sync {
    fn pick_folder(&self) -> Result<Option<PathBuf>, DialogError>;
}

/// Native dialog via `rfd`
#[cfg(feature = "native-dialog")]
pub struct NativeFolderPicker {
    title: String,
    start_dir: Option<PathBuf>,
}

#[cfg(feature = "native-dialog")]
impl NativeFolderPicker {
    pub fn new(config: &DialogConfig) -> Self {
        Self {
            title: config.title.clone(),
            start_dir: config.start_dir.clone(),
        }
    }
}

#[cfg(feature = "native-dialog")]
impl FolderPicker for NativeFolderPicker {
    fn pick_folder(&self) -> Result<Option<PathBuf>, DialogError> {
        let mut dialog = rfd::FileDialog::new().set_title(self.title.as_str());
        if let Some(ref dir) = self.start_dir {
            dialog = dialog.set_directory(dir);
        }
        // rfd panics when no display server can host the dialog
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dialog.pick_folder()))
            .map_err(|_| DialogError::Failed("dialog backend panicked".to_string()))
    }
}

/// Used when the binary has no dialog backend compiled in
pub struct UnavailablePicker;

impl FolderPicker for UnavailablePicker {
    fn pick_folder(&self) -> Result<Option<PathBuf>, DialogError> {
        Err(DialogError::Unavailable)
    }
}

/// Picker with scripted answers, for hosts that choose folders themselves
///
/// Answers are handed out in order; once exhausted every call cancels.
pub struct StaticPicker {
    answers: Mutex<Vec<Option<PathBuf>>>,
}

impl StaticPicker {
    pub fn new<I>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<PathBuf>>,
    {
        let mut answers: Vec<_> = answers.into_iter().collect();
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
        }
    }

    /// A picker where the user always cancels
    pub fn cancelling() -> Self {
        Self::new(Vec::new())
    }
}

impl FolderPicker for StaticPicker {
    fn pick_folder(&self) -> Result<Option<PathBuf>, DialogError> {
        let mut answers = self
            .answers
            .lock()
            .map_err(|_| DialogError::Failed("picker state poisoned".to_string()))?;
        Ok(answers.pop().flatten())
    }
}

/// The best picker this build offers
#[cfg(feature = "native-dialog")]
pub fn default_picker(config: &DialogConfig) -> Box<dyn FolderPicker> {
    Box::new(NativeFolderPicker::new(config))
}

/// The best picker this build offers
#[cfg(not(feature = "native-dialog"))]
pub fn default_picker(_config: &DialogConfig) -> Box<dyn FolderPicker> {
    Box::new(UnavailablePicker)
}
