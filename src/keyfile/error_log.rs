//! Append-only diagnostic log of fatal errors. The file is opened on the
//! first entry; failures to open or write it are ignored.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::Report;

use crate::config::ERROR_LOG_NAME;
use crate::error::ErrorKind;

pub(crate) struct ErrorLog {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl ErrorLog {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        Self { path, file: None }
    }

    /// Default log location: next to the keyed file.
    pub(crate) fn beside(keyfile: &Path) -> PathBuf {
        keyfile
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(ERROR_LOG_NAME)
    }

    pub(crate) fn append(&mut self, keyfile: &Path, kind: ErrorKind, report: &Report) {
        let Some(path) = &self.path else {
            return;
        };
        if self.file.is_none() {
            self.file = OpenOptions::new().create(true).append(true).open(path).ok();
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let _ = writeln!(
            file,
            "{} {} error {} ({}): {:#}",
            secs,
            keyfile.display(),
            kind.code(),
            kind,
            report
        );
    }
}
