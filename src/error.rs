//! # Keyfile Error Taxonomy
//!
//! Every failure the engine can report is one [`ErrorKind`]. Each kind keeps
//! the numeric code persisted in the file-info block and a [`Severity`]:
//!
//! - **Transient** kinds (key not found, end of file, malformed key, caller
//!   buffer too small, write on a read-only file, ...) are reported and then
//!   cleared at the start of the next call. They never break the file.
//! - **Fatal** kinds (I/O failures, bad markers, structural damage, ...) mark
//!   the control block broken. Every later call fails with the same kind
//!   without touching the disk until the file is reopened.
//!
//! ## Reports
//!
//! Operations return `eyre::Result`. The kind travels inside the report,
//! either as the source error or as `wrap_err` context over an `io::Error`,
//! so callers classify failures with:
//!
//! ```ignore
//! match kf.get(b"doc1") {
//!     Err(report) => match ErrorKind::of(&report) {
//!         Some(kind) if kind.is_fatal() => reopen(),
//!         _ => retry(),
//!     },
//!     Ok(found) => use_it(found),
//! }
//! ```

use std::fmt::Display;

use eyre::Report;

/// How an error affects the control block that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Reported once, cleared on the next call.
    Transient,
    /// Sticky: the control block refuses all further work.
    Fatal,
}

/// Closed set of keyed-file error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    #[error("could not open keyed file")]
    BadOpen,
    #[error("could not create keyed file")]
    BadCreate,
    #[error("cache size below the minimum control block size")]
    SmallFcb,
    #[error("key to delete not found")]
    DltNoKey,
    #[error("key not found")]
    GetNoKey,
    #[error("file is not a keyed file")]
    NotKeyfile,
    #[error("keyed file is marked damaged")]
    FileNotOk,
    #[error("malformed key")]
    BadKey,
    #[error("index tree exceeds the maximum level")]
    MaxLevel,
    #[error("at end of file")]
    AtEof,
    #[error("at beginning of file")]
    AtBof,
    #[error("record longer than caller buffer")]
    LongRec,
    #[error("key longer than caller buffer")]
    LongKey,
    #[error("unsupported keyed file version")]
    Version,
    #[error("seek failed")]
    Seek,
    #[error("read failed")]
    Read,
    #[error("write failed")]
    Write,
    #[error("could not open segment file")]
    SegmentOpen,
    #[error("invalid segment file name")]
    BadName,
    #[error("delete failed")]
    BadDelete,
    #[error("key larger than any in file")]
    MaxKey,
    #[error("no space left for another segment")]
    NoSpace,
    #[error("could not insert into free space index")]
    FreeInsert,
    #[error("could not delete from free space index")]
    FreeDelete,
    #[error("record allocation failed")]
    AllocRec,
    #[error("record deallocation failed")]
    DeallocRec,
    #[error("no unlocked buffer available")]
    AllocBuf,
    #[error("record move failed")]
    MoveRec,
    #[error("close failed")]
    BadClose,
    #[error("index structure damaged")]
    IxStruct,
    #[error("keyed file opened read only")]
    ReadOnly,
    #[error("replacement of the max key failed")]
    ReplMaxKey,
    #[error("record length not supported")]
    DataLc,
    #[error("insert failed")]
    Insert,
    #[error("index compression failed")]
    IxCompress,
    #[error("operation not supported")]
    NotSupported,
    #[error("moving keys between blocks failed")]
    MoveKeys,
}

impl ErrorKind {
    /// Numeric code persisted in the file-info block.
    pub const fn code(self) -> u32 {
        match self {
            ErrorKind::BadOpen => 1,
            ErrorKind::BadCreate => 2,
            ErrorKind::SmallFcb => 3,
            ErrorKind::DltNoKey => 4,
            ErrorKind::GetNoKey => 5,
            ErrorKind::NotKeyfile => 6,
            ErrorKind::FileNotOk => 7,
            ErrorKind::BadKey => 8,
            ErrorKind::MaxLevel => 9,
            ErrorKind::AtEof => 10,
            ErrorKind::AtBof => 11,
            ErrorKind::LongRec => 12,
            ErrorKind::LongKey => 13,
            ErrorKind::Version => 14,
            ErrorKind::Seek => 15,
            ErrorKind::Read => 16,
            ErrorKind::Write => 17,
            ErrorKind::SegmentOpen => 18,
            ErrorKind::BadName => 20,
            ErrorKind::BadDelete => 21,
            ErrorKind::MaxKey => 22,
            ErrorKind::NoSpace => 23,
            ErrorKind::FreeInsert => 24,
            ErrorKind::FreeDelete => 25,
            ErrorKind::AllocRec => 26,
            ErrorKind::DeallocRec => 27,
            ErrorKind::AllocBuf => 28,
            ErrorKind::MoveRec => 29,
            ErrorKind::BadClose => 30,
            ErrorKind::IxStruct => 31,
            ErrorKind::ReadOnly => 32,
            ErrorKind::ReplMaxKey => 33,
            ErrorKind::DataLc => 34,
            ErrorKind::Insert => 35,
            ErrorKind::IxCompress => 36,
            ErrorKind::NotSupported => 37,
            ErrorKind::MoveKeys => 38,
        }
    }

    /// Inverse of [`code`](Self::code). Zero and unassigned codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        const ALL: [ErrorKind; 37] = [
            ErrorKind::BadOpen,
            ErrorKind::BadCreate,
            ErrorKind::SmallFcb,
            ErrorKind::DltNoKey,
            ErrorKind::GetNoKey,
            ErrorKind::NotKeyfile,
            ErrorKind::FileNotOk,
            ErrorKind::BadKey,
            ErrorKind::MaxLevel,
            ErrorKind::AtEof,
            ErrorKind::AtBof,
            ErrorKind::LongRec,
            ErrorKind::LongKey,
            ErrorKind::Version,
            ErrorKind::Seek,
            ErrorKind::Read,
            ErrorKind::Write,
            ErrorKind::SegmentOpen,
            ErrorKind::BadName,
            ErrorKind::BadDelete,
            ErrorKind::MaxKey,
            ErrorKind::NoSpace,
            ErrorKind::FreeInsert,
            ErrorKind::FreeDelete,
            ErrorKind::AllocRec,
            ErrorKind::DeallocRec,
            ErrorKind::AllocBuf,
            ErrorKind::MoveRec,
            ErrorKind::BadClose,
            ErrorKind::IxStruct,
            ErrorKind::ReadOnly,
            ErrorKind::ReplMaxKey,
            ErrorKind::DataLc,
            ErrorKind::Insert,
            ErrorKind::IxCompress,
            ErrorKind::NotSupported,
            ErrorKind::MoveKeys,
        ];
        ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub const fn severity(self) -> Severity {
        match self {
            ErrorKind::DltNoKey
            | ErrorKind::GetNoKey
            | ErrorKind::BadKey
            | ErrorKind::AtEof
            | ErrorKind::AtBof
            | ErrorKind::LongRec
            | ErrorKind::LongKey
            | ErrorKind::ReadOnly
            | ErrorKind::DataLc
            | ErrorKind::IxCompress
            | ErrorKind::NotSupported => Severity::Transient,
            ErrorKind::BadOpen
            | ErrorKind::BadCreate
            | ErrorKind::SmallFcb
            | ErrorKind::NotKeyfile
            | ErrorKind::FileNotOk
            | ErrorKind::MaxLevel
            | ErrorKind::Version
            | ErrorKind::Seek
            | ErrorKind::Read
            | ErrorKind::Write
            | ErrorKind::SegmentOpen
            | ErrorKind::BadName
            | ErrorKind::BadDelete
            | ErrorKind::MaxKey
            | ErrorKind::NoSpace
            | ErrorKind::FreeInsert
            | ErrorKind::FreeDelete
            | ErrorKind::AllocRec
            | ErrorKind::DeallocRec
            | ErrorKind::AllocBuf
            | ErrorKind::MoveRec
            | ErrorKind::BadClose
            | ErrorKind::IxStruct
            | ErrorKind::ReplMaxKey
            | ErrorKind::Insert
            | ErrorKind::MoveKeys => Severity::Fatal,
        }
    }

    pub const fn is_fatal(self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }

    /// Extracts the kind carried by a report, if the engine raised it.
    pub fn of(report: &Report) -> Option<Self> {
        report.downcast_ref::<ErrorKind>().copied()
    }

    /// Raises this kind with additional context.
    pub fn with<D>(self, context: D) -> Report
    where
        D: Display + Send + Sync + 'static,
    {
        Report::new(self).wrap_err(context)
    }
}

/// Severity of an arbitrary report. Reports that carry no kind are treated as
/// fatal: they can only come from unexpected I/O paths.
pub fn severity_of(report: &Report) -> Severity {
    ErrorKind::of(report).map_or(Severity::Fatal, ErrorKind::severity)
}
