//! Error Type Definition Module
//!
//! This module defines the errors that may be encountered while turning an
//! EPUB archive into a chapter structure and while answering chapter queries.
//! All errors are uniformly wrapped in the [EpubError] enumeration.
//!
//! The errors fall into four groups:
//!
//! - parse-stage failures ([EpubError::CorruptArchive], [EpubError::InvalidContainer],
//!   [EpubError::InvalidPackageDocument]) abort a structure build;
//! - lookup failures ([EpubError::ChapterNotFound], [EpubError::PartNotFound],
//!   [EpubError::InvalidRange]) are caller errors;
//! - collaborator failures ([EpubError::DownloadFailure], [EpubError::StorageFailure])
//!   are surfaced without retry;
//! - ambient failures (configuration, decoding, IO).
//!
//! Payloads are rendered messages rather than source errors, so the enum is
//! `Clone` and a single build result can be handed to every waiting caller.

use thiserror::Error;

/// Types of errors that can occur while splitting and serving an EPUB
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EpubError {
    /// The structure build task stopped before producing a result
    ///
    /// This only happens when the runtime shuts down or the build panics.
    #[error("Build aborted: The structure build for \"{book_id}\" stopped early: {reason}")]
    BuildAborted { book_id: String, reason: String },

    /// The document store has no record for the requested book
    #[error("Book not found: There is no book with id \"{book_id}\".")]
    BookNotFound { book_id: String },

    /// Chapter lookup failure
    ///
    /// Raised by chapter queries when no chapter carries the requested
    /// number, and by the content extractor when a chapter href has no
    /// matching archive entry.
    #[error("Chapter not found: {chapter}.")]
    ChapterNotFound { chapter: String },

    /// The input bytes are not a usable ZIP container
    #[error("Corrupt archive: {reason}")]
    CorruptArchive { reason: String },

    /// Data decoding error
    ///
    /// This error occurs when archive text is neither valid UTF-8 nor UTF-16.
    #[error("Decode error: {reason}")]
    Decode { reason: String },

    /// The object store could not deliver the archive
    #[error("Download failure: Unable to download \"{url}\": {reason}")]
    DownloadFailure { url: String, reason: String },

    /// The requested path does not exist in the archive
    #[error("Entry not found: There is no \"{path}\" entry in the archive.")]
    EntryNotFound { path: String },

    /// `META-INF/container.xml` is missing, malformed or has no rootfile
    #[error("Invalid container: {reason}")]
    InvalidContainer { reason: String },

    /// Configuration could not be loaded
    ///
    /// Covers unreadable TOML as well as title patterns that are not valid
    /// regular expressions.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// The OPF package document is malformed or lacks a manifest or spine
    #[error("Invalid package document: {reason}")]
    InvalidPackageDocument { reason: String },

    /// A chapter range request is reversed or wider than allowed
    #[error(
        "Invalid range: Chapters {from}..={to} must be ascending and at most {max_window} apart."
    )]
    InvalidRange { from: u32, to: u32, max_window: u32 },

    #[error("IO error: {reason}")]
    Io { reason: String },

    /// The book record exists but carries no EPUB location
    #[error("Missing epub: Book \"{book_id}\" does not have an EPUB file.")]
    MissingEpub { book_id: String },

    /// Part lookup failure
    #[error("Part not found: There is no part {part_number}.")]
    PartNotFound { part_number: u32 },

    /// The document store failed to read or write a record
    #[error("Storage failure: {reason}")]
    StorageFailure { reason: String },

    /// QuickXml error
    ///
    /// This error occurs when XML data can not be tokenized. Parse stages
    /// translate it into the stage specific error before surfacing it.
    #[error("Xml error: {reason}")]
    Xml { reason: String },
}

impl EpubError {
    /// Whether this error is a parse-stage failure that aborts a build
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            EpubError::CorruptArchive { .. }
                | EpubError::InvalidContainer { .. }
                | EpubError::InvalidPackageDocument { .. }
        )
    }

    /// Whether this error is a caller error raised by a lookup
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            EpubError::ChapterNotFound { .. }
                | EpubError::PartNotFound { .. }
                | EpubError::InvalidRange { .. }
        )
    }
}

impl From<zip::result::ZipError> for EpubError {
    fn from(value: zip::result::ZipError) -> Self {
        EpubError::CorruptArchive {
            reason: value.to_string(),
        }
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(value: quick_xml::Error) -> Self {
        EpubError::Xml {
            reason: value.to_string(),
        }
    }
}

impl From<quick_xml::encoding::EncodingError> for EpubError {
    fn from(value: quick_xml::encoding::EncodingError) -> Self {
        EpubError::Decode {
            reason: value.to_string(),
        }
    }
}

impl From<std::io::Error> for EpubError {
    fn from(value: std::io::Error) -> Self {
        EpubError::Io {
            reason: value.to_string(),
        }
    }
}

impl From<std::string::FromUtf8Error> for EpubError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        EpubError::Decode {
            reason: value.to_string(),
        }
    }
}

impl From<std::string::FromUtf16Error> for EpubError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        EpubError::Decode {
            reason: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for EpubError {
    fn from(value: serde_json::Error) -> Self {
        EpubError::StorageFailure {
            reason: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for EpubError {
    fn from(value: toml::de::Error) -> Self {
        EpubError::InvalidConfig {
            reason: value.to_string(),
        }
    }
}

impl From<regex::Error> for EpubError {
    fn from(value: regex::Error) -> Self {
        EpubError::InvalidConfig {
            reason: value.to_string(),
        }
    }
}
