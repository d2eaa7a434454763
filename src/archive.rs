//! In-memory access to the ZIP container of an EPUB
//!
//! [EpubArchive] owns the archive bytes behind an [Arc], so cloning a handle
//! is cheap and clones can be moved to other threads or onto the blocking
//! pool. Each read works on its own [ZipArchive] over a fresh cursor.

use std::{io::Cursor, sync::Arc};

use zip::ZipArchive;

use crate::{
    error::EpubError,
    utils::{DecodeBytes, compression_method_check, get_file_in_zip_archive, sha1_hex},
};

/// A validated EPUB container held in memory
#[derive(Clone)]
pub struct EpubArchive {
    archive: ZipArchive<Cursor<Arc<[u8]>>>,
    bytes: Arc<[u8]>,
}

impl EpubArchive {
    /// Opens an EPUB container from its raw bytes
    ///
    /// ## Parameters
    /// - `bytes`: The complete content of the `.epub` file
    ///
    /// ## Return
    /// - `Ok(EpubArchive)`: The container could be read and only uses Stored or Deflated entries
    /// - `Err(EpubError::CorruptArchive)`: The bytes are not a ZIP archive, or use
    ///   an unsupported compression method
    pub fn open(bytes: impl Into<Arc<[u8]>>) -> Result<Self, EpubError> {
        let bytes = bytes.into();
        let mut archive = ZipArchive::new(Cursor::new(Arc::clone(&bytes)))?;
        compression_method_check(&mut archive)?;

        Ok(Self { archive, bytes })
    }

    /// Reads an entry and decodes it as text
    ///
    /// Byte order marks are honored; anything else is read as UTF-8.
    pub fn read_text(&self, path: &str) -> Result<String, EpubError> {
        self.read_bytes(path)?.decode()
    }

    /// Reads the raw bytes of an entry
    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>, EpubError> {
        let mut archive = self.archive.clone();
        get_file_in_zip_archive(&mut archive, path)
    }

    /// Whether the archive has an entry at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.archive.index_for_name(path).is_some()
    }

    /// Names of all entries, in central directory order
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.archive.file_names()
    }

    /// SHA-1 digest of the archive bytes, as lowercase hex
    pub fn digest(&self) -> String {
        sha1_hex(&self.bytes)
    }

    /// Size of the archive in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for EpubArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpubArchive")
            .field("entries", &self.archive.len())
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{archive::EpubArchive, error::EpubError, testing::EpubFixture, utils::sha1_hex};

    #[test]
    fn test_open_rejects_non_zip_bytes() {
        let result = EpubArchive::open(b"definitely not a zip".to_vec());
        assert!(matches!(result, Err(EpubError::CorruptArchive { .. })));
    }

    #[test]
    fn test_read_entries() {
        let bytes = EpubFixture::new()
            .file("OEBPS/ch1.xhtml", "<html><body><p>One</p></body></html>")
            .into_bytes();
        let archive = EpubArchive::open(bytes.clone()).unwrap();

        assert!(archive.contains("META-INF/container.xml"));
        assert!(archive.contains("OEBPS/ch1.xhtml"));
        assert!(!archive.contains("OEBPS/ch2.xhtml"));
        assert_eq!(
            archive.read_text("OEBPS/ch1.xhtml").unwrap(),
            "<html><body><p>One</p></body></html>"
        );
        assert!(archive.entry_names().any(|name| name == "mimetype"));
        assert_eq!(archive.digest(), sha1_hex(&bytes));
        assert_eq!(archive.len(), bytes.len());
    }

    #[test]
    fn test_missing_entry() {
        let archive = EpubArchive::open(EpubFixture::new().into_bytes()).unwrap();
        let err = archive.read_text("OEBPS/missing.xhtml").unwrap_err();
        assert_eq!(
            err,
            EpubError::EntryNotFound {
                path: "OEBPS/missing.xhtml".to_string()
            }
        );
    }

    #[test]
    fn test_clones_share_bytes_across_threads() {
        let archive = EpubArchive::open(
            EpubFixture::new()
                .file("OEBPS/ch1.xhtml", "chapter")
                .into_bytes(),
        )
        .unwrap();

        let clone = archive.clone();
        let handle = std::thread::spawn(move || clone.read_text("OEBPS/ch1.xhtml"));
        assert_eq!(handle.join().unwrap().unwrap(), "chapter");
        assert_eq!(archive.read_text("OEBPS/ch1.xhtml").unwrap(), "chapter");
    }
}
