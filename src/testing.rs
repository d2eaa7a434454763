//! In-memory EPUB fixtures and collaborator doubles for unit tests

use std::{
    collections::HashMap,
    io::{Cursor, Write},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{
    error::EpubError,
    store::{BookRecord, DocumentStore, ObjectStore},
    types::BookStructure,
};

const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
    </rootfiles>
</container>"#;

/// Builder for small EPUB archives
///
/// A fresh fixture has a `mimetype` entry and a container pointing at
/// `OEBPS/content.opf`; everything else is added by the test.
pub(crate) struct EpubFixture {
    files: Vec<(String, Vec<u8>)>,
}

impl EpubFixture {
    pub(crate) fn new() -> Self {
        Self {
            files: vec![
                ("mimetype".to_string(), b"application/epub+zip".to_vec()),
                ("META-INF/container.xml".to_string(), CONTAINER.as_bytes().to_vec()),
            ],
        }
    }

    /// An EPUB 3 book whose navigation document lists `toc` as `(title, file)`
    ///
    /// Every distinct file becomes a manifest item, a spine item and a
    /// chapter document under `OEBPS/` whose `<h1>` is the first title
    /// pointing at it.
    pub(crate) fn with_toc(toc: &[(&str, &str)]) -> Self {
        let mut documents = Vec::<(&str, &str)>::new();
        for &(title, file) in toc {
            if !documents.iter().any(|(_, existing)| *existing == file) {
                documents.push((title, file));
            }
        }

        let manifest = documents
            .iter()
            .enumerate()
            .map(|(index, (_, file))| {
                format!(
                    r#"<item id="doc{}" href="{}" media-type="application/xhtml+xml"/>"#,
                    index, file
                )
            })
            .collect::<String>();
        let spine = (0..documents.len())
            .map(|index| format!(r#"<itemref idref="doc{}"/>"#, index))
            .collect::<String>();
        let nav_items = toc
            .iter()
            .map(|(title, file)| format!(r#"<li><a href="{}">{}</a></li>"#, file, title))
            .collect::<String>();

        let mut fixture = Self::new()
            .package(&format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
                    <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
                        <dc:identifier id="uid">urn:uuid:fixture</dc:identifier>
                        <dc:title>Fixture Book</dc:title>
                        <dc:creator>Fixture Author</dc:creator>
                        <dc:language>en</dc:language>
                    </metadata>
                    <manifest>
                        <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
                        {}
                    </manifest>
                    <spine>{}</spine>
                </package>"#,
                manifest, spine
            ))
            .file(
                "OEBPS/nav.xhtml",
                &format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?>
                    <html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
                    <body><nav epub:type="toc"><ol>{}</ol></nav></body>
                    </html>"#,
                    nav_items
                ),
            );

        for (title, file) in documents {
            fixture = fixture.file(
                &format!("OEBPS/{}", file),
                &format!(
                    "<html><head><title>{0}</title></head><body><h1>{0}</h1><p>Text of {0}.</p></body></html>",
                    title
                ),
            );
        }
        fixture
    }

    /// Sets the package document at `OEBPS/content.opf`
    pub(crate) fn package(self, opf: &str) -> Self {
        self.file("OEBPS/content.opf", opf)
    }

    /// Adds or replaces an entry
    pub(crate) fn file(mut self, path: &str, content: &str) -> Self {
        self.files.retain(|(existing, _)| existing != path);
        self.files.push((path.to_string(), content.as_bytes().to_vec()));
        self
    }

    /// Removes an entry
    pub(crate) fn without(mut self, path: &str) -> Self {
        self.files.retain(|(existing, _)| existing != path);
        self
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for (path, content) in &self.files {
            writer.start_file(path.as_str(), options).unwrap();
            writer.write_all(content).unwrap();
        }

        writer.finish().unwrap().into_inner()
    }
}

/// Object store serving fixtures from memory and counting downloads
#[derive(Default)]
pub(crate) struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    downloads: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryObjectStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Delays every download, so that concurrent requests overlap
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.objects.lock().insert(url.to_string(), bytes);
    }

    pub(crate) fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, url: &str) -> Result<Vec<u8>, EpubError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.objects
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| EpubError::DownloadFailure {
                url: url.to_string(),
                reason: "no such object".to_string(),
            })
    }
}

/// Document store keeping records in memory and counting writes
#[derive(Default)]
pub(crate) struct MemoryDocumentStore {
    records: Mutex<HashMap<String, BookRecord>>,
    puts: AtomicUsize,
    fail_puts: bool,
}

impl MemoryDocumentStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail
    pub(crate) fn read_only() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    pub(crate) fn insert(&self, book_id: &str, epub_url: Option<&str>) {
        self.records.lock().insert(
            book_id.to_string(),
            BookRecord {
                book_id: book_id.to_string(),
                title: format!("Book {}", book_id),
                epub_url: epub_url.map(str::to_string),
                structure: None,
            },
        );
    }

    pub(crate) fn structure(&self, book_id: &str) -> Option<BookStructure> {
        self.records
            .lock()
            .get(book_id)
            .and_then(|record| record.structure.clone())
    }

    pub(crate) fn set_structure(&self, book_id: &str, structure: BookStructure) {
        if let Some(record) = self.records.lock().get_mut(book_id) {
            record.structure = Some(structure);
        }
    }

    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, book_id: &str) -> Result<Option<BookRecord>, EpubError> {
        Ok(self.records.lock().get(book_id).cloned())
    }

    async fn put(&self, book_id: &str, structure: &BookStructure) -> Result<(), EpubError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts {
            return Err(EpubError::StorageFailure {
                reason: "the store is read-only".to_string(),
            });
        }

        match self.records.lock().get_mut(book_id) {
            Some(record) => {
                record.structure = Some(structure.clone());
                Ok(())
            }
            None => Err(EpubError::BookNotFound {
                book_id: book_id.to_string(),
            }),
        }
    }
}
