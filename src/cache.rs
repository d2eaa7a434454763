//! Single-flight cache of book structures
//!
//! Structures are served from two tiers:
//!
//! - a process-local map from book id to [CachedBook];
//! - the structure persisted in the document store, which warms the local
//!   map after a restart without downloading the archive.
//!
//! Only when neither tier has a structure is the EPUB downloaded and
//! parsed. Concurrent requests for the same book share one build, which
//! runs in its own task so that a caller going away never cancels it. A
//! finished build replaces the cache entry in one step; readers see either
//! the old or the new entry.
//!
//! The archive of a book whose structure came from the document store is
//! only downloaded on the first chapter request. If its digest no longer
//! matches the digest recorded in the structure, the book is parsed again
//! from that archive before the chapter is served.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::{
    archive::EpubArchive,
    config::SplitConfig,
    content::get_chapter,
    epub::EpubBook,
    error::EpubError,
    store::{DocumentStore, ObjectStore},
    structure::StructureBuilder,
    types::{BookStructure, ChapterContent},
};

/// A book held by the cache
#[derive(Debug)]
pub struct CachedBook {
    book_id: String,
    structure: BookStructure,
    source_url: String,
    archive: OnceCell<ArchiveState>,
    chapters: Mutex<HashMap<u32, Arc<ChapterContent>>>,
}

impl CachedBook {
    fn new(
        book_id: &str,
        structure: BookStructure,
        source_url: String,
        archive: Option<EpubArchive>,
    ) -> Self {
        Self {
            book_id: book_id.to_string(),
            structure,
            source_url,
            archive: OnceCell::new_with(archive.map(ArchiveState::Current)),
            chapters: Mutex::new(HashMap::new()),
        }
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn structure(&self) -> &BookStructure {
        &self.structure
    }

    /// Object store location of the archive
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Whether the archive has been downloaded
    pub fn has_archive(&self) -> bool {
        self.archive.initialized()
    }

    /// Number of chapters extracted so far
    pub fn cached_chapters(&self) -> usize {
        self.chapters.lock().len()
    }
}

type SharedBuild = Shared<BoxFuture<'static, Result<Arc<CachedBook>, EpubError>>>;

/// The downloaded archive of a cached book
#[derive(Debug, Clone)]
enum ArchiveState {
    /// The archive the structure was built from
    Current(EpubArchive),
    /// A different archive than the one the structure was built from
    Stale(EpubArchive),
}

const UNDECIDED: u8 = 0;
const FORCED: u8 = 1;
const STORED: u8 = 2;

/// Whether a build may answer with the persisted structure
///
/// A build started by [StructureCache::get_or_build] may serve the
/// persisted structure until a rebuild claims it; once it has served the
/// persisted structure it can no longer be claimed.
struct StoredGate(AtomicU8);

impl StoredGate {
    fn new(forced: bool) -> Self {
        Self(AtomicU8::new(if forced { FORCED } else { UNDECIDED }))
    }

    /// Claims the persisted structure for the build
    fn take_stored(&self) -> bool {
        self.0
            .compare_exchange(UNDECIDED, STORED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Turns the build into a fresh parse, unless it already used the persisted structure
    fn force(&self) -> bool {
        match self
            .0
            .compare_exchange(UNDECIDED, FORCED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == FORCED,
        }
    }
}

/// Where a build takes its structure from
#[derive(Clone)]
enum BuildSource {
    /// The persisted structure when there is one and the build was not
    /// claimed by a rebuild, else a download
    Stored,
    /// Always download and parse
    Download,
    /// Parse an archive that has already been downloaded
    Archive(EpubArchive),
}

struct PendingBuild {
    generation: u64,
    gate: Arc<StoredGate>,
    future: SharedBuild,
}

#[derive(Default)]
struct Slot {
    current: Option<Arc<CachedBook>>,
    pending: Option<PendingBuild>,
}

struct CacheInner {
    documents: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    config: SplitConfig,
    builder: StructureBuilder,
    slots: Mutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
}

/// Cache of book structures and extracted chapters, keyed by book id
///
/// Cloning the cache is cheap; clones share the same entries.
#[derive(Clone)]
pub struct StructureCache {
    inner: Arc<CacheInner>,
}

impl StructureCache {
    /// Creates an empty cache
    ///
    /// Fails with [EpubError::InvalidConfig] when a title pattern does not compile.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        config: SplitConfig,
    ) -> Result<Self, EpubError> {
        let builder = StructureBuilder::new(&config)?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                documents,
                objects,
                config,
                builder,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.inner.config
    }

    /// Returns the cached book, building it when needed
    ///
    /// ## Return
    /// - `Ok(Arc<CachedBook>)`: The cached or freshly built book
    /// - `Err(EpubError::BookNotFound)`: The document store has no such book
    /// - `Err(EpubError::MissingEpub)`: The record has no EPUB location
    /// - `Err(EpubError)`: Download, parse or storage failures; nothing is cached
    pub async fn get_or_build(&self, book_id: &str) -> Result<Arc<CachedBook>, EpubError> {
        let build = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(book_id.to_string()).or_default();

            if let Some(book) = &slot.current {
                debug!("Structure cache hit for \"{}\".", book_id);
                return Ok(Arc::clone(book));
            }

            match &slot.pending {
                Some(pending) => pending.future.clone(),
                None => self.start_build(slot, book_id, BuildSource::Stored),
            }
        };

        build.await
    }

    /// Parses the book again, ignoring the persisted structure
    ///
    /// The current entry keeps being served until the new one is ready.
    /// A rebuild joins the build in flight when that build parses the
    /// archive, or can still be made to; only one parse of a book runs at
    /// a time.
    pub async fn rebuild(&self, book_id: &str) -> Result<Arc<CachedBook>, EpubError> {
        let build = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(book_id.to_string()).or_default();

            match &slot.pending {
                Some(pending) if pending.gate.force() => pending.future.clone(),
                _ => self.start_build(slot, book_id, BuildSource::Download),
            }
        };

        build.await
    }

    /// Drops the entry of a book
    ///
    /// A build in flight still answers its waiters, but its result is not
    /// cached. Returns whether there was anything to drop.
    pub fn invalidate(&self, book_id: &str) -> bool {
        let removed = self.inner.slots.lock().remove(book_id).is_some();
        if removed {
            debug!("Invalidated the structure of \"{}\".", book_id);
        }
        removed
    }

    /// Drops every entry
    pub fn clear(&self) {
        self.inner.slots.lock().clear();
    }

    /// Number of books with a built structure
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .lock()
            .values()
            .filter(|slot| slot.current.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cached(&self, book_id: &str) -> bool {
        self.inner
            .slots
            .lock()
            .get(book_id)
            .is_some_and(|slot| slot.current.is_some())
    }

    /// Returns the content of a chapter, extracting it on first use
    ///
    /// ## Return
    /// - `Ok(Arc<ChapterContent>)`: The memoized chapter content
    /// - `Err(EpubError::ChapterNotFound)`: No such chapter, or its document is missing
    /// - `Err(EpubError)`: Any failure of [StructureCache::get_or_build] or of the archive download
    pub async fn get_chapter(
        &self,
        book_id: &str,
        chapter_number: u32,
    ) -> Result<Arc<ChapterContent>, EpubError> {
        let book = self.get_or_build(book_id).await?;
        let (_, content) = self.chapter_of(book, chapter_number).await?;
        Ok(content)
    }

    /// Extracts a chapter of `book`
    ///
    /// Also returns the book that served it, which differs from `book` when
    /// the entry was replaced meanwhile or the archive had been replaced and
    /// the book was parsed again.
    pub(crate) async fn chapter_of(
        &self,
        book: Arc<CachedBook>,
        chapter_number: u32,
    ) -> Result<(Arc<CachedBook>, Arc<ChapterContent>), EpubError> {
        let mut book = self.latest(book);

        // unknown numbers fail before any download
        book.structure.by_global_number(chapter_number)?;

        let memoized = book.chapters.lock().get(&chapter_number).cloned();
        if let Some(content) = memoized {
            return Ok((book, content));
        }

        let archive = loop {
            match self.archive_of(&book).await? {
                ArchiveState::Current(archive) => break archive,
                ArchiveState::Stale(archive) => {
                    warn!(
                        "The archive of \"{}\" changed since its structure was built, parsing it again.",
                        book.book_id
                    );
                    book = self.build_from_archive(&book, archive).await?;
                }
            }
        };

        let location = book.structure.by_global_number(chapter_number)?;
        let href = location.chapter.href;
        let title = location.chapter.title;
        let content = tokio::task::spawn_blocking(move || get_chapter(&archive, &href, &title))
            .await
            .map_err(|err| EpubError::BuildAborted {
                book_id: book.book_id.clone(),
                reason: err.to_string(),
            })??;

        let content = Arc::clone(
            book.chapters
                .lock()
                .entry(chapter_number)
                .or_insert_with(|| Arc::new(content)),
        );
        Ok((book, content))
    }

    /// The entry currently cached for the book of `book`, or `book` itself
    fn latest(&self, book: Arc<CachedBook>) -> Arc<CachedBook> {
        self.inner
            .slots
            .lock()
            .get(&book.book_id)
            .and_then(|slot| slot.current.clone())
            .unwrap_or(book)
    }

    /// The archive of a book, downloading it on first use
    ///
    /// Concurrent callers share one download, also when the archive turns
    /// out to be stale.
    async fn archive_of(&self, book: &CachedBook) -> Result<ArchiveState, EpubError> {
        let archive = book
            .archive
            .get_or_try_init(|| self.fetch_archive(book))
            .await?;

        Ok(archive.clone())
    }

    async fn fetch_archive(&self, book: &CachedBook) -> Result<ArchiveState, EpubError> {
        debug!("Downloading the archive of \"{}\".", book.book_id);
        let bytes = self.inner.objects.download(&book.source_url).await?;
        let expected = book.structure.source_digest.clone();

        let (archive, is_current) = tokio::task::spawn_blocking(move || {
            let archive = EpubArchive::open(bytes)?;
            let is_current = expected.is_empty() || archive.digest() == expected;
            Ok::<_, EpubError>((archive, is_current))
        })
        .await
        .map_err(|err| EpubError::BuildAborted {
            book_id: book.book_id.clone(),
            reason: err.to_string(),
        })??;

        if is_current {
            Ok(ArchiveState::Current(archive))
        } else {
            Ok(ArchiveState::Stale(archive))
        }
    }

    /// Replaces the stale entry `stale` by parsing an archive already at hand
    ///
    /// When the entry was replaced meanwhile, the replacement is returned
    /// without parsing.
    async fn build_from_archive(
        &self,
        stale: &Arc<CachedBook>,
        archive: EpubArchive,
    ) -> Result<Arc<CachedBook>, EpubError> {
        let build = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(stale.book_id.clone()).or_default();

            if let Some(current) = &slot.current {
                if !Arc::ptr_eq(current, stale) {
                    return Ok(Arc::clone(current));
                }
            }

            match &slot.pending {
                Some(pending) if pending.gate.force() => pending.future.clone(),
                _ => self.start_build(slot, &stale.book_id, BuildSource::Archive(archive)),
            }
        };

        build.await
    }

    /// Spawns a build and registers it as the pending build of `slot`
    ///
    /// Must be called with the slot map locked, so the build cannot finish
    /// before it is registered.
    fn start_build(&self, slot: &mut Slot, book_id: &str, source: BuildSource) -> SharedBuild {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let gate = Arc::new(StoredGate::new(!matches!(source, BuildSource::Stored)));

        let inner = Arc::clone(&self.inner);
        let id = book_id.to_string();
        let build_gate = Arc::clone(&gate);
        let task = tokio::spawn(async move {
            let result = inner.build(&id, source, &build_gate).await;
            inner.finish(&id, generation, &result);
            result
        });

        let inner = Arc::clone(&self.inner);
        let id = book_id.to_string();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    let result = Err(EpubError::BuildAborted {
                        book_id: id.clone(),
                        reason: err.to_string(),
                    });
                    inner.finish(&id, generation, &result);
                    result
                }
            }
        }
        .boxed()
        .shared();

        slot.pending = Some(PendingBuild {
            generation,
            gate,
            future: future.clone(),
        });
        future
    }
}

impl CacheInner {
    async fn build(
        &self,
        book_id: &str,
        source: BuildSource,
        gate: &StoredGate,
    ) -> Result<Arc<CachedBook>, EpubError> {
        let record = self
            .documents
            .get(book_id)
            .await?
            .ok_or_else(|| EpubError::BookNotFound {
                book_id: book_id.to_string(),
            })?;
        let url = record
            .epub_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| EpubError::MissingEpub {
                book_id: book_id.to_string(),
            })?;

        let archive = match source {
            BuildSource::Stored => {
                if let Some(structure) = record.structure.filter(|_| gate.take_stored()) {
                    debug!("Loaded the persisted structure of \"{}\".", book_id);
                    return Ok(Arc::new(CachedBook::new(book_id, structure, url, None)));
                }
                None
            }
            BuildSource::Download => None,
            BuildSource::Archive(archive) => Some(archive),
        };

        let bytes = match archive {
            Some(archive) => ArchiveOrBytes::Archive(archive),
            None => {
                debug!("Downloading \"{}\" for \"{}\".", url, book_id);
                ArchiveOrBytes::Bytes(self.objects.download(&url).await?)
            }
        };

        let builder = self.builder.clone();
        let (archive, structure) = tokio::task::spawn_blocking(move || {
            let archive = match bytes {
                ArchiveOrBytes::Archive(archive) => archive,
                ArchiveOrBytes::Bytes(bytes) => EpubArchive::open(bytes)?,
            };
            EpubBook::from_archive(archive, &builder).map(EpubBook::into_parts)
        })
        .await
        .map_err(|err| EpubError::BuildAborted {
            book_id: book_id.to_string(),
            reason: err.to_string(),
        })??;

        if self.config.persist_structure {
            if let Err(err) = self.documents.put(book_id, &structure).await {
                warn!("Unable to persist the structure of \"{}\": {}", book_id, err);
            }
        }

        info!(
            "Built the structure of \"{}\": {} chapters.",
            book_id, structure.total_chapters
        );
        Ok(Arc::new(CachedBook::new(book_id, structure, url, Some(archive))))
    }

    /// Installs the result of a build, unless the slot moved on meanwhile
    fn finish(&self, book_id: &str, generation: u64, result: &Result<Arc<CachedBook>, EpubError>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(book_id) else {
            return;
        };

        let is_latest = slot
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);
        if !is_latest {
            return;
        }

        slot.pending = None;
        match result {
            Ok(book) => slot.current = Some(Arc::clone(book)),
            Err(err) => debug!("The build of \"{}\" failed: {}", book_id, err),
        }

        if slot.current.is_none() {
            slots.remove(book_id);
        }
    }
}

enum ArchiveOrBytes {
    Archive(EpubArchive),
    Bytes(Vec<u8>),
}
