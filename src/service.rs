//! Chapter query surface
//!
//! [ChapterService] answers the requests a reading application makes:
//! the structure of a book, a chapter by global number or by part and
//! local number, a window of chapter titles and the navigation tree. It
//! sits on top of the [StructureCache], so structures are built at most
//! once per book and chapters are extracted at most once per number.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    cache::StructureCache,
    config::SplitConfig,
    error::EpubError,
    query::{ChapterLocation, ChapterSummary, NavigationNode, PartSummary},
    store::{DocumentStore, ObjectStore},
    types::{BookStructure, Chapter, ChapterContent},
};

/// Neighbours of a chapter in book order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterNavigation {
    pub has_prev: bool,
    pub has_next: bool,
    pub prev_chapter: Option<u32>,
    pub next_chapter: Option<u32>,
}

impl From<&ChapterLocation> for ChapterNavigation {
    fn from(location: &ChapterLocation) -> Self {
        Self {
            has_prev: location.has_prev,
            has_next: location.has_next,
            prev_chapter: location.prev_chapter,
            next_chapter: location.next_chapter,
        }
    }
}

/// A chapter together with its part and content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterView {
    pub part: PartSummary,
    pub chapter: Chapter,
    pub content: ChapterContent,

    /// Present for lookups by global number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<ChapterNavigation>,
}

/// Structure and chapter queries over a [StructureCache]
#[derive(Clone)]
pub struct ChapterService {
    cache: StructureCache,
}

impl ChapterService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        config: SplitConfig,
    ) -> Result<Self, EpubError> {
        Ok(Self::from_cache(StructureCache::new(documents, objects, config)?))
    }

    pub fn from_cache(cache: StructureCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &StructureCache {
        &self.cache
    }

    /// Downloads and parses a book, replacing any cached or persisted structure
    pub async fn parse_structure(&self, book_id: &str) -> Result<BookStructure, EpubError> {
        let book = self.cache.rebuild(book_id).await?;
        Ok(book.structure().clone())
    }

    /// Returns the structure of a book, building it on first use
    pub async fn get_structure(&self, book_id: &str) -> Result<BookStructure, EpubError> {
        let book = self.cache.get_or_build(book_id).await?;
        Ok(book.structure().clone())
    }

    /// Returns a chapter by its global number, with its neighbours
    ///
    /// ## Return
    /// - `Ok(ChapterView)`: The chapter; `navigation` is always present
    /// - `Err(EpubError::ChapterNotFound)`: The book has no such chapter
    pub async fn get_chapter_by_number(
        &self,
        book_id: &str,
        chapter_number: u32,
    ) -> Result<ChapterView, EpubError> {
        let book = self.cache.get_or_build(book_id).await?;
        let (book, content) = self.cache.chapter_of(book, chapter_number).await?;
        let location = book.structure().by_global_number(chapter_number)?;

        Ok(ChapterView {
            navigation: Some(ChapterNavigation::from(&location)),
            part: location.part,
            chapter: location.chapter,
            content: content.as_ref().clone(),
        })
    }

    /// Returns a chapter by its part number and part-local number
    ///
    /// ## Return
    /// - `Ok(ChapterView)`: The chapter, without navigation
    /// - `Err(EpubError::PartNotFound)`: The book has no such part
    /// - `Err(EpubError::ChapterNotFound)`: The part has no such chapter
    pub async fn get_chapter_by_part_and_local(
        &self,
        book_id: &str,
        part_number: u32,
        local_number: u32,
    ) -> Result<ChapterView, EpubError> {
        let book = self.cache.get_or_build(book_id).await?;
        let location = book
            .structure()
            .by_part_and_local(part_number, local_number)?;

        let (book, content) = self
            .cache
            .chapter_of(book, location.chapter.chapter_number)
            .await?;
        let location = book
            .structure()
            .by_part_and_local(part_number, local_number)?;

        Ok(ChapterView {
            part: location.part,
            chapter: location.chapter,
            content: content.as_ref().clone(),
            navigation: None,
        })
    }

    /// Lists the chapters numbered `from..=to`
    ///
    /// The window is validated before the book is looked up, so an invalid
    /// range never triggers a build.
    pub async fn get_chapter_range(
        &self,
        book_id: &str,
        from: u32,
        to: u32,
    ) -> Result<Vec<ChapterSummary>, EpubError> {
        let max_window = self.cache.config().max_range_window;
        if from > to || to - from > max_window {
            return Err(EpubError::InvalidRange {
                from,
                to,
                max_window,
            });
        }

        let book = self.cache.get_or_build(book_id).await?;
        book.structure().range(from, to, max_window)
    }

    /// Returns the part/chapter navigation tree of a book
    pub async fn navigation_tree(&self, book_id: &str) -> Result<Vec<NavigationNode>, EpubError> {
        let book = self.cache.get_or_build(book_id).await?;
        Ok(book.structure().navigation_tree())
    }

    /// Drops the cached structure and chapters of a book
    pub fn invalidate(&self, book_id: &str) -> bool {
        self.cache.invalidate(book_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        config::SplitConfig,
        error::EpubError,
        service::ChapterService,
        testing::{EpubFixture, MemoryDocumentStore, MemoryObjectStore},
        types::StructureKind,
    };

    fn service() -> (ChapterService, Arc<MemoryObjectStore>, Arc<MemoryDocumentStore>) {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.insert(
            "books/dune.epub",
            EpubFixture::with_toc(&[
                ("Prologue", "prologue.xhtml"),
                ("Part I", "part1.xhtml"),
                ("Chapter 1", "ch1.xhtml"),
                ("Chapter 2", "ch2.xhtml"),
                ("Part II", "part2.xhtml"),
                ("Chapter 3", "ch3.xhtml"),
            ])
            .into_bytes(),
        );
        objects.insert(
            "books/flat.epub",
            EpubFixture::with_toc(&[("One", "one.xhtml"), ("Two", "two.xhtml")]).into_bytes(),
        );

        let documents = Arc::new(MemoryDocumentStore::new());
        documents.insert("dune", Some("books/dune.epub"));
        documents.insert("flat", Some("books/flat.epub"));
        documents.insert("draft", None);

        let service =
            ChapterService::new(documents.clone(), objects.clone(), SplitConfig::default())
                .unwrap();
        (service, objects, documents)
    }

    #[tokio::test]
    async fn test_get_structure() {
        let (service, objects, _) = service();

        let structure = service.get_structure("dune").await.unwrap();
        assert_eq!(structure.kind, StructureKind::PartsAndChapters);
        assert_eq!(structure.total_parts, 3);
        assert_eq!(structure.total_chapters, 4);
        assert_eq!(structure.parts[0].title, "Main Content");

        service.get_structure("dune").await.unwrap();
        assert_eq!(objects.downloads(), 1);

        let flat = service.get_structure("flat").await.unwrap();
        assert_eq!(flat.kind, StructureKind::ChaptersOnly);
        assert_eq!(flat.total_parts, 2);
    }

    #[tokio::test]
    async fn test_get_chapter_by_number() {
        let (service, _, _) = service();

        let view = service.get_chapter_by_number("dune", 3).await.unwrap();
        assert_eq!(view.part.part_number, 2);
        assert_eq!(view.part.title, "Part I");
        assert_eq!(view.chapter.title, "Chapter 2");
        assert_eq!(view.chapter.local_chapter_number, 2);
        assert_eq!(view.content.title, "Chapter 2");
        assert!(view.content.html.contains("chapter-paragraph"));

        let navigation = view.navigation.unwrap();
        assert!(navigation.has_prev && navigation.has_next);
        assert_eq!(navigation.prev_chapter, Some(2));
        assert_eq!(navigation.next_chapter, Some(4));

        assert!(matches!(
            service.get_chapter_by_number("dune", 9).await,
            Err(EpubError::ChapterNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_chapter_by_part_and_local() {
        let (service, _, _) = service();

        let view = service
            .get_chapter_by_part_and_local("dune", 3, 1)
            .await
            .unwrap();
        assert_eq!(view.chapter.chapter_number, 4);
        assert_eq!(view.content.title, "Chapter 3");
        assert_eq!(view.navigation, None);

        assert_eq!(
            service
                .get_chapter_by_part_and_local("dune", 4, 1)
                .await
                .unwrap_err(),
            EpubError::PartNotFound { part_number: 4 }
        );
        assert!(matches!(
            service.get_chapter_by_part_and_local("dune", 1, 2).await,
            Err(EpubError::ChapterNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_chapter_range() {
        let (service, objects, _) = service();

        assert!(matches!(
            service.get_chapter_range("dune", 1, 20).await,
            Err(EpubError::InvalidRange { .. })
        ));
        assert!(matches!(
            service.get_chapter_range("dune", 3, 2).await,
            Err(EpubError::InvalidRange { .. })
        ));
        assert_eq!(objects.downloads(), 0);

        let chapters = service.get_chapter_range("dune", 2, 10).await.unwrap();
        let titles = chapters
            .iter()
            .map(|chapter| (chapter.chapter_number, chapter.part_title.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(titles, vec![(2, "Part I"), (3, "Part I"), (4, "Part II")]);
    }

    #[tokio::test]
    async fn test_missing_books() {
        let (service, _, _) = service();

        assert!(matches!(
            service.get_structure("unknown").await,
            Err(EpubError::BookNotFound { .. })
        ));
        assert!(matches!(
            service.get_chapter_by_number("draft", 1).await,
            Err(EpubError::MissingEpub { .. })
        ));
    }

    #[tokio::test]
    async fn test_parse_structure_and_navigation_tree() {
        let (service, objects, documents) = service();

        let tree = service.navigation_tree("flat").await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].id, "part-2");
        assert_eq!(tree[1].children[0].id, "chapter-2");

        let structure = service.parse_structure("flat").await.unwrap();
        assert_eq!(structure.total_chapters, 2);
        assert_eq!(objects.downloads(), 2);
        assert_eq!(documents.structure("flat"), Some(structure));

        assert!(service.invalidate("flat"));
        assert!(!service.cache().is_cached("flat"));
    }
}
