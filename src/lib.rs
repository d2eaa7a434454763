//! Epub split library
//!
//! A Rust library that turns EPUB eBook files into a numbered Part/Chapter
//! structure and serves chapter content from a shared cache.
//!
//! The library reads the package document and the table of contents of
//! EPUB 2 and EPUB 3 books, classifies every navigation entry as a part
//! heading or a chapter, and numbers the chapters both globally and inside
//! their part. Chapter documents are cleaned into display HTML on demand.
//!
//! ## Features
//!
//! - Parse EPUB containers, package documents, navigation documents and NCX files.
//! - Configurable part and chapter title patterns, loadable from TOML.
//! - Single-flight structure cache backed by a persistent document store.
//! - Chapter lookups by global number, by part and local number, and by range.
//!
//! ## Quick Start
//!
//! ### Split an EPUB File
//!
//! ```rust, ignore
//! # use epub_split::{config::SplitConfig, epub::EpubBook};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let book = EpubBook::open("path/to/epub/file.epub", &SplitConfig::default())?;
//!
//! let structure = book.structure();
//! println!("{} parts, {} chapters", structure.total_parts, structure.total_chapters);
//!
//! let chapter = book.chapter(1)?;
//! println!("{}: {} words", chapter.title, chapter.word_count);
//! # Ok(())
//! # }
//! ```
//!
//! ### Serve Chapters
//!
//! ```rust, ignore
//! # use std::sync::Arc;
//! # use epub_split::{
//! #     config::SplitConfig,
//! #     service::ChapterService,
//! #     store::{FsObjectStore, JsonDirectoryStore},
//! # };
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ChapterService::new(
//!     Arc::new(JsonDirectoryStore::new("data/books")),
//!     Arc::new(FsObjectStore::new("data/epubs")),
//!     SplitConfig::from_path("split.toml")?,
//! )?;
//!
//! let view = service.get_chapter_by_number("book-1", 3).await?;
//! let window = service.get_chapter_range("book-1", 1, 10).await?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod utils;

pub mod archive;
pub mod cache;
pub mod config;
pub mod content;
pub mod epub;
pub mod error;
pub mod navigation;
pub mod package;
pub mod query;
pub mod service;
pub mod store;
pub mod structure;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::StructureCache;
pub use config::SplitConfig;
pub use epub::EpubBook;
pub use error::EpubError;
pub use service::ChapterService;
pub use utils::DecodeBytes;
