use std::{path::Path, sync::Arc};

use log::info;

use crate::{
    archive::EpubArchive,
    config::SplitConfig,
    content::get_chapter,
    error::EpubError,
    navigation::extract_toc,
    package::{CONTAINER_PATH, Package, locate_opf, parse_opf},
    structure::StructureBuilder,
    types::{BookStructure, ChapterContent, NavEntry},
    utils::parent_dir,
};

/// A parsed EPUB publication, split into parts and chapters
///
/// The `EpubBook` runs the whole parsing pipeline over one in-memory
/// archive: it locates the package document through the container file,
/// reads the manifest and spine, flattens the table of contents and turns
/// it into a numbered [BookStructure]. Chapter content is extracted on
/// demand from the same archive.
///
/// The archive handle is shared, so an `EpubBook` can be parsed on a
/// blocking thread and its archive handed to other tasks afterwards.
#[derive(Debug, Clone)]
pub struct EpubBook {
    archive: EpubArchive,
    package: Package,
    toc: Vec<NavEntry>,
    structure: BookStructure,
}

impl EpubBook {
    /// Parses an EPUB from its raw bytes
    ///
    /// ## Parameters
    /// - `bytes`: The complete content of the `.epub` file
    /// - `config`: Title patterns and structure policy
    ///
    /// ## Return
    /// - `Ok(EpubBook)`: The parsed publication
    /// - `Err(EpubError)`: The archive, container or package document is unusable,
    ///   or the configured patterns are invalid
    ///
    /// ## Notes
    /// - A missing or malformed table of contents is not an error; the
    ///   structure is then empty (or built from the spine, when configured).
    pub fn from_bytes(
        bytes: impl Into<Arc<[u8]>>,
        config: &SplitConfig,
    ) -> Result<Self, EpubError> {
        let builder = StructureBuilder::new(config)?;
        Self::from_archive(EpubArchive::open(bytes)?, &builder)
    }

    /// Reads and parses an EPUB file
    pub fn open<P: AsRef<Path>>(path: P, config: &SplitConfig) -> Result<Self, EpubError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes, config)
    }

    /// Parses an already opened archive
    pub fn from_archive(
        archive: EpubArchive,
        builder: &StructureBuilder,
    ) -> Result<Self, EpubError> {
        // Parsing process
        // 1. Parse `META-INF/container.xml` to find the OPF file
        // 2. Parse the OPF file for manifest, spine and metadata
        // 3. Flatten the navigation document or NCX
        // 4. Classify and number the entries

        let package = load_package(&archive)?;
        let toc = extract_toc(&archive, &package);

        let mut structure = builder.build(&toc, &package.spine);
        structure.metadata = package.metadata.clone();
        structure.source_digest = archive.digest();

        info!(
            "Parsed \"{}\": {} parts, {} chapters from {} table of contents entries.",
            structure.metadata.title,
            structure.total_parts,
            structure.total_chapters,
            toc.len()
        );

        Ok(Self {
            archive,
            package,
            toc,
            structure,
        })
    }

    pub fn archive(&self) -> &EpubArchive {
        &self.archive
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    /// The flattened table of contents the structure was built from
    pub fn toc(&self) -> &[NavEntry] {
        &self.toc
    }

    pub fn structure(&self) -> &BookStructure {
        &self.structure
    }

    pub fn into_parts(self) -> (EpubArchive, BookStructure) {
        (self.archive, self.structure)
    }

    /// Extracts the content of a chapter by its global number
    ///
    /// ## Return
    /// - `Ok(ChapterContent)`: The cleaned chapter
    /// - `Err(EpubError::ChapterNotFound)`: There is no such chapter, or its
    ///   document is missing from the archive
    pub fn chapter(&self, chapter_number: u32) -> Result<ChapterContent, EpubError> {
        let location = self.structure.by_global_number(chapter_number)?;
        get_chapter(
            &self.archive,
            &location.chapter.href,
            &location.chapter.title,
        )
    }
}

/// Locates and parses the package document of an archive
pub(crate) fn load_package(archive: &EpubArchive) -> Result<Package, EpubError> {
    let container = archive
        .read_text(CONTAINER_PATH)
        .map_err(|err| EpubError::InvalidContainer {
            reason: err.to_string(),
        })?;
    let opf_path = locate_opf(&container)?;

    let opf = archive
        .read_text(&opf_path)
        .map_err(|err| EpubError::InvalidPackageDocument {
            reason: err.to_string(),
        })?;

    let mut package = parse_opf(&opf, parent_dir(&opf_path))?;
    package.opf_path = opf_path;
    Ok(package)
}
