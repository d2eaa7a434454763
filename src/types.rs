use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Manifest of a publication, keyed by item id in document order
pub type Manifest = IndexMap<String, ManifestEntry>;

/// Represents a resource item declared in the EPUB manifest
///
/// Every resource that is part of the publication is declared in the
/// manifest with an id, a location and a media type. The location is kept
/// twice: `href` as written in the OPF file, and `path` resolved against the
/// directory of the OPF file so it can be looked up in the archive directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// The unique id of the item within the manifest
    pub id: String,

    /// The href attribute exactly as declared
    pub href: String,

    /// The archive-root path of the resource
    pub path: String,

    /// The media type of the resource
    pub media_type: String,

    /// Optional space-separated properties, such as `nav`
    pub properties: Option<String>,
}

impl ManifestEntry {
    /// Whether the resource is an XHTML content document
    pub fn is_xhtml(&self) -> bool {
        self.media_type == "application/xhtml+xml"
    }

    /// Whether the resource is an EPUB 2 NCX document
    pub fn is_ncx(&self) -> bool {
        self.media_type == "application/x-dtbncx+xml"
    }

    /// Whether the properties attribute lists `name`
    pub fn has_property(&self, name: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|properties| properties.split_whitespace().any(|value| value == name))
    }
}

/// Represents an item in the EPUB spine
///
/// The spine defines the default reading order of the content documents.
/// `order` is the 0-based position of the itemref inside `<spine>` and never
/// changes once the package document has been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// The id of the referenced manifest item
    pub idref: String,

    /// The archive-root path of the referenced manifest item
    pub href: String,

    /// Position in the reading order
    pub order: u32,

    /// Whether the item is part of the linear reading order
    pub linear: bool,
}

/// The reading order of a publication
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spine {
    pub items: Vec<SpineItem>,

    /// The manifest id of the NCX document (the `toc` attribute), if any
    pub toc: Option<String>,
}

impl Spine {
    /// Position of the first spine item pointing at `href`
    pub fn position_of(&self, href: &str) -> Option<u32> {
        self.items
            .iter()
            .find(|item| item.href == href)
            .map(|item| item.order)
    }
}

/// Descriptive metadata taken from the OPF `<metadata>` element
///
/// Missing fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageMetadata {
    pub title: String,
    pub creator: String,
    pub language: String,
    pub publisher: String,
}

/// A raw table of contents entry, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    /// The visible label of the entry
    pub title: String,

    /// The archive-root path the entry points at, without fragment
    pub href: String,
}

impl NavEntry {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
        }
    }
}

/// A numbered chapter of the book structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Book-wide number, 1-based and gapless in table of contents order
    pub chapter_number: u32,

    /// Position within the enclosing part
    ///
    /// For books without parts every chapter sits in its own synthetic
    /// part, and this is the chapter's top-level position instead.
    pub local_chapter_number: u32,

    pub title: String,

    /// Archive-root path of the chapter document
    pub href: String,

    /// Spine position of the chapter document
    pub order: u32,
}

/// A top-level grouping of chapters inferred from table of contents titles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub part_number: u32,

    pub title: String,

    /// The document the part heading points at, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_href: Option<String>,

    pub chapters: Vec<Chapter>,
}

/// The shape of a book structure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    /// Flat list of chapters; also used when no navigation is available
    #[default]
    ChaptersOnly,

    /// Chapters grouped under part headings
    PartsAndChapters,

    /// Chapters grouped under section headings (persisted by other producers)
    Sections,

    /// Chapters grouped under book headings (persisted by other producers)
    Books,
}

/// The navigable Part/Chapter structure of a book
///
/// `total_parts` and `total_chapters` always equal the counts derived from
/// `parts`; chapter numbers run from 1 to `total_chapters` without gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookStructure {
    #[serde(rename = "type")]
    pub kind: StructureKind,

    pub has_parts: bool,

    pub has_chapters: bool,

    pub total_parts: u32,

    pub total_chapters: u32,

    pub parts: Vec<Part>,

    #[serde(default)]
    pub metadata: PackageMetadata,

    /// SHA-1 digest of the archive this structure was derived from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_digest: String,
}

impl BookStructure {
    /// The structure of a book whose navigation is unavailable
    pub fn empty(metadata: PackageMetadata) -> Self {
        Self {
            metadata,
            ..Default::default()
        }
    }

    /// Whether the book could be navigated at all
    pub fn is_navigable(&self) -> bool {
        self.total_chapters > 0
    }

    /// All chapters in book order together with their enclosing part
    pub fn chapters(&self) -> impl Iterator<Item = (&Part, &Chapter)> {
        self.parts
            .iter()
            .flat_map(|part| part.chapters.iter().map(move |chapter| (part, chapter)))
    }
}

/// Sanitized content of a single chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    /// The first heading of the document, or the table of contents title
    pub title: String,

    /// Inner HTML of the document body after sanitizing
    pub html: String,

    /// Number of whitespace-delimited words in the visible text
    pub word_count: usize,
}

#[cfg(test)]
mod tests {
    use crate::types::{
        BookStructure, Chapter, ManifestEntry, Part, PackageMetadata, StructureKind,
    };

    fn chapter(number: u32, local: u32) -> Chapter {
        Chapter {
            chapter_number: number,
            local_chapter_number: local,
            title: format!("Chapter {}", number),
            href: format!("OEBPS/ch{}.xhtml", number),
            order: number,
        }
    }

    #[test]
    fn test_manifest_entry_properties() {
        let entry = ManifestEntry {
            id: "nav".to_string(),
            href: "nav.xhtml".to_string(),
            path: "OEBPS/nav.xhtml".to_string(),
            media_type: "application/xhtml+xml".to_string(),
            properties: Some("scripted nav".to_string()),
        };

        assert!(entry.is_xhtml());
        assert!(!entry.is_ncx());
        assert!(entry.has_property("nav"));
        assert!(!entry.has_property("na"));
    }

    #[test]
    fn test_structure_chapters_iterates_in_book_order() {
        let structure = BookStructure {
            kind: StructureKind::PartsAndChapters,
            has_parts: true,
            has_chapters: true,
            total_parts: 2,
            total_chapters: 3,
            parts: vec![
                Part {
                    part_number: 1,
                    title: "Part I".to_string(),
                    start_href: None,
                    chapters: vec![chapter(1, 1), chapter(2, 2)],
                },
                Part {
                    part_number: 2,
                    title: "Part II".to_string(),
                    start_href: None,
                    chapters: vec![chapter(3, 1)],
                },
            ],
            metadata: PackageMetadata::default(),
            source_digest: String::new(),
        };

        let numbers = structure
            .chapters()
            .map(|(part, chapter)| (part.part_number, chapter.chapter_number))
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![(1, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_structure_serializes_kind_as_type() {
        let structure = BookStructure::empty(PackageMetadata::default());
        let json = serde_json::to_value(&structure).unwrap();
        assert_eq!(json["type"], "chapters_only");
        assert_eq!(json["total_chapters"], 0);
        assert!(json.get("source_digest").is_none());

        let restored: BookStructure = serde_json::from_value(json).unwrap();
        assert_eq!(restored, structure);
        assert!(!restored.is_navigable());
    }

    #[test]
    fn test_structure_accepts_persisted_kinds() {
        let json = r#"{"type":"sections","has_parts":true,"has_chapters":false,
            "total_parts":0,"total_chapters":0,"parts":[]}"#;
        let structure: BookStructure = serde_json::from_str(json).unwrap();
        assert_eq!(structure.kind, StructureKind::Sections);
        assert_eq!(structure.metadata, PackageMetadata::default());
    }
}
