//! Splitting configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! max_range_window = 10
//! default_to_chapter = true
//! implicit_part_title = "Main Content"
//! part_patterns = ['^Part\s+[IVX\d]+', '^Book\s+[IVX\d]+']
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EpubError;

/// Title patterns that open a new part, tried before the chapter patterns
pub const DEFAULT_PART_PATTERNS: [&str; 5] = [
    r"^Part\s+[IVX\d]+",
    r"^Phần\s+\d+",
    r"^Book\s+[IVX\d]+",
    r"^Volume\s+[IVX\d]+",
    r"^Section\s+\d+",
];

/// Title patterns that mark a chapter
pub const DEFAULT_CHAPTER_PATTERNS: [&str; 4] = [
    r"^Chapter\s+[IVX\d]+",
    r"^Chương\s+\d+",
    r"^Ch\.\s*\d+",
    r"^\d+\.",
];

/// Options controlling how a table of contents becomes a book structure
/// and how the cache and query layer behave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// The widest allowed `to - from` of a chapter range request
    pub max_range_window: u32,

    /// Case-insensitive regular expressions for part headings
    pub part_patterns: Vec<String>,

    /// Case-insensitive regular expressions for chapter headings
    pub chapter_patterns: Vec<String>,

    /// Whether titles matching no pattern still count as chapters
    pub default_to_chapter: bool,

    /// Title of the part opened for chapters that precede the first part heading
    pub implicit_part_title: String,

    /// Whether freshly built structures are written back to the document store
    pub persist_structure: bool,

    /// Whether an empty table of contents falls back to one chapter per spine item
    pub spine_fallback: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_range_window: 10,
            part_patterns: DEFAULT_PART_PATTERNS.iter().map(|s| s.to_string()).collect(),
            chapter_patterns: DEFAULT_CHAPTER_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_to_chapter: true,
            implicit_part_title: "Main Content".to_string(),
            persist_structure: true,
            spine_fallback: false,
        }
    }
}

impl SplitConfig {
    /// Parses a configuration from TOML text
    ///
    /// Patterns are compiled once here so that an invalid expression is
    /// reported at load time rather than on the first build.
    pub fn from_toml_str(content: &str) -> Result<Self, EpubError> {
        let config: SplitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, EpubError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            EpubError::InvalidConfig {
                reason: format!("unable to read \"{}\": {}", path.as_ref().display(), err),
            }
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks that every pattern compiles
    pub fn validate(&self) -> Result<(), EpubError> {
        for pattern in self.part_patterns.iter().chain(&self.chapter_patterns) {
            regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()?;
        }
        Ok(())
    }
}
