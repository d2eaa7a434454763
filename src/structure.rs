//! Part/Chapter structure inference
//!
//! Table of contents titles are classified by an ordered list of
//! case-insensitive patterns into part headings, chapter headings, or
//! neither. A single pass over the classified entries then numbers the
//! chapters and groups them into parts:
//!
//! - when any title anywhere is a part heading, chapters are grouped under
//!   the most recent part, and chapters that come before the first part
//!   heading are gathered in an implicit part;
//! - otherwise every chapter becomes its own single-chapter part, so that
//!   consumers can always walk `parts[].chapters[]`.
//!
//! Chapter numbers are global, 1-based and contiguous in table of contents
//! order. Part-local numbers restart at 1 in every part.

use std::collections::HashMap;

use log::{debug, warn};
use regex::{Regex, RegexBuilder};

use crate::{
    config::SplitConfig,
    error::EpubError,
    types::{BookStructure, Chapter, NavEntry, Part, Spine, StructureKind},
};

/// Classification of a table of contents title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleClass {
    Part,
    Chapter,
    Unclassified,
}

/// A compiled title pattern together with the class it assigns
#[derive(Debug, Clone)]
pub struct TitleMatcher {
    pattern: Regex,
    class: TitleClass,
}

impl TitleMatcher {
    /// Compiles `pattern` case-insensitively
    pub fn new(pattern: &str, class: TitleClass) -> Result<Self, EpubError> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { pattern, class })
    }

    pub fn matches(&self, title: &str) -> bool {
        self.pattern.is_match(title)
    }
}

/// Ordered title matchers; the first match decides the class
#[derive(Debug, Clone)]
pub struct TitleClassifier {
    matchers: Vec<TitleMatcher>,
}

impl TitleClassifier {
    /// Builds a classifier trying every part pattern before any chapter pattern
    pub fn new<P, C>(part_patterns: P, chapter_patterns: C) -> Result<Self, EpubError>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let mut matchers = Vec::new();
        for pattern in part_patterns {
            matchers.push(TitleMatcher::new(pattern.as_ref(), TitleClass::Part)?);
        }
        for pattern in chapter_patterns {
            matchers.push(TitleMatcher::new(pattern.as_ref(), TitleClass::Chapter)?);
        }

        Ok(Self { matchers })
    }

    pub fn from_config(config: &SplitConfig) -> Result<Self, EpubError> {
        Self::new(&config.part_patterns, &config.chapter_patterns)
    }

    pub fn classify(&self, title: &str) -> TitleClass {
        let title = title.trim();
        self.matchers
            .iter()
            .find(|matcher| matcher.matches(title))
            .map(|matcher| matcher.class)
            .unwrap_or(TitleClass::Unclassified)
    }
}

/// Turns a flattened table of contents into a [BookStructure]
#[derive(Debug, Clone)]
pub struct StructureBuilder {
    classifier: TitleClassifier,
    default_to_chapter: bool,
    implicit_part_title: String,
    spine_fallback: bool,
}

impl StructureBuilder {
    pub fn new(config: &SplitConfig) -> Result<Self, EpubError> {
        Ok(Self {
            classifier: TitleClassifier::from_config(config)?,
            default_to_chapter: config.default_to_chapter,
            implicit_part_title: config.implicit_part_title.clone(),
            spine_fallback: config.spine_fallback,
        })
    }

    pub fn classifier(&self) -> &TitleClassifier {
        &self.classifier
    }

    /// Builds the structure of a book
    ///
    /// ## Parameters
    /// - `entries`: The flattened table of contents, in document order
    /// - `spine`: The reading order; a chapter whose href is not in the spine is skipped
    ///
    /// ## Return
    /// The numbered structure. Metadata and source digest are left empty for
    /// the caller to fill in. An empty table of contents produces an empty
    /// `chapters_only` structure unless the spine fallback is enabled.
    pub fn build(&self, entries: &[NavEntry], spine: &Spine) -> BookStructure {
        let fallback_entries;
        let entries = if entries.is_empty() && self.spine_fallback {
            fallback_entries = spine
                .items
                .iter()
                .enumerate()
                .map(|(index, item)| NavEntry::new(format!("Chapter {}", index + 1), &item.href))
                .collect::<Vec<_>>();
            debug!("Using {} spine items as chapters.", fallback_entries.len());
            fallback_entries.as_slice()
        } else {
            entries
        };

        let mut lookup = HashMap::with_capacity(spine.items.len());
        for item in &spine.items {
            lookup.entry(item.href.as_str()).or_insert(item.order);
        }

        let classes = entries
            .iter()
            .map(|entry| self.classifier.classify(&entry.title))
            .collect::<Vec<_>>();
        let has_part_structure = classes.contains(&TitleClass::Part);

        let mut parts = Vec::<Part>::new();
        let mut current_part = None::<Part>;
        let mut chapter_number = 0;

        for (entry, class) in entries.iter().zip(classes) {
            let class = match class {
                TitleClass::Unclassified if self.default_to_chapter => TitleClass::Chapter,
                TitleClass::Unclassified => {
                    debug!("Skipping unclassified entry \"{}\".", entry.title);
                    continue;
                }
                class => class,
            };

            if class == TitleClass::Part {
                if let Some(part) = current_part.take() {
                    parts.push(part);
                }
                current_part = Some(Part {
                    part_number: parts.len() as u32 + 1,
                    title: entry.title.clone(),
                    start_href: Some(entry.href.clone()),
                    chapters: Vec::new(),
                });
                continue;
            }

            let Some(&order) = lookup.get(entry.href.as_str()) else {
                warn!(
                    "Skipping chapter \"{}\": \"{}\" is not in the spine.",
                    entry.title, entry.href
                );
                continue;
            };

            chapter_number += 1;

            if has_part_structure {
                let part = current_part.get_or_insert_with(|| Part {
                    part_number: parts.len() as u32 + 1,
                    title: self.implicit_part_title.clone(),
                    start_href: None,
                    chapters: Vec::new(),
                });

                part.chapters.push(Chapter {
                    chapter_number,
                    local_chapter_number: part.chapters.len() as u32 + 1,
                    title: entry.title.clone(),
                    href: entry.href.clone(),
                    order,
                });
            } else {
                let part_number = parts.len() as u32 + 1;
                parts.push(Part {
                    part_number,
                    title: entry.title.clone(),
                    start_href: Some(entry.href.clone()),
                    chapters: vec![Chapter {
                        chapter_number,
                        local_chapter_number: part_number,
                        title: entry.title.clone(),
                        href: entry.href.clone(),
                        order,
                    }],
                });
            }
        }

        if let Some(part) = current_part.take() {
            parts.push(part);
        }

        let total_chapters = parts.iter().map(|part| part.chapters.len() as u32).sum::<u32>();
        BookStructure {
            kind: if has_part_structure {
                StructureKind::PartsAndChapters
            } else {
                StructureKind::ChaptersOnly
            },
            has_parts: has_part_structure,
            has_chapters: total_chapters > 0,
            total_parts: parts.len() as u32,
            total_chapters,
            parts,
            ..Default::default()
        }
    }
}
