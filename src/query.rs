//! Chapter lookups on a built [BookStructure]

use serde::{Deserialize, Serialize};

use crate::{
    error::EpubError,
    types::{BookStructure, Chapter, Part},
};

/// The part a chapter belongs to, without its chapter list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSummary {
    pub part_number: u32,
    pub title: String,
}

impl From<&Part> for PartSummary {
    fn from(part: &Part) -> Self {
        Self {
            part_number: part.part_number,
            title: part.title.clone(),
        }
    }
}

/// A resolved chapter together with its neighbours
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLocation {
    pub part: PartSummary,
    pub chapter: Chapter,
    pub has_prev: bool,
    pub has_next: bool,
    pub prev_chapter: Option<u32>,
    pub next_chapter: Option<u32>,
}

/// One chapter of a range listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub chapter_number: u32,
    pub title: String,
    pub part_number: u32,
    pub part_title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationNodeKind {
    Part,
    Chapter,
}

/// A node of the navigation tree shown to readers
///
/// Part nodes have the id `part-N` and chapter nodes `chapter-N`, where `N`
/// is the part number or the global chapter number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NavigationNodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_chapter_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavigationNode>,
}

impl BookStructure {
    /// Finds the chapter with a global chapter number
    fn find_chapter(&self, chapter_number: u32) -> Option<(&Part, &Chapter)> {
        self.chapters()
            .find(|(_, chapter)| chapter.chapter_number == chapter_number)
    }

    fn locate(&self, part: &Part, chapter: &Chapter) -> ChapterLocation {
        let number = chapter.chapter_number;
        let prev_chapter = number
            .checked_sub(1)
            .filter(|&prev| self.find_chapter(prev).is_some());
        let next_chapter = number
            .checked_add(1)
            .filter(|&next| self.find_chapter(next).is_some());

        ChapterLocation {
            part: PartSummary::from(part),
            chapter: chapter.clone(),
            has_prev: prev_chapter.is_some(),
            has_next: next_chapter.is_some(),
            prev_chapter,
            next_chapter,
        }
    }

    /// Resolves a global chapter number
    ///
    /// ## Return
    /// - `Ok(ChapterLocation)`: The chapter, its part and its neighbours
    /// - `Err(EpubError::ChapterNotFound)`: No chapter carries this number
    pub fn by_global_number(&self, chapter_number: u32) -> Result<ChapterLocation, EpubError> {
        let (part, chapter) =
            self.find_chapter(chapter_number)
                .ok_or_else(|| EpubError::ChapterNotFound {
                    chapter: format!("there is no chapter {}", chapter_number),
                })?;

        Ok(self.locate(part, chapter))
    }

    /// Resolves a chapter by its part number and part-local number
    ///
    /// ## Return
    /// - `Ok(ChapterLocation)`: The chapter, its part and its neighbours
    /// - `Err(EpubError::PartNotFound)`: No part carries `part_number`
    /// - `Err(EpubError::ChapterNotFound)`: The part has no chapter `local_number`
    pub fn by_part_and_local(
        &self,
        part_number: u32,
        local_number: u32,
    ) -> Result<ChapterLocation, EpubError> {
        let part = self
            .parts
            .iter()
            .find(|part| part.part_number == part_number)
            .ok_or(EpubError::PartNotFound { part_number })?;

        let chapter = part
            .chapters
            .iter()
            .find(|chapter| chapter.local_chapter_number == local_number)
            .ok_or_else(|| EpubError::ChapterNotFound {
                chapter: format!(
                    "part {} has no chapter {}",
                    part_number, local_number
                ),
            })?;

        Ok(self.locate(part, chapter))
    }

    /// Lists the chapters numbered `from..=to`
    ///
    /// Numbers without a chapter are left out of the result.
    ///
    /// ## Return
    /// - `Ok(Vec<ChapterSummary>)`: The existing chapters in ascending order
    /// - `Err(EpubError::InvalidRange)`: `from > to` or `to - from > max_window`
    pub fn range(
        &self,
        from: u32,
        to: u32,
        max_window: u32,
    ) -> Result<Vec<ChapterSummary>, EpubError> {
        if from > to || to - from > max_window {
            return Err(EpubError::InvalidRange {
                from,
                to,
                max_window,
            });
        }

        Ok(self
            .chapters()
            .filter(|(_, chapter)| (from..=to).contains(&chapter.chapter_number))
            .map(|(part, chapter)| ChapterSummary {
                chapter_number: chapter.chapter_number,
                title: chapter.title.clone(),
                part_number: part.part_number,
                part_title: part.title.clone(),
            })
            .collect())
    }

    /// Builds the part/chapter tree used by reader navigation
    pub fn navigation_tree(&self) -> Vec<NavigationNode> {
        self.parts
            .iter()
            .map(|part| NavigationNode {
                id: format!("part-{}", part.part_number),
                label: part.title.clone(),
                kind: NavigationNodeKind::Part,
                chapter_number: None,
                local_chapter_number: None,
                children: part
                    .chapters
                    .iter()
                    .map(|chapter| NavigationNode {
                        id: format!("chapter-{}", chapter.chapter_number),
                        label: chapter.title.clone(),
                        kind: NavigationNodeKind::Chapter,
                        chapter_number: Some(chapter.chapter_number),
                        local_chapter_number: Some(chapter.local_chapter_number),
                        children: Vec::new(),
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::SplitConfig,
        error::EpubError,
        query::NavigationNodeKind,
        structure::StructureBuilder,
        types::{BookStructure, NavEntry, Spine, SpineItem},
    };

    fn book() -> BookStructure {
        let toc = [
            ("Part I", "p1.xhtml"),
            ("Chapter 1", "c1.xhtml"),
            ("Chapter 2", "c2.xhtml"),
            ("Chapter 3", "c3.xhtml"),
            ("Chapter 4", "c4.xhtml"),
            ("Part II", "p2.xhtml"),
            ("Chapter 5", "c5.xhtml"),
            ("Chapter 6", "c6.xhtml"),
        ];
        let spine = Spine {
            items: toc
                .iter()
                .enumerate()
                .map(|(index, (_, href))| SpineItem {
                    idref: format!("i{}", index),
                    href: href.to_string(),
                    order: index as u32,
                    linear: true,
                })
                .collect(),
            toc: None,
        };
        let entries = toc
            .iter()
            .map(|(title, href)| NavEntry::new(*title, *href))
            .collect::<Vec<_>>();

        StructureBuilder::new(&SplitConfig::default())
            .unwrap()
            .build(&entries, &spine)
    }

    #[test]
    fn test_by_global_number() {
        let structure = book();

        let location = structure.by_global_number(5).unwrap();
        assert_eq!(location.part.part_number, 2);
        assert_eq!(location.part.title, "Part II");
        assert_eq!(location.chapter.title, "Chapter 5");
        assert_eq!(location.chapter.local_chapter_number, 1);
        assert!(location.has_prev && location.has_next);
        assert_eq!(location.prev_chapter, Some(4));
        assert_eq!(location.next_chapter, Some(6));

        let first = structure.by_global_number(1).unwrap();
        assert!(!first.has_prev);
        assert_eq!(first.prev_chapter, None);

        let last = structure.by_global_number(6).unwrap();
        assert!(!last.has_next);
        assert_eq!(last.next_chapter, None);

        assert!(matches!(
            structure.by_global_number(0),
            Err(EpubError::ChapterNotFound { .. })
        ));
        assert!(matches!(
            structure.by_global_number(7),
            Err(EpubError::ChapterNotFound { .. })
        ));
    }

    #[test]
    fn test_part_and_global_lookups_agree() {
        let structure = book();

        for (part, chapter) in structure.chapters() {
            let by_part = structure
                .by_part_and_local(part.part_number, chapter.local_chapter_number)
                .unwrap();
            let by_number = structure.by_global_number(chapter.chapter_number).unwrap();
            assert_eq!(by_part, by_number);
        }
    }

    #[test]
    fn test_by_part_and_local_failures() {
        let structure = book();

        assert_eq!(
            structure.by_part_and_local(3, 1).unwrap_err(),
            EpubError::PartNotFound { part_number: 3 }
        );
        assert!(matches!(
            structure.by_part_and_local(2, 3),
            Err(EpubError::ChapterNotFound { .. })
        ));
    }

    #[test]
    fn test_range() {
        let structure = book();

        let chapters = structure.range(4, 8, 10).unwrap();
        let numbers = chapters
            .iter()
            .map(|chapter| (chapter.chapter_number, chapter.part_number))
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec![(4, 1), (5, 2), (6, 2)]);
        assert_eq!(chapters[1].part_title, "Part II");

        assert_eq!(structure.range(2, 2, 10).unwrap().len(), 1);
        assert!(structure.range(0, 10, 10).is_ok());
        assert!(structure.range(100, 105, 10).unwrap().is_empty());
    }

    #[test]
    fn test_range_validation() {
        let structure = book();

        assert_eq!(
            structure.range(1, 12, 10).unwrap_err(),
            EpubError::InvalidRange {
                from: 1,
                to: 12,
                max_window: 10
            }
        );
        assert!(matches!(
            structure.range(5, 4, 10),
            Err(EpubError::InvalidRange { .. })
        ));
        assert!(matches!(
            structure.range(1, 3, 1),
            Err(EpubError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_navigation_tree() {
        let tree = book().navigation_tree();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, "part-1");
        assert_eq!(tree[0].label, "Part I");
        assert_eq!(tree[0].kind, NavigationNodeKind::Part);
        assert_eq!(tree[0].children.len(), 4);

        let chapter = &tree[1].children[1];
        assert_eq!(chapter.id, "chapter-6");
        assert_eq!(chapter.kind, NavigationNodeKind::Chapter);
        assert_eq!(chapter.chapter_number, Some(6));
        assert_eq!(chapter.local_chapter_number, Some(2));

        let json = serde_json::to_value(&tree[0]).unwrap();
        assert_eq!(json["type"], "part");
        assert!(json.get("chapter_number").is_none());
    }
}
