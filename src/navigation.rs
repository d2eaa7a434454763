//! Table of contents extraction
//!
//! EPUB 3 publications carry an XHTML navigation document, EPUB 2
//! publications an NCX file; many books ship both. Both are flattened into
//! an ordered list of [NavEntry] values in document order, nested entries
//! following their parent.
//!
//! Extraction never fails: a navigation document that cannot be read or
//! parsed is logged and treated as absent.

use log::{debug, warn};

use crate::{
    archive::EpubArchive,
    package::Package,
    types::{ManifestEntry, NavEntry},
    utils::{XmlElement, XmlReader, parent_dir, resolve_href},
};

/// Extracts the flattened table of contents of a publication
///
/// The EPUB 3 navigation document is preferred. When it is missing or
/// yields no entries, the NCX file is used instead.
///
/// ## Return
/// The entries in document order; an empty list when neither source is usable.
pub fn extract_toc(archive: &EpubArchive, package: &Package) -> Vec<NavEntry> {
    if let Some(nav) = find_nav_document(package) {
        let entries = read_document(archive, nav)
            .map(|root| parse_nav_document(&root, parent_dir(&nav.path)))
            .unwrap_or_default();

        if !entries.is_empty() {
            debug!("Read {} entries from navigation document \"{}\".", entries.len(), nav.path);
            return entries;
        }
        warn!("Navigation document \"{}\" has no usable entries.", nav.path);
    }

    if let Some(ncx) = find_ncx_document(package) {
        let entries = read_document(archive, ncx)
            .map(|root| parse_ncx_document(&root, parent_dir(&ncx.path)))
            .unwrap_or_default();

        debug!("Read {} entries from NCX document \"{}\".", entries.len(), ncx.path);
        return entries;
    }

    warn!("The publication has no table of contents.");
    Vec::new()
}

/// The manifest entry declaring the `nav` property, otherwise the first
/// XHTML entry whose href mentions "nav" or "toc"
fn find_nav_document(package: &Package) -> Option<&ManifestEntry> {
    package
        .manifest
        .values()
        .find(|entry| entry.has_property("nav"))
        .or_else(|| {
            package.manifest.values().find(|entry| {
                let href = entry.href.to_lowercase();
                entry.is_xhtml() && (href.contains("nav") || href.contains("toc"))
            })
        })
}

/// The NCX named by the spine `toc` attribute, otherwise the first NCX entry
fn find_ncx_document(package: &Package) -> Option<&ManifestEntry> {
    package
        .spine
        .toc
        .as_ref()
        .and_then(|id| package.manifest.get(id))
        .or_else(|| package.manifest.values().find(|entry| entry.is_ncx()))
}

fn read_document(archive: &EpubArchive, entry: &ManifestEntry) -> Option<XmlElement> {
    let content = match archive.read_text(&entry.path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Unable to read navigation file \"{}\": {}", entry.path, err);
            return None;
        }
    };

    match XmlReader::parse(&content) {
        Ok(root) => Some(root),
        Err(err) => {
            warn!("Unable to parse navigation file \"{}\": {}", entry.path, err);
            None
        }
    }
}

/// Flattens the `<nav epub:type="toc">` list of a navigation document
///
/// Documents without a typed `toc` nav fall back to their first `<nav>`.
pub(crate) fn parse_nav_document(root: &XmlElement, base_dir: &str) -> Vec<NavEntry> {
    let nav = root
        .find_elements_by_name("nav")
        .find(|element| {
            element
                .get_attr_by_local_name("type")
                .is_some_and(|kind| kind.split_whitespace().any(|value| value == "toc"))
        })
        .or_else(|| root.find_elements_by_name("nav").next());

    let Some(nav) = nav else {
        warn!("The navigation document has no nav element.");
        return Vec::new();
    };

    let mut entries = Vec::new();
    if let Some(list) = nav.find_elements_by_name("ol").next() {
        collect_list_items(list, base_dir, &mut entries);
    }
    entries
}

fn collect_list_items(list: &XmlElement, base_dir: &str, entries: &mut Vec<NavEntry>) {
    for item in list.find_children_by_name("li") {
        if let Some(anchor) = item.find_children_by_name("a").next() {
            let title = anchor.text();
            let href = anchor
                .get_attr("href")
                .and_then(|href| resolve_href(base_dir, &href));

            match href {
                Some(href) if !title.is_empty() => entries.push(NavEntry::new(title, href)),
                _ => debug!("Skipping navigation anchor \"{}\" without usable href.", title),
            }
        }

        for sub_list in item.find_children_by_name("ol") {
            collect_list_items(sub_list, base_dir, entries);
        }
    }
}

/// Flattens the `navMap` of an NCX document
pub(crate) fn parse_ncx_document(root: &XmlElement, base_dir: &str) -> Vec<NavEntry> {
    let Some(nav_map) = root.find_elements_by_name("navMap").next() else {
        warn!("The NCX document has no navMap element.");
        return Vec::new();
    };

    let mut entries = Vec::new();
    collect_nav_points(nav_map, base_dir, &mut entries);
    entries
}

fn collect_nav_points(parent: &XmlElement, base_dir: &str, entries: &mut Vec<NavEntry>) {
    for nav_point in parent.find_children_by_name("navPoint") {
        let title = nav_point
            .find_children_by_name("navLabel")
            .next()
            .and_then(|label| label.find_children_by_name("text").next())
            .map(|text| text.text())
            .unwrap_or_default();

        let href = nav_point
            .find_children_by_name("content")
            .next()
            .and_then(|content| content.get_attr("src"))
            .and_then(|src| resolve_href(base_dir, &src));

        match href {
            Some(href) if !title.is_empty() => entries.push(NavEntry::new(title, href)),
            _ => debug!("Skipping navPoint \"{}\" without usable content.", title),
        }

        collect_nav_points(nav_point, base_dir, entries);
    }
}
