//! Container and OPF package document parsing
//!
//! The container file (`META-INF/container.xml`) points at the OPF package
//! document, which declares every resource of the publication (manifest),
//! the reading order (spine) and descriptive metadata.

use log::warn;

use crate::{
    error::EpubError,
    types::{Manifest, ManifestEntry, PackageMetadata, Spine, SpineItem},
    utils::{XmlElement, XmlReader, parent_dir, resolve_href},
};

/// Path of the container file inside every EPUB
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// The parsed OPF package document
#[derive(Debug, Clone, Default)]
pub struct Package {
    /// Archive-root path of the OPF file
    pub opf_path: String,

    pub manifest: Manifest,

    pub spine: Spine,

    pub metadata: PackageMetadata,
}

impl Package {
    /// Directory of the OPF file, against which manifest hrefs are resolved
    pub fn opf_dir(&self) -> &str {
        parent_dir(&self.opf_path)
    }

    /// Looks up a manifest entry by its archive-root path
    pub fn entry_by_path(&self, path: &str) -> Option<&ManifestEntry> {
        self.manifest.values().find(|entry| entry.path == path)
    }
}

/// Reads the OPF location from the container file
///
/// According to the OCF specification, the container must contain at least
/// one `rootfile` element. When several are present, the first one is used.
///
/// ## Parameters
/// - `container_xml`: The content of `META-INF/container.xml`
///
/// ## Return
/// - `Ok(String)`: The archive-root path of the OPF file
/// - `Err(EpubError::InvalidContainer)`: The file is malformed or has no usable `rootfile`
pub fn locate_opf(container_xml: &str) -> Result<String, EpubError> {
    let root = XmlReader::parse(container_xml).map_err(|err| EpubError::InvalidContainer {
        reason: err.to_string(),
    })?;

    let rootfile = root.find_elements_by_name("rootfile").next().ok_or_else(|| {
        EpubError::InvalidContainer {
            reason: "there is no rootfile element".to_string(),
        }
    })?;

    let full_path = rootfile
        .get_attr("full-path")
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .ok_or_else(|| EpubError::InvalidContainer {
            reason: "the rootfile element has no full-path attribute".to_string(),
        })?;

    resolve_href("", &full_path).ok_or_else(|| EpubError::InvalidContainer {
        reason: format!("the rootfile path \"{}\" is not inside the archive", full_path),
    })
}

/// Parses an OPF package document
///
/// ## Parameters
/// - `opf_xml`: The content of the OPF file
/// - `opf_dir`: The directory of the OPF file inside the archive
///
/// ## Return
/// - `Ok(Package)`: Manifest, spine and metadata of the publication
/// - `Err(EpubError::InvalidPackageDocument)`: The document is malformed or
///   lacks a `manifest` or `spine` element
///
/// ## Notes
/// - Manifest items without `id` or `href` are skipped.
/// - Spine items that reference no manifest item are dropped.
pub fn parse_opf(opf_xml: &str, opf_dir: &str) -> Result<Package, EpubError> {
    let package = XmlReader::parse(opf_xml).map_err(|err| EpubError::InvalidPackageDocument {
        reason: err.to_string(),
    })?;

    let manifest_element = package.find_elements_by_name("manifest").next().ok_or_else(|| {
        EpubError::InvalidPackageDocument {
            reason: "there is no manifest element".to_string(),
        }
    })?;
    let spine_element = package.find_elements_by_name("spine").next().ok_or_else(|| {
        EpubError::InvalidPackageDocument {
            reason: "there is no spine element".to_string(),
        }
    })?;

    let manifest = parse_manifest(manifest_element, opf_dir);
    let spine = parse_spine(spine_element, &manifest);
    let metadata = match package.find_elements_by_name("metadata").next() {
        Some(element) => parse_metadata(element),
        None => {
            warn!("The package document has no metadata element.");
            PackageMetadata::default()
        }
    };

    Ok(Package {
        opf_path: String::new(),
        manifest,
        spine,
        metadata,
    })
}

fn parse_manifest(manifest_element: &XmlElement, opf_dir: &str) -> Manifest {
    let mut manifest = Manifest::with_capacity(manifest_element.children().count());

    for element in manifest_element.find_children_by_name("item") {
        let (Some(id), Some(href)) = (element.get_attr("id"), element.get_attr("href")) else {
            warn!(
                "Skipping a manifest item without id or href: {:?}",
                element.attributes
            );
            continue;
        };

        let Some(path) = resolve_href(opf_dir, &href) else {
            warn!("Skipping manifest item \"{}\": \"{}\" is not inside the archive.", id, href);
            continue;
        };

        let media_type = element.get_attr("media-type").unwrap_or_default();
        let properties = element.get_attr("properties");

        if manifest.contains_key(&id) {
            warn!("Duplicate manifest id \"{}\", keeping the first item.", id);
            continue;
        }

        manifest.insert(
            id.clone(),
            ManifestEntry {
                id,
                href,
                path,
                media_type,
                properties,
            },
        );
    }

    manifest
}

fn parse_spine(spine_element: &XmlElement, manifest: &Manifest) -> Spine {
    let mut items = Vec::new();

    for element in spine_element.find_children_by_name("itemref") {
        let Some(idref) = element.get_attr("idref") else {
            warn!("Dropping a spine itemref without idref.");
            continue;
        };

        let Some(entry) = manifest.get(&idref) else {
            warn!("Dropping spine itemref \"{}\": no manifest item has this id.", idref);
            continue;
        };

        let linear = element
            .get_attr("linear")
            .map(|linear| linear != "no")
            .unwrap_or(true);

        items.push(SpineItem {
            idref,
            href: entry.path.clone(),
            order: items.len() as u32,
            linear,
        });
    }

    Spine {
        items,
        toc: spine_element.get_attr("toc"),
    }
}

/// Extracts the Dublin Core fields the structure carries
///
/// The first element of each kind wins, matching how reading systems pick
/// the primary title and creator.
fn parse_metadata(metadata_element: &XmlElement) -> PackageMetadata {
    let first_text = |name: &str| {
        metadata_element
            .find_children_by_name(name)
            .map(|element| element.text())
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    };

    PackageMetadata {
        title: first_text("title"),
        creator: first_text("creator"),
        language: first_text("language"),
        publisher: first_text("publisher"),
    }
}
