use std::{
    collections::HashMap,
    io::{Read, Seek},
};

use quick_xml::{
    Reader,
    encoding::Decoder,
    escape::resolve_html5_entity,
    events::{BytesRef, BytesStart, Event},
};
use sha1::{Digest, Sha1};
use zip::{CompressionMethod, ZipArchive, result::ZipError};

use crate::error::EpubError;

/// Extracts the contents of a specified file from a ZIP archive
///
/// ## Parameters
/// - `zip_file`: A mutable reference to a ZIP archive object
/// - `file_name`: The path to the file to extract (relative to the ZIP archive root directory)
///
/// ## Return
/// - `Ok(Vec<u8>)`: The raw bytes of the entry
/// - `Err(EpubError::EntryNotFound)`: There is no entry with that name
/// - `Err(EpubError)`: The entry exists but could not be read
pub fn get_file_in_zip_archive<R: Read + Seek>(
    zip_file: &mut ZipArchive<R>,
    file_name: &str,
) -> Result<Vec<u8>, EpubError> {
    let mut buffer = Vec::<u8>::new();
    match zip_file.by_name(file_name) {
        Ok(mut file) => {
            file.read_to_end(&mut buffer)?;
            Ok(buffer)
        }
        Err(ZipError::FileNotFound) => Err(EpubError::EntryNotFound {
            path: file_name.to_string(),
        }),
        Err(err) => Err(EpubError::from(err)),
    }
}

/// Checks that every entry of the archive uses a usable compression method
///
/// OCF containers may only use Stored or Deflated entries. Anything else is
/// reported as a corrupt archive, because its entries could not be read.
pub fn compression_method_check<R: Read + Seek>(
    zip_archive: &mut ZipArchive<R>,
) -> Result<(), EpubError> {
    for index in 0..zip_archive.len() {
        let file = zip_archive.by_index(index)?;

        match file.compression() {
            CompressionMethod::Stored | CompressionMethod::Deflated => continue,
            method => {
                return Err(EpubError::CorruptArchive {
                    reason: format!(
                        "the \"{}\" entry uses the unsupported \"{}\" compression method",
                        file.name(),
                        method
                    ),
                });
            }
        };
    }

    Ok(())
}

/// Returns the SHA-1 digest of `data` as lowercase hex
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Returns the directory part of an archive path, without trailing slash
///
/// Paths at the archive root have an empty directory.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Removes the fragment and query parts of a link
pub fn strip_fragment(href: &str) -> &str {
    let end = href.find(['#', '?']).unwrap_or(href.len());
    &href[..end]
}

/// Resolves a link found in a document located in `base_dir` to an archive-root path
///
/// The link is stripped of its fragment, percent-decoded and normalized:
/// `./` segments are dropped and `../` segments climb one directory. Links
/// starting with `/` are relative to the archive root.
///
/// ## Return
/// - `Some(String)`: The normalized path
/// - `None`: The link is empty, points outside the archive, or climbs above its root
pub fn resolve_href(base_dir: &str, href: &str) -> Option<String> {
    let href = strip_fragment(href.trim());
    if href.is_empty() || href.contains("://") || href.starts_with("mailto:") {
        return None;
    }

    let decoded = urlencoding::decode(href)
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| href.to_string());

    let (mut segments, relative) = match decoded.strip_prefix('/') {
        Some(rest) => (Vec::new(), rest.to_string()),
        None => (
            base_dir
                .split('/')
                .filter(|segment| !segment.is_empty())
                .collect::<Vec<_>>(),
            decoded.clone(),
        ),
    };

    for segment in relative.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                // climbing above the root would leak out of the container
                segments.pop()?;
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Provides functionality to decode byte data into strings
///
/// Byte order marks for UTF-8, UTF-16 BE and UTF-16 LE are honored. Data
/// without a byte order mark is read as UTF-8, replacing invalid sequences.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, EpubError>;
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, EpubError> {
        match self {
            // Check UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, rest @ ..] => {
                String::from_utf8(rest.to_vec()).map_err(EpubError::from)
            }

            // Check UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, rest @ ..] => {
                let utf16_units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            // Check UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, rest @ ..] => {
                let utf16_units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            _ => Ok(String::from_utf8_lossy(self).into_owned()),
        }
    }
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, EpubError> {
        self.as_slice().decode()
    }
}

/// Provides functionality for normalizing whitespace characters
///
/// Runs of whitespace collapse into a single space and leading and trailing
/// whitespace is removed.
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

/// A node of the XML tree: an element or a run of character data
#[derive(Debug, Clone)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// Represents an element node in an XML document
#[derive(Debug, Clone)]
pub struct XmlElement {
    /// The local name of the element (excluding namespace prefix)
    pub name: String,

    /// The namespace prefix of the element
    pub prefix: Option<String>,

    /// The attributes of the element, keyed by their qualified name
    pub attributes: HashMap<String, String>,

    /// Child elements and text in document order
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create a new element
    pub fn new(name: String) -> Self {
        Self {
            name,
            prefix: None,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    /// Get the full tag name of the element
    ///
    /// If the element has a namespace prefix, return "prefix:name" format;
    /// otherwise, return only the element name.
    pub fn tag_name(&self) -> String {
        if let Some(prefix) = &self.prefix {
            format!("{}:{}", prefix, self.name)
        } else {
            self.name.clone()
        }
    }

    /// Gets the text of the element and all its descendants
    ///
    /// Text is collected in document order and whitespace is normalized, so
    /// `<a>Chapter <em>1</em></a>` yields `"Chapter 1"`.
    pub fn text(&self) -> String {
        let mut result = String::new();
        self.collect_text(&mut result);
        result.normalize_whitespace()
    }

    fn collect_text(&self, result: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(text) => result.push_str(text),
                XmlNode::Element(element) => element.collect_text(result),
            }
        }
    }

    /// Returns the value of the specified attribute
    pub fn get_attr(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    /// Returns the value of an attribute by its local name, whatever its prefix
    pub fn get_attr_by_local_name(&self, local_name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(key, _)| {
                key.as_str() == local_name
                    || key
                        .rsplit_once(':')
                        .is_some_and(|(_, local)| local == local_name)
            })
            .map(|(_, value)| value.clone())
    }

    /// Find all elements with the specified name, in document order
    ///
    /// The search includes the element itself.
    pub fn find_elements_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        SearchElementsByNameIter::new(self, name)
    }

    /// Find all elements with the specified name among the child elements of the current element
    pub fn find_children_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.children().filter(move |child| child.name == name)
    }

    /// Get child elements, skipping text
    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    fn push_text(&mut self, text: &str) {
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(XmlNode::Text(text.to_string()));
        }
    }
}

struct SearchElementsByNameIter<'a> {
    elements: Vec<&'a XmlElement>,
    current_index: usize,
    target_name: String,
}

impl<'a> SearchElementsByNameIter<'a> {
    fn new(root: &'a XmlElement, name: &str) -> Self {
        let mut elements = Vec::new();
        Self::collect_elements(root, &mut elements);
        Self {
            elements,
            current_index: 0,
            target_name: name.to_string(),
        }
    }

    fn collect_elements(element: &'a XmlElement, collection: &mut Vec<&'a XmlElement>) {
        collection.push(element);
        for child in element.children() {
            Self::collect_elements(child, collection);
        }
    }
}

impl<'a> Iterator for SearchElementsByNameIter<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_index < self.elements.len() {
            let element = self.elements[self.current_index];
            self.current_index += 1;
            if element.name == self.target_name {
                return Some(element);
            }
        }
        None
    }
}

/// XML parser used to parse XML content and build an XML element tree
pub struct XmlReader {}

impl XmlReader {
    /// Parses an XML from string and builds the root element
    ///
    /// Character references and entity references are resolved while
    /// reading. Besides the five predefined XML entities, the HTML5 named
    /// entities (`&mdash;`, `&nbsp;`, ...) are recognized, because XHTML
    /// navigation documents use them freely. Unknown references are kept
    /// verbatim.
    ///
    /// ## Parameters
    /// - `content`: The XML string to be parsed
    ///
    /// ## Return
    /// - `Ok(XmlElement)`: The root element of the XML element tree
    /// - `Err(EpubError::Xml)`: The content is not well-formed or has no root element
    pub fn parse(content: &str) -> Result<XmlElement, EpubError> {
        if content.trim().is_empty() {
            return Err(EpubError::Xml {
                reason: "the document is empty".to_string(),
            });
        }

        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut stack = Vec::<XmlElement>::new();
        let mut root = None;

        // Read XML events
        loop {
            match reader.read_event_into(&mut buf) {
                // End of file, stop the loop
                Ok(Event::Eof) => break,

                // Start of an element
                Ok(Event::Start(e)) => stack.push(Self::read_element(&e, reader.decoder())),

                // End of an element
                Ok(Event::End(_)) => {
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(XmlNode::Element(element)),
                            None => root = Some(element),
                        }
                    }
                }

                // Self-closing element
                Ok(Event::Empty(e)) => {
                    let element = Self::read_element(&e, reader.decoder());
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(element)),
                        None => root = Some(element),
                    }
                }

                // Text node; references arrive as separate events
                Ok(Event::Text(e)) => {
                    if let Some(element) = stack.last_mut() {
                        element.push_text(&e.xml10_content()?);
                    }
                }

                // Character or entity reference between text runs
                Ok(Event::GeneralRef(e)) => {
                    if let Some(element) = stack.last_mut() {
                        element.push_text(&Self::resolve_reference(&e));
                    }
                }

                // CDATA node
                Ok(Event::CData(e)) => {
                    if let Some(element) = stack.last_mut() {
                        element.push_text(&e.decode()?);
                    }
                }

                Err(err) => return Err(err.into()),

                // Ignore the following events (elements):
                // Comment, PI, Declaration, Doctype
                _ => {}
            }
            buf.clear();
        }

        root.ok_or_else(|| EpubError::Xml {
            reason: "the document has no complete root element".to_string(),
        })
    }

    fn read_element(start: &BytesStart, decoder: Decoder) -> XmlElement {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
        let mut element = XmlElement::new(name);

        if let Some(prefix) = start.name().prefix() {
            element.prefix = Some(String::from_utf8_lossy(prefix.as_ref()).to_string());
        }

        for attr in start.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = match attr.decode_and_unescape_value_with(decoder, resolve_html5_entity) {
                Ok(value) => value.into_owned(),
                // unknown references are kept verbatim, known ones still resolve
                Err(_) => {
                    html_escape::decode_html_entities(&String::from_utf8_lossy(&attr.value))
                        .into_owned()
                }
            };
            element.attributes.insert(key, value);
        }

        element
    }

    fn resolve_reference(reference: &BytesRef) -> String {
        let name = String::from_utf8_lossy(reference).to_string();

        if reference.is_char_ref() {
            return match reference.resolve_char_ref() {
                Ok(Some(ch)) => ch.to_string(),
                _ => format!("&{};", name),
            };
        }

        match resolve_html5_entity(&name) {
            Some(value) => value.to_string(),
            None => format!("&{};", name),
        }
    }
}
