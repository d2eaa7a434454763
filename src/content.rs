//! Chapter content extraction
//!
//! Chapter documents are parsed with an HTML5 parser and walked node by
//! node. Scripts, styles and comments are dropped, every paragraph is
//! wrapped in a `<div class="chapter-paragraph">`, and the inner HTML of
//! `<body>` is serialized back. Attributes are written in name order so
//! the output only depends on the input document.

use scraper::{ElementRef, Html, node::Node};

use crate::{archive::EpubArchive, error::EpubError, types::ChapterContent};

const SKIPPED_ELEMENTS: [&str; 2] = ["script", "style"];
const TITLE_ELEMENTS: [&str; 3] = ["h1", "h2", "h3"];
const INLINE_ELEMENTS: [&str; 16] = [
    "a", "abbr", "b", "cite", "code", "em", "i", "mark", "q", "s", "small", "span", "strong",
    "sub", "sup", "u",
];
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Class of the `<div>` each paragraph is wrapped in
pub const PARAGRAPH_CLASS: &str = "chapter-paragraph";

/// Reads and cleans one chapter document from the archive
///
/// ## Parameters
/// - `archive`: The publication container
/// - `href`: Archive-root path of the chapter document
/// - `fallback_title`: Title used when the document has no heading
///
/// ## Return
/// - `Ok(ChapterContent)`: The cleaned chapter
/// - `Err(EpubError::ChapterNotFound)`: The archive has no entry at `href`
pub fn get_chapter(
    archive: &EpubArchive,
    href: &str,
    fallback_title: &str,
) -> Result<ChapterContent, EpubError> {
    let content = archive.read_text(href).map_err(|err| match err {
        EpubError::EntryNotFound { path } => EpubError::ChapterNotFound {
            chapter: format!("\"{}\" is not in the archive", path),
        },
        err => err,
    })?;

    Ok(clean_chapter_html(&content, fallback_title))
}

/// Cleans a chapter document
///
/// The title is the text of the first non-empty `<h1>`, `<h2>` or `<h3>`,
/// otherwise `fallback_title`. The word count covers the visible text of
/// the body, that is, without scripts and styles.
pub fn clean_chapter_html(content: &str, fallback_title: &str) -> ChapterContent {
    let document = Html::parse_document(content);
    let root = document.root_element();
    let body = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|element| element.value().name() == "body")
        .unwrap_or(root);

    let title = find_title(body).unwrap_or_else(|| fallback_title.trim().to_string());

    let mut writer = BodyWriter::default();
    writer.write_children(body);

    ChapterContent {
        title,
        html: writer.html.trim().to_string(),
        word_count: writer.text.split_whitespace().count(),
    }
}

fn find_title(body: ElementRef) -> Option<String> {
    body.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|element| TITLE_ELEMENTS.contains(&element.value().name()))
        .map(|element| element.text().collect::<String>())
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|text| !text.is_empty())
}

#[derive(Default)]
struct BodyWriter {
    html: String,
    text: String,
}

impl BodyWriter {
    fn write_children(&mut self, element: ElementRef) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => {
                    let text: &str = text;
                    self.html.push_str(&html_escape::encode_text(text));
                    self.text.push_str(text);
                }
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.write_element(child);
                    }
                }
                // comments, doctypes and processing instructions
                _ => {}
            }
        }
    }

    fn write_element(&mut self, element: ElementRef) {
        let name = element.value().name();
        if SKIPPED_ELEMENTS.contains(&name) {
            return;
        }

        let is_paragraph = name == "p";
        if is_paragraph {
            self.html.push_str("<div class=\"");
            self.html.push_str(PARAGRAPH_CLASS);
            self.html.push_str("\">");
        }

        self.html.push('<');
        self.html.push_str(name);

        let mut attributes = element.value().attrs().collect::<Vec<_>>();
        attributes.sort_unstable();
        for (key, value) in attributes {
            self.html.push(' ');
            self.html.push_str(key);
            self.html.push_str("=\"");
            self.html
                .push_str(&html_escape::encode_double_quoted_attribute(value));
            self.html.push('"');
        }

        if VOID_ELEMENTS.contains(&name) {
            self.html.push_str("/>");
        } else {
            self.html.push('>');
            self.write_children(element);
            self.html.push_str("</");
            self.html.push_str(name);
            self.html.push('>');
        }

        if is_paragraph {
            self.html.push_str("</div>");
        }

        // block boundaries separate words in the visible text
        if !INLINE_ELEMENTS.contains(&name) {
            self.text.push(' ');
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        archive::EpubArchive,
        content::{clean_chapter_html, get_chapter},
        error::EpubError,
        testing::EpubFixture,
    };

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <html xmlns="http://www.w3.org/1999/xhtml">
        <head>
            <title>Ignored</title>
            <style>p { color: red; }</style>
        </head>
        <body>
            <h2 class="title">Chapter 3: <em>Storm</em></h2>
            <!-- editor note -->
            <script>alert("x")</script>
            <p id="p1" class="first">It was a dark &amp; stormy night.</p>
            <p>Rain<br/>fell.</p>
            <img src="../images/map.png" alt="A &quot;map&quot;"/>
        </body>
        </html>"#;

    #[test]
    fn test_clean_chapter_html() {
        let content = clean_chapter_html(CHAPTER, "Fallback");

        assert_eq!(content.title, "Chapter 3: Storm");
        assert!(!content.html.contains("script"));
        assert!(!content.html.contains("alert"));
        assert!(!content.html.contains("color: red"));
        assert!(!content.html.contains("editor note"));
        assert!(content.html.starts_with("<h2 class=\"title\">Chapter 3: <em>Storm</em></h2>"));
        assert!(content.html.contains(
            "<div class=\"chapter-paragraph\"><p class=\"first\" id=\"p1\">It was a dark &amp; stormy night.</p></div>"
        ));
        assert!(content
            .html
            .contains("<div class=\"chapter-paragraph\"><p>Rain<br/>fell.</p></div>"));
        assert!(content
            .html
            .contains("<img alt=\"A &quot;map&quot;\" src=\"../images/map.png\"/>"));

        // Chapter 3: Storm / It was a dark & stormy night. / Rain fell.
        assert_eq!(content.word_count, 12);
    }

    #[test]
    fn test_title_falls_back_to_toc_title() {
        let content = clean_chapter_html(
            "<html><body><h1>   </h1><p>Just text.</p></body></html>",
            "Chapter 9",
        );
        assert_eq!(content.title, "Chapter 9");
        assert_eq!(content.word_count, 2);
    }

    #[test]
    fn test_first_heading_in_document_order_wins() {
        let content = clean_chapter_html(
            "<html><body><h3>Small</h3><h1>Large</h1></body></html>",
            "Fallback",
        );
        assert_eq!(content.title, "Small");
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let first = clean_chapter_html(CHAPTER, "Fallback");
        let second = clean_chapter_html(CHAPTER, "Fallback");
        assert_eq!(first, second);
    }

    #[test]
    fn test_get_chapter() {
        let archive = EpubArchive::open(
            EpubFixture::new()
                .file(
                    "OEBPS/ch1.xhtml",
                    "<html><body><h1>Opening</h1><p>One two three.</p></body></html>",
                )
                .into_bytes(),
        )
        .unwrap();

        let content = get_chapter(&archive, "OEBPS/ch1.xhtml", "Chapter 1").unwrap();
        assert_eq!(content.title, "Opening");
        assert_eq!(content.word_count, 4);

        let missing = get_chapter(&archive, "OEBPS/ch2.xhtml", "Chapter 2").unwrap_err();
        assert!(matches!(missing, EpubError::ChapterNotFound { .. }));
    }
}
