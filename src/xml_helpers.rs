//! Shared XML utilities for the package parts.
//!
//! Parts are never re-serialized from a full tree. Instead every parser reads
//! quick-xml events together with the byte range each event covers in the
//! source, so untouched markup can be copied through verbatim and only the
//! elements that changed are regenerated.

use std::borrow::Cow;
use std::ops::Range;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Result, XlmergeError};

/// Extract a string attribute value by its qualified key (e.g. `r:id`).
///
/// Returns `None` if the attribute is missing or cannot be unescaped.
pub fn attr_string(e: &BytesStart, key: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key {
            return attr.unescape_value().ok().map(Cow::into_owned);
        }
    }
    None
}

/// All attributes of a tag in document order, keys qualified, values unescaped.
pub fn attributes(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

/// Get the local element name as an owned string.
///
/// Returns empty string if not valid UTF-8.
#[inline]
pub fn local_name_string(e: &BytesStart) -> String {
    let bytes = e.local_name();
    std::str::from_utf8(bytes.as_ref())
        .unwrap_or("")
        .to_string()
}

/// Get the qualified element name (with prefix) as an owned string.
#[inline]
pub fn qualified_name_string(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Write a start tag (or an empty-element tag) with escaped attribute values.
pub fn write_start_tag(name: &str, attrs: &[(String, String)], empty: bool) -> String {
    let mut out = String::with_capacity(32 + attrs.len() * 24);
    out.push('<');
    out.push_str(name);
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
    out.push_str(if empty { "/>" } else { ">" });
    out
}

/// Minimal XML escaping for text content.
pub fn escape_text(s: &str) -> Cow<'_, str> {
    escape(s)
}

/// Characters XML 1.0 cannot carry, written as `_xHHHH_` in cell text.
fn needs_xstring_escape(c: char) -> bool {
    matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}'
    )
}

/// Code unit of an `_xHHHH_` escape at the start of `s`.
fn xstring_escape_at(s: &str) -> Option<u32> {
    let digits = s.strip_prefix("_x")?.get(..5)?.strip_suffix('_')?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Encode text for an `ST_Xstring` value (`<t>` content).
///
/// Control characters become `_xHHHH_`, and an underscore that would start
/// such a sequence is itself escaped as `_x005F_`.
pub fn encode_xstring(s: &str) -> Cow<'_, str> {
    if !s.contains("_x") && !s.chars().any(needs_xstring_escape) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    let mut rest = s;
    while let Some(c) = rest.chars().next() {
        if c == '_' && xstring_escape_at(rest).is_some() {
            out.push_str("_x005F_");
        } else if needs_xstring_escape(c) {
            out.push_str(&format!("_x{:04X}_", u32::from(c)));
        } else {
            out.push(c);
        }
        rest = rest.get(c.len_utf8()..).unwrap_or_default();
    }
    Cow::Owned(out)
}

/// Decode `_xHHHH_` escapes in an `ST_Xstring` value.
pub fn decode_xstring(s: &str) -> Cow<'_, str> {
    if !s.contains("_x") {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(c) = rest.chars().next() {
        let step = match xstring_escape_at(rest).and_then(char::from_u32) {
            Some(decoded) => {
                out.push(decoded);
                "_xHHHH_".len()
            }
            None => {
                out.push(c);
                c.len_utf8()
            }
        };
        rest = rest.get(step..).unwrap_or_default();
    }
    Cow::Owned(out)
}

/// Set an attribute in place, appending it when absent.
pub fn set_attr(attrs: &mut Vec<(String, String)>, key: &str, value: String) {
    if let Some(slot) = attrs.iter_mut().find(|(k, _)| k == key) {
        slot.1 = value;
    } else {
        attrs.push((key.to_string(), value));
    }
}

/// Look up an attribute by local name in an already-extracted attribute list.
pub fn find_attr<'a>(attrs: &'a [(String, String)], local: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.rsplit(':').next() == Some(local))
        .map(|(_, v)| v.as_str())
}

/// Slice `xml` by a byte range produced by [`SpanReader`].
pub(crate) fn slice(xml: &str, range: Range<usize>) -> Result<&str> {
    xml.get(range.clone())
        .ok_or_else(|| XlmergeError::format(format!("invalid XML span {range:?}")))
}

/// quick-xml reader that reports the source byte range of every event and
/// rejects documents that end with unclosed elements.
pub(crate) struct SpanReader<'a> {
    xml: &'a str,
    reader: Reader<&'a [u8]>,
    depth: usize,
}

impl<'a> SpanReader<'a> {
    pub(crate) fn new(xml: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);
        reader.check_end_names(true);
        Self {
            xml,
            reader,
            depth: 0,
        }
    }

    /// Nesting depth after the last event returned.
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Read the next event with the range of source text it was parsed from.
    ///
    /// Tag ranges include the angle brackets. Text ranges cover the raw
    /// (still escaped) character data only.
    pub(crate) fn next_event(&mut self) -> Result<(Event<'a>, Range<usize>)> {
        let before = self.reader.buffer_position();
        let event = self.reader.read_event()?;
        let after = self.reader.buffer_position();
        let bytes = self.xml.as_bytes();

        let range = match &event {
            Event::Eof => {
                if self.depth != 0 {
                    return Err(XlmergeError::format(
                        "unexpected end of XML document (unclosed element)",
                    ));
                }
                bytes.len()..bytes.len()
            }
            // The reader consumes the `<` that terminates a text run.
            Event::Text(_) => {
                let end = if after > before && bytes.get(after - 1) == Some(&b'<') {
                    after - 1
                } else {
                    after
                };
                before..end
            }
            _ => {
                let start = if bytes.get(before) == Some(&b'<') {
                    before
                } else {
                    before.saturating_sub(1)
                };
                start..after
            }
        };

        match &event {
            Event::Start(_) => self.depth += 1,
            Event::End(_) => {
                self.depth = self
                    .depth
                    .checked_sub(1)
                    .ok_or_else(|| XlmergeError::format("unbalanced closing tag"))?;
            }
            _ => {}
        }

        Ok((event, range))
    }
}

/// One direct child node of a container element, kept as its exact source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildNode {
    /// Local element name; `None` for text, comments and other non-element nodes.
    pub local_name: Option<String>,
    /// Attributes of the element's start tag.
    pub attrs: Vec<(String, String)>,
    /// Source text of the whole node, or freshly generated markup.
    pub raw: String,
}

impl ChildNode {
    /// A generated element node.
    pub fn element(local_name: &str, attrs: Vec<(String, String)>, raw: String) -> Self {
        Self {
            local_name: Some(local_name.to_string()),
            attrs,
            raw,
        }
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name.as_deref() == Some(local)
    }

    pub fn attr(&self, local: &str) -> Option<&str> {
        find_attr(&self.attrs, local)
    }

    /// Set an attribute on an element node, regenerating only its start tag.
    pub fn set_attr(&mut self, key: &str, value: String) -> Result<()> {
        let mut reader = SpanReader::new(&self.raw);
        let (name, empty, tag_end) = loop {
            let (event, range) = reader.next_event()?;
            match event {
                Event::Start(ref e) => break (qualified_name_string(e), false, range.end),
                Event::Empty(ref e) => break (qualified_name_string(e), true, range.end),
                Event::Eof => return Ok(()),
                _ => {}
            }
        };
        set_attr(&mut self.attrs, key, value);
        let mut raw = write_start_tag(&name, &self.attrs, empty);
        raw.push_str(slice(&self.raw, tag_end..self.raw.len())?);
        self.raw = raw;
        Ok(())
    }
}

/// A document split around one container element.
///
/// The container's direct children are individually addressable; the text
/// before the container's start tag and after its end tag is kept verbatim.
/// Serializing an unmodified split yields the source bytes unchanged.
#[derive(Clone, Debug)]
pub struct SplitDocument {
    head: String,
    container_name: String,
    container_attrs: Vec<(String, String)>,
    open_raw: Option<String>,
    pub children: Vec<ChildNode>,
    close_raw: String,
    tail: String,
}

impl SplitDocument {
    /// Split `xml` around the first element whose local name is `container`.
    pub fn parse(xml: &str, container: &str) -> Result<Self> {
        let mut reader = SpanReader::new(xml);
        let container = container.as_bytes();

        let mut found: Option<Self> = None;
        // depth of the container's children while inside it
        let mut inside = false;
        let mut child_start: Option<(usize, String, Vec<(String, String)>)> = None;
        let mut container_depth = 0usize;

        loop {
            let (event, range) = reader.next_event()?;
            match event {
                Event::Eof => break,
                Event::Start(ref e) if found.is_none() && e.local_name().as_ref() == container => {
                    found = Some(Self {
                        head: slice(xml, 0..range.start)?.to_string(),
                        container_name: qualified_name_string(e),
                        container_attrs: attributes(e)?,
                        open_raw: Some(slice(xml, range.clone())?.to_string()),
                        children: Vec::new(),
                        close_raw: String::new(),
                        tail: String::new(),
                    });
                    inside = true;
                    container_depth = reader.depth();
                }
                Event::Empty(ref e) if found.is_none() && e.local_name().as_ref() == container => {
                    let name = qualified_name_string(e);
                    let attrs = attributes(e)?;
                    found = Some(Self {
                        head: slice(xml, 0..range.start)?.to_string(),
                        close_raw: format!("</{name}>"),
                        container_name: name,
                        container_attrs: attrs,
                        // an empty-element container is always rewritten as a start/end pair
                        open_raw: None,
                        children: Vec::new(),
                        tail: slice(xml, range.end..xml.len())?.to_string(),
                    });
                }
                Event::End(_) if inside && reader.depth() + 1 == container_depth => {
                    if let Some(doc) = found.as_mut() {
                        doc.close_raw = slice(xml, range.clone())?.to_string();
                        doc.tail = slice(xml, range.end..xml.len())?.to_string();
                    }
                    inside = false;
                }
                ref other if inside => {
                    let Some(doc) = found.as_mut() else {
                        continue;
                    };
                    let depth_after = reader.depth();
                    match other {
                        Event::Start(e) if depth_after == container_depth + 1 => {
                            child_start = Some((range.start, local_name_string(e), attributes(e)?));
                        }
                        Event::End(_) if depth_after == container_depth => {
                            if let Some((start, name, attrs)) = child_start.take() {
                                doc.children.push(ChildNode {
                                    local_name: Some(name),
                                    attrs,
                                    raw: slice(xml, start..range.end)?.to_string(),
                                });
                            }
                        }
                        Event::Empty(e) if depth_after == container_depth => {
                            doc.children.push(ChildNode {
                                local_name: Some(local_name_string(e)),
                                attrs: attributes(e)?,
                                raw: slice(xml, range.clone())?.to_string(),
                            });
                        }
                        _ if depth_after == container_depth && child_start.is_none() => {
                            doc.children.push(ChildNode {
                                local_name: None,
                                attrs: Vec::new(),
                                raw: slice(xml, range.clone())?.to_string(),
                            });
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        found.ok_or_else(|| {
            XlmergeError::format(format!(
                "missing <{}> element",
                String::from_utf8_lossy(container)
            ))
        })
    }

    /// Qualified name of the container element.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Namespace prefix of the container element (`""` when unprefixed).
    pub fn prefix(&self) -> &str {
        self.container_name
            .split_once(':')
            .map_or("", |(prefix, _)| prefix)
    }

    /// Qualify a local element name with the container's prefix.
    pub fn qualify(&self, local: &str) -> String {
        match self.prefix() {
            "" => local.to_string(),
            prefix => format!("{prefix}:{local}"),
        }
    }

    pub fn container_attr(&self, local: &str) -> Option<&str> {
        find_attr(&self.container_attrs, local)
    }

    /// Update a container attribute; the start tag is regenerated on write.
    pub fn set_container_attr(&mut self, key: &str, value: String) {
        if find_attr(&self.container_attrs, key) == Some(value.as_str()) {
            return;
        }
        set_attr(&mut self.container_attrs, key, value);
        self.open_raw = None;
    }

    /// Element children with the given local name.
    pub fn elements<'s>(&'s self, local: &'s str) -> impl Iterator<Item = &'s ChildNode> + 's {
        self.children.iter().filter(move |c| c.is(local))
    }

    /// Insert a child after the last child named `after_local`, or at the end.
    pub fn insert_after_last(&mut self, after_local: &str, node: ChildNode) {
        match self.children.iter().rposition(|c| c.is(after_local)) {
            Some(pos) => self.children.insert(pos + 1, node),
            None => self.children.push(node),
        }
    }

    /// Serialize with the container element left out entirely.
    pub fn to_xml_without_container(&self) -> String {
        format!("{}{}", self.head, self.tail)
    }

    /// Serialize back to text.
    pub fn to_xml(&self) -> String {
        let body: usize = self.children.iter().map(|c| c.raw.len()).sum();
        let mut out = String::with_capacity(self.head.len() + body + self.tail.len() + 128);
        out.push_str(&self.head);
        match &self.open_raw {
            Some(raw) => out.push_str(raw),
            None => out.push_str(&write_start_tag(
                &self.container_name,
                &self.container_attrs,
                false,
            )),
        }
        for child in &self.children {
            out.push_str(&child.raw);
        }
        out.push_str(&self.close_raw);
        out.push_str(&self.tail);
        out
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    fn make_start(xml: &str) -> BytesStart<'_> {
        // Strip < and > / /> to get just the tag content
        let content = xml
            .trim_start_matches('<')
            .trim_end_matches('>')
            .trim_end_matches('/')
            .trim_end();
        BytesStart::from_content(content, content.find(' ').unwrap_or(content.len()))
    }

    #[test]
    fn test_attr_string() {
        let e = make_start(r#"<sheet name="A &amp; B" r:id="rId1"/>"#);
        assert_eq!(attr_string(&e, b"name"), Some("A & B".to_string()));
        assert_eq!(attr_string(&e, b"r:id"), Some("rId1".to_string()));
        assert_eq!(attr_string(&e, b"id"), None);
    }

    #[test]
    fn test_write_start_tag_escapes() {
        let attrs = vec![("name".to_string(), "a\"b<c".to_string())];
        assert_eq!(
            write_start_tag("sheet", &attrs, true),
            r#"<sheet name="a&quot;b&lt;c"/>"#
        );
    }

    #[test]
    fn test_encode_xstring() {
        assert!(matches!(encode_xstring("plain_text"), Cow::Borrowed(_)));
        assert_eq!(encode_xstring("x\u{1}y\u{1F}"), "x_x0001_y_x001F_");
        assert_eq!(encode_xstring("tab\tnewline\n"), "tab\tnewline\n");
        assert_eq!(encode_xstring("_x0041_"), "_x005F_x0041_");
        assert_eq!(encode_xstring("_xyz_"), "_xyz_");
    }

    #[test]
    fn test_decode_xstring() {
        assert_eq!(decode_xstring("x_x0001_y"), "x\u{1}y");
        assert_eq!(decode_xstring("_x005F_x0041_"), "_x0041_");
        assert_eq!(decode_xstring("_x00e9_t_x00E9_"), "\u{e9}t\u{e9}");
        assert_eq!(decode_xstring("_xD800_ _x12_"), "_xD800_ _x12_");
        let text = "a\u{0}b _x0041_ \u{FFFF}";
        assert_eq!(decode_xstring(&encode_xstring(text)), text);
    }

    #[test]
    fn test_span_reader_ranges() {
        let xml = r#"<a x="1"><b>te&amp;xt</b><c/></a>"#;
        let mut reader = SpanReader::new(xml);
        let mut spans = Vec::new();
        loop {
            let (event, range) = reader.next_event().unwrap();
            if matches!(event, Event::Eof) {
                break;
            }
            spans.push(&xml[range]);
        }
        assert_eq!(
            spans,
            vec![r#"<a x="1">"#, "<b>", "te&amp;xt", "</b>", "<c/>", "</a>"]
        );
    }

    #[test]
    fn test_span_reader_rejects_unclosed() {
        let mut reader = SpanReader::new("<a><b></b>");
        let mut result = Ok(());
        loop {
            match reader.next_event() {
                Ok((Event::Eof, _)) => break,
                Ok(_) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert!(matches!(result, Err(XlmergeError::PackageFormat(_))));
    }

    #[test]
    fn test_split_roundtrip_is_identity() {
        let xml = "<?xml version=\"1.0\"?>\n<root a=\"1\">\n  <item id=\"1\"><t>x</t></item>\n  <item id=\"2\"/>\n  <!-- note -->\n</root>\n";
        let doc = SplitDocument::parse(xml, "root").unwrap();
        assert_eq!(doc.elements("item").count(), 2);
        assert_eq!(doc.to_xml(), xml);
    }

    #[test]
    fn test_split_nested_container() {
        let xml = r#"<workbook><sheets><sheet name="S1" r:id="rId1"/></sheets><calcPr/></workbook>"#;
        let doc = SplitDocument::parse(xml, "sheets").unwrap();
        let sheet = doc.elements("sheet").next().unwrap();
        assert_eq!(sheet.attr("id"), Some("rId1"));
        assert_eq!(doc.to_xml(), xml);
    }

    #[test]
    fn test_split_empty_container_expands() {
        let mut doc = SplitDocument::parse(r#"<sst count="0"/>"#, "sst").unwrap();
        assert_eq!(doc.container_attr("count"), Some("0"));
        doc.children.push(ChildNode::element(
            "si",
            Vec::new(),
            "<si><t>a</t></si>".to_string(),
        ));
        doc.set_container_attr("count", "1".to_string());
        assert_eq!(doc.to_xml(), r#"<sst count="1"><si><t>a</t></si></sst>"#);
    }

    #[test]
    fn test_split_prefixed_container() {
        let doc = SplitDocument::parse(r#"<x:sst xmlns:x="urn:x"></x:sst>"#, "sst").unwrap();
        assert_eq!(doc.prefix(), "x");
        assert_eq!(doc.qualify("si"), "x:si");
    }

    #[test]
    fn test_split_missing_container() {
        let err = SplitDocument::parse("<root/>", "sheets").unwrap_err();
        assert!(matches!(err, XlmergeError::PackageFormat(_)));
    }
}
