use quick_xml::{
    Writer,
    events::{BytesEnd, BytesStart, BytesText, Event},
    name::ResolveResult,
    reader::NsReader,
};
use thiserror::Error;

/// Deepest element nesting we will parse. Real enrollment envelopes stay under ten.
pub const MAX_DEPTH: usize = 32;
/// Upper bound on elements within a single request.
pub const MAX_ELEMENTS: usize = 4096;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed xml: {0}")]
    Malformed(#[from] quick_xml::Error),
    #[error("unable to write xml: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("document is not valid utf-8")]
    Encoding,
    #[error("document has no root element")]
    Empty,
    #[error("document nests deeper than {MAX_DEPTH} elements")]
    TooDeep,
    #[error("document holds more than {MAX_ELEMENTS} elements")]
    TooManyElements,
    #[error("document type declarations are not accepted")]
    DocType,
    #[error("document is unbalanced")]
    Unbalanced,
}

/// A namespace-resolved XML element.
///
/// Inbound SOAP messages are small and bounded, so we decode them into
/// a tree once and let each message type pick out what it needs.
#[derive(Clone, Debug, Default)]
pub struct Element {
    pub namespace: Option<String>,
    pub name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    /// Parses a complete document, returning its root element.
    pub fn parse(document: &[u8]) -> Result<Element, XmlError> {
        let document = std::str::from_utf8(document).map_err(|_| XmlError::Encoding)?;
        let mut reader = NsReader::from_str(document);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut element_count = 0;

        loop {
            let (resolved, event) = reader
                .read_resolved_event()
                .map_err(quick_xml::Error::from)?;

            match event {
                Event::Start(_) | Event::Empty(_) if root.is_some() => {
                    return Err(XmlError::Unbalanced);
                }
                Event::Start(start) => {
                    element_count += 1;
                    if element_count > MAX_ELEMENTS {
                        return Err(XmlError::TooManyElements);
                    }
                    if stack.len() >= MAX_DEPTH {
                        return Err(XmlError::TooDeep);
                    }
                    stack.push(Element::from_start(resolved, &start)?);
                }
                Event::Empty(start) => {
                    element_count += 1;
                    if element_count > MAX_ELEMENTS {
                        return Err(XmlError::TooManyElements);
                    }
                    let element = Element::from_start(resolved, &start)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or(XmlError::Unbalanced)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let text = text.unescape().map_err(quick_xml::Error::from)?;
                        current.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        let data = data.into_inner();
                        let data = std::str::from_utf8(&data).map_err(|_| XmlError::Encoding)?;
                        current.text.push_str(data);
                    }
                }
                Event::DocType(_) => return Err(XmlError::DocType),
                Event::Eof => break,
                // Declarations, comments and processing instructions carry nothing we need.
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Unbalanced);
        }
        root.ok_or(XmlError::Empty)
    }

    fn from_start(resolved: ResolveResult, start: &BytesStart) -> Result<Element, XmlError> {
        let namespace = match resolved {
            ResolveResult::Bound(namespace) => {
                let namespace =
                    std::str::from_utf8(namespace.as_ref()).map_err(|_| XmlError::Encoding)?;
                Some(namespace.to_string())
            }
            _ => None,
        };
        let local_name = start.local_name();
        let name = std::str::from_utf8(local_name.as_ref())
            .map_err(|_| XmlError::Encoding)?
            .to_string();

        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            // Namespace declarations were already consumed by the resolver.
            if attribute.key.as_namespace_binding().is_some() {
                continue;
            }
            let key_name = attribute.key.local_name();
            let key = std::str::from_utf8(key_name.as_ref())
                .map_err(|_| XmlError::Encoding)?
                .to_string();
            let value = attribute
                .unescape_value()
                .map_err(quick_xml::Error::from)?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Element {
            namespace,
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    /// Whether this element has the given namespace and local name.
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    pub fn child(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.is(namespace, name))
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children
            .iter()
            .filter(move |child| child.is(namespace, name))
    }

    /// Detaches the first direct child with the given name.
    pub fn take_child(&mut self, namespace: &str, name: &str) -> Option<Element> {
        let index = self
            .children
            .iter()
            .position(|child| child.is(namespace, name))?;
        Some(self.children.remove(index))
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn into_first_child(self) -> Option<Element> {
        self.children.into_iter().next()
    }

    /// Looks up an attribute by its local name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Text of a direct child, if that child exists.
    pub fn child_text(&self, namespace: &str, name: &str) -> Option<&str> {
        self.child(namespace, name).map(Element::text)
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

/// Thin wrapper over [`quick_xml::Writer`] for emitting prefixed SOAP documents.
///
/// Every response we send has a fixed shape, so callers spell out
/// elements in order rather than relying on derive-driven serialization.
pub struct XmlWriter {
    writer: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub fn new() -> Self {
        XmlWriter {
            writer: Writer::new(Vec::new()),
        }
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), XmlError> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.writer.write_event(Event::Start(start))?;
        Ok(())
    }

    pub fn end(&mut self, name: &str) -> Result<(), XmlError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), XmlError> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.writer.write_event(Event::Empty(start))?;
        Ok(())
    }

    /// Writes `<name attributes...>text</name>`, escaping the text.
    pub fn text_element(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        text: &str,
    ) -> Result<(), XmlError> {
        self.start(name, attributes)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    /// Writes `<name xsi:nil="true"/>`.
    pub fn nil(&mut self, name: &str) -> Result<(), XmlError> {
        self.empty(name, &[("xsi:nil", "true")])
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_and_prefixed_namespaces() {
        let document = br#"<s:Envelope xmlns:s="urn:s"><s:Body><Item xmlns="urn:d" Name="x"><Value>1 &amp; 2</Value></Item></s:Body></s:Envelope>"#;
        let root = Element::parse(document).unwrap();
        assert!(root.is("urn:s", "Envelope"));

        let item = root.child("urn:s", "Body").unwrap().child("urn:d", "Item").unwrap();
        assert_eq!(item.attribute("Name"), Some("x"));
        assert_eq!(item.child_text("urn:d", "Value"), Some("1 & 2"));
        assert!(item.child("urn:s", "Value").is_none());
    }

    #[test]
    fn rejects_empty_and_truncated_documents() {
        assert!(matches!(Element::parse(b""), Err(XmlError::Empty)));
        assert!(Element::parse(b"<a><b></b>").is_err());
        assert!(Element::parse(b"<a/><b/>").is_err());
    }

    #[test]
    fn rejects_doctype() {
        let document = br#"<!DOCTYPE a [<!ENTITY x "y">]><a>&x;</a>"#;
        assert!(Element::parse(document).is_err());
    }

    #[test]
    fn bounds_nesting_depth() {
        let mut document = String::new();
        for _ in 0..=MAX_DEPTH {
            document.push_str("<a>");
        }
        for _ in 0..=MAX_DEPTH {
            document.push_str("</a>");
        }
        assert!(matches!(
            Element::parse(document.as_bytes()),
            Err(XmlError::TooDeep)
        ));
    }

    #[test]
    fn writer_escapes_text_and_attributes() {
        let mut writer = XmlWriter::new();
        writer.start("root", &[("note", "a\"b")]).unwrap();
        writer.text_element("value", &[], "<tag> & more").unwrap();
        writer.nil("nothing").unwrap();
        writer.end("root").unwrap();

        let output = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            output,
            r#"<root note="a&quot;b"><value>&lt;tag&gt; &amp; more</value><nothing xsi:nil="true"/></root>"#
        );
    }
}
