//! XML parser that builds element trees.
//!
//! This parser uses quick-xml's streaming API. Text, comments, declarations
//! and processing instructions carry no meaning in configuration documents
//! and are dropped.

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::trace;

use crate::error::{Error, Result};
use crate::node::Element;

/// XML parser that builds element trees.
#[derive(Debug, Default)]
pub struct XmlParser;

impl XmlParser {
    /// Creates a new parser.
    pub fn new() -> Self {
        XmlParser
    }

    /// Parses a document from a string.
    ///
    /// Input that is empty or only whitespace is rejected with
    /// [`Error::EmptyInput`]; input without a single well-formed root
    /// element is rejected with [`Error::MalformedInput`].
    pub fn parse_str(&self, xml: &str) -> Result<Element> {
        if xml.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let element = self.parse_element(e, &reader)?;
                    if stack.is_empty() && root.is_some() {
                        return Err(multiple_roots(element.name()));
                    }
                    stack.push(element);
                }
                Ok(Event::End(_)) => {
                    let Some(done) = stack.pop() else {
                        return Err(Error::MalformedInput("unexpected closing tag".into()));
                    };
                    attach(&mut stack, &mut root, done)?;
                }
                Ok(Event::Empty(ref e)) => {
                    let element = self.parse_element(e, &reader)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::Eof) => break,
                Ok(Event::Text(_))
                | Ok(Event::CData(_))
                | Ok(Event::Comment(_))
                | Ok(Event::Decl(_))
                | Ok(Event::PI(_))
                | Ok(Event::DocType(_))
                | Ok(Event::GeneralRef(_)) => {}
                Err(e) => {
                    return Err(Error::MalformedInput(format!(
                        "{} at position {}",
                        e,
                        reader.buffer_position()
                    )))
                }
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::MalformedInput(format!(
                "unclosed element <{}>",
                open.name()
            )));
        }

        let root = root.ok_or_else(|| Error::MalformedInput("no root element".into()))?;
        trace!(root = root.name(), elements = root.subtree_size(), "parsed document");
        Ok(root)
    }

    /// Parses an element's name and attributes.
    fn parse_element(&self, e: &BytesStart, reader: &Reader<&[u8]>) -> Result<Element> {
        let name = reader
            .decoder()
            .decode(e.name().as_ref())
            .map_err(|e| Error::MalformedInput(e.to_string()))?
            .to_string();

        let mut element = Element::new(name);
        for attr_result in e.attributes() {
            let attr = attr_result
                .map_err(|e| Error::MalformedInput(format!("attribute error: {}", e)))?;
            let key = reader
                .decoder()
                .decode(attr.key.as_ref())
                .map_err(|e| Error::MalformedInput(e.to_string()))?
                .to_string();
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| Error::MalformedInput(e.to_string()))?
                .to_string();
            element.set_attr(key, value);
        }

        Ok(element)
    }
}

/// Attaches a finished element to its parent, or makes it the root.
fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.add_child(element);
        }
        None if root.is_some() => return Err(multiple_roots(element.name())),
        None => *root = Some(element),
    }
    Ok(())
}

fn multiple_roots(name: &str) -> Error {
    Error::MalformedInput(format!("extra content after the root element: <{}>", name))
}

/// Parses a document from a string.
pub fn parse_str(xml: &str) -> Result<Element> {
    XmlParser::new().parse_str(xml)
}

/// Parses a document from UTF-8 bytes.
pub fn parse_bytes(bytes: &[u8]) -> Result<Element> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::MalformedInput(e.to_string()))?;
    parse_str(text)
}

/// Reads a whole stream and parses it as a document.
pub fn parse_reader<R: Read>(mut input: R) -> Result<Element> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    parse_bytes(&bytes)
}
