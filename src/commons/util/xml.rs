//! Support for reading namespaced XML documents.
use std::{fmt, io};

use xml::attribute::OwnedAttribute;
use xml::namespace::Namespace;
use xml::reader::{self, XmlEvent};
use xml::{EventReader, ParserConfig};

//------------ XmlReader -----------------------------------------------------

/// A convenience wrapper for XML parsing
///
/// Unlike a schema-bound parser this reader is tolerant: content the
/// consumer is not interested in can be skipped wholesale with
/// [`XmlReader::skip_content`].
pub struct XmlReader<R: io::Read> {
    /// The underlying xml-rs reader
    reader: EventReader<R>,

    /// Placeholder for an event so that 'peek' can be supported, as
    /// well as temporarily caching a close event in case a list of
    /// inner elements is processed.
    cached_event: Option<XmlEvent>,
}

/// Reader methods
impl<R: io::Read> XmlReader<R> {
    /// Gets the next XmlEvent
    ///
    /// Will take cached event if there is one. Processing instructions
    /// carry nothing we care about and are dropped here.
    fn next(&mut self) -> Result<XmlEvent, XmlReaderErr> {
        if let Some(e) = self.cached_event.take() {
            return Ok(e);
        }
        loop {
            match self.reader.next()? {
                XmlEvent::ProcessingInstruction { .. }
                | XmlEvent::Comment(_)
                | XmlEvent::Whitespace(_) => continue,
                e => return Ok(e),
            }
        }
    }

    /// Puts an XmlEvent back so that it can be retrieved by 'next'
    fn cache(&mut self, e: XmlEvent) {
        self.cached_event = Some(e);
    }
}

/// Basic operations to parse the XML.
impl<R: io::Read> XmlReader<R> {
    fn start_document(&mut self) -> Result<(), XmlReaderErr> {
        match self.next()? {
            XmlEvent::StartDocument { .. } => Ok(()),
            _ => Err(XmlReaderErr::ExpectedStartDocument),
        }
    }

    fn expect_element(&mut self) -> Result<(Tag, Attributes), XmlReaderErr> {
        match self.next()? {
            XmlEvent::StartElement {
                name,
                attributes,
                namespace,
            } => Ok((
                Tag {
                    namespace: name.namespace,
                    name: name.local_name,
                    scope: namespace,
                },
                Attributes { attributes },
            )),
            _ => Err(XmlReaderErr::ExpectedStart),
        }
    }

    fn expect_close(&mut self, tag: &Tag) -> Result<(), XmlReaderErr> {
        match self.next()? {
            XmlEvent::EndElement { name } => {
                if name.local_name == tag.name
                    && name.namespace == tag.namespace
                {
                    Ok(())
                } else {
                    Err(XmlReaderErr::ExpectedClose(tag.name.clone()))
                }
            }
            _ => Err(XmlReaderErr::ExpectedClose(tag.name.clone())),
        }
    }

    fn end_document(&mut self) -> Result<(), XmlReaderErr> {
        match self.next()? {
            XmlEvent::EndDocument => Ok(()),
            _ => Err(XmlReaderErr::ExpectedEnd),
        }
    }
}

/// Closure based parsing of XML.
///
/// This approach ensures that the consumer can only get opening tags, or
/// content (such as Characters), and process the enclosed content. In
/// particular it ensures that the consumer cannot accidentally get close
/// tags - so it forces that execution returns.
impl<R: io::Read> XmlReader<R> {
    /// Decodes an XML structure
    ///
    /// This method checks that the document starts, then passes a reader
    /// instance to the provided closure, and will return the result from
    /// that after checking that the XML document is fully processed.
    pub fn decode<F, T, E>(source: R, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<XmlReaderErr>,
    {
        let config = ParserConfig::new()
            .trim_whitespace(true)
            .ignore_comments(true)
            .cdata_to_characters(true)
            .coalesce_characters(true);

        let mut xml = XmlReader {
            reader: config.create_reader(source),
            cached_event: None,
        };

        xml.start_document()?;
        let res = op(&mut xml)?;
        xml.end_document()?;

        Ok(res)
    }

    /// Takes an element and process it in a closure
    ///
    /// This method checks that the next element is indeed a Start Element,
    /// and passes the Tag and Attributes and this reader to a closure. After
    /// the closure completes it will verify that the next element is the
    /// Close Element for this Tag, and returns the result from the closure.
    pub fn take_element<F, T, E>(&mut self, op: F) -> Result<T, E>
    where
        F: FnOnce(&Tag, Attributes, &mut Self) -> Result<T, E>,
        E: From<XmlReaderErr>,
    {
        let (tag, attr) = self.expect_element()?;
        let res = op(&tag, attr, self)?;
        self.expect_close(&tag)?;
        Ok(res)
    }

    /// Takes the next element that is part of a list of elements under the
    /// current element, and processes it using a closure. When the end of
    /// the list is encountered, i.e. the next event is not a start element,
    /// then the closure is not executed and Ok(None) is returned. The event
    /// is put back on the cache for processing by the parent structure.
    pub fn take_opt_element<F, T, E>(&mut self, op: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&Tag, Attributes, &mut Self) -> Result<T, E>,
        E: From<XmlReaderErr>,
    {
        let n = self.next()?;
        match n {
            XmlEvent::StartElement {
                name,
                attributes,
                namespace,
            } => {
                let tag = Tag {
                    namespace: name.namespace,
                    name: name.local_name,
                    scope: namespace,
                };
                let res = op(&tag, Attributes { attributes }, self)?;
                self.expect_close(&tag)?;
                Ok(Some(res))
            }
            _ => {
                self.cache(n);
                Ok(None)
            }
        }
    }

    /// Skips all content up to the close of the current element.
    ///
    /// Nested elements and text are consumed. The close event itself is
    /// left for the enclosing `take_*` method to verify.
    pub fn skip_content(&mut self) -> Result<(), XmlReaderErr> {
        let mut depth = 0usize;
        loop {
            let e = self.next()?;
            match e {
                XmlEvent::StartElement { .. } => depth += 1,
                XmlEvent::EndElement { .. } => {
                    if depth == 0 {
                        self.cache(e);
                        return Ok(());
                    }
                    depth -= 1;
                }
                XmlEvent::EndDocument => return Err(XmlReaderErr::ExpectedEnd),
                _ => {}
            }
        }
    }

    /// Takes the text content of the current element.
    ///
    /// Returns an empty string for an empty element. Fails if the element
    /// has child elements.
    pub fn take_text(&mut self) -> Result<String, XmlReaderErr> {
        let mut text = String::new();
        loop {
            let e = self.next()?;
            match e {
                XmlEvent::Characters(chars) | XmlEvent::CData(chars) => {
                    text.push_str(&chars)
                }
                XmlEvent::EndElement { .. } => {
                    self.cache(e);
                    return Ok(text);
                }
                _ => return Err(XmlReaderErr::ExpectedCharacters),
            }
        }
    }
}

//------------ XmlReaderErr --------------------------------------------------

#[derive(Debug)]
pub enum XmlReaderErr {
    ExpectedStartDocument,
    ExpectedStart,
    ExpectedCharacters,
    ExpectedClose(String),
    ExpectedEnd,
    AttributesError(AttributesError),
    ReaderError(reader::Error),
}

impl fmt::Display for XmlReaderErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            XmlReaderErr::ExpectedStartDocument => {
                write!(f, "Expected Start of Document")
            }
            XmlReaderErr::ExpectedStart => write!(f, "Expected Start Element"),
            XmlReaderErr::ExpectedCharacters => {
                write!(f, "Expected Characters Element")
            }
            XmlReaderErr::ExpectedClose(name) => {
                write!(f, "Expected Close Element with name: {}", name)
            }
            XmlReaderErr::ExpectedEnd => write!(f, "Expected End of Document"),
            XmlReaderErr::AttributesError(e) => {
                write!(f, "Attributes Error: {}", e)
            }
            XmlReaderErr::ReaderError(e) => write!(f, "XML Reader Error: {}", e),
        }
    }
}

impl std::error::Error for XmlReaderErr {}

impl From<AttributesError> for XmlReaderErr {
    fn from(e: AttributesError) -> XmlReaderErr {
        XmlReaderErr::AttributesError(e)
    }
}

impl From<reader::Error> for XmlReaderErr {
    fn from(e: reader::Error) -> XmlReaderErr {
        XmlReaderErr::ReaderError(e)
    }
}

//------------ Attributes ----------------------------------------------------

/// A convenient wrapper for XML tag attributes
pub struct Attributes {
    /// The underlying xml-rs structure
    attributes: Vec<OwnedAttribute>,
}

impl Attributes {
    /// Takes an optional unqualified attribute by name
    pub fn take_opt(&mut self, name: &str) -> Option<String> {
        let i = self.attributes.iter().position(|a| {
            a.name.namespace.is_none() && a.name.local_name == name
        })?;
        Some(self.attributes.swap_remove(i).value)
    }

    /// Takes an optional namespace qualified attribute
    pub fn take_opt_ns(&mut self, namespace: &str, name: &str) -> Option<String> {
        let i = self.attributes.iter().position(|a| {
            a.name.namespace.as_deref() == Some(namespace)
                && a.name.local_name == name
        })?;
        Some(self.attributes.swap_remove(i).value)
    }

    /// Takes a required unqualified attribute by name
    pub fn take_req(&mut self, name: &str) -> Result<String, AttributesError> {
        self.take_opt(name)
            .ok_or_else(|| AttributesError::MissingAttribute(name.to_string()))
    }
}

//------------ AttributesError -----------------------------------------------

#[derive(Debug)]
pub enum AttributesError {
    MissingAttribute(String),
    InvalidValue(String, String),
}

impl AttributesError {
    pub fn invalid(name: &str, msg: impl fmt::Display) -> Self {
        AttributesError::InvalidValue(name.to_string(), msg.to_string())
    }
}

impl fmt::Display for AttributesError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttributesError::MissingAttribute(name) => {
                write!(f, "Required attribute missing: {}", name)
            }
            AttributesError::InvalidValue(name, msg) => {
                write!(f, "Invalid value for attribute {}: {}", name, msg)
            }
        }
    }
}

//------------ Tag -----------------------------------------------------------

/// The name of a start element, with the namespaces in scope.
pub struct Tag {
    pub namespace: Option<String>,
    pub name: String,
    scope: Namespace,
}

impl Tag {
    /// Returns whether this tag has the given namespace and local name.
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.name == name
    }

    /// Resolves a `prefix:local` value against the namespaces in scope.
    ///
    /// Unprefixed values resolve to the default namespace, if any.
    pub fn resolve_qname(&self, value: &str) -> Option<(Option<String>, String)> {
        let value = value.trim();
        match value.split_once(':') {
            Some((prefix, local)) => {
                let ns = self.scope.get(prefix)?;
                Some((Some(ns.to_string()), local.to_string()))
            }
            None => {
                let ns = self
                    .scope
                    .get(xml::namespace::NS_NO_PREFIX)
                    .filter(|ns| !ns.is_empty())
                    .map(ToString::to_string);
                Some((ns, value.to_string()))
            }
        }
    }
}

//------------ Tests ---------------------------------------------------------
