use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::{self, Cursor, Write};
use thiserror::Error;

/// A single element in a domain descriptor: tag name, attributes in authored
/// order (keys unique), ordered children and optional inline text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub tag: String,
    attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub text: Option<String>,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute, replacing in place so authored order is preserved.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn find_child(&self, tag: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn find_child_mut(&mut self, tag: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.tag == tag)
    }

    /// Returns the first child with the given tag, appending a fresh one when
    /// none exists.
    pub fn ensure_child(&mut self, tag: &str) -> &mut Node {
        let idx = match self.children.iter().position(|c| c.tag == tag) {
            Some(idx) => idx,
            None => {
                self.children.push(Node::new(tag));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    pub fn append_child(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Inserts `child` immediately after the first child with tag `anchor`,
    /// or appends it when no such sibling exists.
    pub fn insert_after(&mut self, anchor: &str, child: Node) {
        match self.children.iter().position(|c| c.tag == anchor) {
            Some(idx) => self.children.insert(idx + 1, child),
            None => self.children.push(child),
        }
    }

    pub fn remove_child(&mut self, tag: &str) -> Option<Node> {
        let idx = self.children.iter().position(|c| c.tag == tag)?;
        Some(self.children.remove(idx))
    }

    /// Depth-first walk in document order, visiting this node first.
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&Node),
    {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// Mutable depth-first walk in document order.
    pub fn visit_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Node),
    {
        f(self);
        for child in &mut self.children {
            child.visit_mut(f);
        }
    }

    /// Collects references to all descendants (including self) matching the
    /// predicate, in document order.
    pub fn find_descendants<'a>(&'a self, pred: &dyn Fn(&Node) -> bool) -> Vec<&'a Node> {
        let mut found = Vec::new();
        collect_matching(self, pred, &mut found);
        found
    }
}

fn collect_matching<'a>(node: &'a Node, pred: &dyn Fn(&Node) -> bool, out: &mut Vec<&'a Node>) {
    if pred(node) {
        out.push(node);
    }
    for child in &node.children {
        collect_matching(child, pred, out);
    }
}

/// Errors raised while reading a domain descriptor.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed descriptor XML at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("descriptor has no root element")]
    NoRootElement,

    #[error("unclosed element <{0}>")]
    UnclosedElement(String),

    #[error("content found outside the root element")]
    ContentOutsideRoot,
}

fn xml_err(position: u64, source: impl Into<quick_xml::Error>) -> ParseError {
    ParseError::Xml {
        position,
        source: source.into(),
    }
}

/// In-memory tree form of a domain descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Node,
}

impl Document {
    /// Parses a descriptor. Malformed input fails fast; there is no partial
    /// recovery.
    pub fn parse(text: &str) -> Result<Document, ParseError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Node> = Vec::new();
        let mut root: Option<Node> = None;

        loop {
            let position = reader.buffer_position();
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(ParseError::ContentOutsideRoot);
                    }
                    stack.push(node_from_start(&start, position)?);
                }
                Ok(Event::Empty(start)) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(ParseError::ContentOutsideRoot);
                    }
                    let node = node_from_start(&start, position)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Ok(Event::End(_)) => {
                    let node = match stack.pop() {
                        Some(node) => node,
                        None => return Err(ParseError::ContentOutsideRoot),
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                Ok(Event::Text(t)) => {
                    let unescaped = t.unescape().map_err(|e| xml_err(position, e))?;
                    match stack.last_mut() {
                        Some(parent) => match &mut parent.text {
                            Some(existing) => existing.push_str(&unescaped),
                            None => parent.text = Some(unescaped.into_owned()),
                        },
                        None => return Err(ParseError::ContentOutsideRoot),
                    }
                }
                Ok(Event::CData(c)) => {
                    let raw = String::from_utf8_lossy(&c).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        match &mut parent.text {
                            Some(existing) => existing.push_str(&raw),
                            None => parent.text = Some(raw),
                        }
                    }
                }
                Ok(Event::Eof) => break,
                // Declarations, comments, PIs and doctypes carry no domain
                // configuration.
                Ok(_) => {}
                Err(e) => return Err(xml_err(position, e)),
            }
        }

        if let Some(open) = stack.pop() {
            return Err(ParseError::UnclosedElement(open.tag));
        }
        root.map(|root| Document { root })
            .ok_or(ParseError::NoRootElement)
    }

    /// Serializes the document. The pretty form carries a declaration line,
    /// two-space indentation and a trailing newline; attribute order is
    /// emitted exactly as stored.
    pub fn serialize(&self, pretty: bool) -> io::Result<String> {
        let cursor = Cursor::new(Vec::new());
        let buf = if pretty {
            let mut writer = Writer::new_with_indent(cursor, b' ', 2);
            write_document(&mut writer, &self.root)?;
            writer.into_inner().into_inner()
        } else {
            let mut writer = Writer::new(cursor);
            write_document(&mut writer, &self.root)?;
            writer.into_inner().into_inner()
        };
        let mut out = String::from_utf8(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        out.push('\n');
        Ok(out)
    }
}

fn node_from_start(start: &BytesStart<'_>, position: u64) -> Result<Node, ParseError> {
    let mut node = Node::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| xml_err(position, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| xml_err(position, e))?
            .into_owned();
        node.set_attr(&key, value);
    }
    Ok(node)
}

fn write_document<W: Write>(writer: &mut Writer<W>, root: &Node) -> io::Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_node(writer, root)
}

fn write_node<W: Write>(writer: &mut Writer<W>, node: &Node) -> io::Result<()> {
    let mut start = BytesStart::new(node.tag.as_str());
    for (key, value) in node.attrs() {
        start.push_attribute((key, value));
    }

    if node.children.is_empty() && node.text.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    if let Some(text) = &node.text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(node.tag.as_str())))?;
    Ok(())
}
