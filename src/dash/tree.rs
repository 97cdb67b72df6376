//! Lossless MPD document tree on top of `quick-xml` events
//!
//! Elements are materialised so filter passes can walk and prune them; every
//! other event (declaration, comments, text, CDATA) is kept as an owned
//! event and written back unchanged. Start tags keep their source text until
//! an attribute is edited, so quoting and line breaks survive a round trip.

use std::borrow::Cow;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::errors::{DashError, DashResult};

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Other(Event<'static>),
}

impl Node {
    fn is_blank_text(&self) -> bool {
        matches!(self, Node::Other(Event::Text(t)) if t.iter().all(u8::is_ascii_whitespace))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Element {
    /// Qualified name as written, including any prefix
    pub name: String,
    /// Attributes in document order, values unescaped
    attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Written as `<x/>` when it has no children
    pub self_closing: bool,
    /// Start tag content as read, cleared by the first attribute edit
    source: Option<String>,
}

impl Element {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            self_closing: true,
            ..Default::default()
        }
    }

    /// Name without its namespace prefix
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    /// Namespace prefix including the colon, or empty
    pub fn prefix(&self) -> &str {
        &self.name[..self.name.len() - self.local_name().len()]
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute in place, appending it when absent
    pub fn set_attr<V: Into<String>>(&mut self, key: &str, value: V) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) if *v == value => return,
            Some((_, v)) => *v = value,
            None => self.attributes.push((key.to_string(), value)),
        }
        self.source = None;
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Other(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Other(_) => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.local_name() == name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> + 'a {
        self.elements_mut().filter(move |e| e.local_name() == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.local_name() == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.local_name() == name)
    }

    /// Keep only the `name` children for which `keep` returns true.
    ///
    /// Other children are untouched. Indentation in front of a dropped element
    /// is dropped with it. Returns the number of removed elements.
    pub fn retain_elements<F>(&mut self, name: &str, mut keep: F) -> usize
    where
        F: FnMut(&mut Element) -> bool,
    {
        let mut removed = 0;
        let mut kept: Vec<Node> = Vec::with_capacity(self.children.len());
        for mut node in std::mem::take(&mut self.children) {
            if let Node::Element(e) = &mut node {
                if e.local_name() == name && !keep(e) {
                    removed += 1;
                    if kept.last().is_some_and(Node::is_blank_text) {
                        kept.pop();
                    }
                    continue;
                }
            }
            kept.push(node);
        }
        self.children = kept;
        removed
    }

    /// Insert an element before the first child element not named in `after`
    pub fn insert_element(&mut self, element: Element, after: &[&str]) {
        let position = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if !after.contains(&e.local_name())))
            .unwrap_or(self.children.len());
        self.children.insert(position, Node::Element(element));
        self.self_closing = false;
    }

    /// Concatenated text content, unescaped
    pub fn text(&self) -> DashResult<String> {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Other(Event::Text(t)) => {
                    let text = t.unescape().map_err(|e| DashError::decode(e.to_string()))?;
                    out.push_str(&text);
                }
                Node::Other(Event::CData(c)) => out.push_str(&String::from_utf8_lossy(c)),
                _ => {}
            }
        }
        Ok(out)
    }

    /// Replace all children with a single escaped text node
    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Other(Event::Text(BytesText::new(text).into_owned()))];
        self.self_closing = false;
    }
}

/// A whole MPD document
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
}

impl Document {
    pub fn parse(xml: &str) -> DashResult<Self> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| {
                DashError::decode(format!("at byte {}: {e}", reader.buffer_position()))
            })?;
            let node = match event {
                Event::Start(start) => {
                    stack.push(element_from(&start, false)?);
                    continue;
                }
                Event::Empty(start) => Node::Element(element_from(&start, true)?),
                Event::End(_) => match stack.pop() {
                    Some(element) => Node::Element(element),
                    None => return Err(DashError::decode("unexpected closing tag")),
                },
                Event::Eof => break,
                other => Node::Other(other.into_owned()),
            };
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => nodes.push(node),
            }
        }

        if let Some(open) = stack.last() {
            return Err(DashError::decode(format!("unclosed element <{}>", open.name)));
        }
        Ok(Self { nodes })
    }

    pub fn root(&self) -> Option<&Element> {
        self.nodes.iter().find_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Other(_) => None,
        })
    }

    pub fn root_mut(&mut self) -> Option<&mut Element> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Other(_) => None,
        })
    }

    pub fn to_xml(&self) -> DashResult<String> {
        let mut writer = Writer::new(Vec::new());
        for node in &self.nodes {
            write_node(&mut writer, node)?;
        }
        String::from_utf8(writer.into_inner()).map_err(|e| DashError::encode(e.to_string()))
    }
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn utf8(bytes: &[u8]) -> DashResult<Cow<'_, str>> {
    std::str::from_utf8(bytes)
        .map(Cow::Borrowed)
        .map_err(|e| DashError::decode(e.to_string()))
}

fn element_from(start: &BytesStart<'_>, self_closing: bool) -> DashResult<Element> {
    let name = utf8(start.name().as_ref())?.into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DashError::decode(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?.into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| DashError::decode(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        self_closing,
        source: Some(utf8(start)?.into_owned()),
    })
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node) -> DashResult<()> {
    match node {
        Node::Element(element) => {
            let start = match &element.source {
                Some(source) => BytesStart::from_content(source.as_str(), element.name.len()),
                None => {
                    let mut start = BytesStart::new(element.name.as_str());
                    for (key, value) in &element.attributes {
                        start.push_attribute((key.as_str(), value.as_str()));
                    }
                    start
                }
            };
            if element.children.is_empty() && element.self_closing {
                return write_event(writer, Event::Empty(start));
            }
            write_event(writer, Event::Start(start))?;
            for child in &element.children {
                write_node(writer, child)?;
            }
            write_event(writer, Event::End(BytesEnd::new(element.name.as_str())))
        }
        Node::Other(event) => write_event(writer, event.clone()),
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> DashResult<()> {
    writer
        .write_event(event)
        .map_err(|e| DashError::encode(e.to_string()))
}
