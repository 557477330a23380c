//! Small owned XML tree used by every on-disk document: databases, feeds,
//! package manifests and worktree files.
//!
//! Documents here are attribute-driven and tiny, so the whole tree is read
//! into memory. Text content is dropped on read.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Replaces an existing attribute in place so attribute order is kept.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some(existing) => existing.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.tag == tag)
    }

    pub fn parse_str(input: &str) -> Result<Self> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        loop {
            match reader
                .read_event()
                .with_context(|| format!("malformed xml at byte {}", reader.buffer_position()))?
            {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| anyhow!("unbalanced closing tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(anyhow!("unclosed element <{}>", open.tag));
        }
        root.ok_or_else(|| anyhow!("document has no root element"))
    }

    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .context("failed writing xml declaration")?;
        write_element(&mut writer, self)?;
        let mut output =
            String::from_utf8(writer.into_inner()).context("xml writer produced non-UTF-8")?;
        output.push('\n');
        Ok(output)
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let tag = String::from_utf8(start.name().as_ref().to_vec()).context("tag is not UTF-8")?;
    let mut element = XmlElement::new(tag);
    for attribute in start.attributes() {
        let attribute =
            attribute.with_context(|| format!("malformed attribute on <{}>", element.tag))?;
        let key = String::from_utf8(attribute.key.as_ref().to_vec())
            .context("attribute name is not UTF-8")?;
        let value = attribute
            .unescape_value()
            .with_context(|| format!("malformed value for attribute '{key}'"))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(anyhow!("document has more than one root element"));
    }
    *root = Some(element);
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(element.tag.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .with_context(|| format!("failed writing <{}>", element.tag))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .with_context(|| format!("failed writing <{}>", element.tag))?;
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.tag.as_str())))
        .with_context(|| format!("failed writing </{}>", element.tag))?;
    Ok(())
}

pub fn read_xml_file(path: &Path) -> Result<XmlElement> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading xml file: {}", path.display()))?;
    XmlElement::parse_str(&content)
        .with_context(|| format!("error when parsing '{}'", path.display()))
}

/// Writes through a sibling temporary file so readers never observe a
/// half-written document.
pub fn write_xml_file(path: &Path, root: &XmlElement) -> Result<()> {
    let content = root.to_xml_string()?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid xml output path: {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));
    fs::write(&tmp_path, content.as_bytes())
        .with_context(|| format!("failed writing {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("failed replacing {}", path.display()));
    }
    Ok(())
}

/// `true`/`1` and `false`/`0`; a missing attribute yields `default`.
pub fn parse_bool_attr(element: &XmlElement, name: &str, default: bool) -> Result<bool> {
    match element.attr(name) {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(anyhow!(
            "expecting value in [true, false, 0, 1] for attribute '{name}' of <{}>, got '{other}'",
            element.tag
        )),
    }
}

/// Whitespace separated list; missing attribute is an empty list.
pub fn parse_list_attr(element: &XmlElement, name: &str) -> Vec<String> {
    element
        .attr(name)
        .map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn required_attr<'a>(element: &'a XmlElement, name: &str) -> Result<&'a str> {
    element
        .attr(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("node <{}> must have a '{name}' attribute", element.tag))
}
