//! Builds manifest nodes from `yaml-rust2` parser events.
//!
//! The event stream carries a [`Marker`] for every scalar and collection, which
//! is where node and key lines come from. Anchors are resolved by cloning the
//! anchored node, and `<<` merge keys are applied when their mapping closes.

use super::{MapEntry, Mapping, Node, NodeValue};
use std::collections::HashMap;
use std::fmt;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

/// Handles of the YAML core schema (`!!str` and friends).
const CORE_TAG_HANDLES: &[&str] = &["!!", "tag:yaml.org,2002:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.line, self.col)
    }
}

type PResult<T> = std::result::Result<T, ParseError>;

fn error<T>(message: impl Into<String>, line: usize, col: usize) -> PResult<T> {
    Err(ParseError {
        message: message.into(),
        line,
        col,
    })
}

pub(super) fn parse(text: &str) -> PResult<Node> {
    let mut builder = Builder::default();
    let mut parser = Parser::new(text.chars());
    parser.load(&mut builder, true).map_err(|e| ParseError {
        message: e.info().to_string(),
        line: e.marker().line(),
        col: e.marker().col() + 1,
    })?;
    builder.finish()
}

struct PendingKey {
    name: String,
    line: usize,
    merge: bool,
}

enum Frame {
    Seq {
        line: usize,
        col: usize,
        anchor: usize,
        items: Vec<Node>,
    },
    Map {
        line: usize,
        col: usize,
        anchor: usize,
        entries: Mapping,
        merges: Vec<Mapping>,
        key: Option<PendingKey>,
    },
}

#[derive(Default)]
struct Builder {
    stack: Vec<Frame>,
    anchors: HashMap<usize, Node>,
    root: Option<Node>,
    documents: usize,
    error: Option<ParseError>,
}

impl MarkedEventReceiver for Builder {
    fn on_event(&mut self, event: Event, mark: Marker) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.handle(event, mark.line(), mark.col() + 1) {
            self.error = Some(e);
        }
    }
}

impl Builder {
    fn handle(&mut self, event: Event, line: usize, col: usize) -> PResult<()> {
        match event {
            Event::DocumentStart => {
                self.documents += 1;
                if self.documents > 1 {
                    return error("expected a single document in the stream", line, col);
                }
                Ok(())
            }
            Event::Alias(id) => match self.anchors.get(&id) {
                Some(node) => self.push(node.clone(), false),
                None => error("found undefined alias", line, col),
            },
            Event::Scalar(value, style, anchor, tag) => {
                let tag = tag.map(|t| (t.handle, t.suffix));
                let merge = style == TScalarStyle::Plain && tag.is_none() && value == "<<";
                let node = resolve_scalar(value, style, tag, line, col)?;
                self.anchor(anchor, &node);
                self.push(node, merge)
            }
            Event::SequenceStart(anchor, tag) => {
                check_collection_tag(tag.map(|t| (t.handle, t.suffix)), "seq", line, col)?;
                self.stack.push(Frame::Seq {
                    line,
                    col,
                    anchor,
                    items: Vec::new(),
                });
                Ok(())
            }
            Event::MappingStart(anchor, tag) => {
                check_collection_tag(tag.map(|t| (t.handle, t.suffix)), "map", line, col)?;
                self.stack.push(Frame::Map {
                    line,
                    col,
                    anchor,
                    entries: Mapping::new(),
                    merges: Vec::new(),
                    key: None,
                });
                Ok(())
            }
            Event::SequenceEnd | Event::MappingEnd => {
                let node = match self.stack.pop() {
                    Some(Frame::Seq {
                        line,
                        col,
                        anchor,
                        items,
                    }) => {
                        let node = Node::new(NodeValue::Seq(items), line, col);
                        self.anchor(anchor, &node);
                        node
                    }
                    Some(Frame::Map {
                        line,
                        col,
                        anchor,
                        entries,
                        merges,
                        ..
                    }) => {
                        let node = Node::new(NodeValue::Map(merge_entries(entries, merges)), line, col);
                        self.anchor(anchor, &node);
                        node
                    }
                    None => return error("unexpected end of collection", line, col),
                };
                self.push(node, false)
            }
            _ => Ok(()),
        }
    }

    fn anchor(&mut self, id: usize, node: &Node) {
        if id > 0 {
            self.anchors.insert(id, node.clone());
        }
    }

    /// Attach a finished node to the collection being built, or make it the root.
    fn push(&mut self, node: Node, merge: bool) -> PResult<()> {
        match self.stack.last_mut() {
            None => {
                self.root = Some(node);
                Ok(())
            }
            Some(Frame::Seq { items, .. }) => {
                items.push(node);
                Ok(())
            }
            Some(Frame::Map {
                entries, merges, key, ..
            }) => match key.take() {
                None => {
                    *key = Some(PendingKey {
                        name: key_text(&node)?,
                        line: node.line,
                        merge,
                    });
                    Ok(())
                }
                Some(pending) if pending.merge => {
                    merges.extend(merge_sources(node)?);
                    Ok(())
                }
                Some(pending) => {
                    entries.insert(
                        pending.name,
                        MapEntry {
                            key_line: pending.line,
                            value: node,
                        },
                    );
                    Ok(())
                }
            },
        }
    }

    fn finish(self) -> PResult<Node> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(self.root.unwrap_or_else(|| Node::null(1, 1)))
    }
}

/// Merged mappings come first, in the order given; explicit keys override them.
fn merge_entries(entries: Mapping, merges: Vec<Mapping>) -> Mapping {
    if merges.is_empty() {
        return entries;
    }
    let mut merged = Mapping::new();
    for source in merges {
        for (name, entry) in source {
            merged.entry(name).or_insert(entry);
        }
    }
    for (name, entry) in entries {
        merged.insert(name, entry);
    }
    merged
}

fn merge_sources(node: Node) -> PResult<Vec<Mapping>> {
    let (line, col) = (node.line, node.col);
    match node.value {
        NodeValue::Map(map) => Ok(vec![map]),
        NodeValue::Seq(items) => items
            .into_iter()
            .map(|item| match item.value {
                NodeValue::Map(map) => Ok(map),
                _ => error("expected a mapping for merging", item.line, item.col),
            })
            .collect(),
        _ => error("expected a mapping or list of mappings for merging", line, col),
    }
}

fn key_text(node: &Node) -> PResult<String> {
    Ok(match &node.value {
        NodeValue::Str(s) => s.clone(),
        NodeValue::Null => "null".to_string(),
        NodeValue::Bool(b) => b.to_string(),
        NodeValue::Int(i) => i.to_string(),
        NodeValue::Float(_) => node.to_json().to_string(),
        NodeValue::Seq(_) | NodeValue::Map(_) => {
            return error("found unhashable key", node.line, node.col);
        }
    })
}

fn core_suffix(tag: &Option<(String, String)>) -> Option<&str> {
    match tag {
        Some((handle, suffix)) if CORE_TAG_HANDLES.contains(&handle.as_str()) => Some(suffix),
        _ => None,
    }
}

fn unknown_tag<T>(tag: &(String, String), line: usize, col: usize) -> PResult<T> {
    error(
        format!("could not determine a constructor for the tag '{}{}'", tag.0, tag.1),
        line,
        col,
    )
}

fn check_collection_tag(tag: Option<(String, String)>, expected: &str, line: usize, col: usize) -> PResult<()> {
    match &tag {
        None => Ok(()),
        Some(_) if core_suffix(&tag) == Some(expected) => Ok(()),
        Some(t) => unknown_tag(t, line, col),
    }
}

fn resolve_scalar(
    value: String,
    style: TScalarStyle,
    tag: Option<(String, String)>,
    line: usize,
    col: usize,
) -> PResult<Node> {
    let Some(explicit) = &tag else {
        return Ok(match style {
            TScalarStyle::Plain => resolve_plain(&value, line, col),
            _ => Node::new(NodeValue::Str(value), line, col),
        });
    };

    let text = value.trim();
    let resolved = match core_suffix(&tag) {
        Some("str") => Some(NodeValue::Str(value.clone())),
        Some("null") => matches!(text, "" | "~" | "null" | "Null" | "NULL").then_some(NodeValue::Null),
        Some("bool") => resolve_bool(text).map(NodeValue::Bool),
        Some("int") => parse_int(text).map(NodeValue::Int),
        Some("float") => parse_float(text)
            .or_else(|| parse_int(text).map(|i| i as f64))
            .map(NodeValue::Float),
        _ => return unknown_tag(explicit, line, col),
    };
    match resolved {
        Some(resolved) => Ok(Node::new(resolved, line, col)),
        None => error(format!("invalid value for tag '!!{}': \"{}\"", explicit.1, text), line, col),
    }
}

fn resolve_bool(text: &str) -> Option<bool> {
    match text {
        "true" | "True" | "TRUE" | "yes" | "Yes" | "YES" | "on" | "On" | "ON" => Some(true),
        "false" | "False" | "FALSE" | "no" | "No" | "NO" | "off" | "Off" | "OFF" => Some(false),
        _ => None,
    }
}

/// Resolve a plain scalar to null, bool, int, float or string.
fn resolve_plain(text: &str, line: usize, col: usize) -> Node {
    let text = text.trim();

    let value = match text {
        "" | "~" | "null" | "Null" | "NULL" => NodeValue::Null,
        ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" => NodeValue::Float(f64::INFINITY),
        "-.inf" | "-.Inf" | "-.INF" => NodeValue::Float(f64::NEG_INFINITY),
        ".nan" | ".NaN" | ".NAN" => NodeValue::Float(f64::NAN),
        _ => {
            if let Some(b) = resolve_bool(text) {
                NodeValue::Bool(b)
            } else if let Some(i) = parse_int(text) {
                NodeValue::Int(i)
            } else if let Some(f) = parse_float(text) {
                NodeValue::Float(f)
            } else {
                return Node::new(NodeValue::Str(text.to_string()), line, col);
            }
        }
    };

    let mut node = Node::new(value, line, col);
    if !node.is_null() {
        node.raw = Some(text.to_string());
    }
    node
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let value = if let Some(hex) = digits.strip_prefix("0x") {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == '_') {
            return None;
        }
        i64::from_str_radix(&hex.replace('_', ""), 16).ok()?
    } else {
        if digits.is_empty()
            || !digits.starts_with(|c: char| c.is_ascii_digit())
            || !digits.chars().all(|c| c.is_ascii_digit() || c == '_')
        {
            return None;
        }
        digits.replace('_', "").parse::<i64>().ok()?
    };

    Some(if negative { -value } else { value })
}

fn parse_float(text: &str) -> Option<f64> {
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    let (int_part, frac_part) = mantissa.split_once('.')?;
    let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit() || c == '_');
    if !digits_ok(int_part) || !digits_ok(frac_part) {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).any(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Some(exp) = exponent {
        let exp = exp.strip_prefix(['-', '+']).unwrap_or(exp);
        if exp.is_empty() || !exp.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    text.replace('_', "").parse::<f64>().ok()
}
