//! Socket manifest (`socket.yml`) loading
//!
//! The manifest is a YAML document. It is parsed into a small AST where every
//! node and every mapping key keeps the 1-based line it came from, so the
//! importer can point errors at the offending line.
//!
//! Parsing is done by `yaml-rust2`. Plain scalars resolve the YAML 1.1 way
//! (`yes`/`no` are booleans), anchors and `<<` merge keys are expanded, and
//! only core schema tags (`!!str`, `!!int`, ...) are accepted.
//!
//! # Examples
//!
//! ```
//! use socketpm::manifest;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = manifest::load(b"endpoints:\n  hello:\n    file: hello.js\n")?;
//! let endpoints = doc.get("endpoints").unwrap();
//! assert_eq!(endpoints.line, 2);
//! assert_eq!(endpoints.as_map().unwrap()["hello"].key_line, 2);
//! # Ok(())
//! # }
//! ```

mod parser;

use crate::{Error, Result};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

/// Mapping key → entry, in document order.
pub type Mapping = IndexMap<String, MapEntry>;

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    /// Line of the key itself
    pub key_line: usize,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Node>),
    Map(Mapping),
}

/// A manifest value with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: NodeValue,
    pub line: usize,
    pub col: usize,
    /// Source text of plain scalars, before type resolution
    pub raw: Option<String>,
}

impl Node {
    pub fn new(value: NodeValue, line: usize, col: usize) -> Self {
        Self {
            value,
            line,
            col,
            raw: None,
        }
    }

    pub fn null(line: usize, col: usize) -> Self {
        Self::new(NodeValue::Null, line, col)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, NodeValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            NodeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            NodeValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            NodeValue::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Numeric value of ints, floats and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            NodeValue::Int(i) => Some(*i as f64),
            NodeValue::Float(f) => Some(*f),
            NodeValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Mapping> {
        match &self.value {
            NodeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Mapping> {
        match &mut self.value {
            NodeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Node]> {
        match &self.value {
            NodeValue::Seq(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a key when this node is a mapping.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|m| m.get(key)).map(|e| &e.value)
    }

    /// Scalar rendered as text, keeping the source spelling of plain scalars.
    pub fn scalar_text(&self) -> Option<String> {
        match &self.value {
            NodeValue::Str(s) => Some(s.clone()),
            NodeValue::Int(_) | NodeValue::Float(_) | NodeValue::Bool(_) => self
                .raw
                .clone()
                .or_else(|| Some(self.to_json().to_string())),
            _ => None,
        }
    }

    /// Truthiness the way manifest flags such as `private` are read.
    pub fn is_truthy(&self) -> bool {
        match &self.value {
            NodeValue::Null => false,
            NodeValue::Bool(b) => *b,
            NodeValue::Int(i) => *i != 0,
            NodeValue::Float(f) => *f != 0.0,
            NodeValue::Str(s) => !s.is_empty(),
            NodeValue::Seq(s) => !s.is_empty(),
            NodeValue::Map(m) => !m.is_empty(),
        }
    }

    pub fn to_json(&self) -> Value {
        match &self.value {
            NodeValue::Null => Value::Null,
            NodeValue::Bool(b) => Value::Bool(*b),
            NodeValue::Int(i) => Value::Number((*i).into()),
            NodeValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            NodeValue::Str(s) => Value::String(s.clone()),
            NodeValue::Seq(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            NodeValue::Map(map) => Value::Object(mapping_to_json(map)),
        }
    }
}

pub fn mapping_to_json(map: &Mapping) -> Map<String, Value> {
    map.iter()
        .map(|(k, e)| (k.clone(), e.value.to_json()))
        .collect()
}

/// Parse raw manifest bytes. Invalid UTF-8 sequences are dropped.
///
/// Syntax errors are reported without a line; the position is part of the message.
pub fn load(bytes: &[u8]) -> Result<Node> {
    let text = String::from_utf8_lossy(bytes).replace('\u{FFFD}', "");
    parser::parse(&text)
        .map_err(|e| Error::processing(format!("Error decoding socket: {}.", e)))
}
