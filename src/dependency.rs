//! Typed units of work produced by the importer
//!
//! A [`Dependency`] is transient: the importer builds a fresh list on every
//! install and the processors consume it. Nothing here is persisted.

use crate::models::{EndpointCall, ScriptConfig};
use serde_json::{Map, Value};
use std::fmt;

/// Dependency kinds, in the order processors run their checks and cleanups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKind {
    Spec,
    Endpoint,
    Script,
    Class,
    Group,
    Hosting,
    EventHandlerData,
    EventHandlerEvents,
    EventHandlerSchedule,
    Helper,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 10] = [
        DependencyKind::Spec,
        DependencyKind::Endpoint,
        DependencyKind::Script,
        DependencyKind::Class,
        DependencyKind::Group,
        DependencyKind::Hosting,
        DependencyKind::EventHandlerData,
        DependencyKind::EventHandlerEvents,
        DependencyKind::EventHandlerSchedule,
        DependencyKind::Helper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Spec => "spec",
            DependencyKind::Endpoint => "endpoint",
            DependencyKind::Script => "script",
            DependencyKind::Class => "class",
            DependencyKind::Group => "group",
            DependencyKind::Hosting => "hosting",
            DependencyKind::EventHandlerData => "event_handler_data",
            DependencyKind::EventHandlerEvents => "event_handler_events",
            DependencyKind::EventHandlerSchedule => "event_handler_schedule",
            DependencyKind::Helper => "helper",
        }
    }

    /// Name used in processing error messages.
    pub fn label(&self) -> &'static str {
        match self {
            DependencyKind::Spec => "Spec",
            DependencyKind::Endpoint => "Endpoint",
            DependencyKind::Script => "Script",
            DependencyKind::Class => "Class",
            DependencyKind::Group => "Group",
            DependencyKind::Hosting => "Hosting",
            DependencyKind::EventHandlerData => "Data Event Handler",
            DependencyKind::EventHandlerEvents => "Custom Event Handler",
            DependencyKind::EventHandlerSchedule => "Schedule Event Handler",
            DependencyKind::Helper => "Helper",
        }
    }

    /// Manifest section under which produced objects are recorded in `installed`.
    pub fn section(&self) -> Option<&'static str> {
        match self {
            DependencyKind::Endpoint => Some("endpoints"),
            DependencyKind::Class => Some("classes"),
            DependencyKind::Hosting => Some("hosting"),
            DependencyKind::EventHandlerData
            | DependencyKind::EventHandlerEvents
            | DependencyKind::EventHandlerSchedule => Some("event_handlers"),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A script to install, either from source or re-confirmed by checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDep {
    /// Bundle path, or `<YAML:...>` for inline sources
    pub path: String,
    /// `None` when the file is absent from a partial bundle and the ledger checksum is reused
    pub source: Option<String>,
    pub checksum: String,
    /// Absent for scripts picked up by a partial import
    pub config: Option<ScriptConfig>,
    pub runtime: Option<String>,
    pub line: Option<usize>,
}

impl ScriptDep {
    pub fn size(&self) -> u64 {
        self.source.as_ref().map(|s| s.len() as u64).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDep {
    pub name: String,
    pub calls: Vec<EndpointCall>,
    pub acl: Value,
    pub metadata: Map<String, Value>,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDep {
    pub name: String,
    /// Field definitions as written in the manifest, validated by the class processor
    pub schema: Value,
    pub metadata: Map<String, Value>,
    pub line: Option<usize>,
}

impl ClassDep {
    /// Names of the declared fields that carry one.
    pub fn field_names(&self) -> Vec<String> {
        self.schema
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostingDep {
    pub name: String,
    pub description: String,
    pub cname: Option<String>,
    pub auth: Value,
    pub config: Value,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    Crontab(String),
    /// Interval in seconds
    Interval(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerTrigger {
    /// `data.<class>.<signal>`
    Data { class: String, signal: String },
    /// `schedule.crontab.<expr>` or `schedule.interval.<spec>`
    Schedule(ScheduleSpec),
    /// `events.<signal>` or `events.<socket>.<signal>`
    Events { signal: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventHandlerDep {
    pub handler_name: String,
    pub trigger: HandlerTrigger,
    pub script: ScriptDep,
    pub metadata: Map<String, Value>,
}

/// Loose bundle file stored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct HelperDep {
    pub path: String,
    pub source: Vec<u8>,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dependency {
    /// The manifest itself
    Spec { source: Vec<u8>, checksum: String },
    Endpoint(EndpointDep),
    Script(ScriptDep),
    Class(ClassDep),
    Group { name: String },
    Hosting(HostingDep),
    EventHandler(EventHandlerDep),
    Helper(HelperDep),
}

impl Dependency {
    pub fn kind(&self) -> DependencyKind {
        match self {
            Dependency::Spec { .. } => DependencyKind::Spec,
            Dependency::Endpoint(_) => DependencyKind::Endpoint,
            Dependency::Script(_) => DependencyKind::Script,
            Dependency::Class(_) => DependencyKind::Class,
            Dependency::Group { .. } => DependencyKind::Group,
            Dependency::Hosting(_) => DependencyKind::Hosting,
            Dependency::EventHandler(eh) => match eh.trigger {
                HandlerTrigger::Data { .. } => DependencyKind::EventHandlerData,
                HandlerTrigger::Schedule(_) => DependencyKind::EventHandlerSchedule,
                HandlerTrigger::Events { .. } => DependencyKind::EventHandlerEvents,
            },
            Dependency::Helper(_) => DependencyKind::Helper,
        }
    }

    /// Display name, for dependencies that have one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Dependency::Endpoint(e) => Some(&e.name),
            Dependency::Class(c) => Some(&c.name),
            Dependency::Group { name } => Some(name),
            Dependency::Hosting(h) => Some(&h.name),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            Dependency::Endpoint(e) => e.line,
            Dependency::Script(s) => s.line,
            Dependency::Class(c) => c.line,
            Dependency::Hosting(h) => h.line,
            Dependency::EventHandler(eh) => eh.script.line,
            _ => None,
        }
    }
}
