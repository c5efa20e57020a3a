//! Persisted entities owned by the installer
//!
//! A tenant's whole world lives in one [`TenantState`] document: its sockets
//! and every platform object the installer has produced for them. The
//! [`crate::store`] module loads and saves it as a unit, which is what makes
//! an install transactional.

use crate::error::StatusInfo;
use crate::refs::ClassRefs;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Socket identifier, unique within a tenant.
pub type SocketId = u64;

/// Manifest section → object name → descriptor of what was produced.
pub type Installed = IndexMap<String, IndexMap<String, Value>>;

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketStatus {
    Processing,
    Checking,
    Ok,
    Error,
    Prompt,
}

impl SocketStatus {
    /// Sockets in a non-terminal state cannot be modified.
    pub fn is_locked(&self) -> bool {
        matches!(self, SocketStatus::Processing | SocketStatus::Checking)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SocketStatus::Processing => "processing",
            SocketStatus::Checking => "checking",
            SocketStatus::Ok => "ok",
            SocketStatus::Error => "error",
            SocketStatus::Prompt => "prompt",
        }
    }
}

impl fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked file of a socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub checksum: String,
    pub size: u64,
    /// Storage location
    pub file: String,
    /// Non-executable file kept only for reference by scripts
    #[serde(default, skip_serializing_if = "is_false")]
    pub helper: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Turn class and field removal into a prompt instead of deleting
    #[serde(default, skip_serializing_if = "is_false")]
    pub class_nodelete: bool,
}

/// An installed package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Socket {
    pub id: SocketId,
    pub name: String,
    /// Random key used to namespace stored files
    pub key: String,
    pub status: SocketStatus,
    #[serde(default)]
    pub status_info: Option<StatusInfo>,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub install_url: Option<String>,
    /// Storage location of an uploaded or downloaded bundle awaiting import
    #[serde(default)]
    pub bundle: Option<String>,
    #[serde(default)]
    pub zip_file_list: Option<Vec<String>>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub install_config: InstallConfig,
    /// Unrecognised top-level manifest keys (including `config`)
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub file_list: BTreeMap<String, FileEntry>,
    #[serde(default)]
    pub installed: Installed,
    #[serde(default)]
    pub environment: Option<String>,
    /// Current-format sockets accept newer runtimes and do not keep script sources
    #[serde(default)]
    pub new_format: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Socket {
    pub fn new(id: SocketId, name: impl Into<String>, key: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            key: key.into(),
            status: SocketStatus::Processing,
            status_info: None,
            description: String::new(),
            version: version.into(),
            install_url: None,
            bundle: None,
            zip_file_list: None,
            config: Map::new(),
            install_config: InstallConfig::default(),
            metadata: Map::new(),
            size: 0,
            checksum: None,
            file_list: BTreeMap::new(),
            installed: Installed::new(),
            environment: None,
            new_format: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.status.is_locked()
    }

    /// Current-format rules apply to flagged sockets and to sockets bound to an environment.
    pub fn is_new_format(&self) -> bool {
        self.new_format || self.environment.is_some()
    }

    pub fn set_status(&mut self, status: SocketStatus, info: Option<StatusInfo>) {
        self.status = status;
        self.status_info = info;
        self.updated_at = Utc::now();
    }

    /// Sum of tracked file sizes.
    pub fn ledger_size(&self) -> u64 {
        self.file_list.values().map(|f| f.size).sum()
    }

    /// Recompute the aggregate checksum over all file checksums in path order.
    pub fn update_hash(&mut self) {
        let checksums: Vec<&str> = self.file_list.values().map(|f| f.checksum.as_str()).collect();
        self.checksum = Some(crate::checksum::aggregate(&checksums));
    }

    /// Cache key handed to the script runtime.
    pub fn hash(&self) -> String {
        format!("S:{}", self.checksum.as_deref().unwrap_or_default())
    }

    /// Stored files keyed by storage location, mapped to their local path.
    ///
    /// The manifest is not exposed. Inline sources get a slug path.
    pub fn files(&self, manifest_name: &str) -> IndexMap<String, String> {
        self.file_list
            .iter()
            .filter(|(path, _)| path.as_str() != manifest_name)
            .map(|(path, entry)| (entry.file.clone(), Self::local_path(path)))
            .collect()
    }

    pub fn local_path(path: &str) -> String {
        if path.starts_with('<') && path.ends_with('>') && path.len() >= 2 {
            slugify(&path[1..path.len() - 1])
        } else {
            path.to_string()
        }
    }

    /// Names recorded under a manifest section by the last full install.
    pub fn installed_names(&self, section: &str) -> Vec<String> {
        self.installed
            .get(section)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if (c == '-' || c == '/' || c.is_whitespace()) && !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

// ============================================================================
// Platform objects
// ============================================================================

/// Per-call execution budget, inherited from socket-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(rename = "async", default, skip_serializing_if = "Option::is_none")]
    pub async_: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcpu: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CallTarget {
    Script { path: String },
    Channel { channel: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCall {
    #[serde(flatten)]
    pub target: CallTarget,
    pub methods: Vec<String>,
    pub runtime: String,
    #[serde(flatten)]
    pub settings: CallSettings,
    #[serde(default, skip_serializing_if = "is_false")]
    pub private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u64,
    /// `<socket>/<endpoint>`
    pub name: String,
    pub socket: SocketId,
    pub calls: Vec<EndpointCall>,
    #[serde(default)]
    pub acl: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub allow_full_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(rename = "async", default, skip_serializing_if = "Option::is_none")]
    pub async_: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcpu: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: u64,
    pub socket: SocketId,
    pub path: String,
    pub checksum: String,
    pub source: String,
    pub config: ScriptConfig,
    pub runtime: String,
    pub label: String,
    pub description: String,
}

/// One field of a class schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Boolean properties (`filter_index`, `order_index`, `unique`)
    #[serde(flatten)]
    pub props: BTreeMap<String, bool>,
}

impl FieldSchema {
    /// Properties set to `true`.
    pub fn enabled_props(&self) -> Vec<String> {
        self.props
            .iter()
            .filter(|(_, on)| **on)
            .map(|(prop, _)| prop.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub schema: Vec<FieldSchema>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub refs: ClassRefs,
    /// Locked classes are being migrated; changes are queued
    #[serde(default)]
    pub locked: bool,
}

impl Class {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.schema.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassOp {
    Delete,
    CleanupRefs,
}

/// Deferred operation on a locked class, drained once the lock lifts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClassOp {
    pub class: String,
    pub op: ClassOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: u64,
    pub socket: SocketId,
    pub script: u64,
    pub event: TriggerEvent,
    pub signals: Vec<String>,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: u64,
    pub socket: SocketId,
    pub script: u64,
    pub event_handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crontab: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_sec: Option<u64>,
    #[serde(default)]
    pub scheduled_next: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Compute the next run for interval schedules. Crontab evaluation is left to the runtime.
    pub fn schedule_next(&mut self) {
        self.scheduled_next = self
            .interval_sec
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRef {
    pub object_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Links a socket's event handler name to the trigger or schedule backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketHandler {
    pub id: u64,
    pub socket: SocketId,
    pub handler_name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub handler: HandlerRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hosting {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub socket: Option<SocketId>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub auth: Map<String, Value>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Processing,
    Ok,
    Error,
}

/// Shared file-system image sockets can run against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: EnvironmentStatus,
    #[serde(default)]
    pub status_info: Option<StatusInfo>,
    #[serde(default)]
    pub checksum: Option<String>,
    /// Storage location of the uploaded archive, cleared once processed
    #[serde(default)]
    pub archive: Option<String>,
    /// Storage location of the processed image
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn is_ready(&self) -> bool {
        self.status == EnvironmentStatus::Ok
    }

    pub fn hash(&self) -> String {
        format!("E:{}", self.checksum.as_deref().unwrap_or_default())
    }
}

// ============================================================================
// Tenant state
// ============================================================================

/// Everything the installer persists for one tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantState {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub sockets: IndexMap<String, Socket>,
    #[serde(default)]
    pub endpoints: IndexMap<String, Endpoint>,
    #[serde(default)]
    pub scripts: Vec<Script>,
    #[serde(default)]
    pub classes: IndexMap<String, Class>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub handlers: Vec<SocketHandler>,
    #[serde(default)]
    pub hostings: IndexMap<String, Hosting>,
    #[serde(default)]
    pub groups: IndexMap<String, Group>,
    #[serde(default)]
    pub environments: IndexMap<String, Environment>,
    #[serde(default)]
    pub class_ops: Vec<PendingClassOp>,
}

impl TenantState {
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn socket(&self, name: &str) -> Option<&Socket> {
        self.sockets.get(name)
    }

    pub fn socket_by_id(&self, id: SocketId) -> Option<&Socket> {
        self.sockets.values().find(|s| s.id == id)
    }

    /// Sockets in the given status, oldest first.
    pub fn sockets_with_status(&self, status: SocketStatus) -> Vec<String> {
        let mut pending: Vec<&Socket> = self.sockets.values().filter(|s| s.status == status).collect();
        pending.sort_by_key(|s| s.id);
        pending.into_iter().map(|s| s.name.clone()).collect()
    }

    pub fn script(&self, id: u64) -> Option<&Script> {
        self.scripts.iter().find(|s| s.id == id)
    }

    pub fn script_mut(&mut self, id: u64) -> Option<&mut Script> {
        self.scripts.iter_mut().find(|s| s.id == id)
    }

    /// Drop a class or queue its removal when locked.
    pub fn delete_class(&mut self, name: &str) {
        let locked = self.classes.get(name).map(|c| c.locked).unwrap_or(false);
        if locked {
            self.queue_class_op(name, ClassOp::Delete);
        } else {
            self.classes.shift_remove(name);
        }
    }

    pub fn queue_class_op(&mut self, class: &str, op: ClassOp) {
        let pending = PendingClassOp {
            class: class.to_string(),
            op,
        };
        if !self.class_ops.contains(&pending) {
            self.class_ops.push(pending);
        }
    }

    /// Apply queued operations for classes that are no longer locked.
    pub fn drain_class_ops(&mut self) -> usize {
        let ops = std::mem::take(&mut self.class_ops);
        let mut applied = 0;
        for pending in ops {
            let locked = self.classes.get(&pending.class).map(|c| c.locked);
            match locked {
                Some(true) => self.class_ops.push(pending),
                None => applied += 1,
                Some(false) => {
                    match pending.op {
                        ClassOp::Delete => {
                            self.classes.shift_remove(&pending.class);
                        }
                        ClassOp::CleanupRefs => {
                            if let Some(class) = self.classes.get_mut(&pending.class) {
                                let Class { refs, schema, .. } = class;
                                refs.apply_to_schema(schema);
                            }
                        }
                    }
                    applied += 1;
                }
            }
        }
        applied
    }
}
