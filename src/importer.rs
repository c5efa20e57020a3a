//! Dependency importer
//!
//! Turns a bundle into an ordered list of [`Dependency`] records. The manifest
//! is validated section by section; every script file read along the way is
//! checksummed and its size delta is charged against the socket size quota.
//!
//! When the bundle has no manifest but the socket was installed before, the
//! import runs in partial mode: every file becomes a script (if it replaces a
//! previously installed script) or a helper.
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::archive::Archive;
//! use socketpm::importer::Importer;
//! use socketpm::models::Socket;
//! use socketpm::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let archive = Archive::from_files([("socket.yml", b"endpoints:\n  hello: |\n    x\n".to_vec())]);
//! let mut socket = Socket::new(1, "demo", "key", "0.1");
//!
//! let import = Importer::new(&mut socket, &archive, &config.limits, false).import()?;
//! println!("{} dependencies, partial: {}", import.dependencies.len(), import.partial);
//! # Ok(())
//! # }
//! ```

use crate::archive::Archive;
use crate::checksum;
use crate::config::Limits;
use crate::dependency::{
    ClassDep, Dependency, EndpointDep, EventHandlerDep, HandlerTrigger, HelperDep, HostingDep,
    ScheduleSpec, ScriptDep,
};
use crate::manifest::{self, mapping_to_json, MapEntry, Mapping, Node, NodeValue};
use crate::models::{CallSettings, CallTarget, EndpointCall, ScriptConfig, Socket};
use crate::validators::{self, static_regex};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// HTTP methods an endpoint can bind a script to.
pub const HTTP_METHODS: [&str; 5] = ["POST", "PUT", "PATCH", "GET", "DELETE"];

/// Script runtime a socket's scripts are installed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runtime {
    pub name: &'static str,
    pub ext: &'static str,
}

pub const NODEJS_V8: Runtime = Runtime {
    name: "nodejs_v8",
    ext: "js",
};

pub const NODEJS_V6: Runtime = Runtime {
    name: "nodejs_v6",
    ext: "js",
};

/// Runtimes for current-format sockets; the first one is the default.
const RUNTIMES: &[Runtime] = &[NODEJS_V8, NODEJS_V6];
const LEGACY_RUNTIMES: &[Runtime] = &[NODEJS_V6];

static_regex!(version_regex, r"^\d{1,4}\.\d{1,4}(\.\d{1,4})?(-\w{1,16})?$");
static_regex!(
    interval_regex,
    r"(?i)^(?:(?P<hours>\d{1,2})_?h(?:ours?)?)?(?:_?(?P<minutes>\d{1,2})_?m(?:inutes?)?)?(?:_?(?P<seconds>\d{1,2})_?s(?:econds?)?)?$"
);

/// Result of an import.
#[derive(Debug, Clone)]
pub struct Import {
    pub dependencies: Vec<Dependency>,
    /// No manifest was supplied; only changed files are installed
    pub partial: bool,
}

/// Socket-wide execution defaults, each range checked.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Budget {
    cache: Option<f64>,
    timeout: Option<f64>,
    async_: Option<i64>,
    mcpu: Option<i64>,
}

pub struct Importer<'a> {
    socket: &'a mut Socket,
    archive: &'a Archive,
    limits: &'a Limits,
    trusted: bool,
    files_processed: HashSet<String>,
    defaults: Budget,
    runtime: Runtime,
}

impl<'a> Importer<'a> {
    /// `trusted` tenants may set async and mcpu budgets.
    pub fn new(socket: &'a mut Socket, archive: &'a Archive, limits: &'a Limits, trusted: bool) -> Self {
        let runtime = if socket.is_new_format() {
            RUNTIMES[0]
        } else {
            LEGACY_RUNTIMES[0]
        };
        Self {
            socket,
            archive,
            limits,
            trusted,
            files_processed: HashSet::new(),
            defaults: Budget::default(),
            runtime,
        }
    }

    /// Validate the bundle and produce its dependencies.
    ///
    /// Updates the socket's size, description, version and metadata as a side effect.
    pub fn import(mut self) -> Result<Import> {
        let manifest_name = self.limits.manifest_name.clone();
        self.socket.size = self.socket.ledger_size();
        let installed_before = self.socket.file_list.contains_key(&manifest_name);

        let raw = match self.archive.read_file(&manifest_name) {
            Ok(raw) => raw.to_vec(),
            Err(Error::MissingFile(_)) if installed_before => {
                debug!(socket = %self.socket.name, "No manifest in bundle, importing partially");
                let dependencies = self.import_partial()?;
                return Ok(Import {
                    dependencies,
                    partial: true,
                });
            }
            Err(e) => return Err(e),
        };

        let spec_checksum = checksum::digest(&raw);
        self.add_size(raw.len() as u64, &manifest_name)?;

        let doc = manifest::load(&raw)?;
        let mut dependencies = vec![Dependency::Spec {
            source: raw,
            checksum: spec_checksum,
        }];

        let mut spec = self.validate_manifest(doc)?;
        self.defaults = self.validate_budget(&spec, None)?;
        for key in ["mcpu", "async", "timeout", "cache"] {
            spec.shift_remove(key);
        }

        let description = match spec.shift_remove("description") {
            Some(entry) => entry.value.as_str().unwrap_or_default().to_string(),
            None => String::new(),
        };
        let version = self.process_version(spec.shift_remove("version").map(|e| e.value))?;
        self.process_runtime(spec.shift_remove("runtime").map(|e| e.value))?;

        if let Some(entry) = spec.shift_remove("endpoints") {
            dependencies.extend(self.process_endpoints(entry.value)?);
        }
        if let Some(entry) = spec.shift_remove("classes") {
            dependencies.extend(self.process_classes(entry.value)?);
        }
        if let Some(entry) = spec.shift_remove("hosting") {
            dependencies.extend(self.process_hosting(entry.value)?);
        }
        if let Some(entry) = spec.shift_remove("event_handlers") {
            dependencies.extend(self.process_event_handlers(entry.value)?);
        }
        dependencies.extend(self.process_helpers()?);

        self.socket.description = description;
        self.socket.version = version;
        self.socket.metadata = mapping_to_json(&spec);

        debug!(
            socket = %self.socket.name,
            dependencies = dependencies.len(),
            size = self.socket.size,
            "Imported manifest"
        );
        Ok(Import {
            dependencies,
            partial: false,
        })
    }

    fn import_partial(&mut self) -> Result<Vec<Dependency>> {
        let archive = self.archive;
        let mut dependencies = Vec::new();

        for path in archive.namelist() {
            if path == self.limits.manifest_name {
                continue;
            }
            let raw = archive.read_file(path)?;
            let replaces_script = self
                .socket
                .file_list
                .get(path)
                .map(|entry| !entry.helper)
                .unwrap_or(false);

            let (dependency, size) = if replaces_script {
                let source = String::from_utf8_lossy(raw).into_owned();
                let size = source.len() as u64;
                let dep = Dependency::Script(ScriptDep {
                    path: path.to_string(),
                    checksum: checksum::digest(source.as_bytes()),
                    source: Some(source),
                    config: None,
                    runtime: None,
                    line: None,
                });
                (dep, size)
            } else {
                let dep = Dependency::Helper(HelperDep {
                    path: path.to_string(),
                    source: raw.to_vec(),
                    checksum: checksum::digest(raw),
                });
                (dep, raw.len() as u64)
            };

            self.add_size(size, path)?;
            dependencies.push(dependency);
        }

        Ok(dependencies)
    }

    // ========================================================================
    // Top level
    // ========================================================================

    fn validate_manifest(&self, doc: Node) -> Result<Mapping> {
        ensure_map(Some(&doc), "socket")?;
        let spec = into_mapping(doc);
        ensure_string(spec.get("description").map(|e| &e.value), "description", true)?;
        if spec.len() > self.limits.max_manifest_keys {
            return Err(Error::validation("Too many properties defined.", None));
        }
        Ok(spec)
    }

    fn validate_budget(&self, spec: &Mapping, line: Option<usize>) -> Result<Budget> {
        let budget = Budget {
            cache: float_setting(spec, "cache", self.limits.max_cache, line)?,
            timeout: float_setting(spec, "timeout", self.limits.max_timeout, line)?,
            async_: int_setting(spec, "async", self.limits.max_async, line)?,
            mcpu: int_setting(spec, "mcpu", self.limits.max_mcpu, line)?,
        };

        if (spec.contains_key("async") || spec.contains_key("mcpu")) && !self.trusted {
            return Err(Error::validation(
                "Cannot set Async/MCPU on this account. Contact administrator.",
                line,
            ));
        }
        Ok(budget)
    }

    fn process_version(&self, version: Option<Node>) -> Result<String> {
        let (text, line) = match version {
            Some(node) if node.is_truthy() => {
                let line = node.line;
                (node.scalar_text().unwrap_or_default(), Some(line))
            }
            Some(node) => (self.limits.default_version.clone(), Some(node.line)),
            None => (self.limits.default_version.clone(), None),
        };

        if !version_regex()?.is_match(&text) {
            return Err(Error::validation("Incorrect version value.", line));
        }
        Ok(text)
    }

    fn process_runtime(&mut self, runtime: Option<Node>) -> Result<()> {
        let possible = if self.socket.is_new_format() {
            RUNTIMES
        } else {
            LEGACY_RUNTIMES
        };
        self.runtime = possible[0];

        let node = match runtime {
            Some(node) if node.is_truthy() => node,
            _ => return Ok(()),
        };
        ensure_string(Some(&node), "runtime", false)?;

        let name = node.as_str().unwrap_or_default();
        match possible.iter().find(|r| r.name == name) {
            Some(runtime) => {
                self.runtime = *runtime;
                Ok(())
            }
            None => Err(Error::validation("Incorrect runtime value.", Some(node.line))),
        }
    }

    fn add_size(&mut self, new_size: u64, path: &str) -> Result<()> {
        let previous = self.socket.file_list.get(path).map(|f| f.size).unwrap_or(0);
        let size = self.socket.size as i64 + new_size as i64 - previous as i64;
        self.socket.size = size.max(0) as u64;

        if self.socket.size > self.limits.max_size {
            return Err(Error::processing(format!(
                "Socket total size exceeds maximum ({}).",
                format_size(self.limits.max_size)
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Scripts
    // ========================================================================

    /// Build a script dependency from an inline source or a bundle file.
    ///
    /// Returns `None` when `allow_empty` is set and neither is present.
    fn process_script(
        &mut self,
        line: usize,
        spec: &mut Node,
        path: &str,
        allow_empty: bool,
    ) -> Result<Option<ScriptDep>> {
        let mut allow_empty = allow_empty;
        let mut dependency = ScriptDep {
            path: format!("<YAML:{}>", path),
            source: None,
            checksum: String::new(),
            config: Some(ScriptConfig {
                allow_full_access: true,
                ..ScriptConfig::default()
            }),
            runtime: Some(self.runtime.name.to_string()),
            line: Some(line),
        };

        let source = if let Some(source) = spec.as_str() {
            source.to_string()
        } else {
            ensure_map(Some(&*spec), "script")?;
            let map = spec.as_map_mut().ok_or_else(|| {
                Error::validation("Wrong format for \"script\". Expected object.", Some(line))
            })?;
            let budget = self.validate_budget(map, Some(line))?;
            dependency.config = Some(ScriptConfig {
                allow_full_access: true,
                timeout: budget.timeout.or(self.defaults.timeout),
                async_: budget.async_.or(self.defaults.async_),
                mcpu: budget.mcpu.or(self.defaults.mcpu),
            });

            if let Some(entry) = map.shift_remove("source") {
                node_text(&entry.value)
            } else {
                let file_path = match map.shift_remove("file").filter(|e| !e.value.is_null()) {
                    Some(entry) => {
                        allow_empty = false;
                        ensure_string(Some(&entry.value), "file", false)?;
                        let file_path = entry.value.as_str().unwrap_or_default().to_string();
                        if file_path.len() > self.limits.max_path_length {
                            return Err(Error::validation("Source file path is too long.", Some(line)));
                        }
                        if !validators::is_valid_path(&file_path)? {
                            return Err(Error::validation(
                                "Source file path contains invalid characters.",
                                Some(line),
                            ));
                        }
                        file_path
                    }
                    None => {
                        let stem = path.split_once('/').map(|(_, rest)| rest).unwrap_or(path);
                        format!("{}.{}", stem, self.runtime.ext)
                    }
                };

                dependency.path = file_path.clone();
                self.files_processed.insert(file_path.clone());

                let archive = self.archive;
                match archive.read_file(&file_path) {
                    Ok(raw) => String::from_utf8_lossy(raw).into_owned(),
                    Err(Error::MissingFile(missing)) => {
                        // Partial bundle: the file was installed before, keep what is on file
                        return match self.socket.file_list.get_mut(&file_path) {
                            Some(entry) => {
                                entry.helper = false;
                                dependency.checksum = entry.checksum.clone();
                                Ok(Some(dependency))
                            }
                            None if allow_empty => Ok(None),
                            None => Err(Error::MissingFile(missing)),
                        };
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        dependency.checksum = checksum::digest(source.as_bytes());
        let size = source.len() as u64;
        let tracked_path = dependency.path.clone();
        dependency.source = Some(source);
        self.add_size(size, &tracked_path)?;
        Ok(Some(dependency))
    }

    fn process_helpers(&mut self) -> Result<Vec<Dependency>> {
        let archive = self.archive;
        let mut dependencies = Vec::new();

        for path in archive.namelist() {
            if self.files_processed.contains(path) || path == self.limits.manifest_name {
                continue;
            }
            let raw = archive.read_file(path)?;
            self.add_size(raw.len() as u64, path)?;
            dependencies.push(Dependency::Helper(HelperDep {
                path: path.to_string(),
                source: raw.to_vec(),
                checksum: checksum::digest(raw),
            }));
        }

        Ok(dependencies)
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    fn process_endpoints(&mut self, section: Node) -> Result<Vec<Dependency>> {
        ensure_map(Some(&section), "endpoints")?;
        let mut dependencies = Vec::new();

        for (name, entry) in into_mapping(section) {
            let MapEntry { key_line, value } = entry;
            dependencies.extend(self.map_endpoint(&name, key_line, value)?);
        }
        Ok(dependencies)
    }

    fn map_endpoint(&mut self, name: &str, line: usize, mut spec: Node) -> Result<Vec<Dependency>> {
        let is_channel = spec.as_map().map(|m| m.contains_key("channel")).unwrap_or(false);

        let (mut endpoint, mut dependencies, mut metadata) = if is_channel {
            (self.map_channel_endpoint(name, line, &mut spec)?, Vec::new(), Map::new())
        } else {
            self.map_script_endpoint(name, line, &mut spec)?
        };

        if let Some(map) = spec.as_map() {
            metadata.extend(mapping_to_json(map));
        }
        endpoint.metadata = metadata;
        dependencies.push(Dependency::Endpoint(endpoint));
        Ok(dependencies)
    }

    fn map_channel_endpoint(&mut self, name: &str, line: usize, spec: &mut Node) -> Result<EndpointDep> {
        let map = spec.as_map_mut().ok_or_else(|| {
            Error::validation("Wrong format for \"endpoints\". Expected object.", Some(line))
        })?;
        let channel = map.shift_remove("channel").map(|e| e.value);
        ensure_string(channel.as_ref(), "channel", false)?;
        let channel = channel.unwrap_or_else(|| Node::null(line, 1));
        let channel_name = channel.as_str().unwrap_or_default().to_string();

        if !validators::is_valid_channel(&channel_name)? {
            return Err(Error::validation(
                format!("Wrong format for channel of endpoint: \"{}\".", name),
                Some(channel.line),
            ));
        }

        let acl = map.shift_remove("acl").map(|e| e.value.to_json());
        self.validate_budget(map, Some(line))?;
        let mut call = EndpointCall {
            target: CallTarget::Channel {
                channel: channel_name,
            },
            methods: vec!["GET".to_string()],
            runtime: self.runtime.name.to_string(),
            settings: CallSettings::default(),
            private: false,
        };
        self.map_call_settings(&mut call, Some(map), true, Some(line))?;

        Ok(EndpointDep {
            name: name.to_string(),
            calls: vec![call],
            acl: acl.unwrap_or_else(|| Value::Object(Map::new())),
            metadata: Map::new(),
            line: Some(line),
        })
    }

    fn map_script_endpoint(
        &mut self,
        name: &str,
        line: usize,
        spec: &mut Node,
    ) -> Result<(EndpointDep, Vec<Dependency>, Map<String, Value>)> {
        let mut endpoint = EndpointDep {
            name: name.to_string(),
            calls: Vec::new(),
            acl: Value::Object(Map::new()),
            metadata: Map::new(),
            line: Some(line),
        };
        let mut dependencies = Vec::new();

        let default_script = self
            .process_script(line, spec, &format!("endpoints/{}", name), true)
            .map_err(prefixed(format!("Endpoint \"{}\": ", name)))?;

        let defined_methods: Vec<String> = match spec.as_map_mut() {
            Some(map) => {
                if let Some(acl) = map.shift_remove("acl") {
                    endpoint.acl = acl.value.to_json();
                }
                map.keys().cloned().collect()
            }
            None => Vec::new(),
        };
        let has_method = |m: &str| defined_methods.iter().any(|d| d == m);

        match default_script {
            Some(script) => {
                let mut methods: Vec<String> = HTTP_METHODS
                    .iter()
                    .filter(|m| !has_method(**m))
                    .map(|m| m.to_string())
                    .collect();
                if methods.len() == HTTP_METHODS.len() {
                    methods = vec!["*".to_string()];
                }

                let mut call = EndpointCall {
                    target: CallTarget::Script {
                        path: script.path.clone(),
                    },
                    methods,
                    runtime: self.runtime.name.to_string(),
                    settings: CallSettings::default(),
                    private: false,
                };
                self.map_call_settings(&mut call, spec.as_map_mut(), true, Some(line))?;
                endpoint.calls.push(call);
                dependencies.push(Dependency::Script(script));
            }
            None if !HTTP_METHODS.iter().any(|m| has_method(m)) => {
                return Err(Error::validation(
                    format!("No calls defined for endpoint: \"{}\".", name),
                    Some(line),
                ));
            }
            None => {}
        }

        let mut metadata = Map::new();
        if spec.as_map().is_some() {
            let (calls, deps, method_metadata) = self.map_endpoint_methods(name, spec)?;
            endpoint.calls.extend(calls);
            dependencies.extend(deps);
            metadata = method_metadata;
        }

        Ok((endpoint, dependencies, metadata))
    }

    /// Per-method calls. Settings come from the method spec first, then the endpoint spec.
    fn map_endpoint_methods(
        &mut self,
        name: &str,
        spec: &mut Node,
    ) -> Result<(Vec<EndpointCall>, Vec<Dependency>, Map<String, Value>)> {
        let mut calls = Vec::new();
        let mut dependencies = Vec::new();
        let mut metadata = Map::new();

        let methods: Vec<String> = spec
            .as_map()
            .map(|m| {
                m.keys()
                    .filter(|k| HTTP_METHODS.contains(&k.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for method in methods {
            let entry = match spec.as_map_mut().and_then(|m| m.shift_remove(&method)) {
                Some(entry) => entry,
                None => continue,
            };
            let MapEntry {
                key_line,
                value: mut method_spec,
            } = entry;

            let script = self
                .process_script(key_line, &mut method_spec, &format!("endpoints/{}/{}", name, method), false)
                .map_err(prefixed(format!(
                    "Endpoint \"{}\", method: \"{}\": ",
                    name, method
                )))?;
            let script = match script {
                Some(script) => script,
                None => continue,
            };

            let mut call = EndpointCall {
                target: CallTarget::Script {
                    path: script.path.clone(),
                },
                methods: vec![method.clone()],
                runtime: self.runtime.name.to_string(),
                settings: CallSettings::default(),
                private: false,
            };
            self.map_call_settings(&mut call, method_spec.as_map_mut(), true, Some(key_line))?;
            self.map_call_settings(&mut call, spec.as_map_mut(), false, Some(key_line))?;
            calls.push(call);
            dependencies.push(Dependency::Script(script));

            if let Some(rest) = method_spec.as_map().filter(|m| !m.is_empty()) {
                metadata.insert(method, Value::Object(mapping_to_json(rest)));
            }
        }

        Ok((calls, dependencies, metadata))
    }

    /// Fill unset call settings from `spec`, falling back to socket defaults.
    fn map_call_settings(
        &self,
        call: &mut EndpointCall,
        spec: Option<&mut Mapping>,
        remove: bool,
        line: Option<usize>,
    ) -> Result<()> {
        let mut empty = Mapping::new();
        let spec = spec.unwrap_or(&mut empty);
        let settings = &mut call.settings;

        let async_ = present(spec, "async", |s| int_setting(s, "async", self.limits.max_async, line))?;
        settings.async_ = pick(settings.async_, async_, self.defaults.async_);
        let mcpu = present(spec, "mcpu", |s| int_setting(s, "mcpu", self.limits.max_mcpu, line))?;
        settings.mcpu = pick(settings.mcpu, mcpu, self.defaults.mcpu);
        let timeout = present(spec, "timeout", |s| float_setting(s, "timeout", self.limits.max_timeout, line))?;
        settings.timeout = pick(settings.timeout, timeout, self.defaults.timeout);
        let cache = present(spec, "cache", |s| float_setting(s, "cache", self.limits.max_cache, line))?;
        settings.cache = pick(settings.cache, cache, self.defaults.cache);

        if remove {
            for key in ["async", "mcpu", "timeout", "cache"] {
                spec.shift_remove(key);
            }
        }
        if spec.get("private").map(|e| e.value.is_truthy()).unwrap_or(false) {
            call.private = true;
        }
        Ok(())
    }

    // ========================================================================
    // Classes and hosting
    // ========================================================================

    fn process_classes(&mut self, section: Node) -> Result<Vec<Dependency>> {
        ensure_map(Some(&section), "classes")?;
        let mut classes = Vec::new();

        for (name, entry) in into_mapping(section) {
            let MapEntry { key_line, value } = entry;
            let (schema, metadata) = match value.value {
                NodeValue::Seq(_) => (value.to_json(), Map::new()),
                NodeValue::Map(mut map) => {
                    let schema = map
                        .shift_remove("schema")
                        .map(|e| e.value.to_json())
                        .unwrap_or_else(|| Value::Array(Vec::new()));
                    (schema, mapping_to_json(&map))
                }
                _ => (Value::Array(Vec::new()), Map::new()),
            };

            classes.push(Dependency::Class(ClassDep {
                name,
                schema,
                metadata,
                line: Some(key_line),
            }));
        }
        Ok(classes)
    }

    fn process_hosting(&mut self, section: Node) -> Result<Vec<Dependency>> {
        ensure_map(Some(&section), "hosting")?;
        let mut hosting = Vec::new();

        for (name, entry) in into_mapping(section) {
            let MapEntry { key_line, value } = entry;
            ensure_map(Some(&value), "hosting")?;

            let field = |key: &str| value.get(key).filter(|n| !n.is_null());
            hosting.push(Dependency::Hosting(HostingDep {
                name,
                description: field("description").map(node_text).unwrap_or_default(),
                cname: field("cname").map(node_text),
                auth: field("auth")
                    .map(Node::to_json)
                    .unwrap_or_else(|| Value::Object(Map::new())),
                config: field("config")
                    .map(Node::to_json)
                    .unwrap_or_else(|| Value::Object(Map::new())),
                line: Some(key_line),
            }));
        }
        Ok(hosting)
    }

    // ========================================================================
    // Event handlers
    // ========================================================================

    fn process_event_handlers(&mut self, section: Node) -> Result<Vec<Dependency>> {
        ensure_map(Some(&section), "event_handlers")?;
        let mut handlers = Vec::new();

        for (name, entry) in into_mapping(section) {
            let MapEntry {
                key_line,
                value: mut spec,
            } = entry;
            let (handler_name, trigger) = self.parse_event_handler_name(&name, key_line)?;

            let script = self
                .process_script(key_line, &mut spec, &format!("event_handlers/{}", name), false)
                .map_err(prefixed(format!("Event handler \"{}\": ", name)))?;
            let script = match script {
                Some(script) => script,
                None => continue,
            };

            handlers.push(Dependency::EventHandler(EventHandlerDep {
                handler_name,
                trigger,
                script,
                metadata: spec.as_map().map(mapping_to_json).unwrap_or_default(),
            }));
        }
        Ok(handlers)
    }

    /// Parse `kind.qualifier[.qualifier2]` into the handler name and its trigger.
    fn parse_event_handler_name(&self, name: &str, line: usize) -> Result<(String, HandlerTrigger)> {
        let parts: Vec<&str> = name.splitn(4, '.').collect();
        let mut handler_name = name.to_string();

        let trigger = match parts[0] {
            "data" => {
                if parts.len() != 3 {
                    return Err(Error::validation("Wrong format for data event handler.", Some(line)));
                }
                HandlerTrigger::Data {
                    class: parts[1].to_string(),
                    signal: parts[2].to_string(),
                }
            }
            "schedule" => {
                if parts.len() != 3 {
                    return Err(Error::validation(
                        "Wrong format for schedule event handler.",
                        Some(line),
                    ));
                }
                match parts[1] {
                    "crontab" => HandlerTrigger::Schedule(ScheduleSpec::Crontab(parts[2].to_string())),
                    "interval" => {
                        HandlerTrigger::Schedule(ScheduleSpec::Interval(parse_interval(parts[2], line)?))
                    }
                    _ => {
                        return Err(Error::validation(
                            "Wrong type of schedule event handler.",
                            Some(line),
                        ))
                    }
                }
            }
            "events" => match parts.len() {
                2 => {
                    let signal = format!("{}.{}", self.socket.name, parts[1]);
                    handler_name = format!("events.{}", signal);
                    HandlerTrigger::Events { signal }
                }
                3 => HandlerTrigger::Events {
                    signal: format!("{}.{}", parts[1], parts[2]),
                },
                _ => return Err(Error::validation("Wrong format for event handler.", Some(line))),
            },
            other => {
                return Err(Error::validation(
                    format!("Unsupported event handler type: \"{}\".", other),
                    Some(line),
                ))
            }
        };

        Ok((handler_name, trigger))
    }
}

fn parse_interval(spec: &str, line: usize) -> Result<u64> {
    let invalid = || Error::validation("Wrong format for schedule interval.", Some(line));
    let caps = interval_regex()?.captures(spec).ok_or_else(invalid)?;
    let part = |name: &str| -> u64 {
        caps.name(name)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let seconds = part("hours") * 3600 + part("minutes") * 60 + part("seconds");
    if seconds == 0 {
        return Err(invalid());
    }
    Ok(seconds)
}

// ============================================================================
// Node helpers
// ============================================================================

fn into_mapping(node: Node) -> Mapping {
    match node.value {
        NodeValue::Map(map) => map,
        _ => Mapping::new(),
    }
}

fn ensure_map(node: Option<&Node>, key: &str) -> Result<()> {
    match node {
        None => Err(Error::validation(format!("Missing value for \"{}\".", key), None)),
        Some(n) if n.is_null() => Err(Error::validation(format!("Missing value for \"{}\".", key), None)),
        Some(n) if n.as_map().is_none() => Err(Error::validation(
            format!("Wrong format for \"{}\". Expected object.", key),
            Some(n.line),
        )),
        Some(_) => Ok(()),
    }
}

fn ensure_string(node: Option<&Node>, key: &str, optional: bool) -> Result<()> {
    match node {
        None => {
            if optional {
                Ok(())
            } else {
                Err(Error::validation(format!("Missing value for \"{}\".", key), None))
            }
        }
        Some(n) if n.is_null() => {
            if optional {
                Ok(())
            } else {
                Err(Error::validation(format!("Missing value for \"{}\".", key), None))
            }
        }
        Some(n) if n.as_str().is_none() => Err(Error::validation(
            format!("Wrong format for \"{}\". Expected string.", key),
            Some(n.line),
        )),
        Some(_) => Ok(()),
    }
}

/// Text of a scalar, or its JSON rendering for collections.
fn node_text(node: &Node) -> String {
    node.scalar_text().unwrap_or_else(|| match node.value {
        NodeValue::Null => String::new(),
        _ => node.to_json().to_string(),
    })
}

fn range_error(key: &str, min: &str, max: impl std::fmt::Display, line: Option<usize>) -> Error {
    Error::validation(
        format!(
            "Invalid {} value. Must be higher than {} and lower than or equal to {}.",
            key, min, max
        ),
        line,
    )
}

fn float_setting(spec: &Mapping, key: &str, max: f64, line: Option<usize>) -> Result<Option<f64>> {
    let node = match spec.get(key) {
        Some(entry) if !entry.value.is_null() => &entry.value,
        _ => return Ok(None),
    };

    let value = match &node.value {
        NodeValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => node.as_f64(),
    };
    match value {
        Some(v) if v > 0.0 && v <= max => Ok(Some(v)),
        _ => Err(range_error(key, "0.0", max, line)),
    }
}

fn int_setting(spec: &Mapping, key: &str, max: i64, line: Option<usize>) -> Result<Option<i64>> {
    let node = match spec.get(key) {
        Some(entry) if !entry.value.is_null() => &entry.value,
        _ => return Ok(None),
    };

    let value = match &node.value {
        NodeValue::Int(i) => Some(*i),
        NodeValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        NodeValue::Bool(b) => Some(i64::from(*b)),
        NodeValue::Str(s) => s.trim().parse().ok(),
        _ => None,
    };
    match value {
        Some(v) if v > 0 && v <= max => Ok(Some(v)),
        _ => Err(range_error(key, "0", max, line)),
    }
}

/// `Some(value)` when `key` is present in `spec`, parsed with `parse`.
fn present<T, F>(spec: &Mapping, key: &str, parse: F) -> Result<Option<Option<T>>>
where
    F: FnOnce(&Mapping) -> Result<Option<T>>,
{
    if spec.contains_key(key) {
        parse(spec).map(Some)
    } else {
        Ok(None)
    }
}

/// A setting given in the manifest wins; otherwise the default fills it unless already set.
fn pick<T: Copy>(current: Option<T>, given: Option<Option<T>>, default: Option<T>) -> Option<T> {
    match given {
        Some(value) => value,
        None if default.is_none() || current.is_some() => current,
        None => default,
    }
}

fn prefixed(prefix: String) -> impl FnOnce(Error) -> Error {
    move |err| match err {
        Error::Validation { message, line } => Error::Validation {
            message: format!("{}{}", prefix, message),
            line,
        },
        other => other,
    }
}

/// Human readable size, as shown in quota messages.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
