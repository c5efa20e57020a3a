use super::*;
use crate::archive::Archive;
use crate::config::QuotaConfig;
use crate::dependency::{ClassDep, HandlerTrigger, ScheduleSpec, ScriptDep};
use crate::importer::Importer;
use crate::models::SocketStatus;
use crate::quota::StaticQuotas;
use crate::storage::{FileStorage, MemoryFileStorage};
use serde_json::{json, Map};
use std::sync::Arc;

struct Harness {
    state: TenantState,
    backend: Arc<MemoryFileStorage>,
    limits: Limits,
    quotas: StaticQuotas,
}

impl Harness {
    fn new() -> Self {
        Self::with_quotas(QuotaConfig::default())
    }

    fn with_quotas(quotas: QuotaConfig) -> Self {
        Self {
            state: TenantState::default(),
            backend: Arc::new(MemoryFileStorage::new()),
            limits: Limits::default(),
            quotas: StaticQuotas::new(quotas),
        }
    }

    fn socket(&mut self, name: &str) -> Socket {
        match self.state.sockets.get(name) {
            Some(socket) => socket.clone(),
            None => {
                let id = self.state.next_id();
                Socket::new(id, name, format!("key{}", id), "0.1")
            }
        }
    }

    /// Import and process a bundle the way a worker would, committing on success.
    fn install(&mut self, name: &str, files: &[(&str, &str)]) -> Result<Socket> {
        let mut socket = self.socket(name);
        let archive = Archive::from_files(files.iter().map(|(p, c)| (p.to_string(), c.as_bytes().to_vec())));
        let import = Importer::new(&mut socket, &archive, &self.limits, false).import()?;
        let partial = import.partial;
        let grouped = group_dependencies(import.dependencies);

        let mut state = self.state.clone();
        let mut files = StagedFiles::new(self.backend.clone());
        let mut installed = Installed::new();
        {
            let mut processor = Processor::new("acme", &mut socket, &mut state, &mut files, &self.quotas, &self.limits);
            processor.check(&grouped, partial)?;
            for (kind, deps) in &grouped {
                let data = processor.process(*kind, deps)?;
                if let Some(section) = kind.section() {
                    installed.entry(section.to_string()).or_default().extend(data);
                }
            }
            processor.cleanup(partial)?;
        }
        if !partial {
            socket.installed = installed;
        }
        socket.update_hash();
        socket.set_status(SocketStatus::Ok, None);

        state.sockets.insert(socket.name.clone(), socket.clone());
        files.commit();
        self.state = state;
        Ok(socket)
    }

    fn class(&self, name: &str) -> &crate::models::Class {
        &self.state.classes[name]
    }
}

fn field_names(class: &crate::models::Class) -> Vec<&str> {
    class.schema.iter().map(|f| f.name.as_str()).collect()
}

// ============================================================================
// Endpoints and scripts
// ============================================================================

#[test]
fn test_install_creates_endpoint_and_script() {
    let mut h = Harness::new();
    let socket = h
        .install(
            "demo",
            &[("socket.yml", "endpoints:\n  hello:\n    file: hello.js\n"), ("hello.js", "return 1")],
        )
        .unwrap();

    let endpoint = &h.state.endpoints["demo/hello"];
    assert_eq!(endpoint.socket, socket.id);
    assert_eq!(h.state.scripts.len(), 1);
    assert_eq!(h.state.scripts[0].path, "hello.js");
    assert_eq!(h.state.scripts[0].source, "Managed by Socket.");
    assert_eq!(h.state.scripts[0].label, "Script dependency of demo");

    let installed = &socket.installed["endpoints"];
    assert_eq!(installed["hello:*"]["script"], "hello.js");
    assert!(socket.file_list.contains_key("hello.js"));
    assert!(socket.file_list.contains_key("socket.yml"));
    assert_eq!(h.backend.len(), 2);
}

#[test]
fn test_reinstall_is_idempotent() {
    let mut h = Harness::new();
    let bundle = [("socket.yml", "endpoints:\n  hello:\n    file: hello.js\n"), ("hello.js", "return 1")];
    let first = h.install("demo", &bundle).unwrap();
    let ids: Vec<u64> = h.state.scripts.iter().map(|s| s.id).collect();
    let second = h.install("demo", &bundle).unwrap();

    assert_eq!(first.checksum, second.checksum);
    assert_eq!(first.file_list, second.file_list);
    assert_eq!(ids, h.state.scripts.iter().map(|s| s.id).collect::<Vec<_>>());
    assert_eq!(h.backend.len(), 2);
}

#[test]
fn test_removed_endpoint_is_cleaned_up() {
    let mut h = Harness::new();
    h.install(
        "demo",
        &[
            ("socket.yml", "endpoints:\n  a:\n    file: a.js\n  b:\n    file: b.js\n"),
            ("a.js", "1"),
            ("b.js", "2"),
        ],
    )
    .unwrap();
    assert_eq!(h.state.endpoints.len(), 2);

    let socket = h
        .install("demo", &[("socket.yml", "endpoints:\n  a:\n    file: a.js\n"), ("a.js", "1")])
        .unwrap();
    assert!(h.state.endpoints.contains_key("demo/a"));
    assert!(!h.state.endpoints.contains_key("demo/b"));
    assert_eq!(h.state.scripts.len(), 1);
    assert!(!socket.file_list.contains_key("b.js"));
    assert_eq!(socket.size, socket.ledger_size());
    assert_eq!(h.backend.len(), 2);
}

#[test]
fn test_reserved_endpoint_suffix() {
    let mut h = Harness::new();
    let err = h
        .install("demo", &[("socket.yml", "endpoints:\n  history:\n    file: a.js\n"), ("a.js", "1")])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Dependency Endpoint[history] validation error. \"name\": Value cannot end with history, traces."
    );
    assert_eq!(err.line(), Some(2));
}

#[test]
fn test_changed_script_is_rewritten() {
    let mut h = Harness::new();
    h.install("demo", &[("socket.yml", "endpoints:\n  a:\n    file: a.js\n"), ("a.js", "1")])
        .unwrap();
    let id = h.state.scripts[0].id;
    let old_location = h.state.sockets["demo"].file_list["a.js"].file.clone();

    let socket = h
        .install("demo", &[("socket.yml", "endpoints:\n  a:\n    file: a.js\n"), ("a.js", "22")])
        .unwrap();
    assert_eq!(h.state.scripts[0].id, id);
    assert_eq!(h.state.scripts[0].checksum, crate::checksum::digest(b"22"));
    assert_ne!(socket.file_list["a.js"].file, old_location);
    assert!(!h.backend.exists(&old_location));
}

#[test]
fn test_partial_update_touches_only_changed_script() {
    let mut h = Harness::new();
    h.install(
        "demo",
        &[
            ("socket.yml", "endpoints:\n  a:\n    file: a.js\n  b:\n    file: b.js\n"),
            ("a.js", "1"),
            ("b.js", "2"),
        ],
    )
    .unwrap();
    let before = h.state.sockets["demo"].clone();

    let socket = h.install("demo", &[("a.js", "changed")]).unwrap();
    assert_eq!(socket.installed, before.installed);
    assert_eq!(socket.file_list["b.js"], before.file_list["b.js"]);
    assert_ne!(socket.file_list["a.js"], before.file_list["a.js"]);
    assert_eq!(h.state.endpoints.len(), 2);
    assert_eq!(h.state.scripts.len(), 2);
}

// ============================================================================
// Classes
// ============================================================================

const C1_F1: &str = "classes:\n  c1:\n    - name: f1\n      type: string\n      filter_index: true\n";
const C1_F1_F2: &str = "classes:\n  c1:\n    - name: f1\n      type: string\n    - name: f2\n      type: integer\n";

#[test]
fn test_shared_class_refcounts() {
    let mut h = Harness::new();
    let s1 = h.install("s1", &[("socket.yml", C1_F1)]).unwrap();
    let s2 = h.install("s2", &[("socket.yml", C1_F1_F2)]).unwrap();

    let class = h.class("c1");
    assert_eq!(class.refs.managed_by, vec![s1.id, s2.id]);
    assert_eq!(class.refs.field_owners("f1"), &[s1.id, s2.id]);
    assert_eq!(class.refs.field_owners("f2"), &[s2.id]);
    assert_eq!(field_names(class), vec!["f1", "f2"]);
    assert_eq!(class.field("f1").unwrap().props.get("filter_index"), Some(&true));
    assert_eq!(s2.installed["classes"]["c1"], json!({"f1": "string", "f2": "integer"}));

    // s1 drops the class: f1 stays for s2, filter_index is no longer wanted
    h.install("s1", &[("socket.yml", "description: none\n")]).unwrap();
    let class = h.class("c1");
    assert_eq!(class.refs.managed_by, vec![s2.id]);
    assert_eq!(field_names(class), vec!["f1", "f2"]);
    assert_eq!(class.field("f1").unwrap().props.get("filter_index"), None);

    // s2 drops it too: class is deleted
    h.install("s2", &[("socket.yml", "description: none\n")]).unwrap();
    assert!(!h.state.classes.contains_key("c1"));
}

#[test]
fn test_dropped_field_is_removed_when_unreferenced() {
    let mut h = Harness::new();
    h.install("s1", &[("socket.yml", C1_F1_F2)]).unwrap();
    h.install("s1", &[("socket.yml", C1_F1)]).unwrap();

    let class = h.class("c1");
    assert_eq!(field_names(class), vec!["f1"]);
    assert!(class.refs.fields.get("f2").is_none());
}

#[test]
fn test_class_conflict_changes_nothing() {
    let mut h = Harness::new();
    h.install("s1", &[("socket.yml", C1_F1)]).unwrap();
    let before = h.class("c1").clone();

    let err = h
        .install("s2", &[("socket.yml", "classes:\n  c1:\n    - name: f1\n      type: integer\n")])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Dependency Class[c1] processing error: Class conflict. Class with name \"c1\" already exists with conflicting schema (contains field: \"f1\" of different type)."
    );
    assert_eq!(err.line(), Some(2));
    assert_eq!(h.class("c1").schema, before.schema);
    assert_eq!(h.class("c1").refs, before.refs);
    assert!(!h.state.sockets.contains_key("s2"));
}

#[test]
fn test_owner_may_change_field_type() {
    let mut h = Harness::new();
    h.install("s1", &[("socket.yml", C1_F1)]).unwrap();
    h.install("s1", &[("socket.yml", "classes:\n  c1:\n    - name: f1\n      type: integer\n")])
        .unwrap();
    assert_eq!(h.class("c1").field("f1").unwrap().field_type, "integer");
}

#[test]
fn test_user_class_maps_to_profile() {
    let mut h = Harness::new();
    let socket = h
        .install("s1", &[("socket.yml", "classes:\n  user:\n    - name: age\n      type: integer\n")])
        .unwrap();
    assert!(h.state.classes.contains_key("user_profile"));
    assert!(socket.installed["classes"].contains_key("user_profile"));
}

#[test]
fn test_locked_class() {
    let mut h = Harness::new();
    h.install("s1", &[("socket.yml", C1_F1)]).unwrap();
    h.state.classes.get_mut("c1").unwrap().locked = true;

    let err = h.install("s2", &[("socket.yml", C1_F1)]).unwrap_err();
    assert_eq!(err.to_string(), "Dependency Class[c1] processing error: Class \"c1\" is locked.");
}

#[test]
fn test_locked_class_removal_is_queued() {
    let mut h = Harness::new();
    h.install("s1", &[("socket.yml", C1_F1)]).unwrap();
    h.state.classes.get_mut("c1").unwrap().locked = true;

    h.install("s1", &[("socket.yml", "description: none\n")]).unwrap();
    assert!(h.state.classes.contains_key("c1"));
    assert_eq!(h.state.class_ops.len(), 1);

    h.state.classes.get_mut("c1").unwrap().locked = false;
    h.state.drain_class_ops();
    assert!(!h.state.classes.contains_key("c1"));
}

#[test]
fn test_class_quota() {
    let mut h = Harness::with_quotas(QuotaConfig {
        classes: 1,
        ..QuotaConfig::default()
    });
    let err = h
        .install(
            "s1",
            &[("socket.yml", "classes:\n  a:\n    - name: f\n      type: string\n  b:\n    - name: f\n      type: string\n")],
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "Dependency Class[b] processing error: Class count exceeded (1).");
}

#[test]
fn test_invalid_schema_is_reported_per_field() {
    let mut h = Harness::new();
    let err = h
        .install("s1", &[("socket.yml", "classes:\n  c1:\n    - name: f1\n      type: blob\n")])
        .unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Dependency Class[c1] validation error. \"schema\": Error processing field definition \"f1\" #0"));
}

#[test]
fn test_nodelete_prompts_before_mutating() {
    let mut h = Harness::new();
    let mut socket = h.install("s1", &[("socket.yml", C1_F1_F2)]).unwrap();
    socket.install_config.class_nodelete = true;
    h.state.sockets.insert("s1".into(), socket);
    let before = h.class("c1").clone();

    let err = h.install("s1", &[("socket.yml", C1_F1)]).unwrap_err();
    assert!(matches!(err, Error::Prompt(_)));
    assert_eq!(
        err.to_string(),
        "Irreversible class changes:\nFields: \"f2\" of class \"c1\" are about to be deleted."
    );
    assert_eq!(h.class("c1").schema, before.schema);

    let err = h.install("s1", &[("socket.yml", "description: none\n")]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Irreversible class changes:\nClasses: \"c1\" are about to be deleted."
    );

    let mut socket = h.state.sockets["s1"].clone();
    socket.install_config.class_nodelete = false;
    h.state.sockets.insert("s1".into(), socket);
    h.install("s1", &[("socket.yml", C1_F1)]).unwrap();
    assert_eq!(field_names(h.class("c1")), vec!["f1"]);
}

#[test]
fn test_nodelete_allows_partial_update() {
    let mut h = Harness::new();
    let manifest = format!("{}endpoints:\n  a:\n    file: a.js\n", C1_F1);
    let mut socket = h.install("s1", &[("socket.yml", manifest.as_str()), ("a.js", "1")]).unwrap();
    socket.install_config.class_nodelete = true;
    h.state.sockets.insert("s1".into(), socket);
    let before = h.class("c1").clone();

    let socket = h.install("s1", &[("a.js", "changed")]).unwrap();
    assert_eq!(socket.file_list["a.js"].checksum, crate::checksum::digest(b"changed"));
    assert_eq!(h.class("c1").schema, before.schema);
    assert_eq!(h.class("c1").refs, before.refs);
}

// ============================================================================
// Hosting, groups, event handlers
// ============================================================================

#[test]
fn test_hosting_is_created_and_cleaned_up() {
    let mut h = Harness::new();
    let socket = h
        .install("s1", &[("socket.yml", "hosting:\n  site:\n    cname: my.example.com\n")])
        .unwrap();
    assert_eq!(h.state.hostings["site"].domains, vec!["my.example.com".to_string()]);
    assert_eq!(socket.installed["hosting"]["site"], "my.example.com");

    h.install("s1", &[("socket.yml", "description: none\n")]).unwrap();
    assert!(h.state.hostings.is_empty());
}

#[test]
fn test_hosting_domain_under_platform_domain() {
    let mut h = Harness::new();
    let err = h
        .install("s1", &[("socket.yml", "hosting:\n  site:\n    cname: a.socketpm.site\n")])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Dependency Hosting[site] validation error. \"domains\": Invalid domain specified."
    );
}

#[test]
fn test_group_is_created_once() {
    let mut h = Harness::new();
    let mut socket = h.socket("s1");
    let mut files = StagedFiles::new(h.backend.clone());
    let deps = vec![Dependency::Group { name: "admins".into() }];
    let mut processor = Processor::new("acme", &mut socket, &mut h.state, &mut files, &h.quotas, &h.limits);
    processor.process(DependencyKind::Group, &deps).unwrap();
    processor.process(DependencyKind::Group, &deps).unwrap();

    assert_eq!(h.state.groups.len(), 1);
    assert_eq!(h.state.groups["admins"].label, "admins");
}

#[test]
fn test_event_handlers() {
    let mut h = Harness::new();
    let manifest = "event_handlers:\n  data.user.create: |\n    a\n  data.book.update: |\n    b\n  events.done: |\n    c\n  schedule.interval.5m: |\n    d\n";
    let socket = h.install("s1", &[("socket.yml", manifest)]).unwrap();

    assert_eq!(h.state.triggers.len(), 3);
    let user = h.state.triggers.iter().find(|t| t.event.source == "user").unwrap();
    assert_eq!(user.signals, vec!["create".to_string()]);
    let book = h.state.triggers.iter().find(|t| t.event.source == "dataobject").unwrap();
    assert_eq!(book.event.class.as_deref(), Some("book"));

    assert_eq!(h.state.schedules.len(), 1);
    assert_eq!(h.state.schedules[0].interval_sec, Some(300));
    assert!(h.state.schedules[0].scheduled_next.is_some());
    assert_eq!(h.state.handlers.len(), 4);
    assert_eq!(h.state.scripts.len(), 4);
    assert_eq!(socket.installed["event_handlers"].len(), 4);

    let ids: Vec<u64> = h.state.triggers.iter().map(|t| t.id).collect();
    h.install("s1", &[("socket.yml", manifest)]).unwrap();
    assert_eq!(ids, h.state.triggers.iter().map(|t| t.id).collect::<Vec<_>>());

    h.install("s1", &[("socket.yml", "event_handlers:\n  events.done: |\n    c\n")])
        .unwrap();
    assert_eq!(h.state.triggers.len(), 1);
    assert!(h.state.schedules.is_empty());
    assert_eq!(h.state.handlers.len(), 1);
    assert_eq!(h.state.scripts.len(), 1);
}

#[test]
fn test_reinstall_reschedules_interval() {
    let mut h = Harness::new();
    let bundle = [("socket.yml", "event_handlers:\n  schedule.interval.5m: |\n    d\n")];
    h.install("s1", &bundle).unwrap();
    let id = h.state.schedules[0].id;
    h.state.schedules[0].scheduled_next = None;

    h.install("s1", &bundle).unwrap();
    assert_eq!(h.state.schedules[0].id, id);
    assert!(h.state.schedules[0].scheduled_next.is_some());
}

#[test]
fn test_schedule_quota() {
    let mut h = Harness::with_quotas(QuotaConfig {
        schedules: 0,
        ..QuotaConfig::default()
    });
    let err = h
        .install("s1", &[("socket.yml", "event_handlers:\n  schedule.interval.5m: |\n    d\n")])
        .unwrap_err();
    assert!(err.to_string().ends_with("processing error: Schedule count exceeded (0)."));
}

// ============================================================================
// Direct processor use
// ============================================================================

fn script_dep(path: &str, source: &str) -> ScriptDep {
    ScriptDep {
        path: path.to_string(),
        source: Some(source.to_string()),
        checksum: crate::checksum::digest(source.as_bytes()),
        config: None,
        runtime: None,
        line: None,
    }
}

#[test]
fn test_empty_file_leaves_ledger() {
    let mut h = Harness::new();
    let mut socket = h.socket("s1");
    let mut files = StagedFiles::new(h.backend.clone());
    {
        let mut processor = Processor::new("acme", &mut socket, &mut h.state, &mut files, &h.quotas, &h.limits);
        processor
            .process(DependencyKind::Script, &[Dependency::Script(script_dep("a.js", ""))])
            .unwrap();
        assert_eq!(processor.objects().file_list, vec!["a.js".to_string()]);
    }
    assert!(socket.file_list.is_empty());
    assert!(h.backend.is_empty());
}

#[test]
fn test_schedule_matches_by_spec() {
    let mut h = Harness::new();
    let mut socket = h.socket("s1");
    let mut files = StagedFiles::new(h.backend.clone());
    let handler = |name: &str, spec: ScheduleSpec| {
        Dependency::EventHandler(crate::dependency::EventHandlerDep {
            handler_name: name.to_string(),
            trigger: HandlerTrigger::Schedule(spec),
            script: script_dep(&format!("<YAML:event_handlers/{}>", name), "x"),
            metadata: Map::new(),
        })
    };
    let deps = vec![
        handler("schedule.crontab.*/5 * * * *", ScheduleSpec::Crontab("*/5 * * * *".into())),
        handler("schedule.interval.1h", ScheduleSpec::Interval(3600)),
    ];

    let mut processor = Processor::new("acme", &mut socket, &mut h.state, &mut files, &h.quotas, &h.limits);
    processor.process(DependencyKind::EventHandlerSchedule, &deps).unwrap();
    processor.process(DependencyKind::EventHandlerSchedule, &deps).unwrap();

    assert_eq!(h.state.schedules.len(), 2);
    assert!(h.state.schedules[0].scheduled_next.is_none());
    assert_eq!(h.state.schedules[1].interval_sec, Some(3600));
}

#[test]
fn test_ignored_targets_allow_forward_references() {
    let mut h = Harness::new();
    let mut socket = h.socket("s1");
    let mut files = StagedFiles::new(h.backend.clone());
    let class = |name: &str, schema: serde_json::Value| {
        Dependency::Class(ClassDep {
            name: name.to_string(),
            schema,
            metadata: Map::new(),
            line: Some(1),
        })
    };
    let deps = vec![
        class("book", json!([{"name": "author", "type": "reference", "target": "author"}])),
        class("author", json!([{"name": "name", "type": "string"}])),
    ];

    let mut processor = Processor::new("acme", &mut socket, &mut h.state, &mut files, &h.quotas, &h.limits);
    let data = processor.process(DependencyKind::Class, &deps).unwrap();
    assert_eq!(data["book"], json!({"author": "reference"}));
    assert_eq!(h.state.classes.len(), 2);
}
