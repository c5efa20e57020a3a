//! Shared classes
//!
//! Several sockets may declare the same class. Ownership of the class, its
//! fields and their boolean properties is tracked in [`crate::refs::ClassRefs`];
//! a field only disappears once no socket declares it any more.

use super::{field_error, Processor};
use crate::dependency::{ClassDep, Dependency};
use crate::models::{Class, ClassOp, FieldSchema, SocketId, TenantState};
use crate::refs::ClassRefs;
use crate::validators::SchemaValidator;
use crate::{Error, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

/// Class name as stored; `user` maps to the built-in profile class.
fn class_name(name: &str) -> String {
    if name == "user" {
        "user_profile".to_string()
    } else {
        name.to_lowercase()
    }
}

/// Field name → type recorded for a class by a previous install.
fn installed_types(installed: Option<&Value>) -> Map<String, Value> {
    installed.and_then(Value::as_object).cloned().unwrap_or_default()
}

/// Drop the class when nobody manages it, otherwise prune unreferenced fields.
/// Locked classes get the work queued.
fn cleanup_class(state: &mut TenantState, name: &str) {
    let Some(class) = state.classes.get_mut(name) else {
        return;
    };

    if class.refs.is_orphaned() {
        debug!(class = %name, "Deleting orphaned class");
        state.delete_class(name);
    } else if class.locked {
        state.queue_class_op(name, ClassOp::CleanupRefs);
    } else {
        let Class { refs, schema, .. } = class;
        let removed = refs.apply_to_schema(schema);
        if !removed.is_empty() {
            debug!(class = %name, fields = ?removed, "Removed unreferenced fields");
        }
    }
}

/// Release every reference `socket` holds on a class.
pub(crate) fn unref_class<'a, I>(state: &mut TenantState, socket: SocketId, name: &str, fields: I)
where
    I: IntoIterator<Item = &'a str>,
{
    if let Some(class) = state.classes.get_mut(name) {
        class.refs.remove_ref(socket, fields);
        cleanup_class(state, name);
    }
}

impl Processor<'_> {
    /// With `class_nodelete` set, refuse installs that would drop classes or
    /// fields this socket installed before.
    pub(super) fn check_classes(&self, deps: &[Dependency]) -> Result<()> {
        if !self.socket.install_config.class_nodelete {
            return Ok(());
        }
        let Some(previous) = self.previous.get("classes") else {
            return Ok(());
        };

        let declared: IndexMap<String, Vec<String>> = deps
            .iter()
            .filter_map(|d| match d {
                Dependency::Class(c) => Some((class_name(&c.name), c.field_names())),
                _ => None,
            })
            .collect();

        let mut deleted_classes = Vec::new();
        let mut deleted_fields = Vec::new();
        for (name, fields) in previous {
            match declared.get(name) {
                None => deleted_classes.push(format!("\"{}\"", name)),
                Some(declared_fields) => {
                    let missing: Vec<String> = installed_types(Some(fields))
                        .keys()
                        .filter(|f| !declared_fields.contains(f))
                        .map(|f| format!("\"{}\"", f))
                        .collect();
                    if !missing.is_empty() {
                        deleted_fields.push((name.clone(), missing));
                    }
                }
            }
        }

        if deleted_classes.is_empty() && deleted_fields.is_empty() {
            return Ok(());
        }

        let mut message = String::from("Irreversible class changes:");
        if !deleted_classes.is_empty() {
            message.push_str(&format!(
                "\nClasses: {} are about to be deleted.",
                deleted_classes.join(", ")
            ));
        }
        for (name, fields) in deleted_fields {
            message.push_str(&format!(
                "\nFields: {} of class \"{}\" are about to be deleted.",
                fields.join(", "),
                name
            ));
        }
        Err(Error::Prompt(message))
    }

    pub(super) fn process_class(&mut self, dep: &ClassDep, all: &[Dependency]) -> Result<IndexMap<String, Value>> {
        let name = class_name(&dep.name);
        let ignored_targets: Vec<String> = all
            .iter()
            .filter_map(|d| match d {
                Dependency::Class(c) => Some(class_name(&c.name)),
                _ => None,
            })
            .filter(|n| *n != name)
            .collect();

        let fields = match self.state.classes.get(&name) {
            Some(class) if class.locked => {
                return Err(Error::processing(format!("Class \"{}\" is locked.", name)));
            }
            Some(class) => {
                let schema = self.validate_schema(dep, &class.schema, &ignored_targets)?;
                self.update_class(&name, dep, schema)?
            }
            None => {
                let schema = self.validate_schema(dep, &[], &ignored_targets)?;
                self.create_class(&name, dep, schema)?
            }
        };
        self.objects.classes.insert(name.clone());

        let types: Map<String, Value> = fields
            .into_iter()
            .map(|f| (f.name, Value::String(f.field_type)))
            .collect();
        Ok(IndexMap::from([(name, Value::Object(types))]))
    }

    fn validate_schema(&self, dep: &ClassDep, old_schema: &[FieldSchema], ignored: &[String]) -> Result<Vec<FieldSchema>> {
        let classes = &self.state.classes;
        let class_exists = |target: &str| classes.contains_key(target);
        SchemaValidator {
            old_schema,
            ignored_targets: ignored,
            class_exists: &class_exists,
        }
        .validate(&dep.schema)
        .map_err(field_error("schema"))
    }

    fn create_class(&mut self, name: &str, dep: &ClassDep, schema: Vec<FieldSchema>) -> Result<Vec<FieldSchema>> {
        let limit = self.quotas.classes_limit(self.tenant);
        if self.state.classes.len() >= limit {
            return Err(Error::processing(format!("Class count exceeded ({}).", limit)));
        }

        let id = self.state.next_id();
        let class = Class {
            id,
            name: name.to_string(),
            description: format!("Class created as a dependency of socket: \"{}\".", self.socket.name),
            refs: ClassRefs::new_for(self.socket.id, &schema),
            schema: schema.clone(),
            metadata: dep.metadata.clone(),
            locked: false,
        };
        self.state.classes.insert(name.to_string(), class);
        debug!(socket = %self.socket.name, class = %name, "Created class");
        Ok(schema)
    }

    /// Merge the declared fields into an existing class.
    ///
    /// A field whose type differs is a conflict unless this socket installed
    /// it with that type before, in which case the socket's declaration wins.
    fn update_class(&mut self, name: &str, dep: &ClassDep, declared: Vec<FieldSchema>) -> Result<Vec<FieldSchema>> {
        let socket = self.socket.id;
        let previously = installed_types(self.previous.get("classes").and_then(|c| c.get(name)));
        let Some(class) = self.state.classes.get_mut(name) else {
            return Err(Error::Other(format!("class {} vanished", name)));
        };

        class.refs.add_ref(socket);

        let mut pending: IndexMap<String, FieldSchema> =
            declared.iter().map(|f| (f.name.clone(), f.clone())).collect();
        let mut schema = class.schema.clone();

        for field in schema.iter_mut() {
            match pending.shift_remove(&field.name) {
                Some(new) => {
                    class.refs.add_field_ref(&field.name, socket);
                    class.refs.sync_props(&field.name, &new.enabled_props(), socket);

                    let installed_type = previously.get(&field.name).and_then(Value::as_str);
                    if field.field_type != new.field_type && installed_type != Some(field.field_type.as_str()) {
                        return Err(Error::processing(format!(
                            "Class conflict. Class with name \"{}\" already exists with conflicting schema (contains field: \"{}\" of different type).",
                            name, field.name
                        )));
                    }

                    field.field_type = new.field_type;
                    if new.target.is_some() {
                        field.target = new.target;
                    }
                    field.props.extend(new.props);
                }
                None => {
                    if previously.contains_key(&field.name) {
                        class.refs.remove_field_ref(&field.name, socket);
                    }
                }
            }
        }

        for (field_name, new) in pending {
            class.refs.fields.insert(field_name.clone(), vec![socket]);
            class.refs.props.shift_remove(&field_name);
            for prop in new.enabled_props() {
                class.refs.add_prop_ref(&field_name, &prop, socket);
            }
            schema.push(new);
        }

        class.schema = schema;
        class.metadata.extend(dep.metadata.clone());
        cleanup_class(self.state, name);
        debug!(socket = %self.socket.name, class = %name, "Updated class");
        Ok(declared)
    }

    /// Release classes this socket installed before but no longer declares.
    pub(super) fn cleanup_classes(&mut self) {
        let Some(previous) = self.previous.get("classes") else {
            return;
        };

        let socket = self.socket.id;
        for (name, fields) in previous {
            if self.objects.classes.contains(name) {
                continue;
            }
            let fields = installed_types(Some(fields));
            unref_class(self.state, socket, name, fields.keys().map(String::as_str));
        }
    }
}
