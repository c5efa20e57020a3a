//! Reference counting for shared classes
//!
//! A class may be declared by several sockets. [`ClassRefs`] records which
//! sockets need the class as a whole, each field, and each boolean field
//! property. Nothing is physically removed while at least one socket still
//! references it; [`ClassRefs::apply_to_schema`] is the single place where
//! unreferenced fields and properties are dropped from a schema.

use crate::models::{FieldSchema, SocketId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRefs {
    /// Sockets that declared the class
    #[serde(default)]
    pub managed_by: Vec<SocketId>,
    /// Field name → sockets that declared it
    #[serde(default)]
    pub fields: IndexMap<String, Vec<SocketId>>,
    /// Field name → property name → sockets that set it to `true`
    #[serde(default)]
    pub props: IndexMap<String, IndexMap<String, Vec<SocketId>>>,
}

fn add_unique(owners: &mut Vec<SocketId>, socket: SocketId) {
    if !owners.contains(&socket) {
        owners.push(socket);
    }
}

fn remove_owner(owners: &mut Vec<SocketId>, socket: SocketId) {
    owners.retain(|s| *s != socket);
}

impl ClassRefs {
    /// Refs for a class freshly created by `socket` with the given schema.
    pub fn new_for(socket: SocketId, schema: &[FieldSchema]) -> Self {
        let mut refs = Self::default();
        refs.add_ref(socket);
        for field in schema {
            refs.add_field(socket, field);
        }
        refs
    }

    /// Mark `socket` as managing the class.
    pub fn add_ref(&mut self, socket: SocketId) {
        add_unique(&mut self.managed_by, socket);
    }

    /// Take a fresh reference on a field and all of its enabled properties.
    pub fn add_field(&mut self, socket: SocketId, field: &FieldSchema) {
        add_unique(self.fields.entry(field.name.clone()).or_default(), socket);
        for prop in field.enabled_props() {
            self.add_prop_ref(&field.name, &prop, socket);
        }
    }

    pub fn add_field_ref(&mut self, field: &str, socket: SocketId) {
        if let Some(owners) = self.fields.get_mut(field) {
            add_unique(owners, socket);
        }
    }

    pub fn remove_field_ref(&mut self, field: &str, socket: SocketId) {
        if let Some(owners) = self.fields.get_mut(field) {
            remove_owner(owners, socket);
        }
        if let Some(props) = self.props.get_mut(field) {
            for owners in props.values_mut() {
                remove_owner(owners, socket);
            }
        }
    }

    pub fn add_prop_ref(&mut self, field: &str, prop: &str, socket: SocketId) {
        let owners = self
            .props
            .entry(field.to_string())
            .or_default()
            .entry(prop.to_string())
            .or_default();
        add_unique(owners, socket);
    }

    /// Make the socket's property refs on `field` match `wanted` exactly.
    pub fn sync_props(&mut self, field: &str, wanted: &[String], socket: SocketId) {
        if let Some(props) = self.props.get_mut(field) {
            for (prop, owners) in props.iter_mut() {
                if wanted.contains(prop) {
                    add_unique(owners, socket);
                } else {
                    remove_owner(owners, socket);
                }
            }
        }
        for prop in wanted {
            self.add_prop_ref(field, prop, socket);
        }
    }

    /// Drop every reference `socket` holds on the class and the given fields.
    pub fn remove_ref<'a, I>(&mut self, socket: SocketId, fields: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        remove_owner(&mut self.managed_by, socket);
        for field in fields {
            self.remove_field_ref(field, socket);
        }
    }

    /// No socket manages the class any more.
    pub fn is_orphaned(&self) -> bool {
        self.managed_by.is_empty()
    }

    pub fn field_owners(&self, field: &str) -> &[SocketId] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Drop unreferenced properties and fields from both the refs and the schema.
    ///
    /// Properties still referenced are forced to `true` on the schema.
    /// Returns the names of fields removed from the schema.
    pub fn apply_to_schema(&mut self, schema: &mut Vec<FieldSchema>) -> Vec<String> {
        for (field_name, props) in self.props.iter_mut() {
            let mut field = schema.iter_mut().find(|f| &f.name == field_name);
            let mut keep = IndexMap::new();
            for (prop, owners) in props.drain(..) {
                if owners.is_empty() {
                    if let Some(f) = field.as_mut() {
                        f.props.remove(&prop);
                    }
                } else {
                    if let Some(f) = field.as_mut() {
                        f.props.insert(prop.clone(), true);
                    }
                    keep.insert(prop, owners);
                }
            }
            *props = keep;
        }
        self.props.retain(|_, props| !props.is_empty());

        let mut removed = Vec::new();
        self.fields.retain(|name, owners| {
            if owners.is_empty() {
                if schema.iter().any(|f| &f.name == name) {
                    removed.push(name.clone());
                }
                false
            } else {
                true
            }
        });
        schema.retain(|f| !removed.contains(&f.name));
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn field(name: &str, field_type: &str, props: &[(&str, bool)]) -> FieldSchema {
        FieldSchema {
            name: name.to_string(),
            field_type: field_type.to_string(),
            target: None,
            props: props
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_new_for_tracks_fields_and_true_props() {
        let schema = vec![
            field("f1", "string", &[("filter_index", true), ("order_index", false)]),
            field("f2", "integer", &[]),
        ];
        let refs = ClassRefs::new_for(7, &schema);
        assert_eq!(refs.managed_by, vec![7]);
        assert_eq!(refs.field_owners("f1"), &[7]);
        assert_eq!(refs.field_owners("f2"), &[7]);
        assert_eq!(refs.props["f1"]["filter_index"], vec![7]);
        assert!(!refs.props["f1"].contains_key("order_index"));
        assert!(!refs.props.contains_key("f2"));
    }

    #[test]
    fn test_shared_field_survives_one_owner() {
        let mut schema = vec![field("f1", "string", &[])];
        let mut refs = ClassRefs::new_for(1, &schema);
        refs.add_ref(2);
        refs.add_field_ref("f1", 2);

        refs.remove_ref(1, ["f1"]);
        assert!(!refs.is_orphaned());
        assert!(refs.apply_to_schema(&mut schema).is_empty());
        assert_eq!(schema.len(), 1);

        refs.remove_ref(2, ["f1"]);
        assert!(refs.is_orphaned());
        assert_eq!(refs.apply_to_schema(&mut schema), vec!["f1".to_string()]);
        assert!(schema.is_empty());
        assert!(refs.fields.is_empty());
    }

    #[test]
    fn test_sync_props_drops_unset_props() {
        let mut schema = vec![field("f1", "string", &[("filter_index", true)])];
        let mut refs = ClassRefs::new_for(1, &schema);

        refs.sync_props("f1", &["order_index".to_string()], 1);
        refs.apply_to_schema(&mut schema);

        assert!(!schema[0].props.contains_key("filter_index"));
        assert_eq!(schema[0].props.get("order_index"), Some(&true));
        assert!(!refs.props["f1"].contains_key("filter_index"));
    }

    #[test]
    fn test_prop_kept_while_referenced() {
        let mut schema = vec![field("f1", "string", &[("filter_index", true)])];
        let mut refs = ClassRefs::new_for(1, &schema);
        refs.add_ref(2);
        refs.add_field_ref("f1", 2);
        refs.add_prop_ref("f1", "filter_index", 2);

        refs.sync_props("f1", &[], 1);
        refs.apply_to_schema(&mut schema);
        assert_eq!(schema[0].props.get("filter_index"), Some(&true));
        assert_eq!(refs.props["f1"]["filter_index"], vec![2]);
    }
}
