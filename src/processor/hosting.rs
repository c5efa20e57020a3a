use super::{field_error, Processor};
use crate::dependency::HostingDep;
use crate::models::{Group, Hosting};
use crate::validators;
use crate::{Error, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

fn object_or_empty(value: &Value, field: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        _ => Err(Error::validation(format!("\"{}\": Expected a dictionary of items.", field), None)),
    }
}

impl Processor<'_> {
    pub(super) fn process_hosting(&mut self, dep: &HostingDep) -> Result<IndexMap<String, Value>> {
        let domain = self.limits.hosting_domain.as_str();
        validators::validate_hosting_name(&dep.name, domain).map_err(field_error("name"))?;
        if let Some(cname) = &dep.cname {
            validators::validate_domain(cname, domain).map_err(field_error("domains"))?;
        }
        validators::validate_hosting_config(&dep.config).map_err(field_error("config"))?;
        let auth = object_or_empty(&dep.auth, "auth")?;
        let config = object_or_empty(&dep.config, "config")?;
        let domains: Vec<String> = dep.cname.iter().cloned().collect();

        match self.state.hostings.get_mut(&dep.name) {
            Some(hosting) => {
                hosting.socket = Some(self.socket.id);
                hosting.description = dep.description.clone();
                hosting.domains = domains;
                hosting.auth = auth;
                hosting.config = config;
            }
            None => {
                let id = self.state.next_id();
                self.state.hostings.insert(
                    dep.name.clone(),
                    Hosting {
                        id,
                        name: dep.name.clone(),
                        socket: Some(self.socket.id),
                        description: dep.description.clone(),
                        domains,
                        auth,
                        config,
                    },
                );
                debug!(socket = %self.socket.name, hosting = %dep.name, "Created hosting");
            }
        }
        self.objects.hostings.insert(dep.name.clone());

        let cname = dep.cname.clone().map(Value::String).unwrap_or(Value::Null);
        Ok(IndexMap::from([(dep.name.clone(), cname)]))
    }

    pub(super) fn cleanup_hostings(&mut self) {
        let socket = Some(self.socket.id);
        let installed = &self.objects.hostings;
        self.state
            .hostings
            .retain(|name, h| h.socket != socket || installed.contains(name));
    }

    /// Groups are created once and never owned by a socket.
    pub(super) fn process_group(&mut self, name: &str) {
        if self.state.groups.contains_key(name) {
            return;
        }

        let id = self.state.next_id();
        let description = format!(
            "Group created as a dependency of socket: \"{}\" with endpoint: \"{}\".",
            self.socket.name, name
        );
        self.state.groups.insert(
            name.to_string(),
            Group {
                id,
                name: name.to_string(),
                label: name.to_string(),
                description,
            },
        );
    }
}
