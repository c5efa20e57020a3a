use super::{field_error, Processor};
use crate::dependency::EndpointDep;
use crate::models::{CallTarget, Endpoint};
use crate::validators;
use crate::Result;
use indexmap::IndexMap;
use serde_json::{json, Value};

impl Processor<'_> {
    /// Create or update `<socket>/<endpoint>`.
    ///
    /// Installed data maps `<endpoint>:<methods>` to the call target.
    pub(super) fn process_endpoint(&mut self, dep: &EndpointDep) -> Result<IndexMap<String, Value>> {
        let name = format!("{}/{}", self.socket.name, dep.name);
        validators::validate_endpoint_name(&name).map_err(field_error("name"))?;

        match self.state.endpoints.get_mut(&name) {
            Some(endpoint) => {
                endpoint.socket = self.socket.id;
                endpoint.calls = dep.calls.clone();
                endpoint.acl = dep.acl.clone();
                endpoint.metadata = dep.metadata.clone();
            }
            None => {
                let id = self.state.next_id();
                self.state.endpoints.insert(
                    name.clone(),
                    Endpoint {
                        id,
                        name: name.clone(),
                        socket: self.socket.id,
                        calls: dep.calls.clone(),
                        acl: dep.acl.clone(),
                        metadata: dep.metadata.clone(),
                    },
                );
            }
        }
        self.objects.endpoints.insert(name);

        let mut data = IndexMap::new();
        for call in &dep.calls {
            let key = format!("{}:{}", dep.name, call.methods.join(","));
            let target = match &call.target {
                CallTarget::Script { path } => json!({ "script": path, "runtime": call.runtime }),
                CallTarget::Channel { channel } => json!({ "channel": channel }),
            };
            data.insert(key, target);
        }
        Ok(data)
    }

    pub(super) fn cleanup_endpoints(&mut self) {
        let socket = self.socket.id;
        let installed = &self.objects.endpoints;
        self.state
            .endpoints
            .retain(|name, e| e.socket != socket || installed.contains(name));
    }
}
