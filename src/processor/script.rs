use super::Processor;
use crate::dependency::ScriptDep;
use crate::importer::NODEJS_V8;
use crate::models::Script;
use crate::{Error, Result};
use tracing::debug;

/// Placeholder source kept on current-format scripts; the code lives in the ledger.
const MANAGED_SOURCE: &str = "Managed by Socket.";

impl Processor<'_> {
    fn find_script(&self, path: &str) -> Option<u64> {
        self.state
            .scripts
            .iter()
            .find(|s| s.socket == self.socket.id && s.path == path)
            .map(|s| s.id)
    }

    /// Resolve the socket's script for `dep`, creating or updating it.
    pub(super) fn install_script(&mut self, dep: &ScriptDep) -> Result<u64> {
        match self.find_script(&dep.path) {
            Some(id) => self.update_script(id, dep),
            None => self.write_script(dep, None),
        }
    }

    /// Bring script `id` in line with `dep`.
    ///
    /// When the dependency now points at another path the script for that
    /// path is used instead. Only the fields the dependency carries are compared.
    pub(super) fn update_script(&mut self, id: u64, dep: &ScriptDep) -> Result<u64> {
        let mut id = id;
        let current_path = self.state.script(id).map(|s| s.path.clone());
        if current_path.as_deref() != Some(dep.path.as_str()) {
            match self.find_script(&dep.path) {
                Some(other) => id = other,
                None => return self.write_script(dep, None),
            }
        }

        let script = self
            .state
            .script(id)
            .ok_or_else(|| Error::Other(format!("script {} vanished", id)))?;
        let changed = script.checksum != dep.checksum
            || dep.config.as_ref().map(|c| *c != script.config).unwrap_or(false)
            || dep.runtime.as_ref().map(|r| *r != script.runtime).unwrap_or(false);

        if changed {
            return self.write_script(dep, Some(id));
        }
        self.add_installed_script(dep, id)
    }

    fn write_script(&mut self, dep: &ScriptDep, existing: Option<u64>) -> Result<u64> {
        let new_format = self.socket.is_new_format();
        let socket_name = self.socket.name.clone();

        let mut runtime = existing
            .and_then(|id| self.state.script(id))
            .map(|s| s.runtime.clone())
            .unwrap_or_else(|| NODEJS_V8.name.to_string());
        let source = if new_format {
            if let Some(r) = &dep.runtime {
                runtime = r.clone();
            }
            Some(MANAGED_SOURCE.to_string())
        } else {
            dep.source.clone()
        };

        let label = format!("Script dependency of {}", socket_name);
        let description = format!("Script created as a dependency of socket: \"{}\".", socket_name);

        let id = match existing.and_then(|id| self.state.script_mut(id)) {
            Some(script) => {
                script.socket = self.socket.id;
                script.path = dep.path.clone();
                script.checksum = dep.checksum.clone();
                script.runtime = runtime;
                script.label = label;
                script.description = description;
                if let Some(source) = source {
                    script.source = source;
                }
                if let Some(config) = &dep.config {
                    script.config = config.clone();
                }
                debug!(socket = %socket_name, path = %dep.path, "Updated script");
                script.id
            }
            None => {
                let id = self.state.next_id();
                self.state.scripts.push(Script {
                    id,
                    socket: self.socket.id,
                    path: dep.path.clone(),
                    checksum: dep.checksum.clone(),
                    source: source.unwrap_or_default(),
                    config: dep.config.clone().unwrap_or_default(),
                    runtime,
                    label,
                    description,
                });
                debug!(socket = %socket_name, path = %dep.path, "Created script");
                id
            }
        };

        self.add_installed_script(dep, id)
    }

    fn add_installed_script(&mut self, dep: &ScriptDep, id: u64) -> Result<u64> {
        let source = dep.source.as_deref().unwrap_or_default();
        self.add_file(&dep.path, source.as_bytes(), &dep.checksum, false)?;
        self.objects.scripts.insert(id);
        Ok(id)
    }

    pub(super) fn cleanup_scripts(&mut self) {
        let socket = self.socket.id;
        let installed = &self.objects.scripts;
        self.state
            .scripts
            .retain(|s| s.socket != socket || installed.contains(&s.id));
    }
}
