//! File ledger maintenance

use super::Processor;
use crate::models::FileEntry;
use crate::storage::storage_key;
use crate::Result;
use std::collections::HashSet;
use tracing::debug;

impl Processor<'_> {
    /// Record a file in the socket's ledger, storing it only when its checksum changed.
    ///
    /// Empty files are not stored and drop out of the ledger.
    pub(super) fn add_file(&mut self, path: &str, source: &[u8], checksum: &str, helper: bool) -> Result<()> {
        let previous = self.socket.file_list.get(path).cloned();
        let changed = previous.as_ref().map(|e| e.checksum != checksum).unwrap_or(true);

        if changed {
            if let Some(old) = &previous {
                if !old.file.starts_with('<') {
                    self.files.delete(&old.file);
                }
            }

            if source.is_empty() {
                self.socket.file_list.remove(path);
            } else {
                let key = storage_key(self.tenant, &self.socket.key, path);
                let location = self.files.save(&key, source)?;
                debug!(socket = %self.socket.name, path = %path, location = %location, "Stored file");

                self.socket.file_list.insert(
                    path.to_string(),
                    FileEntry {
                        checksum: checksum.to_string(),
                        size: source.len() as u64,
                        file: location,
                        helper,
                    },
                );
            }
        } else if let Some(entry) = self.socket.file_list.get_mut(path) {
            entry.helper = helper;
        }

        self.objects.file_list.push(path.to_string());
        Ok(())
    }

    /// Drop ledger entries the install did not confirm.
    ///
    /// A `zip_file_list` of `["*"]` keeps everything; otherwise listed paths
    /// are kept in addition to the installed ones.
    pub(super) fn prune_files(&mut self, partial: bool) {
        let listed = self.socket.zip_file_list.clone().unwrap_or_default();
        if listed.len() == 1 && listed[0] == "*" {
            return;
        }

        let keep: HashSet<&str> = self
            .objects
            .file_list
            .iter()
            .chain(listed.iter())
            .map(String::as_str)
            .collect();
        let manifest = self.limits.manifest_name.as_str();

        let stale: Vec<String> = self
            .socket
            .file_list
            .iter()
            .filter(|(path, entry)| {
                path.as_str() != manifest && !keep.contains(path.as_str()) && (!partial || entry.helper)
            })
            .map(|(path, _)| path.clone())
            .collect();

        for path in stale {
            if let Some(entry) = self.socket.file_list.remove(&path) {
                self.socket.size = self.socket.size.saturating_sub(entry.size);
                if !entry.file.starts_with('<') {
                    self.files.delete(&entry.file);
                }
                debug!(socket = %self.socket.name, path = %path, "Pruned file");
            }
        }
    }
}
