//! Client Directory adapters: name → phone lookup over an externally managed
//! client list.
//!
//! Lookups go through an in-memory [`ClientIndex`] keyed by normalized name,
//! rebuilt whenever the directory is refreshed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::phone::{normalize_name, normalize_phone};
use crate::types::Client;

pub trait ClientDirectory: Send + Sync {
    /// Reload from the backing store. Called at the start of each trigger run.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Case-insensitive exact match on the trimmed name.
    fn lookup_phone(&self, name: &str) -> Result<Option<String>>;

    /// Reverse lookup by phone, used to attribute inbound messages.
    fn lookup_name(&self, phone: &str) -> Result<Option<String>>;

    fn list_clients(&self) -> Result<Vec<Client>>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientIndex {
    clients: Vec<Client>,
    by_name: HashMap<String, usize>,
    by_phone: HashMap<String, usize>,
}

impl ClientIndex {
    /// Phones are normalized on the way in; a client whose phone does not
    /// normalize is kept (so weekly runs still see them) with an empty phone.
    pub fn new(entries: Vec<Client>) -> Self {
        let mut index = ClientIndex::default();
        for entry in entries {
            let key = normalize_name(&entry.name);
            if key.is_empty() {
                continue;
            }
            if index.by_name.contains_key(&key) {
                warn!(client = %entry.name, "Duplicate client name in directory; keeping first");
                continue;
            }
            let phone = match normalize_phone(&entry.phone) {
                Some(phone) => phone,
                None => {
                    warn!(client = %entry.name, "Client phone is not usable");
                    String::new()
                }
            };
            let position = index.clients.len();
            index.by_name.insert(key, position);
            if !phone.is_empty() {
                index.by_phone.entry(phone.clone()).or_insert(position);
            }
            index.clients.push(Client {
                name: entry.name.trim().to_string(),
                phone,
            });
        }
        index
    }

    pub fn phone_for(&self, name: &str) -> Option<String> {
        self.by_name
            .get(&normalize_name(name))
            .map(|&position| self.clients[position].phone.clone())
            .filter(|phone| !phone.is_empty())
    }

    pub fn name_for(&self, phone: &str) -> Option<String> {
        let phone = normalize_phone(phone)?;
        self.by_phone
            .get(&phone)
            .map(|&position| self.clients[position].name.clone())
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }
}

impl ClientDirectory for ClientIndex {
    fn lookup_phone(&self, name: &str) -> Result<Option<String>> {
        Ok(self.phone_for(name))
    }

    fn lookup_name(&self, phone: &str) -> Result<Option<String>> {
        Ok(self.name_for(phone))
    }

    fn list_clients(&self) -> Result<Vec<Client>> {
        Ok(self.clients.clone())
    }
}

/// Directory backed by a JSON array of `{name, phone}` objects.
pub struct FileClientDirectory {
    path: PathBuf,
    index: RwLock<Option<ClientIndex>>,
}

impl FileClientDirectory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            index: RwLock::new(None),
        }
    }

    fn with_index<T>(&self, op: impl FnOnce(&ClientIndex) -> T) -> Result<T> {
        {
            let guard = self
                .index
                .read()
                .map_err(|_| EngineError::configuration("client directory", "lock poisoned"))?;
            if let Some(index) = guard.as_ref() {
                return Ok(op(index));
            }
        }
        self.refresh()?;
        let guard = self
            .index
            .read()
            .map_err(|_| EngineError::configuration("client directory", "lock poisoned"))?;
        guard
            .as_ref()
            .map(op)
            .ok_or_else(|| EngineError::configuration("client directory", "index not loaded"))
    }
}

impl ClientDirectory for FileClientDirectory {
    fn refresh(&self) -> Result<()> {
        let content = fs_err::read_to_string(&self.path).map_err(|err| {
            EngineError::configuration("client directory unavailable", err.to_string())
        })?;
        let entries: Vec<Client> = serde_json::from_str(&content).map_err(|err| {
            EngineError::configuration(
                format!("client directory {} is malformed", self.path.display()),
                err.to_string(),
            )
        })?;
        let rebuilt = ClientIndex::new(entries);
        let mut guard = self
            .index
            .write()
            .map_err(|_| EngineError::configuration("client directory", "lock poisoned"))?;
        *guard = Some(rebuilt);
        Ok(())
    }

    fn lookup_phone(&self, name: &str) -> Result<Option<String>> {
        self.with_index(|index| index.phone_for(name))
    }

    fn lookup_name(&self, phone: &str) -> Result<Option<String>> {
        self.with_index(|index| index.name_for(phone))
    }

    fn list_clients(&self) -> Result<Vec<Client>> {
        self.with_index(|index| index.clients().to_vec())
    }
}
