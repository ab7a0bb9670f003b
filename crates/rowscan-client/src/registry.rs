//! Named-client registry.
//!
//! A [`Registry`] maps one or more keys to each [`Client`] and optionally
//! designates a default. Applications that want process-wide lookup build
//! one registry at startup and [`install`] it; [`global`] reads it back.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::client::Client;
use crate::config::{split_keys, Config};
use crate::error::{ClientError, ClientResult};

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Clients by name.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<String, Client>,
    default: Option<Client>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry with one client per configured database.
    pub fn from_config(config: &Config) -> ClientResult<Self> {
        config.validate()?;
        let mut registry = Self::new();
        for database in &config.database {
            let client = Client::from_config(database)?;
            registry.register(&database.key, client, database.default)?;
        }
        tracing::info!(clients = registry.len(), "registry built from config");
        Ok(registry)
    }

    /// Registers `client` under every comma-separated key in `keys`.
    ///
    /// Nothing is registered if any key is already taken.
    pub fn register(&mut self, keys: &str, client: Client, default: bool) -> ClientResult<()> {
        let keys = split_keys(keys);
        if keys.is_empty() {
            return Err(ClientError::InvalidConfig("client has no key".to_string()));
        }
        for (i, key) in keys.iter().enumerate() {
            if self.clients.contains_key(*key) || keys[..i].contains(key) {
                return Err(ClientError::DuplicateKey((*key).to_string()));
            }
        }

        for key in &keys {
            self.clients.insert((*key).to_string(), client.clone());
        }
        if default {
            self.default = Some(client);
        }
        tracing::debug!(?keys, default, "client registered");
        Ok(())
    }

    /// Returns the client registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Client> {
        self.clients.get(name)
    }

    /// Returns the client registered as `name`, or an error naming it.
    pub fn require(&self, name: &str) -> ClientResult<&Client> {
        self.get(name)
            .ok_or_else(|| ClientError::UnknownClient(name.to_string()))
    }

    /// Returns the default client, if one was marked.
    pub fn default_client(&self) -> Option<&Client> {
        self.default.as_ref()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Installs the process-wide registry. Fails if one is already installed.
pub fn install(registry: Registry) -> ClientResult<&'static Registry> {
    GLOBAL
        .set(registry)
        .map_err(|_| ClientError::RegistryInstalled)?;
    GLOBAL.get().ok_or(ClientError::RegistryInstalled)
}

/// Returns the process-wide registry, if installed.
pub fn global() -> Option<&'static Registry> {
    GLOBAL.get()
}
