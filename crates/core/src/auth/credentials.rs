use std::collections::HashMap;

use parking_lot::RwLock;

/// Username → password table for one protected resource.
///
/// The resource identifier names the realm the credentials belong to, so a
/// host can keep separate stores per server instance. Shared with the auth
/// providers through `Arc`; users can be added or removed while the
/// server runs.
#[derive(Debug)]
pub struct CredentialStore {
    resource: String,
    users: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Add or replace a user. Returns `true` if the user already existed.
    pub fn add_user(&self, username: &str, password: &str) -> bool {
        let replaced = self
            .users
            .write()
            .insert(username.to_string(), password.to_string())
            .is_some();
        tracing::debug!(resource = %self.resource, username, replaced, "user added");
        replaced
    }

    /// Remove a user. Returns `true` if the user existed.
    pub fn remove_user(&self, username: &str) -> bool {
        let removed = self.users.write().remove(username).is_some();
        if removed {
            tracing::debug!(resource = %self.resource, username, "user removed");
        }
        removed
    }

    pub fn password(&self, username: &str) -> Option<String> {
        self.users.read().get(username).cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}
