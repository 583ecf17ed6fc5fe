//! The active-user list: identities currently holding a live Directory
//! session. Duplicate logins of the same identity deduplicate silently.

use std::sync::Mutex;

#[derive(Default)]
pub struct ActiveUsers {
    inner: Mutex<Vec<String>>,
}

impl ActiveUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: &str) {
        let mut users = self.inner.lock().unwrap();
        if !users.iter().any(|u| u == identity) {
            users.push(identity.to_string());
            tracing::info!("User '{}' online ({} active)", identity, users.len());
        }
    }

    pub fn deregister(&self, identity: &str) {
        let mut users = self.inner.lock().unwrap();
        if let Some(pos) = users.iter().position(|u| u == identity) {
            users.remove(pos);
            tracing::info!("User '{}' offline ({} active)", identity, users.len());
        }
    }

    /// Newline-joined listing for the LIST command.
    pub fn render_list(&self) -> String {
        let users = self.inner.lock().unwrap();
        let mut out = String::new();
        for user in users.iter() {
            out.push_str(user);
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
