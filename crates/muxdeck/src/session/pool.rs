//! Per-session connection fan-out.
//!
//! Every attached session gets its own connection to the same target,
//! registered under a composite id derived from the base connection and
//! the session key. Entries share no transport state.

use std::sync::Arc;

use dashmap::DashMap;
use protocol::{ConnectionSpec, RemoteHost, Result, SessionKey};

/// Composite connection id for a session's dedicated connection.
pub fn connection_id(base_id: &str, key: &SessionKey) -> String {
    format!("{}-{}-{}", base_id, key.session_type, key.id)
}

/// Open dedicated connections, keyed by composite id.
pub struct ConnectionPool {
    host: Arc<dyn RemoteHost>,
    base: ConnectionSpec,
    open: DashMap<String, SessionKey>,
}

impl ConnectionPool {
    /// Creates a pool fanning out of `base`.
    pub fn new(host: Arc<dyn RemoteHost>, base: ConnectionSpec) -> Self {
        Self {
            host,
            base,
            open: DashMap::new(),
        }
    }

    /// The host all connections go through.
    pub fn host(&self) -> &Arc<dyn RemoteHost> {
        &self.host
    }

    /// Id of the shared base connection.
    pub fn base_id(&self) -> &str {
        &self.base.id
    }

    /// Composite id that `key` would be opened under.
    pub fn id_for(&self, key: &SessionKey) -> String {
        connection_id(&self.base.id, key)
    }

    /// Opens the dedicated connection for `key`.
    ///
    /// Returns the id the host registered it under.
    pub async fn open(&self, key: &SessionKey) -> Result<String> {
        let spec = self.base.with_id(self.id_for(key));
        let id = self.host.open_connection(&spec).await?;
        self.open.insert(id.clone(), key.clone());
        tracing::info!(connection_id = %id, session = %key, "Opened dedicated connection");
        Ok(id)
    }

    /// Closes a dedicated connection. Unknown ids are a no-op.
    pub async fn close(&self, connection_id: &str) -> Result<()> {
        if self.open.remove(connection_id).is_none() {
            return Ok(());
        }
        tracing::info!(connection_id = %connection_id, "Closing dedicated connection");
        self.host.close_connection(connection_id).await
    }

    /// Returns true if `connection_id` is open.
    pub fn contains(&self, connection_id: &str) -> bool {
        self.open.contains_key(connection_id)
    }

    /// Number of open dedicated connections.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Returns true if no dedicated connection is open.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Closes every dedicated connection, logging failures.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.open.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.close(&id).await {
                tracing::warn!(connection_id = %id, error = %e, "Failed to close connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ScriptedHost;
    use protocol::{AuthMethod, SessionType};

    fn base() -> ConnectionSpec {
        ConnectionSpec {
            id: "prod".into(),
            host: "example.org".into(),
            port: 22,
            user: "ops".into(),
            auth: AuthMethod::Agent,
        }
    }

    #[test]
    fn test_connection_id_format() {
        let key = SessionKey::new(SessionType::Screen, "12345");
        assert_eq!(connection_id("prod", &key), "prod-screen-12345");
        let key = SessionKey::new(SessionType::Tmux, "work");
        assert_eq!(connection_id("prod", &key), "prod-tmux-work");
    }

    #[tokio::test]
    async fn test_open_and_close_are_independent() {
        let host = Arc::new(ScriptedHost::new());
        let pool = ConnectionPool::new(host.clone(), base());

        let a = pool.open(&SessionKey::new(SessionType::Tmux, "a")).await.unwrap();
        let b = pool.open(&SessionKey::new(SessionType::Tmux, "b")).await.unwrap();
        assert_eq!(pool.len(), 2);

        pool.close(&a).await.unwrap();
        assert!(!pool.contains(&a));
        assert!(pool.contains(&b));
        assert_eq!(host.open_connections(), vec![b.clone()]);

        pool.close(&a).await.unwrap();
        pool.close_all().await;
        assert!(pool.is_empty());
        assert!(host.open_connections().is_empty());
    }

    #[tokio::test]
    async fn test_open_uses_base_target() {
        let host = Arc::new(ScriptedHost::new());
        let pool = ConnectionPool::new(host.clone(), base());
        pool.open(&SessionKey::new(SessionType::Screen, "1")).await.unwrap();

        let opened = host.opened_specs();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].id, "prod-screen-1");
        assert_eq!(opened[0].host, "example.org");
        assert_eq!(opened[0].user, "ops");
    }
}
