use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use sink_api::{BoundStatement, ClientSettings, CqlValue, SinkError};

use crate::session::{CqlSession, SessionFactory};

#[derive(Debug, Default)]
struct MemoryCluster {
    executed: Vec<BoundStatement>,
    connections: Vec<ClientSettings>,
}

/// In-process "cluster": records executed statements and the settings
/// every session was opened with. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionFactory {
    cluster: Arc<RwLock<MemoryCluster>>,
    reject_value: Option<CqlValue>,
}

impl MemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement that binds `value`.
    pub fn rejecting(mut self, value: CqlValue) -> Self {
        self.reject_value = Some(value);
        self
    }

    pub async fn executed(&self) -> Vec<BoundStatement> {
        self.cluster.read().await.executed.clone()
    }

    pub async fn connections(&self) -> Vec<ClientSettings> {
        self.cluster.read().await.connections.clone()
    }
}

impl SessionFactory for MemorySessionFactory {
    type Session = MemorySession;

    fn connect<'a>(
        &'a self,
        settings: &'a ClientSettings,
    ) -> Pin<Box<dyn Future<Output = Result<MemorySession, SinkError>> + Send + 'a>> {
        Box::pin(async move {
            self.cluster.write().await.connections.push(settings.clone());
            Ok(MemorySession {
                cluster: self.cluster.clone(),
                reject_value: self.reject_value.clone(),
            })
        })
    }
}

pub struct MemorySession {
    cluster: Arc<RwLock<MemoryCluster>>,
    reject_value: Option<CqlValue>,
}

impl CqlSession for MemorySession {
    fn execute<'a>(
        &'a self,
        statement: &'a BoundStatement,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(rejected) = &self.reject_value {
                if statement.values.contains(rejected) {
                    return Err(SinkError::io(format!("write timeout binding {rejected}")));
                }
            }
            self.cluster.write().await.executed.push(statement.clone());
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
