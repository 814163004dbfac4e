use std::future::Future;
use std::pin::Pin;

use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::value::CqlValue as DriverValue;

use sink_api::{BoundStatement, ClientSettings, CqlValue, SinkError};

use crate::session::{CqlSession, SessionFactory};

pub const USERNAME_KEY: &str = "auth.username";
pub const PASSWORD_KEY: &str = "auth.password";

/// Sessions opened with the scylla driver (CQL native protocol, so
/// Cassandra and ScyllaDB clusters alike).
#[derive(Debug, Clone)]
pub struct ScyllaSessionFactory {
    contact_points: Vec<String>,
}

impl ScyllaSessionFactory {
    /// `contact_points` are `host:port` addresses of cluster nodes.
    pub fn new(contact_points: Vec<String>) -> Self {
        Self { contact_points }
    }
}

impl SessionFactory for ScyllaSessionFactory {
    type Session = ScyllaSession;

    fn connect<'a>(
        &'a self,
        settings: &'a ClientSettings,
    ) -> Pin<Box<dyn Future<Output = Result<ScyllaSession, SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if self.contact_points.is_empty() {
                return Err(SinkError::config("no contact points configured"));
            }
            let mut builder = SessionBuilder::new().known_nodes(&self.contact_points);
            if let Some(timeout) = settings.connect_timeout() {
                builder = builder.connection_timeout(timeout);
            }
            if let Some(username) = settings.config.get_str(USERNAME_KEY) {
                let password = settings.config.get_str(PASSWORD_KEY).unwrap_or_default();
                builder = builder.user(username, password);
            }
            let session = builder
                .build()
                .await
                .map_err(|e| SinkError::io(format!("CQL connect: {e}")))?;
            tracing::debug!(nodes = ?self.contact_points, "CQL session opened");
            Ok(ScyllaSession { session })
        })
    }
}

pub struct ScyllaSession {
    session: Session,
}

/// `None` binds CQL null.
fn driver_value(value: &CqlValue) -> Option<DriverValue> {
    match value {
        CqlValue::Text(s) => Some(DriverValue::Text(s.clone())),
        CqlValue::BigInt(i) => Some(DriverValue::BigInt(*i)),
        CqlValue::Double(d) => Some(DriverValue::Double(*d)),
        CqlValue::Boolean(b) => Some(DriverValue::Boolean(*b)),
        CqlValue::Null => None,
    }
}

impl CqlSession for ScyllaSession {
    fn execute<'a>(
        &'a self,
        statement: &'a BoundStatement,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let values: Vec<Option<DriverValue>> = statement.values.iter().map(driver_value).collect();
            self.session
                .query_unpaged(&*statement.cql, values)
                .await
                .map_err(|e| SinkError::io(format!("CQL execute: {e}")))?;
            Ok(())
        })
    }

    // Connections are released when the session drops.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use sink_api::{BackendConfig, ErrorKind};

    use super::*;

    #[test]
    fn values_map_to_driver_types() {
        assert_eq!(driver_value(&CqlValue::Text("a".into())), Some(DriverValue::Text("a".into())));
        assert_eq!(driver_value(&CqlValue::BigInt(7)), Some(DriverValue::BigInt(7)));
        assert_eq!(driver_value(&CqlValue::Double(1.5)), Some(DriverValue::Double(1.5)));
        assert_eq!(driver_value(&CqlValue::Boolean(true)), Some(DriverValue::Boolean(true)));
        assert_eq!(driver_value(&CqlValue::Null), None);
    }

    #[tokio::test]
    async fn connect_needs_contact_points() {
        let settings = ClientSettings::resolve(&BackendConfig::new()).unwrap();
        let err = ScyllaSessionFactory::new(Vec::new())
            .connect(&settings)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
