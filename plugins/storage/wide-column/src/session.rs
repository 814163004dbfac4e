use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use sink_api::{
    BackendConfig, BackendConnector, BackendWriter, BoundStatement, ClientSettings, SinkError,
};

// ═══════════════════════════════════════════════════════════════
//  Driver boundary
// ═══════════════════════════════════════════════════════════════

/// Open session against a wide-column cluster.
pub trait CqlSession: Send + Sync {
    fn execute<'a>(
        &'a self,
        statement: &'a BoundStatement,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>>;
}

/// Creates sessions from resolved client settings (the driver entry point).
pub trait SessionFactory: Send + Sync {
    type Session: CqlSession;

    fn connect<'a>(
        &'a self,
        settings: &'a ClientSettings,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Session, SinkError>> + Send + 'a>>;
}

// ═══════════════════════════════════════════════════════════════
//  Connector / writer
// ═══════════════════════════════════════════════════════════════

/// Connector for a wide-column store. `client_config_key` names the
/// client section the backend config was taken from.
pub struct WideColumnConnector<F> {
    factory: F,
    client_config_key: String,
}

impl<F: SessionFactory> WideColumnConnector<F> {
    pub fn new(factory: F, client_config_key: impl Into<String>) -> Self {
        Self {
            factory,
            client_config_key: client_config_key.into(),
        }
    }

    pub fn client_config_key(&self) -> &str {
        &self.client_config_key
    }
}

impl<F: SessionFactory> BackendConnector for WideColumnConnector<F> {
    type Writer = WideColumnWriter<F::Session>;

    fn open<'a>(
        &'a self,
        config: &'a BackendConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Writer, SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let settings = ClientSettings::resolve(config)
                .map_err(|e| e.with_context(&self.client_config_key))?;
            if let Some(pool) = &settings.pool {
                tracing::info!(
                    client = %self.client_config_key,
                    pool = %pool.name,
                    timeout_ms = pool.connect_timeout.as_millis() as u64,
                    "connection pool tuned"
                );
            }
            let session = self
                .factory
                .connect(&settings)
                .await
                .map_err(|e| e.with_context(&self.client_config_key))?;
            Ok(WideColumnWriter {
                session,
                closed: AtomicBool::new(false),
            })
        })
    }
}

/// Executes the statements of one record in order.
///
/// Statements are not batched: if statement *n* fails, statements
/// before it stay applied.
pub struct WideColumnWriter<S> {
    session: S,
    closed: AtomicBool,
}

impl<S: CqlSession> WideColumnWriter<S> {
    pub fn session(&self) -> &S {
        &self.session
    }
}

impl<S: CqlSession> BackendWriter for WideColumnWriter<S> {
    type Record = Vec<BoundStatement>;

    fn write<'a>(
        &'a self,
        statements: &'a Vec<BoundStatement>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(SinkError::new("session closed"));
            }
            let total = statements.len();
            for (i, statement) in statements.iter().enumerate() {
                self.session
                    .execute(statement)
                    .await
                    .map_err(|e| e.with_context(format!("statement {}/{total}", i + 1)))?;
            }
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            self.session.close().await
        })
    }
}
