use serde::Deserialize;

use sink_api::{
    BackendConfig, BackendConnector, BackendWriter, ErrorKind, NoopHooks, RecordConverter,
    StoreHooks, StreamMessage,
};

use crate::error::StageError;

// ═══════════════════════════════════════════════════════════════
//  Acknowledgment
// ═══════════════════════════════════════════════════════════════

/// Why a message was dropped instead of stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Converter rejected the message (poison message).
    Conversion,
    /// Backend rejected the write and the policy is `Isolate`.
    Write,
}

/// The message lifecycle is complete; upstream may release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    Stored,
    Dropped(DropReason),
}

/// What to do when the backend rejects a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailurePolicy {
    /// Log, drop, acknowledge. The pipeline keeps going.
    #[default]
    Isolate,
    /// Log and fail the stage. The message is not acknowledged; its fate
    /// belongs to the upstream replay policy.
    Escalate,
}

// ═══════════════════════════════════════════════════════════════
//  SinkStage
// ═══════════════════════════════════════════════════════════════

/// Terminal pipeline stage: convert → write → acknowledge.
///
/// Processes one message at a time; the only state kept between
/// messages is the writer opened by [`SinkStage::initialize`].
pub struct SinkStage<C, K, H = NoopHooks>
where
    C: RecordConverter,
    K: BackendConnector,
    K::Writer: BackendWriter<Record = C::Record>,
    H: StoreHooks<C::Record>,
{
    name: String,
    converter: C,
    connector: K,
    hooks: H,
    policy: WriteFailurePolicy,
    writer: Option<K::Writer>,
}

impl<C, K> SinkStage<C, K, NoopHooks>
where
    C: RecordConverter,
    K: BackendConnector,
    K::Writer: BackendWriter<Record = C::Record>,
{
    pub fn new(name: impl Into<String>, converter: C, connector: K) -> Self {
        Self {
            name: name.into(),
            converter,
            connector,
            hooks: NoopHooks,
            policy: WriteFailurePolicy::default(),
            writer: None,
        }
    }
}

impl<C, K, H> SinkStage<C, K, H>
where
    C: RecordConverter,
    K: BackendConnector,
    K::Writer: BackendWriter<Record = C::Record>,
    H: StoreHooks<C::Record>,
{
    /// Replace the hooks.
    pub fn with_hooks<H2>(self, hooks: H2) -> SinkStage<C, K, H2>
    where
        H2: StoreHooks<C::Record>,
    {
        SinkStage {
            name: self.name,
            converter: self.converter,
            connector: self.connector,
            hooks,
            policy: self.policy,
            writer: self.writer,
        }
    }

    pub fn with_policy(mut self, policy: WriteFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> WriteFailurePolicy {
        self.policy
    }

    pub fn is_initialized(&self) -> bool {
        self.writer.is_some()
    }

    /// Open the backend. Must succeed once before any message is processed.
    pub async fn initialize(&mut self, config: &BackendConfig) -> Result<(), StageError> {
        if self.writer.is_some() {
            return Err(StageError::AlreadyInitialized { stage: self.name.clone() });
        }
        match self.connector.open(config).await {
            Ok(writer) => {
                tracing::info!(stage = %self.name, "backend opened");
                self.writer = Some(writer);
                Ok(())
            }
            Err(e) => {
                tracing::error!(stage = %self.name, error = %e, "backend open failed");
                Err(StageError::Init { stage: self.name.clone(), source: e })
            }
        }
    }

    /// Per-message contract.
    ///
    /// `Ok` means the message must be acknowledged (stored or dropped).
    /// `Err` means it must not be: the stage is not ready, the record
    /// layout is misconfigured, or a write failure is escalated.
    pub async fn on_message(&self, message: &StreamMessage) -> Result<Acknowledgment, StageError> {
        let Some(writer) = self.writer.as_ref() else {
            return Err(StageError::NotInitialized { stage: self.name.clone() });
        };

        self.hooks.before_store(message);

        let record = match self.converter.convert(message) {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::Layout => {
                tracing::error!(stage = %self.name, input = %message, error = %e, "record layout fault");
                return Err(StageError::Layout { stage: self.name.clone(), source: e });
            }
            Err(e) => {
                tracing::warn!(stage = %self.name, input = %message, error = %e, "conversion failed, dropping message");
                return Ok(Acknowledgment::Dropped(DropReason::Conversion));
            }
        };

        if let Err(e) = writer.write(&record).await {
            tracing::warn!(stage = %self.name, input = %message, error = %e, policy = ?self.policy, "store failed");
            return match self.policy {
                WriteFailurePolicy::Isolate => Ok(Acknowledgment::Dropped(DropReason::Write)),
                WriteFailurePolicy::Escalate => {
                    Err(StageError::Write { stage: self.name.clone(), source: e })
                }
            };
        }

        self.hooks.after_store(message, &record);
        Ok(Acknowledgment::Stored)
    }

    /// Release the backend. Idempotent.
    pub async fn close(&mut self) -> Result<(), StageError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        writer
            .close()
            .await
            .map_err(|e| StageError::Close { stage: self.name.clone(), source: e })?;
        tracing::info!(stage = %self.name, "backend closed");
        Ok(())
    }
}
