use std::io::BufRead;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sink_api::{
    BackendConfig, BackendConnector, BackendWriter, RecordConverter, StreamMessage,
};
use sink_engine::{spawn_stage_task, Acknowledgment, Delivery, SinkStage, StageError, StageStats};
use storage_cache::{JsonFieldMapper, KeyValueConverter, MemoryCache, RestCacheConnector};
use storage_row_store::{FieldListConverter, HbaseRestConnector, MemoryRowStore, RowConverter, RowLayout};
use storage_wide_column::{InsertMapper, MemorySessionFactory, ScyllaSessionFactory, WideColumnConnector};

use crate::config::{
    BackendKind, ServeArgs, ServerConfig, SourceConfig, StageConfig, CQL_DRIVER, MEMORY_BACKEND,
};
use crate::error::ServerError;

type AckWait = (u64, oneshot::Receiver<Acknowledgment>);

/// Dispatcher side of a running stage.
struct StageInput {
    name: String,
    deliveries: mpsc::Sender<Delivery>,
    acks: mpsc::Sender<AckWait>,
}

/// Tasks of a running stage.
struct StageRunner {
    name: String,
    task: JoinHandle<Result<StageStats, StageError>>,
    watcher: JoinHandle<()>,
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("sink-server starting");

    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    if config.stages.is_empty() {
        return Err(ServerError::NoComponents("[[stages]]"));
    }

    let token = CancellationToken::new();

    // --- Stages: every one must initialize before any message flows ---
    let (inputs, runners) = start_stages(&config, &token).await?;

    // --- Source → dispatcher → stages ---
    let (feed_tx, feed_rx) = mpsc::channel(config.source.buffer);
    let source = match spawn_source(&config.source, feed_tx, token.clone()).await {
        Ok(source) => source,
        Err(e) => {
            stop_stages(&token, inputs, runners).await;
            return Err(e);
        }
    };
    let mut dispatcher = tokio::spawn(dispatch(feed_rx, inputs, token.clone()));

    tracing::info!("server ready");

    let dispatched = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("shutting down...");
            token.cancel();
            None
        }
        res = &mut dispatcher => Some(res),
    };
    let dispatched = match dispatched {
        Some(res) => res,
        None => dispatcher.await,
    };
    if let Err(e) = dispatched {
        tracing::error!(error = %e, "dispatcher task failed");
    }

    // The stdin reader thread is detached; it ends with the process.
    if let Some(source) = source {
        match source.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "source error"),
            Err(e) => tracing::error!(error = %e, "source task failed"),
        }
    }

    let failed = join_stages(runners).await;
    tracing::info!("shutdown complete");
    if failed > 0 {
        return Err(ServerError::StagesFailed(failed));
    }
    Ok(())
}

/// Start every configured stage in order. When one fails, the stages
/// already running are cancelled and closed before the error returns.
async fn start_stages(
    config: &ServerConfig,
    token: &CancellationToken,
) -> Result<(Vec<StageInput>, Vec<StageRunner>), ServerError> {
    let mut inputs = Vec::with_capacity(config.stages.len());
    let mut runners = Vec::with_capacity(config.stages.len());
    for stage_cfg in &config.stages {
        let started = async {
            let client = config.client_config(stage_cfg)?;
            start_stage(stage_cfg, &client, config.source.buffer, token.clone()).await
        }
        .await;
        match started {
            Ok((input, runner)) => {
                tracing::info!(
                    stage = %stage_cfg.name,
                    client = ?stage_cfg.client_config_key,
                    policy = ?stage_cfg.on_write_failure,
                    "stage started"
                );
                inputs.push(input);
                runners.push(runner);
            }
            Err(e) => {
                tracing::error!(stage = %stage_cfg.name, error = %e, "stage failed to start");
                stop_stages(token, inputs, runners).await;
                return Err(e);
            }
        }
    }
    Ok((inputs, runners))
}

/// Cancel running stages and wait until each one has closed its backend.
async fn stop_stages(token: &CancellationToken, inputs: Vec<StageInput>, runners: Vec<StageRunner>) {
    token.cancel();
    drop(inputs);
    join_stages(runners).await;
}

/// Await every stage task and its watcher; returns how many failed.
async fn join_stages(runners: Vec<StageRunner>) -> usize {
    let mut failed = 0;
    for runner in runners {
        match runner.task.await {
            Ok(Ok(stats)) => {
                tracing::info!(stage = %runner.name, stored = stats.stored, dropped = stats.dropped, "stage finished");
            }
            Ok(Err(e)) => {
                tracing::error!(stage = %runner.name, error = %e, "stage failed");
                failed += 1;
            }
            Err(e) => {
                tracing::error!(stage = %runner.name, error = %e, "stage task failed");
                failed += 1;
            }
        }
        let _ = runner.watcher.await;
    }
    failed
}

// ═══════════════════════════════════════════════════════════════
//  Stage construction
// ═══════════════════════════════════════════════════════════════

async fn start_stage(
    cfg: &StageConfig,
    client: &BackendConfig,
    buffer: usize,
    token: CancellationToken,
) -> Result<(StageInput, StageRunner), ServerError> {
    let backend_err = |source| ServerError::Backend { stage: cfg.name.clone(), source };

    match &cfg.backend {
        BackendKind::RowStore(rs) => {
            let converter = RowConverter::new(FieldListConverter, RowLayout::new(rs.cells.clone()));
            if rs.endpoint == MEMORY_BACKEND {
                let stage = SinkStage::new(&cfg.name, converter, MemoryRowStore::new());
                launch(stage, cfg, client, buffer, token).await
            } else {
                if rs.table.is_empty() {
                    return Err(ServerError::Config {
                        context: "stages",
                        detail: format!("stage '{}': row store needs a table", cfg.name),
                    });
                }
                let connector = HbaseRestConnector::new(&rs.endpoint, &rs.table);
                launch(SinkStage::new(&cfg.name, converter, connector), cfg, client, buffer, token).await
            }
        }
        BackendKind::WideColumn(wc) => {
            let columns = wc.columns.iter().map(|c| (c.name.clone(), c.field.clone())).collect();
            let mapper = InsertMapper::new(&wc.keyspace, &wc.table, columns).map_err(backend_err)?;
            let client_key = cfg.client_config_key.as_deref().unwrap_or(&cfg.name);
            match wc.driver.as_str() {
                CQL_DRIVER => {
                    if wc.contact_points.is_empty() {
                        return Err(ServerError::Config {
                            context: "stages",
                            detail: format!("stage '{}': cql driver needs contact_points", cfg.name),
                        });
                    }
                    let factory = ScyllaSessionFactory::new(wc.contact_points.clone());
                    let connector = WideColumnConnector::new(factory, client_key);
                    launch(SinkStage::new(&cfg.name, mapper, connector), cfg, client, buffer, token).await
                }
                MEMORY_BACKEND => {
                    let connector = WideColumnConnector::new(MemorySessionFactory::new(), client_key);
                    launch(SinkStage::new(&cfg.name, mapper, connector), cfg, client, buffer, token).await
                }
                other => Err(ServerError::Config {
                    context: "stages",
                    detail: format!("stage '{}': unsupported driver '{other}'", cfg.name),
                }),
            }
        }
        BackendKind::Cache(c) => {
            let converter = KeyValueConverter::new(JsonFieldMapper::new(c.key.clone(), c.value.clone()));
            if c.cache_server_url == MEMORY_BACKEND {
                let cache: MemoryCache<String, Value> = MemoryCache::new(c.max_entries);
                launch(SinkStage::new(&cfg.name, converter, cache), cfg, client, buffer, token).await
            } else {
                let connector: RestCacheConnector<String, Value> =
                    RestCacheConnector::new(&c.cache_server_url, &c.cache_name);
                launch(SinkStage::new(&cfg.name, converter, connector), cfg, client, buffer, token).await
            }
        }
    }
}

/// Initialize a stage and run it as a task with its acknowledgment watcher.
async fn launch<C, K>(
    stage: SinkStage<C, K>,
    cfg: &StageConfig,
    client: &BackendConfig,
    buffer: usize,
    token: CancellationToken,
) -> Result<(StageInput, StageRunner), ServerError>
where
    C: RecordConverter + 'static,
    K: BackendConnector + 'static,
    K::Writer: BackendWriter<Record = C::Record> + 'static,
{
    let mut stage = stage.with_policy(cfg.on_write_failure);
    stage.initialize(client).await?;

    let (deliveries, rx) = mpsc::channel(buffer);
    let (acks, ack_rx) = mpsc::channel(buffer);
    let name = stage.name().to_string();

    let task = spawn_stage_task(stage, rx, token);
    let watcher = tokio::spawn(watch_acks(name.clone(), ack_rx));

    Ok((
        StageInput { name: name.clone(), deliveries, acks },
        StageRunner { name, task, watcher },
    ))
}

/// Acknowledgments arrive in delivery order, so they are awaited in order.
async fn watch_acks(stage: String, mut acks: mpsc::Receiver<AckWait>) {
    while let Some((seq, ack)) = acks.recv().await {
        match ack.await {
            Ok(ack) => tracing::debug!(stage = %stage, seq, ?ack, "message acknowledged"),
            Err(_) => tracing::warn!(stage = %stage, seq, "message not acknowledged"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Dispatch: one delivery per stage per message
// ═══════════════════════════════════════════════════════════════

async fn dispatch(
    mut feed: mpsc::Receiver<StreamMessage>,
    mut stages: Vec<StageInput>,
    token: CancellationToken,
) {
    let mut seq = 0u64;
    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            message = feed.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let mut i = 0;
        while i < stages.len() {
            let stage = &stages[i];
            let (delivery, ack) = Delivery::new(seq, message.clone());
            if stage.deliveries.send(delivery).await.is_err() {
                tracing::warn!(stage = %stage.name, seq, "stage stopped, no longer delivering");
                stages.remove(i);
                continue;
            }
            // Watcher ends only after the delivery side is gone.
            let _ = stage.acks.send((seq, ack)).await;
            i += 1;
        }
        if stages.is_empty() {
            tracing::warn!("no running stages left");
            break;
        }
        seq += 1;
    }
    tracing::debug!(dispatched = seq, "dispatcher stopped");
}

// ═══════════════════════════════════════════════════════════════
//  Source: newline-delimited JSON from stdin or TCP
// ═══════════════════════════════════════════════════════════════

async fn spawn_source(
    cfg: &SourceConfig,
    feed: mpsc::Sender<StreamMessage>,
    token: CancellationToken,
) -> Result<Option<JoinHandle<Result<(), std::io::Error>>>, ServerError> {
    let Some(addr) = cfg.listen.as_deref() else {
        tracing::info!("reading messages from stdin");
        // Runtime shutdown would wait on a blocking-pool stdin read until EOF.
        std::thread::Builder::new()
            .name("stdin-source".into())
            .spawn(move || {
                if let Err(e) = read_lines_blocking(std::io::stdin().lock(), "stdin", &feed, &token) {
                    tracing::error!(error = %e, "source error");
                }
            })?;
        return Ok(None);
    };

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "listening for messages");

    Ok(Some(tokio::spawn(async move {
        loop {
            let (stream, peer) = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            tracing::debug!(peer = %peer, "connection accepted");
            let feed = feed.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let origin = peer.to_string();
                if let Err(e) = read_lines(BufReader::new(stream), &origin, &feed, &token).await {
                    tracing::warn!(peer = %origin, error = %e, "connection error");
                }
            });
        }
        Ok::<_, std::io::Error>(())
    })))
}

fn parse_line(line: &str, origin: &str, line_no: u64) -> Option<StreamMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamMessage>(line) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(origin = %origin, line = line_no, error = %e, "malformed message skipped");
            None
        }
    }
}

/// Thread-side reader: stops at EOF, on cancellation (checked between
/// lines) or once the feed is closed.
fn read_lines_blocking<R: BufRead>(
    reader: R,
    origin: &str,
    feed: &mpsc::Sender<StreamMessage>,
    token: &CancellationToken,
) -> Result<(), std::io::Error> {
    for (i, line) in reader.lines().enumerate() {
        if token.is_cancelled() {
            break;
        }
        let line = line?;
        if let Some(message) = parse_line(&line, origin, i as u64 + 1) {
            if feed.blocking_send(message).is_err() {
                break;
            }
        }
    }
    Ok(())
}

/// Parse one message per line until EOF or cancellation. Malformed lines
/// are logged and skipped.
async fn read_lines<R>(
    reader: R,
    origin: &str,
    feed: &mpsc::Sender<StreamMessage>,
    token: &CancellationToken,
) -> Result<(), std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        line_no += 1;

        if let Some(message) = parse_line(&line, origin, line_no) {
            if feed.send(message).await.is_err() {
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sink_api::CellDefine;
    use sink_engine::{DropReason, WriteFailurePolicy};

    use super::*;
    use crate::config::{RowStoreConfig, StageConfig};

    fn row_stage_config() -> StageConfig {
        StageConfig {
            name: "rows".into(),
            on_write_failure: WriteFailurePolicy::Isolate,
            client_config_key: None,
            backend: BackendKind::RowStore(RowStoreConfig {
                endpoint: MEMORY_BACKEND.into(),
                table: String::new(),
                cells: vec![CellDefine::new("cf", "a"), CellDefine::new("cf", "b")],
            }),
        }
    }

    #[tokio::test]
    async fn read_lines_skips_malformed() {
        let input = concat!(
            r#"{"header":{"timestamp":"T1","source":"S1"},"body":["v1"]}"#, "\n",
            "not json\n",
            "\n",
            r#"{"header":{"timestamp":"T2","source":"S1"},"body":{"k":1}}"#, "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        read_lines(input.as_bytes(), "test", &tx, &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);

        let mut timestamps = Vec::new();
        while let Some(message) = rx.recv().await {
            timestamps.push(message.timestamp().to_string());
        }
        assert_eq!(timestamps, vec!["T1".to_string(), "T2".to_string()]);
    }

    #[tokio::test]
    async fn dispatch_fans_out_and_acknowledges() {
        let token = CancellationToken::new();
        let cfg = row_stage_config();
        let store = MemoryRowStore::new();
        let converter = RowConverter::new(FieldListConverter, RowLayout::new(vec![
            CellDefine::new("cf", "a"),
            CellDefine::new("cf", "b"),
        ]));
        let (input, runner) = launch(
            SinkStage::new("rows", converter, store.clone()),
            &cfg,
            &BackendConfig::new(),
            4,
            token.clone(),
        )
        .await
        .unwrap();

        let (feed_tx, feed_rx) = mpsc::channel(4);
        let dispatcher = tokio::spawn(dispatch(feed_rx, vec![input], token.clone()));
        feed_tx
            .send(StreamMessage::with_fields("T1", "S1", ["v1", "v2"]))
            .await
            .unwrap();
        feed_tx
            .send(StreamMessage::with_fields("T2", "S1", ["v1", "v2", "v3"]))
            .await
            .unwrap();
        drop(feed_tx);
        dispatcher.await.unwrap();

        // The oversized body stops the stage without acknowledgment.
        let result = runner.task.await.unwrap();
        assert!(matches!(result, Err(StageError::Layout { .. })));
        runner.watcher.await.unwrap();

        let row = store.row("T1_S1").await.unwrap();
        assert_eq!(row.get("cf:a").map(String::as_str), Some("v1"));
        assert_eq!(row.get("cf:b").map(String::as_str), Some("v2"));
        assert!(store.row("T2_S1").await.is_none());
    }

    #[tokio::test]
    async fn start_stage_from_config() {
        let cfg = row_stage_config();
        let (input, runner) = start_stage(&cfg, &BackendConfig::new(), 4, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(input.name, "rows");

        let (delivery, ack) = Delivery::new(0, StreamMessage::with_fields("T1", "S1", [Value::Null]));
        input.deliveries.send(delivery).await.unwrap();
        assert_eq!(ack.await.unwrap(), Acknowledgment::Stored);

        let (delivery, ack) = Delivery::new(
            1,
            StreamMessage::new("T2", "S1", serde_json::from_str(r#"{"k":1}"#).unwrap()),
        );
        input.deliveries.send(delivery).await.unwrap();
        assert_eq!(ack.await.unwrap(), Acknowledgment::Dropped(DropReason::Conversion));

        drop(input);
        let stats = runner.task.await.unwrap().unwrap();
        assert_eq!(stats, StageStats { stored: 1, dropped: 1 });
    }

    #[test]
    fn blocking_reader_feeds_parsed_lines() {
        let input = concat!(
            r#"{"header":{"timestamp":"T1","source":"S1"},"body":["v1"]}"#, "\n",
            "{broken\n",
            r#"{"header":{"timestamp":"T2","source":"S1"},"body":["v2"]}"#, "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        read_lines_blocking(input.as_bytes(), "test", &tx, &CancellationToken::new()).unwrap();
        drop(tx);

        let mut timestamps = Vec::new();
        while let Ok(message) = rx.try_recv() {
            timestamps.push(message.timestamp().to_string());
        }
        assert_eq!(timestamps, vec!["T1".to_string(), "T2".to_string()]);
    }

    #[test]
    fn blocking_reader_stops_once_cancelled() {
        let input = r#"{"header":{"timestamp":"T1","source":"S1"},"body":["v1"]}"#;
        let token = CancellationToken::new();
        token.cancel();
        let (tx, mut rx) = mpsc::channel(8);
        read_lines_blocking(input.as_bytes(), "test", &tx, &token).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_stops_on_cancel_with_open_feed() {
        let token = CancellationToken::new();
        let (input, runner) = start_stage(&row_stage_config(), &BackendConfig::new(), 4, token.clone())
            .await
            .unwrap();

        // The sender stays alive, as with a reader blocked on stdin.
        let (feed_tx, feed_rx) = mpsc::channel::<StreamMessage>(4);
        let dispatcher = tokio::spawn(dispatch(feed_rx, vec![input], token.clone()));
        token.cancel();
        dispatcher.await.unwrap();

        assert_eq!(join_stages(vec![runner]).await, 0);
        drop(feed_tx);
    }

    #[tokio::test]
    async fn failed_start_stops_running_stages() {
        let config = ServerConfig::parse(
            r#"
            [[stages]]
            name = "rows"
            [stages.backend]
            kind = "row_store"
            endpoint = "memory"
            cells = [{ family = "cf", qualifier = "a" }]

            [[stages]]
            name = "latest"
            [stages.backend]
            kind = "cache"
            cache_server_url = "not a url"
            cache_name = "quotes"
            key = "source"
            "#,
        )
        .unwrap();
        let token = CancellationToken::new();

        let err = start_stages(&config, &token).await.err().unwrap();
        assert!(matches!(err, ServerError::Stage(StageError::Init { ref stage, .. }) if stage == "latest"));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cql_driver_needs_contact_points() {
        let config = ServerConfig::parse(
            r#"
            [[stages]]
            name = "cql"
            [stages.backend]
            kind = "wide_column"
            driver = "cql"
            keyspace = "ks"
            table = "events"
            columns = [{ name = "ts", field = "timestamp" }]
            "#,
        )
        .unwrap();
        let err = start_stage(&config.stages[0], &BackendConfig::new(), 4, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Config { context: "stages", .. }));
    }
}
