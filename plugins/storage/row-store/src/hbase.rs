use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use reqwest::Url;
use serde::Serialize;

use sink_api::{
    BackendConfig, BackendConnector, BackendWriter, ClientSettings, RowRecord, SinkError,
};

/// Accept self-signed certificates (`true`/`false`).
pub const ACCEPT_INVALID_CERTS_KEY: &str = "tls.accept_invalid_certs";
/// Per-request timeout in milliseconds.
pub const REQUEST_TIMEOUT_KEY: &str = "request.timeout";

// ════════════════════════════════════════════════════════════════
//  Wire format
// ════════════════════════════════════════════════════════════════

/// HBase REST `CellSet`; every key, column and value base64-encoded.
#[derive(Serialize)]
struct CellSet {
    #[serde(rename = "Row")]
    rows: Vec<RowJson>,
}

#[derive(Serialize)]
struct RowJson {
    key: String,
    #[serde(rename = "Cell")]
    cells: Vec<CellJson>,
}

#[derive(Serialize)]
struct CellJson {
    column: String,
    #[serde(rename = "$")]
    value: String,
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub(crate) fn cell_set_json(row: &RowRecord) -> Result<Vec<u8>, SinkError> {
    let cell_set = CellSet {
        rows: vec![RowJson {
            key: b64(row.row_key.as_bytes()),
            cells: row
                .cells
                .iter()
                .map(|c| CellJson {
                    column: b64(c.column().as_bytes()),
                    value: b64(c.value.as_bytes()),
                })
                .collect(),
        }],
    };
    Ok(serde_json::to_vec(&cell_set)?)
}

fn table_url(endpoint: &Url, table: &str, tail: &[&str]) -> Result<Url, SinkError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| SinkError::config(format!("endpoint '{endpoint}' cannot be a base URL")))?
        .pop_if_empty()
        .push(table)
        .extend(tail);
    Ok(url)
}

// ════════════════════════════════════════════════════════════════
//  Connector
// ════════════════════════════════════════════════════════════════

/// Row store behind an HBase REST gateway.
#[derive(Debug, Clone)]
pub struct HbaseRestConnector {
    endpoint: String,
    table: String,
}

impl HbaseRestConnector {
    pub fn new(endpoint: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            table: table.into(),
        }
    }

    fn http_client(settings: &ClientSettings) -> Result<reqwest::Client, SinkError> {
        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(
            settings.config.get_bool(ACCEPT_INVALID_CERTS_KEY).unwrap_or(false),
        );
        if let Some(timeout) = settings.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = settings.config.get_millis(REQUEST_TIMEOUT_KEY)? {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| SinkError::config(format!("HTTP client: {e}")))
    }
}

impl BackendConnector for HbaseRestConnector {
    type Writer = HbaseRestWriter;

    fn open<'a>(
        &'a self,
        config: &'a BackendConfig,
    ) -> Pin<Box<dyn Future<Output = Result<HbaseRestWriter, SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let endpoint = Url::parse(&self.endpoint)
                .map_err(|e| SinkError::config(format!("endpoint '{}': {e}", self.endpoint)))?;
            let settings = ClientSettings::resolve(config)?;
            let http = Self::http_client(&settings)?;

            // Table must exist before the first put.
            let schema_url = table_url(&endpoint, &self.table, &["schema"])?;
            let resp = http
                .get(schema_url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| SinkError::io(format!("HBase REST request: {e}")))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(SinkError::config(format!(
                    "table '{}' not available at {}: HTTP {status}",
                    self.table, self.endpoint
                )));
            }

            tracing::debug!(endpoint = %self.endpoint, table = %self.table, pool = ?settings.pool, "HBase REST connected");
            Ok(HbaseRestWriter {
                http,
                endpoint,
                table: self.table.clone(),
                closed: AtomicBool::new(false),
            })
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Writer
// ════════════════════════════════════════════════════════════════

pub struct HbaseRestWriter {
    http: reqwest::Client,
    endpoint: Url,
    table: String,
    closed: AtomicBool,
}

impl HbaseRestWriter {
    async fn put(&self, row: &RowRecord) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::new("writer closed"));
        }
        let url = table_url(&self.endpoint, &self.table, &[row.row_key.as_str()])?;
        let body = cell_set_json(row)?;

        let resp = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::io(format!("HBase REST request: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp
                .text()
                .await
                .map_err(|e| SinkError::io(format!("HBase REST read: {e}")))?;
            Err(SinkError::io(format!("HBase REST put: HTTP {status}: {text}")))
        }
    }
}

impl BackendWriter for HbaseRestWriter {
    type Record = RowRecord;

    fn write<'a>(
        &'a self,
        record: &'a RowRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(self.put(record))
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use sink_api::{Cell, CellDefine, ErrorKind, StreamMessage};
    use sink_engine::{Acknowledgment, DropReason, SinkStage, StageError};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{FieldListConverter, RowConverter, RowLayout};

    struct Seen {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl Seen {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
        }
    }

    /// HTTP/1.1 gateway answering one request per connection with
    /// `statuses` in order. Requests are reported on the channel.
    async fn gateway(statuses: Vec<u16>) -> (String, mpsc::UnboundedReceiver<Seen>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for status in statuses {
                let (stream, _) = listener.accept().await.unwrap();
                let mut stream = BufReader::new(stream);

                let mut request_line = String::new();
                stream.read_line(&mut request_line).await.unwrap();
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let mut headers = Vec::new();
                loop {
                    let mut line = String::new();
                    stream.read_line(&mut line).await.unwrap();
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
                    }
                }
                let len = headers
                    .iter()
                    .find(|(n, _)| n == "content-length")
                    .and_then(|(_, v)| v.parse().ok())
                    .unwrap_or(0);
                let mut body = vec![0; len];
                stream.read_exact(&mut body).await.unwrap();
                let _ = tx.send(Seen { method, path, headers, body });

                let response =
                    format!("HTTP/1.1 {status} Gateway\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                stream.get_mut().write_all(response.as_bytes()).await.unwrap();
                let _ = stream.get_mut().shutdown().await;
            }
        });
        (url, rx)
    }

    fn rest_stage(url: &str) -> SinkStage<RowConverter<FieldListConverter>, HbaseRestConnector> {
        let converter = RowConverter::new(
            FieldListConverter,
            RowLayout::new(vec![CellDefine::new("cf", "a"), CellDefine::new("cf", "b")]),
        );
        SinkStage::new("rows", converter, HbaseRestConnector::new(url, "events"))
    }

    #[tokio::test]
    async fn puts_rows_after_schema_check() {
        let (url, mut seen) = gateway(vec![200, 500, 200]).await;
        let mut stage = rest_stage(&url);
        stage.initialize(&BackendConfig::new()).await.unwrap();

        let ack = stage
            .on_message(&StreamMessage::with_fields("T1", "S1", ["v1", "v2"]))
            .await
            .unwrap();
        assert_eq!(ack, Acknowledgment::Dropped(DropReason::Write));
        let ack = stage
            .on_message(&StreamMessage::with_fields("T2", "S1", ["w1"]))
            .await
            .unwrap();
        assert_eq!(ack, Acknowledgment::Stored);

        let schema = seen.recv().await.unwrap();
        assert_eq!((schema.method.as_str(), schema.path.as_str()), ("GET", "/events/schema"));

        let failed = seen.recv().await.unwrap();
        assert_eq!((failed.method.as_str(), failed.path.as_str()), ("PUT", "/events/T1_S1"));

        let stored = seen.recv().await.unwrap();
        assert_eq!((stored.method.as_str(), stored.path.as_str()), ("PUT", "/events/T2_S1"));
        assert_eq!(stored.header("content-type"), Some("application/json"));
        let expected = RowRecord {
            row_key: "T2_S1".into(),
            cells: vec![Cell { family: "cf".into(), qualifier: "a".into(), value: "w1".into() }],
        };
        assert_eq!(stored.body, cell_set_json(&expected).unwrap());
    }

    #[tokio::test]
    async fn missing_table_fails_initialize() {
        let (url, _seen) = gateway(vec![404]).await;
        let mut stage = rest_stage(&url);
        let err = stage.initialize(&BackendConfig::new()).await.unwrap_err();
        assert!(matches!(err, StageError::Init { ref source, .. } if source.kind() == ErrorKind::Config));
        assert!(!stage.is_initialized());
    }

    #[tokio::test]
    async fn write_after_close_is_rejected() {
        let (url, mut seen) = gateway(vec![200]).await;
        let writer = HbaseRestConnector::new(url, "events")
            .open(&BackendConfig::new())
            .await
            .unwrap();
        writer.close().await.unwrap();

        let row = RowRecord { row_key: "T1_S1".into(), cells: Vec::new() };
        let err = writer.write(&row).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);

        // Only the schema check reached the gateway.
        assert_eq!(seen.recv().await.unwrap().path, "/events/schema");
        assert!(seen.recv().await.is_none());
    }

    #[test]
    fn cell_set_is_base64() {
        let row = RowRecord {
            row_key: "T1_S1".into(),
            cells: vec![Cell { family: "cf".into(), qualifier: "a".into(), value: "v1".into() }],
        };
        let json: serde_json::Value = serde_json::from_slice(&cell_set_json(&row).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Row": [{
                    "key": b64(b"T1_S1"),
                    "Cell": [{"column": b64(b"cf:a"), "$": b64(b"v1")}]
                }]
            })
        );
    }

    #[test]
    fn urls_escape_row_keys() {
        let endpoint = Url::parse("http://hbase:8080/").unwrap();
        let url = table_url(&endpoint, "events", &["2024/01/01_S 1"]).unwrap();
        assert_eq!(url.as_str(), "http://hbase:8080/events/2024%2F01%2F01_S%201");

        let url = table_url(&endpoint, "events", &["schema"]).unwrap();
        assert_eq!(url.as_str(), "http://hbase:8080/events/schema");
    }

    #[test]
    fn rejects_non_base_endpoint() {
        let endpoint = Url::parse("mailto:ops@example.com").unwrap();
        assert!(table_url(&endpoint, "events", &[]).is_err());
    }
}
