use std::collections::BTreeMap;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use sink_api::{BackendConfig, CellDefine, FieldPath, ParamValue};
use sink_engine::WriteFailurePolicy;

use crate::error::ServerError;

/// Backend address that selects the in-process implementation.
pub const MEMORY_BACKEND: &str = "memory";
/// Wide-column driver speaking CQL to `contact_points`.
pub const CQL_DRIVER: &str = "cql";

#[derive(Parser)]
#[command(name = "sink-server", about = "Store stream messages into row, wide-column and cache backends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the configured stages
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub source: SourceConfig,
    /// Named client parameter sections, referenced by `client_config_key`.
    #[serde(default)]
    pub clients: BTreeMap<String, toml::Table>,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    /// `host:port` for newline-delimited JSON over TCP; stdin when absent.
    #[serde(default)]
    pub listen: Option<String>,
    /// Delivery queue size per stage.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            listen: None,
            buffer: default_buffer(),
        }
    }
}

fn default_buffer() -> usize {
    1024
}

#[derive(Debug, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub on_write_failure: WriteFailurePolicy,
    #[serde(default)]
    pub client_config_key: Option<String>,
    pub backend: BackendKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    RowStore(RowStoreConfig),
    WideColumn(WideColumnConfig),
    Cache(CacheConfig),
}

#[derive(Debug, Deserialize)]
pub struct RowStoreConfig {
    /// HBase REST gateway URL, or `"memory"`.
    #[serde(alias = "context_uri")]
    pub endpoint: String,
    #[serde(default)]
    pub table: String,
    #[serde(alias = "cell_define_list")]
    pub cells: Vec<CellDefine>,
}

#[derive(Debug, Deserialize)]
pub struct WideColumnConfig {
    /// `"cql"` or `"memory"`.
    #[serde(default = "default_driver")]
    pub driver: String,
    /// `host:port` nodes for the `cql` driver.
    #[serde(default)]
    pub contact_points: Vec<String>,
    pub keyspace: String,
    pub table: String,
    pub columns: Vec<ColumnConfig>,
}

fn default_driver() -> String {
    MEMORY_BACKEND.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    pub field: FieldPath,
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    /// Infinispan server URL, or `"memory"`.
    pub cache_server_url: String,
    pub cache_name: String,
    pub key: FieldPath,
    #[serde(default)]
    pub value: Option<FieldPath>,
    /// Capacity of the in-process cache.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    100_000
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Backend parameters for a stage: its client section, or empty.
    pub fn client_config(&self, stage: &StageConfig) -> Result<BackendConfig, ServerError> {
        match &stage.client_config_key {
            None => Ok(BackendConfig::new()),
            Some(key) => {
                let table = self
                    .clients
                    .get(key)
                    .ok_or_else(|| ServerError::ClientNotFound(key.clone()))?;
                backend_config(table)
            }
        }
    }
}

/// Flatten a TOML table into backend parameters; nested tables become
/// dotted keys (`[x.connection] timeout = 1` → `connection.timeout`).
pub fn backend_config(table: &toml::Table) -> Result<BackendConfig, ServerError> {
    let mut params = Vec::new();
    flatten("", table, &mut params)?;
    Ok(params.into_iter().collect())
}

fn flatten(
    prefix: &str,
    table: &toml::Table,
    out: &mut Vec<(String, ParamValue)>,
) -> Result<(), ServerError> {
    for (key, value) in table {
        let name = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        let param = match value {
            toml::Value::Table(nested) => {
                flatten(&name, nested, out)?;
                continue;
            }
            toml::Value::Boolean(b) => ParamValue::Bool(*b),
            toml::Value::Integer(i) => ParamValue::I64(*i),
            toml::Value::Float(f) => ParamValue::F64(*f),
            toml::Value::String(s) => ParamValue::Str(s.clone()),
            toml::Value::Datetime(dt) => ParamValue::Str(dt.to_string()),
            toml::Value::Array(_) => {
                return Err(ServerError::Config {
                    context: "clients",
                    detail: format!("'{name}': arrays are not supported"),
                });
            }
        };
        out.push((name, param));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sink_api::{ClientSettings, CONNECTION_TIMEOUT_KEY};

    use super::*;

    const SAMPLE: &str = r#"
        [source]
        listen = "127.0.0.1:7400"

        [clients.hbase]
        "connection.timeout" = 3000
        tls = { accept_invalid_certs = true }

        [clients.cassandra.connection]
        timeout = "1500"

        [[stages]]
        name = "rows"
        client_config_key = "hbase"
        [stages.backend]
        kind = "row_store"
        context_uri = "http://hbase:8080"
        table = "events"
        cell_define_list = [{ family = "cf", qualifier = "a" }, { family = "cf", qualifier = "b" }]

        [[stages]]
        name = "cql"
        on_write_failure = "escalate"
        client_config_key = "cassandra"
        [stages.backend]
        kind = "wide_column"
        driver = "cql"
        contact_points = ["cass-1:9042", "cass-2:9042"]
        keyspace = "ks"
        table = "events"
        columns = [{ name = "ts", field = "timestamp" }, { name = "v", field = "body.0" }]

        [[stages]]
        name = "latest"
        [stages.backend]
        kind = "cache"
        cache_server_url = "memory"
        cache_name = "quotes"
        key = "source"
    "#;

    #[test]
    fn parses_all_backend_kinds() {
        let config = ServerConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.source.listen.as_deref(), Some("127.0.0.1:7400"));
        assert_eq!(config.source.buffer, 1024);
        assert_eq!(config.stages.len(), 3);

        let rows = &config.stages[0];
        assert_eq!(rows.on_write_failure, WriteFailurePolicy::Isolate);
        match &rows.backend {
            BackendKind::RowStore(rs) => {
                assert_eq!(rs.endpoint, "http://hbase:8080");
                assert_eq!(rs.cells, vec![CellDefine::new("cf", "a"), CellDefine::new("cf", "b")]);
            }
            other => panic!("unexpected backend {other:?}"),
        }

        assert_eq!(config.stages[1].on_write_failure, WriteFailurePolicy::Escalate);
        match &config.stages[1].backend {
            BackendKind::WideColumn(wc) => {
                assert_eq!(wc.driver, CQL_DRIVER);
                assert_eq!(wc.contact_points, vec!["cass-1:9042", "cass-2:9042"]);
                assert_eq!(wc.columns[1].field, FieldPath::parse("body.0").unwrap());
            }
            other => panic!("unexpected backend {other:?}"),
        }

        match &config.stages[2].backend {
            BackendKind::Cache(c) => {
                assert_eq!(c.key, FieldPath::Source);
                assert_eq!(c.value, None);
                assert_eq!(c.max_entries, 100_000);
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn client_sections_flatten_to_dotted_keys() {
        let config = ServerConfig::parse(SAMPLE).unwrap();

        let hbase = config.client_config(&config.stages[0]).unwrap();
        assert_eq!(hbase.get_i64(CONNECTION_TIMEOUT_KEY), Some(3000));
        assert_eq!(hbase.get_bool("tls.accept_invalid_certs"), Some(true));

        let cassandra = config.client_config(&config.stages[1]).unwrap();
        let settings = ClientSettings::resolve(&cassandra).unwrap();
        assert_eq!(settings.connect_timeout(), Some(Duration::from_millis(1500)));

        assert!(config.client_config(&config.stages[2]).unwrap().is_empty());
    }

    #[test]
    fn unknown_client_section() {
        let mut config = ServerConfig::parse(SAMPLE).unwrap();
        config.stages[0].client_config_key = Some("nope".into());
        assert!(matches!(
            config.client_config(&config.stages[0]),
            Err(ServerError::ClientNotFound(key)) if key == "nope"
        ));
    }

    #[test]
    fn bad_field_path_rejected_at_load() {
        let err = ServerConfig::parse(
            r#"
            [[stages]]
            name = "c"
            [stages.backend]
            kind = "cache"
            cache_server_url = "memory"
            cache_name = "x"
            key = "header.id"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn arrays_in_client_sections_rejected() {
        let table: toml::Table = toml::from_str(r#"hosts = ["a", "b"]"#).unwrap();
        assert!(backend_config(&table).is_err());
    }
}
