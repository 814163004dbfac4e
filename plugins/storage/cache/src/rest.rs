use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::{RequestBuilder, Url};
use serde::Serialize;

use sink_api::{
    BackendConfig, BackendConnector, BackendWriter, ClientSettings, KeyValue, SinkError,
};

pub const USERNAME_KEY: &str = "auth.username";
pub const PASSWORD_KEY: &str = "auth.password";
pub const REQUEST_TIMEOUT_KEY: &str = "request.timeout";

/// Distributed cache behind the Infinispan REST v2 API.
///
/// Keys are sent as plain text (`Display`), values as JSON.
pub struct RestCacheConnector<K, V> {
    cache_server_url: String,
    cache_name: String,
    _record: PhantomData<fn(&K, &V)>,
}

impl<K, V> RestCacheConnector<K, V> {
    pub fn new(cache_server_url: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self {
            cache_server_url: cache_server_url.into(),
            cache_name: cache_name.into(),
            _record: PhantomData,
        }
    }
}

fn cache_url(server: &Url, cache: &str, key: Option<&str>) -> Result<Url, SinkError> {
    let mut url = server.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            SinkError::config(format!("cache server url '{server}' cannot be a base URL"))
        })?;
        segments.pop_if_empty().extend(["rest", "v2", "caches", cache]);
        if let Some(key) = key {
            segments.push(key);
        }
    }
    Ok(url)
}

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: Option<String>,
}

impl Credentials {
    fn from_config(config: &BackendConfig) -> Option<Self> {
        config.get_str(USERNAME_KEY).map(|username| Self {
            username: username.to_string(),
            password: config.get_str(PASSWORD_KEY).map(str::to_string),
        })
    }

    fn apply(creds: &Option<Self>, request: RequestBuilder) -> RequestBuilder {
        match creds {
            Some(c) => request.basic_auth(&c.username, c.password.as_deref()),
            None => request,
        }
    }
}

impl<K, V> BackendConnector for RestCacheConnector<K, V>
where
    K: Display + Send + Sync,
    V: Serialize + Send + Sync,
{
    type Writer = RestCacheWriter<K, V>;

    fn open<'a>(
        &'a self,
        config: &'a BackendConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Writer, SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let server = Url::parse(&self.cache_server_url).map_err(|e| {
                SinkError::config(format!("cache server url '{}': {e}", self.cache_server_url))
            })?;
            let settings = ClientSettings::resolve(config)?;

            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = settings.connect_timeout() {
                builder = builder.connect_timeout(timeout);
            }
            if let Some(timeout) = settings.config.get_millis(REQUEST_TIMEOUT_KEY)? {
                builder = builder.timeout(timeout);
            }
            let http = builder
                .build()
                .map_err(|e| SinkError::config(format!("HTTP client: {e}")))?;
            let credentials = Credentials::from_config(&settings.config);

            let url = cache_url(&server, &self.cache_name, None)?;
            let resp = Credentials::apply(&credentials, http.head(url))
                .send()
                .await
                .map_err(|e| SinkError::io(format!("cache server request: {e}")))?;
            if !resp.status().is_success() {
                return Err(SinkError::config(format!(
                    "cache '{}' not available at {}: HTTP {}",
                    self.cache_name,
                    self.cache_server_url,
                    resp.status()
                )));
            }

            tracing::debug!(url = %self.cache_server_url, cache = %self.cache_name, "cache connected");
            Ok(RestCacheWriter {
                http,
                server,
                cache_name: self.cache_name.clone(),
                credentials,
                closed: AtomicBool::new(false),
                _record: PhantomData,
            })
        })
    }
}

pub struct RestCacheWriter<K, V> {
    http: reqwest::Client,
    server: Url,
    cache_name: String,
    credentials: Option<Credentials>,
    closed: AtomicBool,
    _record: PhantomData<fn(&K, &V)>,
}

impl<K, V> RestCacheWriter<K, V>
where
    K: Display + Send + Sync,
    V: Serialize + Send + Sync,
{
    async fn put(&self, record: &KeyValue<K, V>) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::new("writer closed"));
        }
        let key = record.key.to_string();
        let url = cache_url(&self.server, &self.cache_name, Some(&key))?;
        let body = serde_json::to_vec(&record.value)?;

        let request = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("Key-Content-Type", "text/plain")
            .body(body);
        let resp = Credentials::apply(&self.credentials, request)
            .send()
            .await
            .map_err(|e| SinkError::io(format!("cache server request: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::io(format!("cache put '{key}': HTTP {status}")))
        }
    }
}

impl<K, V> BackendWriter for RestCacheWriter<K, V>
where
    K: Display + Send + Sync,
    V: Serialize + Send + Sync,
{
    type Record = KeyValue<K, V>;

    fn write<'a>(
        &'a self,
        record: &'a KeyValue<K, V>,
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
