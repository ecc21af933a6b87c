//! API gateway client
//!
//! Wraps every outbound call with the bearer credential, cache-defeating
//! headers and (for reads) a strictly increasing `_t` query parameter, then
//! unwraps the `{code, msg, data}` envelope. The reserved expiry code logs
//! the session out as a cross-cutting policy.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};
use std::time::Duration;

use common::{config::ClientConfig, envelope::Envelope};
use reqwest::{
    Client, Method,
    header::{CACHE_CONTROL, EXPIRES, HeaderMap, HeaderValue, PRAGMA},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    error::{WorkflowError, WorkflowResult},
    session::{Clock, SessionStore, SystemClock},
};

/// Query parameter used to defeat intermediary caches on reads
pub const CACHE_BUSTER_PARAM: &str = "_t";

/// HTTP client for one frontend variant's API
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Option<SessionStore>,
    clock: Arc<dyn Clock>,
    last_cache_buster: Arc<AtomicI64>,
}

impl ApiClient {
    /// Create a client rooted at `base_url`
    ///
    /// When a session store is given, its token is attached to every call
    /// and an expiry response clears it.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: Option<SessionStore>,
    ) -> WorkflowResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let clock = match &session {
            Some(session) => session.clock(),
            None => Arc::new(SystemClock) as Arc<dyn Clock>,
        };

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            clock,
            last_cache_buster: Arc::new(AtomicI64::new(0)),
        })
    }

    /// Create a client for the configured variant
    pub fn from_config(
        config: &ClientConfig,
        session: Option<SessionStore>,
    ) -> WorkflowResult<Self> {
        Self::new(config.base_url(), config.timeout(), session)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> Option<&SessionStore> {
        self.session.as_ref()
    }

    /// Current time in milliseconds, bumped past the previous value if needed
    fn next_cache_buster(&self) -> i64 {
        let now = self.clock.now_epoch_millis();
        let mut previous = self.last_cache_buster.load(Ordering::SeqCst);
        loop {
            let next = now.max(previous + 1);
            match self.last_cache_buster.compare_exchange(
                previous,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }

    /// GET `path` and decode the envelope payload
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> WorkflowResult<T> {
        let data = self.send(Method::GET, path, query, None).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// GET a list; a missing payload is an empty list
    pub async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> WorkflowResult<Vec<T>> {
        let data = self.send(Method::GET, path, query, None).await?;
        decode_list(data)
    }

    /// POST a JSON body and decode the envelope payload
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> WorkflowResult<T> {
        let body = serde_json::to_value(body)?;
        let data = self.send(Method::POST, path, &[], Some(body)).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// POST a JSON body and decode a list payload
    pub async fn post_list<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> WorkflowResult<Vec<T>> {
        let body = serde_json::to_value(body)?;
        let data = self.send(Method::POST, path, &[], Some(body)).await?;
        decode_list(data)
    }

    /// PUT a JSON body, ignoring any payload
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> WorkflowResult<()> {
        let body = serde_json::to_value(body)?;
        self.send(Method::PUT, path, &[], Some(body)).await?;
        Ok(())
    }

    /// DELETE, ignoring any payload
    pub async fn delete(&self, path: &str) -> WorkflowResult<()> {
        self.send(Method::DELETE, path, &[], None).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> WorkflowResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);

        if let Some(token) = self.session.as_ref().and_then(|s| s.current_token()) {
            request = request.bearer_auth(token);
        }

        if !query.is_empty() {
            request = request.query(query);
        }
        if method == Method::GET {
            request = request.query(&[(CACHE_BUSTER_PARAM, self.next_cache_buster())]);
        }

        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!("{} {}", method, url);
        let response = request.send().await.map_err(|e| {
            error!("Request {} {} failed: {}", method, url, e);
            WorkflowError::from(e)
        })?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Undecodable response from {} {} ({}): {}", method, url, status, e);
                return Err(WorkflowError::Transport(format!(
                    "HTTP {} with an unexpected body",
                    status
                )));
            }
        };

        self.unwrap_envelope(envelope)
    }

    fn unwrap_envelope(&self, envelope: Envelope) -> WorkflowResult<Value> {
        if envelope.is_auth_expired() {
            warn!("Backend reported an expired session, logging out");
            if let Some(session) = &self.session {
                if let Err(e) = session.logout() {
                    warn!("Failed to clear session after expiry: {}", e);
                }
            }
        }

        let auth_expired = envelope.is_auth_expired();
        envelope.into_data().map_err(|failure| {
            if auth_expired {
                WorkflowError::Auth(failure.message)
            } else {
                WorkflowError::Api {
                    code: failure.code,
                    message: failure.message,
                }
            }
        })
    }
}

fn decode_list<T: DeserializeOwned>(data: Value) -> WorkflowResult<Vec<T>> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(data)?)
}
