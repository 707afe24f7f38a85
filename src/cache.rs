//! Response cache keyed on canonicalized request content
//!
//! Two interchangeable implementations behind one contract: a Redis-backed
//! store for shared deployments and a bounded in-process LRU for tests and
//! single-instance use. The cache must never fail a user call, so every
//! backend error degrades to a miss and is logged.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::contracts::{CompletionRequest, CompletionResponse};
use crate::error::{GatewayError, GatewayResult};

/// Key prefix shared by every cache backend
pub const CACHE_KEY_PREFIX: &str = "llm:cache:";

/// SHA-256 over the canonical JSON of the request fields that determine the
/// response. serde_json orders map keys, so the serialization is stable.
pub fn cache_key(request: &CompletionRequest) -> String {
    let key_data = serde_json::json!({
        "model": request.model,
        "messages": request.messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    });
    let digest = Sha256::digest(key_data.to_string().as_bytes());
    hex::encode(digest)
}

/// Store for completed responses
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Cached response for this request, or `None` on miss or backend failure
    async fn get(&self, request: &CompletionRequest) -> Option<CompletionResponse>;

    /// Store a response; `ttl` overrides the backend default where supported.
    /// Backend failures are swallowed.
    async fn set(
        &self,
        request: &CompletionRequest,
        response: &CompletionResponse,
        ttl: Option<u64>,
    );

    /// Remove a single entry; returns whether one existed
    async fn delete(&self, request: &CompletionRequest) -> bool;

    /// Remove every gateway cache entry
    async fn clear(&self);
}

/// Redis-backed response cache with TTL
pub struct RedisCache {
    conn: ConnectionManager,
    default_ttl: u64,
}

impl RedisCache {
    pub async fn connect(url: &str, default_ttl: u64) -> GatewayResult<Self> {
        let client = redis::Client::open(url).map_err(|e| GatewayError::Other {
            message: format!("invalid redis url: {}", e),
        })?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| GatewayError::Other {
                message: format!("redis connection failed: {}", e),
            })?;
        Ok(Self::with_connection(conn, default_ttl))
    }

    pub fn with_connection(conn: ConnectionManager, default_ttl: u64) -> Self {
        Self { conn, default_ttl }
    }

    fn key_for(request: &CompletionRequest) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, cache_key(request))
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, request: &CompletionRequest) -> Option<CompletionResponse> {
        let key = Self::key_for(request);
        let mut conn = self.conn.clone();

        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(response) => {
                    debug!(key = %&key[..50.min(key.len())], "cache hit");
                    Some(response)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "cache payload undeserializable");
                    None
                }
            },
            Ok(None) => {
                debug!(key = %&key[..50.min(key.len())], "cache miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "redis get failed, treating as miss");
                None
            }
        }
    }

    async fn set(
        &self,
        request: &CompletionRequest,
        response: &CompletionResponse,
        ttl: Option<u64>,
    ) {
        let key = Self::key_for(request);
        let ttl = ttl.unwrap_or(self.default_ttl);

        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "response not serializable, skipping cache write");
                return;
            }
        };

        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(&key, payload, ttl).await {
            warn!(error = %e, "redis set failed");
        } else {
            debug!(key = %&key[..50.min(key.len())], ttl, "cache set");
        }
    }

    async fn delete(&self, request: &CompletionRequest) -> bool {
        let key = Self::key_for(request);
        let mut conn = self.conn.clone();

        match conn.del::<_, i64>(&key).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                warn!(error = %e, "redis delete failed");
                false
            }
        }
    }

    async fn clear(&self) {
        let pattern = format!("{}*", CACHE_KEY_PREFIX);
        let mut scan_conn = self.conn.clone();
        let mut del_conn = self.conn.clone();

        // SCAN is cursor-paged so large keyspaces never block the server
        let keys: Vec<String> = match scan_conn.scan_match::<_, String>(&pattern).await {
            Ok(mut iter) => {
                let mut keys = Vec::new();
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                keys
            }
            Err(e) => {
                warn!(error = %e, "redis scan failed");
                return;
            }
        };

        for batch in keys.chunks(100) {
            if let Err(e) = del_conn.del::<_, ()>(batch.to_vec()).await {
                warn!(error = %e, "redis clear failed");
                return;
            }
        }
        debug!(removed = keys.len(), "cache cleared");
    }
}

struct LruState {
    entries: HashMap<String, CompletionResponse>,
    order: VecDeque<String>,
}

impl LruState {
    fn touch(&mut self, key: &str) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            self.order.remove(position);
        }
        self.order.push_back(key.to_string());
    }
}

/// Bounded in-process cache with least-recently-used eviction.
/// TTL hints are ignored; callers that need expiry use the Redis backend.
pub struct MemoryCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, request: &CompletionRequest) -> Option<CompletionResponse> {
        let key = cache_key(request);
        let mut state = self.state.lock().expect("cache lock poisoned");
        if let Some(response) = state.entries.get(&key).cloned() {
            state.touch(&key);
            return Some(response);
        }
        None
    }

    async fn set(
        &self,
        request: &CompletionRequest,
        response: &CompletionResponse,
        _ttl: Option<u64>,
    ) {
        let key = cache_key(request);
        let mut state = self.state.lock().expect("cache lock poisoned");

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.entries.remove(&evicted);
            }
        }
        state.entries.insert(key.clone(), response.clone());
        state.touch(&key);
    }

    async fn delete(&self, request: &CompletionRequest) -> bool {
        let key = cache_key(request);
        let mut state = self.state.lock().expect("cache lock poisoned");
        if let Some(position) = state.order.iter().position(|k| k == &key) {
            state.order.remove(position);
        }
        state.entries.remove(&key).is_some()
    }

    async fn clear(&self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.clear();
        state.order.clear();
    }
}
