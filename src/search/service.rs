//! Cache-first search orchestration.
//!
//! One instance fronts every registered provider: normalize the page bounds,
//! consult the cache, fall through to the provider on a miss, persist the
//! normalized items and memoize the page before answering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Error, SearchError};
use crate::search::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, SearchFilters, SearchProvider, cache_key};
use crate::store::{CacheEntry, CacheMeta, Database, Item};

/// A resolved page of search results, ready for both the model summary and
/// the UI.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub items: Vec<Item>,
    pub total: Option<u64>,
    pub offset: u64,
    pub limit: u64,
    pub next_offset: Option<u64>,
    pub from_cache: bool,
}

pub struct SearchService {
    db: Arc<dyn Database>,
    providers: HashMap<String, Arc<dyn SearchProvider>>,
    ttl: Duration,
    timeout: Duration,
}

impl SearchService {
    pub fn new(db: Arc<dyn Database>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            db,
            providers: HashMap::new(),
            ttl,
            timeout,
        }
    }

    /// Registers a provider under its own lowercased name.
    pub fn register(&mut self, provider: Arc<dyn SearchProvider>) {
        self.providers
            .insert(provider.name().to_lowercase(), provider);
    }

    /// Resolves one page of results, from cache when possible.
    ///
    /// Items always come back as stored rows so callers see the same ids the
    /// cache references. Unbounded page requests are clamped before keying,
    /// so "no limit" and "limit 20" share a cache row.
    pub async fn search(
        &self,
        source: &str,
        query: &str,
        filters: &SearchFilters,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<SearchResults, Error> {
        let source = source.trim().to_lowercase();
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0);

        let key = cache_key(&source, query, filters, offset, limit);
        let now = Utc::now();

        if let Some(entry) = self.db.cache_lookup(&key, now).await? {
            // An empty cached page is worthless; treat it as a miss so the
            // provider gets another chance.
            if !entry.item_ids.is_empty() {
                let items = self.db.get_items_by_ids(&entry.item_ids).await?;
                debug!(%source, query, items = items.len(), "Search cache hit");
                return Ok(SearchResults {
                    items,
                    total: entry.meta.and_then(|m| m.total),
                    offset,
                    limit,
                    next_offset: entry.meta.and_then(|m| m.next_offset),
                    from_cache: true,
                });
            }
        }

        let provider = self
            .providers
            .get(&source)
            .ok_or_else(|| SearchError::UnknownProvider(source.clone()))?;

        let page = match tokio::time::timeout(
            self.timeout,
            provider.search(query, filters, offset, limit),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(SearchError::Timeout {
                    provider: source,
                    timeout: self.timeout,
                }
                .into());
            }
        };

        let item_ids = self.db.upsert_items(&page.items).await?;
        // An empty page is returned but never memoized; a transient zero-hit
        // answer must not occupy the cache for a full TTL.
        if !item_ids.is_empty() {
            let entry = CacheEntry {
                key,
                source: source.clone(),
                query: query.to_string(),
                filters_json: filters.canonical_json(),
                item_ids: item_ids.clone(),
                meta: Some(CacheMeta {
                    total: page.total,
                    next_offset: page.next_offset,
                }),
                created_at: now,
                expires_at: now + self.ttl,
            };
            self.db.cache_store(&entry).await?;
        }

        let items = self.db.get_items_by_ids(&item_ids).await?;
        info!(%source, query, items = items.len(), "Search fetched from provider");
        Ok(SearchResults {
            items,
            total: page.total,
            offset,
            limit,
            next_offset: page.next_offset,
            from_cache: false,
        })
    }
}
