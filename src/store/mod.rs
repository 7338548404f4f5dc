//! Persistence layer — libSQL-backed storage for jobs, threads, items,
//! the search cache, and push subscriptions.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    CacheEntry, CacheMeta, Database, Item, Job, MessageRole, NewItem, PushSubscription,
    StoredMessage, Thread,
};
