// Shared room state capability.
//
// Every instance talks to the same store. Each method maps onto a single
// atomic command (or one atomic batch) so concurrent joins and leaves on
// different instances never lose updates.

use std::{collections::HashMap, future::Future, pin::Pin};

use anyhow::Result;

pub mod memory;
pub mod redis;

pub use self::memory::MemorySharedStore;
pub use self::redis::RedisSharedStore;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait SharedStore: Send + Sync {
    /// HSET with several fields at once.
    fn hash_set<'a>(&'a self, key: &'a str, fields: &'a [(&'a str, String)])
        -> StoreFuture<'a, ()>;
    fn hash_get<'a>(&'a self, key: &'a str, field: &'a str) -> StoreFuture<'a, Option<String>>;
    /// Empty map when the key does not exist.
    fn hash_get_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>>;
    fn hash_delete<'a>(&'a self, key: &'a str, fields: &'a [&'a str]) -> StoreFuture<'a, ()>;
    /// HINCRBY; returns the new value.
    fn hash_increment<'a>(&'a self, key: &'a str, field: &'a str, delta: i64)
        -> StoreFuture<'a, i64>;
    /// Raises an integer field to `candidate` if it is lower (or absent).
    /// Returns the value held afterwards.
    fn hash_max<'a>(&'a self, key: &'a str, field: &'a str, candidate: i64)
        -> StoreFuture<'a, i64>;

    /// Returns true when the member was not present before.
    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool>;
    /// Returns true when the member was present.
    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool>;
    fn set_contains<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool>;
    fn set_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>>;

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;
    /// Deletes `key` only while it still holds `expected`. Returns whether it did.
    fn delete_if_equals<'a>(&'a self, key: &'a str, expected: &'a str) -> StoreFuture<'a, bool>;

    fn sorted_add<'a>(&'a self, key: &'a str, member: &'a str, score: i64) -> StoreFuture<'a, ()>;
    fn sorted_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, ()>;
    /// Highest scores first.
    fn sorted_range_desc<'a>(&'a self, key: &'a str, limit: usize)
        -> StoreFuture<'a, Vec<String>>;
    /// Every member, lowest score first.
    fn sorted_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>>;

    /// LPUSH followed by LTRIM to `cap` entries, applied atomically.
    fn list_push_capped<'a>(&'a self, key: &'a str, value: &'a str, cap: usize)
        -> StoreFuture<'a, ()>;
    /// Newest first.
    fn list_range<'a>(&'a self, key: &'a str, limit: usize) -> StoreFuture<'a, Vec<String>>;
    fn list_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;
    /// Deletes `keys` and removes each `(sorted_key, member)` pair in one
    /// atomic batch.
    fn delete_batch<'a>(
        &'a self,
        keys: &'a [String],
        sorted_removals: &'a [(&'a str, &'a str)],
    ) -> StoreFuture<'a, ()>;
}
