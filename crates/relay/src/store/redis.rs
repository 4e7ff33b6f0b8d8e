use std::collections::HashMap;

use ::redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use anyhow::{Context, Result};

use super::{SharedStore, StoreFuture};

const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const HASH_MAX_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '0')
local candidate = tonumber(ARGV[2])
if candidate > current then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    return candidate
end
return current
"#;

/// Redis-backed shared store. `ConnectionManager` multiplexes one connection
/// and reconnects on failure, so it is cloned per command.
#[derive(Clone)]
pub struct RedisSharedStore {
    conn: ConnectionManager,
    delete_if_equals: Script,
    hash_max: Script,
}

impl RedisSharedStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid relay Redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to relay Redis")?;

        Ok(Self {
            conn,
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
            hash_max: Script::new(HASH_MAX_SCRIPT),
        })
    }

    pub async fn check_health(&self) -> Result<()> {
        let _: String = ::redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await
            .context("relay Redis health check failed")?;
        Ok(())
    }
}

impl SharedStore for RedisSharedStore {
    fn hash_set<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(&'a str, String)],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if fields.is_empty() {
                return Ok(());
            }
            let _: () = self
                .conn
                .clone()
                .hset_multiple(key, fields)
                .await
                .with_context(|| format!("redis HSET {key} failed"))?;
            Ok(())
        })
    }

    fn hash_get<'a>(&'a self, key: &'a str, field: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let value: Option<String> = self
                .conn
                .clone()
                .hget(key, field)
                .await
                .with_context(|| format!("redis HGET {key} {field} failed"))?;
            Ok(value)
        })
    }

    fn hash_get_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            let value: HashMap<String, String> = self
                .conn
                .clone()
                .hgetall(key)
                .await
                .with_context(|| format!("redis HGETALL {key} failed"))?;
            Ok(value)
        })
    }

    fn hash_delete<'a>(&'a self, key: &'a str, fields: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if fields.is_empty() {
                return Ok(());
            }
            let _: () = self
                .conn
                .clone()
                .hdel(key, fields)
                .await
                .with_context(|| format!("redis HDEL {key} failed"))?;
            Ok(())
        })
    }

    fn hash_increment<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        delta: i64,
    ) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let value: i64 = self
                .conn
                .clone()
                .hincr(key, field, delta)
                .await
                .with_context(|| format!("redis HINCRBY {key} {field} failed"))?;
            Ok(value)
        })
    }

    fn hash_max<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        candidate: i64,
    ) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let value: i64 = self
                .hash_max
                .key(key)
                .arg(field)
                .arg(candidate)
                .invoke_async(&mut self.conn.clone())
                .await
                .with_context(|| format!("redis max-update {key} {field} failed"))?;
            Ok(value)
        })
    }

    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let added: i64 = self
                .conn
                .clone()
                .sadd(key, member)
                .await
                .with_context(|| format!("redis SADD {key} failed"))?;
            Ok(added > 0)
        })
    }

    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let removed: i64 = self
                .conn
                .clone()
                .srem(key, member)
                .await
                .with_context(|| format!("redis SREM {key} failed"))?;
            Ok(removed > 0)
        })
    }

    fn set_contains<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let present: bool = self
                .conn
                .clone()
                .sismember(key, member)
                .await
                .with_context(|| format!("redis SISMEMBER {key} failed"))?;
            Ok(present)
        })
    }

    fn set_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let members: Vec<String> = self
                .conn
                .clone()
                .smembers(key)
                .await
                .with_context(|| format!("redis SMEMBERS {key} failed"))?;
            Ok(members)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let value: Option<String> = self
                .conn
                .clone()
                .get(key)
                .await
                .with_context(|| format!("redis GET {key} failed"))?;
            Ok(value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _: () = self
                .conn
                .clone()
                .set(key, value)
                .await
                .with_context(|| format!("redis SET {key} failed"))?;
            Ok(())
        })
    }

    fn delete_if_equals<'a>(&'a self, key: &'a str, expected: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let deleted: i64 = self
                .delete_if_equals
                .key(key)
                .arg(expected)
                .invoke_async(&mut self.conn.clone())
                .await
                .with_context(|| format!("redis compare-and-delete {key} failed"))?;
            Ok(deleted > 0)
        })
    }

    fn sorted_add<'a>(&'a self, key: &'a str, member: &'a str, score: i64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _: () = self
                .conn
                .clone()
                .zadd(key, member, score)
                .await
                .with_context(|| format!("redis ZADD {key} failed"))?;
            Ok(())
        })
    }

    fn sorted_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _: () = self
                .conn
                .clone()
                .zrem(key, member)
                .await
                .with_context(|| format!("redis ZREM {key} failed"))?;
            Ok(())
        })
    }

    fn sorted_range_desc<'a>(
        &'a self,
        key: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
            let members: Vec<String> = self
                .conn
                .clone()
                .zrevrange(key, 0, stop)
                .await
                .with_context(|| format!("redis ZREVRANGE {key} failed"))?;
            Ok(members)
        })
    }

    fn sorted_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let members: Vec<String> = self
                .conn
                .clone()
                .zrange(key, 0, -1)
                .await
                .with_context(|| format!("redis ZRANGE {key} failed"))?;
            Ok(members)
        })
    }

    fn list_push_capped<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        cap: usize,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let stop = isize::try_from(cap.saturating_sub(1)).unwrap_or(isize::MAX);
            ::redis::pipe()
                .atomic()
                .lpush(key, value)
                .ignore()
                .ltrim(key, 0, stop)
                .ignore()
                .query_async::<_, ()>(&mut self.conn.clone())
                .await
                .with_context(|| format!("redis LPUSH/LTRIM {key} failed"))?;
            Ok(())
        })
    }

    fn list_range<'a>(&'a self, key: &'a str, limit: usize) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
            let values: Vec<String> = self
                .conn
                .clone()
                .lrange(key, 0, stop)
                .await
                .with_context(|| format!("redis LRANGE {key} failed"))?;
            Ok(values)
        })
    }

    fn list_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let len: i64 = self
                .conn
                .clone()
                .llen(key)
                .await
                .with_context(|| format!("redis LLEN {key} failed"))?;
            Ok(len)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let exists: bool = self
                .conn
                .clone()
                .exists(key)
                .await
                .with_context(|| format!("redis EXISTS {key} failed"))?;
            Ok(exists)
        })
    }

    fn delete_batch<'a>(
        &'a self,
        keys: &'a [String],
        sorted_removals: &'a [(&'a str, &'a str)],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut pipe = ::redis::pipe();
            pipe.atomic();
            if !keys.is_empty() {
                pipe.del(keys).ignore();
            }
            for (sorted_key, member) in sorted_removals {
                pipe.zrem(*sorted_key, *member).ignore();
            }
            pipe.query_async::<_, ()>(&mut self.conn.clone())
                .await
                .context("redis batch delete failed")?;
            Ok(())
        })
    }
}
