use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::ready,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::{anyhow, bail, Result};

use super::{SharedStore, StoreFuture};

#[derive(Default)]
struct MemoryState {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    sorted: HashMap<String, HashMap<String, i64>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl MemoryState {
    fn remove_key(&mut self, key: &str) {
        self.strings.remove(key);
        self.hashes.remove(key);
        self.sets.remove(key);
        self.sorted.remove(key);
        self.lists.remove(key);
    }
}

/// Single-process stand-in for the shared store, used in tests and when no
/// Redis URL is configured. Every call takes the lock once, so each method
/// is atomic just like its Redis counterpart.
#[derive(Default)]
pub struct MemorySharedStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemorySharedStore {
    /// Makes every subsequent call fail, simulating a store outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut MemoryState) -> T) -> Result<T> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("shared store unavailable");
        }
        let mut guard: MutexGuard<'_, MemoryState> =
            self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(apply(&mut guard))
    }
}

impl SharedStore for MemorySharedStore {
    fn hash_set<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(&'a str, String)],
    ) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.with_state(|state| {
            let hash = state.hashes.entry(key.to_string()).or_default();
            for (field, value) in fields {
                hash.insert((*field).to_string(), value.clone());
            }
        })))
    }

    fn hash_get<'a>(&'a self, key: &'a str, field: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(ready(self.with_state(|state| {
            state.hashes.get(key).and_then(|hash| hash.get(field)).cloned()
        })))
    }

    fn hash_get_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
        Box::pin(ready(
            self.with_state(|state| state.hashes.get(key).cloned().unwrap_or_default()),
        ))
    }

    fn hash_delete<'a>(&'a self, key: &'a str, fields: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.with_state(|state| {
            if let Some(hash) = state.hashes.get_mut(key) {
                for field in fields {
                    hash.remove(*field);
                }
                if hash.is_empty() {
                    state.hashes.remove(key);
                }
            }
        })))
    }

    fn hash_increment<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        delta: i64,
    ) -> StoreFuture<'a, i64> {
        let result = self.with_state(|state| -> Result<i64> {
            let hash = state.hashes.entry(key.to_string()).or_default();
            let current = match hash.get(field) {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| anyhow!("hash field {key}.{field} is not an integer"))?,
                None => 0,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        });
        Box::pin(ready(result.and_then(|inner| inner)))
    }

    fn hash_max<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        candidate: i64,
    ) -> StoreFuture<'a, i64> {
        let result = self.with_state(|state| -> Result<i64> {
            let hash = state.hashes.entry(key.to_string()).or_default();
            let current = match hash.get(field) {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| anyhow!("hash field {key}.{field} is not an integer"))?,
                None => 0,
            };
            if candidate > current {
                hash.insert(field.to_string(), candidate.to_string());
                return Ok(candidate);
            }
            Ok(current)
        });
        Box::pin(ready(result.and_then(|inner| inner)))
    }

    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(ready(self.with_state(|state| {
            state.sets.entry(key.to_string()).or_default().insert(member.to_string())
        })))
    }

    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(ready(self.with_state(|state| {
            let Some(set) = state.sets.get_mut(key) else {
                return false;
            };
            let removed = set.remove(member);
            if set.is_empty() {
                state.sets.remove(key);
            }
            removed
        })))
    }

    fn set_contains<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(ready(
            self.with_state(|state| state.sets.get(key).is_some_and(|set| set.contains(member))),
        ))
    }

    fn set_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(ready(self.with_state(|state| {
            state.sets.get(key).map(|set| set.iter().cloned().collect()).unwrap_or_default()
        })))
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(ready(self.with_state(|state| state.strings.get(key).cloned())))
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.with_state(|state| {
            state.strings.insert(key.to_string(), value.to_string());
        })))
    }

    fn delete_if_equals<'a>(&'a self, key: &'a str, expected: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(ready(self.with_state(|state| {
            if state.strings.get(key).is_some_and(|value| value == expected) {
                state.strings.remove(key);
                true
            } else {
                false
            }
        })))
    }

    fn sorted_add<'a>(&'a self, key: &'a str, member: &'a str, score: i64) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.with_state(|state| {
            state.sorted.entry(key.to_string()).or_default().insert(member.to_string(), score);
        })))
    }

    fn sorted_remove<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.with_state(|state| {
            if let Some(sorted) = state.sorted.get_mut(key) {
                sorted.remove(member);
                if sorted.is_empty() {
                    state.sorted.remove(key);
                }
            }
        })))
    }

    fn sorted_range_desc<'a>(
        &'a self,
        key: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, Vec<String>> {
        Box::pin(ready(self.with_state(|state| {
            let mut entries = sorted_entries(state, key);
            entries.reverse();
            entries.into_iter().take(limit).collect()
        })))
    }

    fn sorted_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(ready(self.with_state(|state| sorted_entries(state, key))))
    }

    fn list_push_capped<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        cap: usize,
    ) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.with_state(|state| {
            let list = state.lists.entry(key.to_string()).or_default();
            list.push_front(value.to_string());
            list.truncate(cap);
            if list.is_empty() {
                state.lists.remove(key);
            }
        })))
    }

    fn list_range<'a>(&'a self, key: &'a str, limit: usize) -> StoreFuture<'a, Vec<String>> {
        Box::pin(ready(self.with_state(|state| {
            state
                .lists
                .get(key)
                .map(|list| list.iter().take(limit).cloned().collect())
                .unwrap_or_default()
        })))
    }

    fn list_len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(ready(self.with_state(|state| {
            state.lists.get(key).map_or(0, |list| list.len() as i64)
        })))
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(ready(self.with_state(|state| {
            state.strings.contains_key(key)
                || state.hashes.contains_key(key)
                || state.sets.contains_key(key)
                || state.sorted.contains_key(key)
                || state.lists.contains_key(key)
        })))
    }

    fn delete_batch<'a>(
        &'a self,
        keys: &'a [String],
        sorted_removals: &'a [(&'a str, &'a str)],
    ) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.with_state(|state| {
            for key in keys {
                state.remove_key(key);
            }
            for (sorted_key, member) in sorted_removals {
                if let Some(sorted) = state.sorted.get_mut(*sorted_key) {
                    sorted.remove(*member);
                    if sorted.is_empty() {
                        state.sorted.remove(*sorted_key);
                    }
                }
            }
        })))
    }
}

/// Members ordered by (score, member) ascending, matching Redis ZRANGE.
fn sorted_entries(state: &MemoryState, key: &str) -> Vec<String> {
    let Some(sorted) = state.sorted.get(key) else {
        return Vec::new();
    };
    let mut entries: Vec<(&String, &i64)> = sorted.iter().collect();
    entries.sort_by(|(left_member, left_score), (right_member, right_score)| {
        left_score.cmp(right_score).then_with(|| left_member.cmp(right_member))
    });
    entries.into_iter().map(|(member, _)| member.clone()).collect()
}
