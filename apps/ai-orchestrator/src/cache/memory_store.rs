//! In-process cache store using DashMap. Expiry is checked on read, and a
//! background sweep drops entries nobody reads again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::debug;

use crate::cache::{CacheError, CacheStore};

struct Entry {
    value: String,
    expires_at: Instant,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the periodic sweep of expired entries. The task holds its own
    /// handle on the map and runs until the runtime shuts down.
    pub fn start_ttl_cleanup(&self) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let purged = purge_expired(&entries);
                if purged > 0 {
                    debug!("Swept {purged} expired cache entries");
                }
            }
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .map(|e| (e.value.clone(), e.expires_at));

        match found {
            Some((value, expires_at)) if expires_at > now => Ok(Some(value)),
            Some(_) => {
                // A concurrent set may have replaced the entry; only drop it if still expired.
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let now = Instant::now();
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in matching {
            if let Some((_, entry)) = self.entries.remove(&key) {
                if entry.expires_at > now {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn purge_expired(entries: &DashMap<String, Entry>) -> usize {
    let now = Instant::now();
    let mut purged = 0;
    entries.retain(|_, e| {
        let live = e.expires_at > now;
        if !live {
            purged += 1;
        }
        live
    });
    purged
}

/// Redis-style glob: `*` matches any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}
