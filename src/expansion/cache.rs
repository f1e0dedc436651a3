//! Expansion Caches
//!
//! Three process-wide LRU caches back the hot paths of the expansion
//! engine: argument splitting, executable resolution, and arithmetic
//! evaluation. Entries never expire by time; they are evicted by LRU
//! order or dropped by [`clear_caches`]. The executable cache is keyed
//! by bare command name and invalidated whenever the observed `PATH`
//! string changes.

use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Mutex;

use indexmap::IndexMap;
use lazy_static::lazy_static;

use crate::parser::lexer::Token;

pub const DEFAULT_ARG_SPLIT_CAP: usize = 200;
pub const DEFAULT_EXECUTABLE_CAP: usize = 500;
pub const DEFAULT_ARITHMETIC_CAP: usize = 500;

/// A bounded map with least-recently-used eviction.
///
/// Reads promote the entry to most-recent; inserts beyond the cap evict
/// the oldest entry.
#[derive(Debug)]
pub struct LruCache<K: Hash + Eq, V> {
    map: IndexMap<K, V>,
    cap: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(cap: usize) -> Self {
        Self { map: IndexMap::new(), cap: cap.max(1) }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if self.map.contains_key(key) {
            // Promote to most-recent.
            let (k, v) = self.map.shift_remove_entry(key).unwrap();
            let value = v.clone();
            self.map.insert(k, v);
            Some(value)
        } else {
            None
        }
    }

    pub fn put(&mut self, key: K, value: V) {
        self.map.shift_remove(&key);
        if self.map.len() >= self.cap {
            self.map.shift_remove_index(0);
        }
        self.map.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap.max(1);
        while self.map.len() > self.cap {
            self.map.shift_remove_index(0);
        }
    }
}

/// Executable cache with the PATH snapshot it was built against.
struct ExecutableCache {
    path_snapshot: String,
    entries: LruCache<String, Option<PathBuf>>,
}

lazy_static! {
    static ref ARG_SPLIT_CACHE: Mutex<LruCache<String, Vec<Token>>> =
        Mutex::new(LruCache::new(DEFAULT_ARG_SPLIT_CAP));
    static ref EXECUTABLE_CACHE: Mutex<ExecutableCache> = Mutex::new(ExecutableCache {
        path_snapshot: String::new(),
        entries: LruCache::new(DEFAULT_EXECUTABLE_CAP),
    });
    static ref ARITHMETIC_CACHE: Mutex<LruCache<String, i64>> =
        Mutex::new(LruCache::new(DEFAULT_ARITHMETIC_CAP));
}

/// Tokenize through the argument-split cache.
pub fn cached_tokenize(input: &str) -> Vec<Token> {
    let mut cache = ARG_SPLIT_CACHE.lock().unwrap();
    if let Some(tokens) = cache.get(&input.to_string()) {
        return tokens;
    }
    let tokens = crate::parser::lexer::tokenize(input);
    cache.put(input.to_string(), tokens.clone());
    tokens
}

/// Look up a cached arithmetic result by normalized token stream.
pub fn arithmetic_cache_get(key: &str) -> Option<i64> {
    ARITHMETIC_CACHE.lock().unwrap().get(&key.to_string())
}

pub fn arithmetic_cache_put(key: String, value: i64) {
    ARITHMETIC_CACHE.lock().unwrap().put(key, value);
}

/// Resolve a bare command name against PATH, caching the answer.
///
/// A change in the `path` string drops the whole cache before lookup.
/// Names containing a path separator bypass the cache and resolve
/// relative to `cwd`.
pub fn resolve_executable(name: &str, path: &str, cwd: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let candidate = if name.starts_with('/') {
            PathBuf::from(name)
        } else {
            PathBuf::from(cwd).join(name)
        };
        return is_executable(&candidate).then_some(candidate);
    }

    let mut cache = EXECUTABLE_CACHE.lock().unwrap();
    if cache.path_snapshot != path {
        log::debug!("PATH changed, invalidating executable cache");
        cache.entries.clear();
        cache.path_snapshot = path.to_string();
    }
    if let Some(hit) = cache.entries.get(&name.to_string()) {
        return hit;
    }
    let resolved = search_path(name, path);
    cache.entries.put(name.to_string(), resolved.clone());
    resolved
}

fn search_path(name: &str, path: &str) -> Option<PathBuf> {
    for dir in std::env::split_paths(path) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let pathext = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.BAT;.CMD".into());
            for ext in pathext.split(';').filter(|e| !e.is_empty()) {
                let candidate = dir.join(format!("{}{}", name, ext.to_lowercase()));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

/// Drop every cached entry in all three caches.
pub fn clear_caches() {
    ARG_SPLIT_CACHE.lock().unwrap().clear();
    let mut exec = EXECUTABLE_CACHE.lock().unwrap();
    exec.entries.clear();
    exec.path_snapshot.clear();
    ARITHMETIC_CACHE.lock().unwrap().clear();
}

/// Apply configured cache capacities.
pub fn set_cache_caps(arg_split: usize, executable: usize, arithmetic: usize) {
    ARG_SPLIT_CACHE.lock().unwrap().set_cap(arg_split);
    EXECUTABLE_CACHE.lock().unwrap().entries.set_cap(executable);
    ARITHMETIC_CACHE.lock().unwrap().set_cap(arithmetic);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction_order() {
        let mut cache: LruCache<i32, i32> = LruCache::new(2);
        cache.put(1, 10);
        cache.put(2, 20);
        // Touch 1 so 2 becomes the eviction candidate.
        assert_eq!(cache.get(&1), Some(10));
        cache.put(3, 30);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_lru_overwrite_same_key() {
        let mut cache: LruCache<&str, i32> = LruCache::new(2);
        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[test]
    fn test_set_cap_shrinks() {
        let mut cache: LruCache<i32, i32> = LruCache::new(4);
        for i in 0..4 {
            cache.put(i, i);
        }
        cache.set_cap(2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&3), Some(3));
        assert_eq!(cache.get(&0), None);
    }

    #[test]
    fn test_cached_tokenize_round_trip() {
        let a = cached_tokenize("echo cached tokens");
        let b = cached_tokenize("echo cached tokens");
        assert_eq!(a, b);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_executable_finds_sh() {
        let resolved = resolve_executable("sh", "/usr/bin:/bin", "/");
        assert!(resolved.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_absolute_path() {
        let direct = resolve_executable("/bin/sh", "", "/");
        assert_eq!(direct, Some(PathBuf::from("/bin/sh")));
    }

    #[test]
    fn test_resolve_missing_command() {
        assert_eq!(resolve_executable("definitely-not-a-command-xyz", "/bin", "/"), None);
    }

    #[test]
    fn test_clear_caches() {
        cached_tokenize("echo to-be-cleared");
        arithmetic_cache_put("1 + 1".into(), 2);
        clear_caches();
        assert_eq!(arithmetic_cache_get("1 + 1"), None);
    }
}
