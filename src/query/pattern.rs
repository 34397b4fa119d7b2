use lru::LruCache;
use regex::{Regex, RegexBuilder};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::core::Result;

const CACHE_CAPACITY: usize = 200;

lazy_static::lazy_static! {
    static ref REGEX_LRU_CACHE: Mutex<LruCache<String, Arc<Regex>>> =
        Mutex::new(LruCache::new(
            NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
        ));
}

/// `$options` flags accepted next to `$regex` (`i`, `m`, `s`, `x`)
fn build_regex(pattern: &str, options: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    builder
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'));
    Ok(builder.build()?)
}

/// Compiled regex with LRU caching
pub fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Arc<Regex>> {
    let cache_key = format!("{}/{}", options, pattern);

    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(Arc::clone(regex));
        }
    }

    let compiled = Arc::new(build_regex(pattern, options)?);

    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        cache.put(cache_key, Arc::clone(&compiled));
    }

    Ok(compiled)
}

/// Fast path for patterns without metacharacters
#[inline]
fn fast_path(text: &str, pattern: &str, options: &str) -> Option<bool> {
    if !options.is_empty() || pattern.chars().any(|c| ".*+?^${}()|[]\\".contains(c)) {
        return None;
    }
    Some(text.contains(pattern))
}

#[inline]
pub fn eval_regex(text: &str, pattern: &str, options: &str) -> Result<bool> {
    if let Some(result) = fast_path(text, pattern, options) {
        return Ok(result);
    }
    let regex = get_or_compile_regex(pattern, options)?;
    Ok(regex.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_path_substring() {
        assert!(eval_regex("hello world", "lo wo", "").unwrap());
        assert!(!eval_regex("hello world", "xyz", "").unwrap());
    }

    #[test]
    fn test_anchored_and_case_insensitive() {
        assert!(eval_regex("Hello", "^hel", "i").unwrap());
        assert!(!eval_regex("Hello", "^hel", "").unwrap());
    }

    #[test]
    fn test_cache_returns_same_instance() {
        let a = get_or_compile_regex("^a+$", "").unwrap();
        let b = get_or_compile_regex("^a+$", "").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(eval_regex("abc", "(unclosed", "").is_err());
    }
}
