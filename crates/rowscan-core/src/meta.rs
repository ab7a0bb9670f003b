//! SQL meta cache.
//!
//! For every distinct base statement the cache keeps a [`SqlMeta`] holding
//! the limit variant and the count variant of that statement. Both are
//! derived on first use. Derivation is a pure function of the statement
//! text, so two threads racing on the same entry may both derive; the
//! first value published wins and the other is identical anyway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::error::{ScanError, ScanResult};

/// Clause appended by the limit rewrite. Binds offset, then row count.
pub const LIMIT_CLAUSE: &str = " LIMIT ?, ?";

/// Aggregate substituted for the select list by the count rewrite.
pub const COUNT_PROJECTION: &str = "COUNT(*)";

/// Counters for cache activity.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups that found an entry.
    hits: AtomicU64,
    /// Lookups that created an entry.
    misses: AtomicU64,
    /// Successful rewrites.
    derivations: AtomicU64,
    /// Rewrites that failed.
    failures: AtomicU64,
}

impl CacheStats {
    /// Records a cache hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache miss.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a derivation.
    #[inline]
    pub fn record_derivation(&self) {
        self.derivations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed derivation.
    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns cache hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns cache misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns successful derivations.
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Returns failed derivations.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Resets all counters.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.derivations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

/// Derived statements for one base statement.
#[derive(Debug)]
pub struct SqlMeta {
    /// The base statement text.
    base: String,
    /// `base LIMIT ?, ?`.
    limit: OnceLock<String>,
    /// `SELECT COUNT(*) FROM ...`.
    count: OnceLock<String>,
    /// Shared with the owning cache.
    stats: Arc<CacheStats>,
}

impl SqlMeta {
    fn new(base: &str, stats: Arc<CacheStats>) -> Self {
        Self {
            base: base.to_string(),
            limit: OnceLock::new(),
            count: OnceLock::new(),
            stats,
        }
    }

    /// Returns the base statement.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Returns the limit variant if it has been derived.
    pub fn limit_variant(&self) -> Option<&str> {
        self.limit.get().map(String::as_str)
    }

    /// Returns the count variant if it has been derived.
    pub fn count_variant(&self) -> Option<&str> {
        self.count.get().map(String::as_str)
    }

    /// Returns the limit variant, deriving it on first use.
    pub fn derive_limit(&self) -> ScanResult<&str> {
        if let Some(sql) = self.limit.get() {
            return Ok(sql.as_str());
        }
        let derived = self.record(limit_sql(&self.base))?;
        tracing::debug!(base = %self.base, limit = %derived, "derived limit variant");
        Ok(self.limit.get_or_init(|| derived).as_str())
    }

    /// Returns the count variant, deriving it on first use.
    pub fn derive_count(&self) -> ScanResult<&str> {
        if let Some(sql) = self.count.get() {
            return Ok(sql.as_str());
        }
        let derived = self.record(count_sql(&self.base))?;
        tracing::debug!(base = %self.base, count = %derived, "derived count variant");
        Ok(self.count.get_or_init(|| derived).as_str())
    }

    fn record(&self, result: ScanResult<String>) -> ScanResult<String> {
        match &result {
            Ok(_) => self.stats.record_derivation(),
            Err(_) => self.stats.record_failure(),
        }
        result
    }
}

/// Read-through cache of [`SqlMeta`] keyed by base statement text.
#[derive(Debug, Default)]
pub struct SqlMetaCache {
    /// Entries by base statement.
    entries: DashMap<String, Arc<SqlMeta>>,
    /// Cache statistics.
    stats: Arc<CacheStats>,
}

impl SqlMetaCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide cache.
    pub fn global() -> &'static SqlMetaCache {
        static GLOBAL: OnceLock<SqlMetaCache> = OnceLock::new();
        GLOBAL.get_or_init(SqlMetaCache::new)
    }

    /// Returns the entry for `base` if one exists.
    pub fn get(&self, base: &str) -> Option<Arc<SqlMeta>> {
        self.entries.get(base).map(|e| Arc::clone(e.value()))
    }

    /// Returns the entry for `base`, creating an empty one on a miss.
    pub fn meta(&self, base: &str) -> Arc<SqlMeta> {
        if let Some(meta) = self.get(base) {
            self.stats.record_hit();
            return meta;
        }
        self.stats.record_miss();
        self.entries
            .entry(base.to_string())
            .or_insert_with(|| Arc::new(SqlMeta::new(base, Arc::clone(&self.stats))))
            .clone()
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

// =========================================================================
// Rewrites
// =========================================================================

/// Appends the parameterized offset/limit clause to `base`.
///
/// `base` is a `SELECT`, optionally led by a `WITH` clause.
pub fn limit_sql(base: &str) -> ScanResult<String> {
    let lexed = Lexed::query(base)?;
    Ok(format!("{}{}", lexed.code(), LIMIT_CLAUSE))
}

/// Replaces the select list of `base` with a row count.
///
/// The filtering clauses are kept verbatim; a trailing `ORDER BY` is
/// dropped. Statements using `DISTINCT`, `GROUP BY` or set operations are
/// not detected and will count the wrong thing.
pub fn count_sql(base: &str) -> ScanResult<String> {
    let lexed = Lexed::select(base)?;
    let select = lexed.words[0];
    let from = lexed
        .words
        .iter()
        .skip(1)
        .find(|w| w.is(base, "FROM"))
        .ok_or_else(|| ScanError::Rewrite(format!("no top-level FROM in '{base}'")))?;

    let end = lexed.order_by().map_or(lexed.code_end, |w| w.start);
    Ok(format!(
        "{} {} {}",
        &base[..select.end],
        COUNT_PROJECTION,
        base[from.start..end].trim_end()
    ))
}

/// Orders `base` by `column`, appending to an existing `ORDER BY`.
pub fn order_sql(base: &str, column: &str, desc: bool) -> ScanResult<String> {
    if !is_identifier(column) {
        return Err(ScanError::Rewrite(format!(
            "sort column '{column}' is not an identifier"
        )));
    }
    let lexed = Lexed::query(base)?;
    let joiner = if lexed.order_by().is_some() { ", " } else { " ORDER BY " };
    let direction = if desc { " DESC" } else { "" };
    Ok(format!("{}{joiner}{column}{direction}", lexed.code()))
}

/// Checks for `name`, `t.name`, `` `name` `` or `"name"`.
fn is_identifier(column: &str) -> bool {
    !column.is_empty()
        && column.split('.').all(|part| {
            let quoted = |q: char| {
                part.len() > 2
                    && part.starts_with(q)
                    && part.ends_with(q)
                    && !part[1..part.len() - 1].contains(q)
            };
            if quoted('`') || quoted('"') {
                return true;
            }
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// A word at parenthesis depth zero, outside quotes and comments.
#[derive(Debug, Clone, Copy)]
struct Word {
    start: usize,
    end: usize,
}

impl Word {
    fn is(&self, sql: &str, keyword: &str) -> bool {
        sql[self.start..self.end].eq_ignore_ascii_case(keyword)
    }
}

/// The top-level structure of a statement.
struct Lexed<'a> {
    sql: &'a str,
    words: Vec<Word>,
    /// End of the last significant byte, excluding trailing comments,
    /// whitespace and semicolons.
    code_end: usize,
}

impl<'a> Lexed<'a> {
    /// Lexes `sql` and checks that it is a `SELECT`.
    fn select(sql: &'a str) -> ScanResult<Self> {
        let lexed = Self::new(sql);
        match lexed.words.first() {
            Some(w) if w.is(sql, "SELECT") => Ok(lexed),
            Some(_) => Err(ScanError::Rewrite(format!("not a SELECT statement: '{sql}'"))),
            None => Err(ScanError::Rewrite("empty statement".to_string())),
        }
    }

    /// Lexes `sql` and checks that it is a `SELECT` or `WITH ... SELECT`.
    fn query(sql: &'a str) -> ScanResult<Self> {
        let lexed = Self::new(sql);
        match lexed.words.first() {
            Some(w) if w.is(sql, "WITH") => {
                if lexed.words.iter().skip(1).any(|w| w.is(sql, "SELECT")) {
                    Ok(lexed)
                } else {
                    Err(ScanError::Rewrite(format!("WITH without SELECT: '{sql}'")))
                }
            }
            _ => Self::select(sql),
        }
    }

    fn new(sql: &'a str) -> Self {
        let bytes = sql.as_bytes();
        let len = bytes.len();
        let mut words = Vec::new();
        let mut depth = 0usize;
        let mut code_end = 0;
        let mut i = 0;

        while i < len {
            let b = bytes[i];
            match b {
                b'\'' | b'"' | b'`' => {
                    i = skip_quoted(bytes, i, b);
                    code_end = i;
                    continue;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    i = skip_line(bytes, i);
                    continue;
                }
                b'#' => {
                    i = skip_line(bytes, i);
                    continue;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = skip_block(bytes, i);
                    continue;
                }
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if is_word_byte(b) => {
                    let start = i;
                    while i < len && is_word_byte(bytes[i]) {
                        i += 1;
                    }
                    if depth == 0 {
                        words.push(Word { start, end: i });
                    }
                    code_end = i;
                    continue;
                }
                _ => {}
            }
            if !b.is_ascii_whitespace() && b != b';' {
                code_end = i + 1;
            }
            i += 1;
        }

        // A multi-byte character may sit right before code_end.
        while !sql.is_char_boundary(code_end) {
            code_end += 1;
        }

        Self {
            sql,
            words,
            code_end,
        }
    }

    /// The statement without trailing comments, whitespace or semicolons.
    fn code(&self) -> &'a str {
        &self.sql[..self.code_end]
    }

    /// The last top-level `ORDER` keyword that is followed by `BY`.
    fn order_by(&self) -> Option<Word> {
        self.words
            .windows(2)
            .rev()
            .find(|pair| pair[0].is(self.sql, "ORDER") && pair[1].is(self.sql, "BY"))
            .map(|pair| pair[0])
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| start + p + 1)
}

fn skip_block(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |p| start + 2 + p + 2)
}
