//! Bounded per-instance output store
//!
//! Holds the raw terminal stream as a growing string capped at a byte
//! ceiling, with oldest bytes evicted in line-aligned chunks. Filtered and
//! line-split views are memoized against an `(output_version, filter_version)`
//! pair; readers take a snapshot under the read lock and only the recompute
//! path takes the write lock.

use std::sync::{Arc, RwLock};

/// Filter applied to the raw content before display
pub type FilterFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default byte ceiling per instance (1 MiB)
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

struct CacheEntry {
    output_version: u64,
    filter_version: u64,
    filtered: Arc<str>,
    lines: Arc<[String]>,
}

struct Inner {
    content: String,
    max_bytes: usize,
    output_version: u64,
    filter_version: u64,
    filter: Option<FilterFn>,
    cache: Option<CacheEntry>,
    new_output: bool,
    scroll_offset: usize,
    auto_scroll: bool,
}

impl Inner {
    /// Evict oldest bytes down to the cap, cutting at a line boundary
    fn enforce_cap(&mut self) {
        if self.content.len() <= self.max_bytes {
            return;
        }
        let excess = self.content.len() - self.max_bytes;
        let bytes = self.content.as_bytes();
        let cut = match bytes[excess..].iter().position(|&b| b == b'\n') {
            Some(pos) => excess + pos + 1,
            None => {
                // No newline past the excess point; cut at a char boundary
                let mut cut = excess;
                while cut < self.content.len() && !self.content.is_char_boundary(cut) {
                    cut += 1;
                }
                cut
            }
        };
        self.content.drain(..cut);
    }

    fn cache_valid(&self) -> bool {
        self.cache
            .as_ref()
            .is_some_and(|c| c.output_version == self.output_version && c.filter_version == self.filter_version)
    }

    fn recompute_cache(&mut self) {
        let filtered: Arc<str> = match &self.filter {
            Some(f) => Arc::from(f(&self.content).as_str()),
            None => Arc::from(self.content.as_str()),
        };
        let lines: Arc<[String]> = filtered.lines().map(|l| l.to_string()).collect::<Vec<_>>().into();
        self.cache = Some(CacheEntry {
            output_version: self.output_version,
            filter_version: self.filter_version,
            filtered,
            lines,
        });
    }
}

/// Bounded, versioned output buffer with a memoized filtered view
///
/// Never fails: appends past the cap silently evict from the front.
pub struct OutputBuffer {
    inner: RwLock<Inner>,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                content: String::new(),
                max_bytes: max_bytes.max(1),
                output_version: 0,
                filter_version: 0,
                filter: None,
                cache: None,
                new_output: false,
                scroll_offset: 0,
                auto_scroll: true,
            }),
        }
    }

    /// Append data; bumps the output version only if content changed
    pub fn append(&self, data: &str) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        inner.content.push_str(data);
        inner.enforce_cap();
        inner.output_version += 1;
        if !inner.auto_scroll {
            inner.new_output = true;
        }
    }

    /// Replace content wholesale; bumps the version only if different
    pub fn set(&self, data: &str) {
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        if inner.content == data {
            return;
        }
        inner.content = data.to_string();
        inner.enforce_cap();
        inner.output_version += 1;
        if !inner.auto_scroll {
            inner.new_output = true;
        }
    }

    /// Raw content snapshot
    pub fn content(&self) -> String {
        self.inner.read().expect("output buffer lock poisoned").content.clone()
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.inner.read().expect("output buffer lock poisoned").content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the raw content contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.inner
            .read()
            .expect("output buffer lock poisoned")
            .content
            .contains(needle)
    }

    /// Trailing `n` bytes of the raw content
    pub fn tail_bytes(&self, n: usize) -> Vec<u8> {
        let inner = self.inner.read().expect("output buffer lock poisoned");
        let bytes = inner.content.as_bytes();
        bytes[bytes.len().saturating_sub(n)..].to_vec()
    }

    /// Trailing slice of at most `n` bytes, aligned to a char boundary
    pub fn tail_str(&self, n: usize) -> String {
        let inner = self.inner.read().expect("output buffer lock poisoned");
        let mut start = inner.content.len().saturating_sub(n);
        while start < inner.content.len() && !inner.content.is_char_boundary(start) {
            start += 1;
        }
        inner.content[start..].to_string()
    }

    /// Filtered view, memoized on `(output_version, filter_version)`
    pub fn filtered(&self) -> Arc<str> {
        {
            let inner = self.inner.read().expect("output buffer lock poisoned");
            if inner.cache_valid() {
                return inner.cache.as_ref().unwrap().filtered.clone();
            }
        }
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        if !inner.cache_valid() {
            inner.recompute_cache();
        }
        inner.cache.as_ref().unwrap().filtered.clone()
    }

    /// Line-split filtered view; callers must treat the slice as immutable
    pub fn lines(&self) -> Arc<[String]> {
        {
            let inner = self.inner.read().expect("output buffer lock poisoned");
            if inner.cache_valid() {
                return inner.cache.as_ref().unwrap().lines.clone();
            }
        }
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        if !inner.cache_valid() {
            inner.recompute_cache();
        }
        inner.cache.as_ref().unwrap().lines.clone()
    }

    pub fn line_count(&self) -> usize {
        self.lines().len()
    }

    /// Install or clear the display filter; drops cached entries
    pub fn set_filter(&self, filter: Option<FilterFn>) {
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        inner.filter = filter;
        inner.filter_version += 1;
        inner.cache = None;
    }

    /// Invalidate cached views after a filter's parameters changed
    pub fn invalidate_filter_cache(&self) {
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        inner.filter_version += 1;
        inner.cache = None;
    }

    pub fn versions(&self) -> (u64, u64) {
        let inner = self.inner.read().expect("output buffer lock poisoned");
        (inner.output_version, inner.filter_version)
    }

    // === Scroll model ===

    /// Scroll by `delta` lines within a viewport of `viewport` lines
    ///
    /// Clamps to `[0, line_count - viewport]`. A negative delta disables
    /// auto-scroll; landing on the max offset re-enables it and clears the
    /// new-output flag.
    pub fn scroll(&self, delta: i64, viewport: usize) {
        let count = self.line_count();
        let max_scroll = count.saturating_sub(viewport);

        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        let target = inner.scroll_offset as i64 + delta;
        inner.scroll_offset = target.clamp(0, max_scroll as i64) as usize;

        if delta < 0 {
            inner.auto_scroll = false;
        }
        if inner.scroll_offset == max_scroll {
            inner.auto_scroll = true;
            inner.new_output = false;
        }
    }

    pub fn scroll_to_top(&self) {
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        inner.scroll_offset = 0;
        inner.auto_scroll = false;
    }

    pub fn scroll_to_bottom(&self, viewport: usize) {
        let count = self.line_count();
        let max_scroll = count.saturating_sub(viewport);
        let mut inner = self.inner.write().expect("output buffer lock poisoned");
        inner.scroll_offset = max_scroll;
        inner.auto_scroll = true;
        inner.new_output = false;
    }

    pub fn scroll_offset(&self) -> usize {
        self.inner.read().expect("output buffer lock poisoned").scroll_offset
    }

    pub fn auto_scroll(&self) -> bool {
        self.inner.read().expect("output buffer lock poisoned").auto_scroll
    }

    /// Output arrived while auto-scroll was off and the user hasn't caught up
    pub fn has_new_output(&self) -> bool {
        self.inner.read().expect("output buffer lock poisoned").new_output
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_append_and_content() {
        let buf = OutputBuffer::new(1024);
        buf.append("hello ");
        buf.append("world");
        assert_eq!(buf.content(), "hello world");
    }

    #[test]
    fn test_append_bumps_version_only_on_change() {
        let buf = OutputBuffer::new(1024);
        let (v0, _) = buf.versions();
        buf.append("");
        assert_eq!(buf.versions().0, v0);
        buf.append("x");
        assert_eq!(buf.versions().0, v0 + 1);
    }

    #[test]
    fn test_set_noop_when_identical() {
        let buf = OutputBuffer::new(1024);
        buf.set("abc");
        let (v, _) = buf.versions();
        buf.set("abc");
        assert_eq!(buf.versions().0, v);
        buf.set("abcd");
        assert_eq!(buf.versions().0, v + 1);
    }

    #[test]
    fn test_cap_evicts_line_aligned() {
        let buf = OutputBuffer::new(24);
        buf.append("line one\n");
        buf.append("line two\n");
        buf.append("line three\n");
        let content = buf.content();
        assert!(content.len() <= 24);
        // Eviction cut at a newline, so content starts at a line start
        assert!(content.starts_with("line t"), "got {content:?}");
    }

    #[test]
    fn test_cap_without_newline_still_holds() {
        let buf = OutputBuffer::new(16);
        buf.append(&"x".repeat(100));
        assert!(buf.len() <= 16);
    }

    #[test]
    fn test_filtered_without_filter_is_identity() {
        let buf = OutputBuffer::new(1024);
        buf.append("a\nb\n");
        assert_eq!(&*buf.filtered(), "a\nb\n");
        assert_eq!(buf.line_count(), 2);
    }

    #[test]
    fn test_filter_applied_and_cached() {
        let buf = OutputBuffer::new(1024);
        buf.append("keep\ndrop\nkeep\n");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        buf.set_filter(Some(Arc::new(move |content: &str| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            content.lines().filter(|l| l.contains("keep")).collect::<Vec<_>>().join("\n")
        })));

        let first = buf.filtered();
        let second = buf.filtered();
        assert_eq!(&*first, "keep\nkeep");
        assert_eq!(first, second);
        // Filter ran at most once between changes
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        buf.append("more keep\n");
        let third = buf.filtered();
        assert!(third.contains("more keep"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_filter_cache_recomputes() {
        let buf = OutputBuffer::new(1024);
        buf.append("data");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        buf.set_filter(Some(Arc::new(move |c: &str| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            c.to_string()
        })));

        let _ = buf.filtered();
        buf.invalidate_filter_cache();
        let _ = buf.filtered();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lines_shared_slice() {
        let buf = OutputBuffer::new(1024);
        buf.append("a\nb\nc");
        let l1 = buf.lines();
        let l2 = buf.lines();
        assert_eq!(l1.len(), 3);
        // Same allocation handed to both callers
        assert!(Arc::ptr_eq(&l1, &l2));
    }

    #[test]
    fn test_tail_helpers() {
        let buf = OutputBuffer::new(1024);
        buf.append("0123456789");
        assert_eq!(buf.tail_bytes(4), b"6789");
        assert_eq!(buf.tail_str(4), "6789");
        assert_eq!(buf.tail_str(100), "0123456789");
    }

    #[test]
    fn test_tail_str_char_boundary() {
        let buf = OutputBuffer::new(1024);
        buf.append("héllo");
        // 'é' is two bytes; a cut inside it must move forward
        let tail = buf.tail_str(5);
        assert!(tail.is_char_boundary(0));
    }

    #[test]
    fn test_scroll_clamps_and_toggles_auto() {
        let buf = OutputBuffer::new(4096);
        for i in 0..20 {
            buf.append(&format!("line {i}\n"));
        }
        assert!(buf.auto_scroll());

        // Scroll up: disables auto-scroll
        buf.scroll(-5, 10);
        assert!(!buf.auto_scroll());
        assert_eq!(buf.scroll_offset(), 0); // clamped at top (started at 0)

        // New output while scrolled up sets the flag
        buf.append("line 20\n");
        assert!(buf.has_new_output());

        // Scroll down to max: re-enables auto-scroll, clears flag
        buf.scroll(1000, 10);
        assert_eq!(buf.scroll_offset(), buf.line_count() - 10);
        assert!(buf.auto_scroll());
        assert!(!buf.has_new_output());
    }

    #[test]
    fn test_scroll_to_top_and_bottom() {
        let buf = OutputBuffer::new(4096);
        for i in 0..30 {
            buf.append(&format!("line {i}\n"));
        }
        buf.scroll_to_top();
        assert_eq!(buf.scroll_offset(), 0);
        assert!(!buf.auto_scroll());

        buf.scroll_to_bottom(10);
        assert_eq!(buf.scroll_offset(), 20);
        assert!(buf.auto_scroll());
    }

    #[test]
    fn test_no_new_output_flag_when_auto_scrolling() {
        let buf = OutputBuffer::new(1024);
        buf.append("x\n");
        assert!(!buf.has_new_output());
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let buf = Arc::new(OutputBuffer::new(64 * 1024));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let b = buf.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let _ = b.filtered();
                    let _ = b.line_count();
                }
            }));
        }
        let writer = buf.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..200 {
                writer.append(&format!("line {i}\n"));
            }
        }));

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.line_count(), 200);
    }
}
