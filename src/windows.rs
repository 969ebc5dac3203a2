// windows.rs - Windowed processing of very large bundle text
// Purpose: Split oversized content into fixed-size windows processed strictly in order

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ScanConfig;

/// One slice of the content and where it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a> {
    pub index: usize,
    /// Byte offset of `text` in the full content
    pub offset: usize,
    pub text: &'a str,
}

/// Lazy, finite sequence of windows. Boundaries never split a UTF-8 sequence.
#[derive(Debug, Clone)]
pub struct ContentWindows<'a> {
    content: &'a str,
    window_size: usize,
    position: usize,
    index: usize,
}

impl<'a> ContentWindows<'a> {
    pub fn new(content: &'a str, window_size: usize) -> Self {
        Self { content, window_size: window_size.max(1), position: 0, index: 0 }
    }

    /// Whole content as one window when it is below the threshold
    pub fn for_config(content: &'a str, config: &ScanConfig) -> Self {
        if content.len() <= config.large_content_threshold {
            Self::new(content, content.len())
        } else {
            Self::new(content, config.window_size)
        }
    }

    /// Start over from the first window
    pub fn restart(&mut self) {
        self.position = 0;
        self.index = 0;
    }

    pub fn window_count(&self) -> usize {
        self.clone_from_start().count()
    }

    fn clone_from_start(&self) -> Self {
        Self::new(self.content, self.window_size)
    }
}

impl<'a> Iterator for ContentWindows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.content.len() {
            // Empty content still yields one (empty) window
            if self.content.is_empty() && self.index == 0 {
                self.index = 1;
                return Some(Window { index: 0, offset: 0, text: "" });
            }
            return None;
        }

        let mut end = (self.position + self.window_size).min(self.content.len());
        while !self.content.is_char_boundary(end) {
            end += 1;
        }

        let window = Window { index: self.index, offset: self.position, text: &self.content[self.position..end] };
        self.position = end;
        self.index += 1;
        Some(window)
    }
}

/// Run `scan` over every window in order. A panicking window is logged and
/// skipped; later windows still run.
pub fn scan_windowed<T, F>(content: &str, config: &ScanConfig, mut scan: F) -> Vec<T>
where
    F: FnMut(&Window<'_>) -> Vec<T>,
{
    let windows = ContentWindows::for_config(content, config);
    let total = windows.window_count();
    if total > 1 {
        debug!("scanning {} bytes in {} windows", content.len(), total);
    }
    let pause = Duration::from_millis(config.window_pause_ms);
    let mut results = Vec::new();

    for window in windows {
        if window.index > 0 && !pause.is_zero() {
            sleep(pause);
        }

        match catch_unwind(AssertUnwindSafe(|| scan(&window))) {
            Ok(found) => {
                debug!("window {} @ {}: {} results", window.index, window.offset, found.len());
                results.extend(found);
            }
            Err(_) => warn!("window {} @ {} failed, skipping", window.index, window.offset),
        }
    }
    results
}
