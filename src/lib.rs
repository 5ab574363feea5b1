//! PocketGen Library
//!
//! Session, load/generate flow and front-ends for the PocketGen playground.

pub mod app;
pub mod bundle;
pub mod console;
pub mod inference;
pub mod playground;
pub mod session;
pub mod storage;
pub mod ui;

#[cfg(test)]
mod testing;

/// Safely truncate a string at a char boundary, never panics.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
