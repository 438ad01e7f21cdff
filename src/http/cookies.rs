//! Cookie parsing and `Set-Cookie` serialization

use crate::pools::Reset;
use std::{fmt, sync::Arc, time::SystemTime};

const DEFAULT_LEN: usize = 4;

/// A single cookie.
///
/// `path` is omitted from the serialized form when empty, `expires` when
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub key: String,
    pub value: String,
    pub path: String,
    pub expires: Option<SystemTime>,
}

impl Cookie {
    /// Writes the `Set-Cookie` form (`key=value; Path=..; Expires=..`).
    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(self.key.as_bytes());
        buffer.push(b'=');
        buffer.extend_from_slice(self.value.as_bytes());

        if !self.path.is_empty() {
            buffer.extend_from_slice(b"; Path=");
            buffer.extend_from_slice(self.path.as_bytes());
        }

        if let Some(expires) = self.expires {
            buffer.extend_from_slice(b"; Expires=");
            buffer.extend_from_slice(httpdate::fmt_http_date(expires).as_bytes());
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Vec::with_capacity(64);
        self.write_to(&mut buf);
        // Keys and values are either ASCII-sanitized or caller-provided `String`s.
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

/// An ordered set of cookies for one request or response.
///
/// Duplicate keys coming from a parsed header are all kept: [`get`](Self::get)
/// answers with the last one. [`set`](Self::set) never adds a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookies {
    entries: Vec<Arc<Cookie>>,
}

impl Default for Cookies {
    fn default() -> Self {
        Self {
            entries: Vec::with_capacity(DEFAULT_LEN),
        }
    }
}

impl Reset for Cookies {
    #[inline]
    fn reset(&mut self) {
        self.entries.clear();
    }
}

impl Cookies {
    /// Parses a `Cookie` header value and appends its pairs.
    ///
    /// Segments are separated by `"; "` and split on their first `=`.
    /// Segments with an empty key or value are skipped.
    pub fn parse(&mut self, raw: &[u8]) {
        for segment in Split::new(raw, b"; ") {
            let Some(eq) = memchr::memchr(b'=', segment) else {
                continue;
            };

            let key = sanitize(&segment[..eq]);
            let value = sanitize(&segment[eq + 1..]);
            if key.is_empty() || value.is_empty() {
                continue;
            }

            self.entries.push(Arc::new(Cookie {
                key,
                value,
                path: String::new(),
                expires: None,
            }));
        }
    }

    /// Value of the last cookie named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|c| c.key == key)
            .map(|c| c.value.as_str())
    }

    /// Updates the first cookie named `key` in place, or appends a new one.
    pub fn set(&mut self, key: &str, value: &str, path: &str, expires: Option<SystemTime>) {
        if let Some(entry) = self.entries.iter_mut().find(|c| c.key == key) {
            let cookie = Arc::make_mut(entry);
            cookie.value.clear();
            cookie.value.push_str(value);
            cookie.path.clear();
            cookie.path.push_str(path);
            cookie.expires = expires;
            return;
        }

        self.entries.push(Arc::new(Cookie {
            key: key.to_owned(),
            value: value.to_owned(),
            path: path.to_owned(),
            expires,
        }));
    }

    /// A store that outlives the request it was parsed from.
    ///
    /// Entries are shared with `self`; a later [`set`](Self::set) on either
    /// side copies the touched entry first, so the two never observe each
    /// other's writes.
    pub fn dup(&self) -> Cookies {
        let mut entries = Vec::with_capacity(self.entries.len().max(DEFAULT_LEN));
        entries.extend(self.entries.iter().cloned());
        Cookies { entries }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.entries.iter().map(|c| c.as_ref())
    }

    /// `key=value` pairs joined with `"; "`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        self.write_to(&mut buf);
        buf
    }

    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        for (i, cookie) in self.entries.iter().enumerate() {
            if i > 0 {
                buffer.extend_from_slice(b"; ");
            }
            buffer.extend_from_slice(cookie.key.as_bytes());
            buffer.push(b'=');
            buffer.extend_from_slice(cookie.value.as_bytes());
        }
    }
}

impl fmt::Display for Cookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// Keeps printable ASCII only.
fn sanitize(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|b| *b as char)
        .collect()
}

/// Splits on a multi-byte separator.
struct Split<'a> {
    rest: Option<&'a [u8]>,
    finder: memchr::memmem::Finder<'static>,
}

impl<'a> Split<'a> {
    fn new(bytes: &'a [u8], separator: &'static [u8]) -> Self {
        Self {
            rest: Some(bytes),
            finder: memchr::memmem::Finder::new(separator),
        }
    }
}

impl<'a> Iterator for Split<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest?;
        match self.finder.find(rest) {
            Some(i) => {
                self.rest = Some(&rest[i + self.finder.needle().len()..]);
                Some(&rest[..i])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}
