use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A `file:` URI as the VFS layer consumes it: a path plus query
/// parameters. Plain paths (no scheme) parse too, with no parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    path: PathBuf,
    params: Vec<(String, String)>,
}

impl Uri {
    pub fn parse(input: &str) -> Result<Self> {
        let Some(rest) = input.strip_prefix("file:") else {
            return Ok(Self {
                path: PathBuf::from(input),
                params: Vec::new(),
            });
        };

        // file://host/path: only an empty host or localhost is meaningful
        // for an embedded store.
        let rest = if let Some(after) = rest.strip_prefix("//") {
            match after.find('/') {
                Some(slash) if matches!(&after[..slash], "" | "localhost") => &after[slash..],
                _ => {
                    return Err(Error::BadUri(format!("unsupported authority in '{input}'")));
                }
            }
        } else {
            rest
        };

        let rest = rest.split('#').next().unwrap_or(rest);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut params = Vec::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                params.push((percent_decode(key)?, percent_decode(value)?));
            }
        }

        Ok(Self {
            path: PathBuf::from(percent_decode(path)?),
            params,
        })
    }

    /// Renders a `file:` URI with the given query parameters.
    pub fn build(path: &str, params: &[(&str, String)]) -> String {
        let mut uri = String::with_capacity(path.len() + 16);
        uri.push_str("file:");
        percent_encode_into(path, &mut uri);
        for (i, (key, value)) in params.iter().enumerate() {
            uri.push(if i == 0 { '?' } else { '&' });
            percent_encode_into(key, &mut uri);
            uri.push('=');
            percent_encode_into(value, &mut uri);
        }
        uri
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last occurrence wins, matching usual query-string semantics.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some("" | "1" | "true" | "on" | "yes") => Ok(true),
            Some("0" | "false" | "off" | "no") => Ok(false),
            Some(other) => Err(Error::BadUri(format!("{key}={other} is not a boolean"))),
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| Error::BadUri(format!("{key}={value} is not a number"))),
        }
    }

    pub fn get_i32(&self, key: &str, default: i32) -> Result<i32> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| Error::BadUri(format!("{key}={value} is not a number"))),
        }
    }
}

fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::BadUri(format!("bad percent escape in '{input}'")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::BadUri(format!("non-UTF-8 escape in '{input}'")))
}

fn percent_encode_into(input: &str, out: &mut String) {
    for byte in input.bytes() {
        match byte {
            b'%' | b'?' | b'#' | b'&' | b'=' => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
            0x20..=0x7E => out.push(byte as char),
            // Escape non-ASCII bytes so UTF-8 paths survive the round trip.
            _ => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
        }
    }
}
