use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::OnceLock;

use reqwest::Url;

const REDACTED: &str = "<redacted>";

/// Key/value prefixes whose value is always hidden, whatever it is.
const SECRET_MARKERS: &[&str] = &[
    "api-key=",
    "x-api-key=",
    "x-api-key:",
    "api_key=",
    "api_key:",
    "\"apiKey\":",
    "jupiter_api_key:",
    "encryption_key:",
    "encrypted_key:",
    "private_key:",
    "\"privateKey\":",
    "Authorization: Bearer ",
    "authorization: bearer ",
];

static REDACTIONS: OnceLock<Vec<String>> = OnceLock::new();

/// Registers literal secrets (rpc url, api key, vault passphrase). First call wins.
pub fn init_redactions(values: Vec<String>) {
    let mut seen = HashSet::new();
    let cleaned: Vec<String> = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty() && seen.insert(value.to_string()))
        .map(str::to_string)
        .collect();
    let _ = REDACTIONS.set(cleaned);
}

pub fn scrub_sensitive(input: &str) -> String {
    let mut scrubbed = input.to_string();
    for value in REDACTIONS.get().into_iter().flatten() {
        if scrubbed.contains(value.as_str()) {
            scrubbed = scrubbed.replace(value.as_str(), REDACTED);
        }
    }
    for marker in SECRET_MARKERS {
        if scrubbed.contains(marker) {
            scrubbed = hide_values_after(&scrubbed, marker);
        }
    }
    scrubbed
}

fn hide_values_after(input: &str, marker: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(marker) {
        let (head, tail) = rest.split_at(pos + marker.len());
        output.push_str(head);

        let padding = tail.len() - tail.trim_start_matches([' ', '\t']).len();
        output.push_str(&tail[..padding]);
        let value = &tail[padding..];

        let consumed = match value.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                output.push(quote);
                let body = &value[1..];
                1 + body.find(quote).unwrap_or(body.len())
            }
            _ => value
                .find(|c: char| c.is_whitespace() || "&,}]\"'".contains(c))
                .unwrap_or(value.len()),
        };
        output.push_str(REDACTED);
        rest = &value[consumed..];
    }
    output.push_str(rest);
    output
}

/// Line-buffered writer that scrubs each complete line before passing it on.
pub struct RedactingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, raw: &[u8]) -> io::Result<()> {
        let line = String::from_utf8_lossy(raw);
        self.inner.write_all(scrub_sensitive(&line).as_bytes())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest)?;
        }
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Scheme, host and port only; paths and query strings can carry keys.
pub fn redact_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return "<invalid-url>".to_string();
    };
    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{}://{host}:{port}", parsed.scheme()),
        (Some(host), None) => format!("{}://{host}", parsed.scheme()),
        (None, _) => format!("{}://", parsed.scheme()),
    }
}
