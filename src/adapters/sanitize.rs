//! Log line sanitization.
//!
//! Patient measurements never reach log calls; the service logs report ids,
//! outcomes, and rounded risks only. This filter catches what slips through
//! anyway: identifiers pasted into a form field and echoed in an error,
//! contact details, tokens, and key material from misconfigured env vars.
//!
//! Report ids are UUIDs and are deliberately left intact so a log line can be
//! matched to the report shown to the clinician.
//!
//! Input is capped at `RISKCALC_SANITIZE_MAX_BYTES` (16 KiB by default) per
//! call; longer lines are cut and marked `[TRUNCATED]`.

use std::io::{self, Write};
use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use tracing_subscriber::fmt::MakeWriter;

const DEFAULT_MAX_BYTES: usize = 16 * 1024;

/// Replacement used when the pattern table could not be built.
const UNSANITIZABLE: &str = "[REDACTED-LINE]";

const SECRET_KEYS: &str = r"(?i)\b(?:api[_-]?key|access[_-]?token|secret|password|passwd|private[_-]?key|signing[_-]?key|seed|token)\b\s*[:=]\s*";

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

struct Rules {
    any: RegexSet,
    ordered: Vec<Rule>,
    pem: Regex,
}

static RULES: OnceLock<Option<Rules>> = OnceLock::new();

fn rule_table() -> Vec<(String, &'static str)> {
    vec![
        (r"\b\d{3}-\d{2}-\d{4}\b".into(), "[REDACTED-SSN]"),
        (r"(?i)\bMRN[:#\s]?\s*\d{6,10}\b".into(), "[REDACTED-MRN]"),
        (
            r"(?i)\b[a-z0-9][a-z0-9._%+-]{0,63}@(?:[a-z0-9-]{1,63}\.)+[a-z]{2,}\b".into(),
            "[REDACTED-EMAIL]",
        ),
        (
            r"(?:\+\d{1,3}[-.\s])?\(?\b\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b".into(),
            "[REDACTED-PHONE]",
        ),
        (
            r"\beyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}".into(),
            "[REDACTED-JWT]",
        ),
        (
            format!(r"{SECRET_KEYS}(?:[A-Za-z0-9+/]{{24,}}={{0,2}}|[0-9a-fA-F]{{16,}})"),
            "[REDACTED-SECRET]",
        ),
        (r"\b[0-9a-fA-F]{64,}\b".into(), "[REDACTED-HEX]"),
    ]
}

fn build_rules() -> Result<Rules, regex::Error> {
    let table = rule_table();
    let any = RegexSet::new(table.iter().map(|(p, _)| p.as_str()))?;
    let ordered = table
        .into_iter()
        .map(|(pattern, replacement)| {
            Ok(Rule {
                regex: Regex::new(&pattern)?,
                replacement,
            })
        })
        .collect::<Result<Vec<_>, regex::Error>>()?;
    let pem = Regex::new(
        r"(?s)-----BEGIN [A-Z ]{0,32}PRIVATE KEY-----[\s\S]{0,4096}?-----END [A-Z ]{0,32}PRIVATE KEY-----",
    )?;
    Ok(Rules { any, ordered, pem })
}

fn rules() -> Option<&'static Rules> {
    RULES.get_or_init(|| build_rules().ok()).as_ref()
}

fn max_bytes() -> usize {
    std::env::var("RISKCALC_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_MAX_BYTES)
}

/// Longest prefix of `input` within `limit` bytes that ends on a char boundary.
fn clip(input: &str, limit: usize) -> (&str, bool) {
    if input.len() <= limit {
        return (input, false);
    }
    let mut end = limit;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

/// Redact sensitive patterns from `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_within(input, max_bytes())
}

fn sanitize_within(input: &str, limit: usize) -> String {
    let (text, clipped) = clip(input, limit);
    let mut out = match rules() {
        Some(rules) => apply(rules, text),
        None => UNSANITIZABLE.to_string(),
    };
    if clipped {
        out.push_str(" [TRUNCATED]");
    }
    out
}

fn apply(rules: &Rules, text: &str) -> String {
    let hits = rules.any.matches(text);
    let has_pem = text.contains("-----BEGIN ");
    if !hits.matched_any() && !has_pem {
        return text.to_string();
    }

    let mut out = if has_pem {
        rules.pem.replace_all(text, "[REDACTED-PEM]").into_owned()
    } else {
        text.to_string()
    };
    for idx in hits.iter() {
        let rule = &rules.ordered[idx];
        out = rule.regex.replace_all(&out, rule.replacement).into_owned();
    }
    out
}

/// Whether `input` contains anything [`sanitize`] would redact.
#[must_use]
pub fn contains_pii(input: &str) -> bool {
    let (text, _) = clip(input, max_bytes());
    match rules() {
        Some(rules) => rules.any.is_match(text) || rules.pem.is_match(text),
        None => true,
    }
}

/// [`MakeWriter`] that runs each formatted log line through [`sanitize`].
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter {
            inner: self.inner.make_writer(),
            pending: Vec::new(),
        }
    }
}

/// Line-buffering writer; complete lines are sanitized as they arrive and any
/// remainder on flush or drop.
pub struct SanitizingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> SanitizingWriter<W> {
    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        let line = String::from_utf8_lossy(bytes);
        self.inner.write_all(sanitize(&line).as_bytes())
    }

    fn drain_lines(&mut self) -> io::Result<()> {
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(())
    }
}

impl<W: Write> Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        // A single line with no newline must not grow without bound.
        if self.pending.len() > max_bytes().saturating_mul(2) {
            let all = std::mem::take(&mut self.pending);
            self.emit(&all)?;
            self.inner.write_all(b"\n")?;
            return Ok(buf.len());
        }
        self.drain_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain_lines()?;
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest)?;
        }
        self.inner.flush()
    }
}

impl<W: Write> Drop for SanitizingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
