//! Reply/forward subject markers.

use std::sync::LazyLock;

use regex::Regex;

/// One leading marker: `Re:`, `Fw:`, `Fwd:`, localized `AW:`/`SV:`/`WG:`,
/// and counted forms such as `Re[2]:`.
static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(re|fwd?|aw|sv|wg)\s*(\[\d+\])?\s*:\s*").expect("valid marker regex")
});

static FORWARD_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(fwd?|wg)\s*(\[\d+\])?\s*:").expect("valid forward regex"));

/// Strip every leading reply/forward marker.
///
/// `"Re: Re: Fwd: Quote Request"` becomes `"Quote Request"`.
pub fn strip_reply_prefixes(subject: &str) -> String {
    let mut current = subject.trim();
    while let Some(m) = MARKER.find(current) {
        current = current[m.end()..].trim_start();
    }
    current.trim().to_string()
}

/// Lookup form of a subject: markers stripped, lowercased.
pub fn subject_key(subject: &str) -> String {
    strip_reply_prefixes(subject).to_lowercase()
}

/// Whether the subject starts with a reply or forward marker.
pub fn has_reply_marker(subject: &str) -> bool {
    MARKER.is_match(subject)
}

/// Whether the outermost marker is a forward (`Fwd:`, `Fw:`, `WG:`).
pub fn is_forward_subject(subject: &str) -> bool {
    FORWARD_MARKER.is_match(subject)
}
