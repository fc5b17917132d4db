//! Message-id and header block parsing.

/// Normalize a message-id: trims whitespace and the `<` `>` delimiters.
///
/// `" <abc@mail.example.com> "` becomes `"abc@mail.example.com"`.
pub fn normalize_message_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

/// Local part of a normalized message-id, used for loose matching against
/// providers that report ids without the domain suffix.
///
/// Returns `None` when the id has no domain part to strip.
pub fn strip_id_domain(id: &str) -> Option<&str> {
    let (local, domain) = id.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(local)
}

/// Parse a `References` header into an ordered list of normalized ids.
///
/// Ids are separated by whitespace (folded headers included); some providers
/// join them with commas instead.
pub fn parse_references(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .map(normalize_message_id)
        .filter(|id| !id.is_empty())
        .collect()
}

/// Case-insensitive lookup of the first header with the given name.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse a raw RFC 5322 header block into ordered `(name, value)` pairs.
///
/// Continuation lines (starting with whitespace) are unfolded into the
/// previous header. Parsing stops at the first blank line.
pub fn parse_header_block(raw: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_delimiters_and_whitespace() {
        assert_eq!(normalize_message_id(" <abc@example.com> "), "abc@example.com");
        assert_eq!(normalize_message_id("abc@example.com"), "abc@example.com");
        assert_eq!(normalize_message_id("<>"), "");
    }

    #[test]
    fn strip_domain_for_loose_match() {
        assert_eq!(strip_id_domain("abc-123@mtasv.net"), Some("abc-123"));
        assert_eq!(strip_id_domain("no-domain"), None);
        assert_eq!(strip_id_domain("@example.com"), None);
    }

    #[test]
    fn references_keep_order() {
        let refs = parse_references("<a@x.com>\r\n <b@x.com>\t<c@x.com>");
        assert_eq!(refs, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[test]
    fn references_accept_commas_and_drop_empties() {
        let refs = parse_references("<a@x.com>,<b@x.com>, , <>");
        assert_eq!(refs, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![
            ("Message-ID".to_string(), "<1@x>".to_string()),
            ("In-Reply-To".to_string(), "<0@x>".to_string()),
        ];
        assert_eq!(header_value(&headers, "message-id"), Some("<1@x>"));
        assert_eq!(header_value(&headers, "IN-REPLY-TO"), Some("<0@x>"));
        assert_eq!(header_value(&headers, "References"), None);
    }

    #[test]
    fn header_block_unfolds_continuations() {
        let raw = "Message-ID: <1@x>\r\nReferences: <a@x>\r\n <b@x>\r\nSubject: Hi\r\n\r\nBody: not a header";
        let headers = parse_header_block(raw);
        assert_eq!(headers.len(), 3);
        assert_eq!(header_value(&headers, "References"), Some("<a@x> <b@x>"));
        assert_eq!(header_value(&headers, "Body"), None);
    }
}
