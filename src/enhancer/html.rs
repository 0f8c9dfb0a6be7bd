// src/enhancer/html.rs - Escaping and text-segment rewriting for host markup

use std::borrow::Cow;

/// Escape text for use in element content or a quoted attribute.
pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Decode character references. Unknown or malformed references stay as written.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded_ref = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_reference(&rest[1..end]).map(|c| (c, end)));

        match decoded_ref {
            Some((c, end)) => {
                decoded.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    Cow::Owned(decoded)
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Rewrite the text between tags of an HTML fragment.
///
/// `rewrite` receives each raw (still escaped) text segment and returns
/// replacement markup, or `None` to keep the segment. Tags, comments and
/// attribute values are never passed to `rewrite`.
pub fn transform_text_segments<'a, F>(html: &'a str, mut rewrite: F) -> Cow<'a, str>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut output: Option<String> = None;
    let mut copied = 0;
    let mut segment_start = 0;
    let mut index = 0;
    let bytes = html.as_bytes();

    let mut flush = |start: usize, end: usize, copied: &mut usize, output: &mut Option<String>| {
        if start >= end {
            return;
        }
        if let Some(replacement) = rewrite(&html[start..end]) {
            let out = output.get_or_insert_with(|| String::with_capacity(html.len() + 64));
            out.push_str(&html[*copied..start]);
            out.push_str(&replacement);
            *copied = end;
        }
    };

    while index < bytes.len() {
        if bytes[index] == b'<' && starts_tag(&bytes[index + 1..]) {
            flush(segment_start, index, &mut copied, &mut output);
            index = tag_end(html, index);
            segment_start = index;
        } else {
            index += 1;
        }
    }
    flush(segment_start, html.len(), &mut copied, &mut output);

    match output {
        Some(mut out) => {
            out.push_str(&html[copied..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(html),
    }
}

fn starts_tag(rest: &[u8]) -> bool {
    matches!(rest.first(), Some(b) if b.is_ascii_alphabetic() || *b == b'/' || *b == b'!' || *b == b'?')
}

/// Byte offset just past the tag starting at `start`. Quoted values may contain `>`.
fn tag_end(html: &str, start: usize) -> usize {
    if html[start..].starts_with("<!--") {
        return match html[start + 4..].find("-->") {
            Some(end) => start + 4 + end + 3,
            None => html.len(),
        };
    }

    let bytes = html.as_bytes();
    let mut quote: Option<u8> = None;
    let mut index = start + 1;
    while index < bytes.len() {
        let b = bytes[index];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return index + 1,
            None => {}
        }
        index += 1;
    }
    html.len()
}
