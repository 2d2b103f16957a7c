use crate::error::OrmError;
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Start {
        name: String,
        attributes: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    /// Character data with markup escapes resolved but still in encoded form.
    Text(Vec<u8>),
}

/// Pull-style reader turning a markup byte stream into start/end/text events.
///
/// Handles attributes, the predefined and numeric character references,
/// comments, processing instructions, declarations, CDATA sections and
/// self-closing tags. Tag nesting is not checked here.
pub struct DocumentReader<R> {
    input: R,
    offset: u64,
    in_markup: bool,
    pending_end: Option<String>,
    done: bool,
}

impl<R: BufRead> DocumentReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            offset: 0,
            in_markup: false,
            pending_end: None,
            done: false,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn next_event(&mut self) -> Result<Option<DocumentEvent>, OrmError> {
        if let Some(name) = self.pending_end.take() {
            return Ok(Some(DocumentEvent::End { name }));
        }
        loop {
            if self.done {
                return Ok(None);
            }
            if !self.in_markup {
                let mut text = Vec::new();
                let n = self.read_until(b'<', &mut text)?;
                if n == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if text.last() == Some(&b'<') {
                    text.pop();
                    self.in_markup = true;
                } else {
                    self.done = true;
                }
                if !text.is_empty() {
                    return Ok(Some(DocumentEvent::Text(unescape(&text)?)));
                }
                continue;
            }

            self.in_markup = false;
            let start = self.offset;
            let mut markup = Vec::new();
            self.read_markup(&mut markup, b">")?;
            if markup.starts_with(b"!--") {
                self.read_markup(&mut markup, b"-->")?;
                continue;
            }
            if markup.starts_with(b"![CDATA[") {
                self.read_markup(&mut markup, b"]]>")?;
                let content = markup[8..markup.len() - 3].to_vec();
                if content.is_empty() {
                    continue;
                }
                return Ok(Some(DocumentEvent::Text(content)));
            }
            if markup.starts_with(b"?") {
                self.read_markup(&mut markup, b"?>")?;
                continue;
            }
            if markup.starts_with(b"!") {
                continue;
            }
            while !quotes_balanced(&markup) {
                if self.read_until(b'>', &mut markup)? == 0 {
                    return Err(OrmError::Decode(format!(
                        "unterminated attribute value at byte {start}"
                    )));
                }
            }
            markup.pop();
            return self.tag_event(&markup, start).map(Some);
        }
    }

    fn read_until(&mut self, delim: u8, buf: &mut Vec<u8>) -> Result<usize, OrmError> {
        let n = self.input.read_until(delim, buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Extends `buf` until it ends with `terminator`.
    fn read_markup(&mut self, buf: &mut Vec<u8>, terminator: &[u8]) -> Result<(), OrmError> {
        let last = terminator[terminator.len() - 1];
        while !buf.ends_with(terminator) {
            let n = self.read_until(last, buf)?;
            if n == 0 {
                return Err(OrmError::Decode(format!(
                    "unterminated markup at byte {}",
                    self.offset
                )));
            }
        }
        Ok(())
    }

    fn tag_event(&mut self, markup: &[u8], start: u64) -> Result<DocumentEvent, OrmError> {
        let malformed = |what: &str| OrmError::Decode(format!("{what} at byte {start}"));
        let text = std::str::from_utf8(markup).map_err(|_| malformed("invalid utf-8 in tag"))?;

        if let Some(name) = text.strip_prefix('/') {
            let name = name.trim();
            if !is_name(name) {
                return Err(malformed("malformed end tag"));
            }
            return Ok(DocumentEvent::End {
                name: name.to_string(),
            });
        }

        let (body, self_closing) = match text.strip_suffix('/') {
            Some(body) => (body, true),
            None => (text, false),
        };
        let body = body.trim_end();
        let name_end = body
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(body.len());
        let name = &body[..name_end];
        if !is_name(name) {
            return Err(malformed("malformed start tag"));
        }
        let attributes = parse_attributes(&body[name_end..])
            .ok_or_else(|| malformed("malformed attribute list"))?;
        if self_closing {
            self.pending_end = Some(name.to_string());
        }
        Ok(DocumentEvent::Start {
            name: name.to_string(),
            attributes,
        })
    }
}

impl<R: BufRead> Iterator for DocumentReader<R> {
    type Item = Result<DocumentEvent, OrmError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

fn is_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

fn quotes_balanced(markup: &[u8]) -> bool {
    let mut open: Option<u8> = None;
    for &b in markup {
        match open {
            Some(q) if b == q => open = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => open = Some(b),
            None => {}
        }
    }
    open.is_none()
}

fn parse_attributes(mut rest: &str) -> Option<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Some(attributes);
        }
        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        if !is_name(key) {
            return None;
        }
        rest = rest[eq + 1..].trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let close = rest[1..].find(quote)? + 1;
        let raw = &rest[1..close];
        let value = String::from_utf8(unescape(raw.as_bytes()).ok()?).ok()?;
        attributes.push((key.to_string(), value));
        rest = &rest[close + 1..];
    }
}

/// Resolves `&lt;`, `&gt;`, `&amp;`, `&quot;`, `&apos;` and numeric references.
/// Numeric references are written out as UTF-8 bytes.
pub fn unescape(raw: &[u8]) -> Result<Vec<u8>, OrmError> {
    if !raw.contains(&b'&') {
        return Ok(raw.to_vec());
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'&' {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        let end = raw[i..]
            .iter()
            .position(|b| *b == b';')
            .map(|p| i + p)
            .ok_or_else(|| OrmError::Decode("unterminated character reference".into()))?;
        let reference = &raw[i + 1..end];
        match reference {
            b"lt" => out.push(b'<'),
            b"gt" => out.push(b'>'),
            b"amp" => out.push(b'&'),
            b"quot" => out.push(b'"'),
            b"apos" => out.push(b'\''),
            _ => {
                let c = numeric_reference(reference).ok_or_else(|| {
                    OrmError::Decode(format!(
                        "unknown character reference '&{};'",
                        String::from_utf8_lossy(reference)
                    ))
                })?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        i = end + 1;
    }
    Ok(out)
}

fn numeric_reference(reference: &[u8]) -> Option<char> {
    let digits = std::str::from_utf8(reference.strip_prefix(b"#")?).ok()?;
    let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}
