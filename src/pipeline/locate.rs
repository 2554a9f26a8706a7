//! Structural locations inside source files.
//!
//! Operations address files by semantic location (a named top-level item or
//! a verbatim anchor), never by line number. Item extents are found by
//! bracket matching that skips comments, string and character literals.

use std::ops::Range;

use regex::Regex;

use crate::models::Location;
use crate::{AppError, Result};

const IMPL_HEAD: &str = r"(?m)^[ \t]*(?:unsafe[ \t]+)?impl(?:<[^>\n]*>)?[ \t]+";

/// Byte range of `location` in `content`.
///
/// `Start` and `End` resolve to empty ranges at either end of the file.
/// Returns `Ok(None)` when the symbol or anchor does not occur.
///
/// # Errors
///
/// Returns `AppError::MalformedEdit` if the location is ambiguous or the
/// symbol name is not an identifier.
pub fn locate(content: &str, location: &Location) -> Result<Option<Range<usize>>> {
    match location {
        Location::Start => Ok(Some(0..0)),
        Location::End => Ok(Some(content.len()..content.len())),
        Location::Anchor { text } => locate_anchor(content, text),
        Location::Symbol { name } => locate_symbol(content, name),
    }
}

fn locate_anchor(content: &str, text: &str) -> Result<Option<Range<usize>>> {
    if text.is_empty() {
        return Err(AppError::MalformedEdit("anchor text is empty".into()));
    }
    let mut matches = content.match_indices(text).map(|(idx, _)| idx);
    let Some(first) = matches.next() else {
        return Ok(None);
    };
    if matches.next().is_some() {
        return Err(AppError::MalformedEdit(format!(
            "{} occurs more than once",
            Location::Anchor {
                text: text.to_owned()
            }
        )));
    }
    Ok(Some(first..first + text.len()))
}

fn locate_symbol(content: &str, name: &str) -> Result<Option<Range<usize>>> {
    let pattern = symbol_pattern(name)?;
    let regex = Regex::new(&pattern)
        .map_err(|err| AppError::MalformedEdit(format!("invalid symbol `{name}`: {err}")))?;

    let mut headers = regex.find_iter(content);
    let Some(header) = headers.next() else {
        return Ok(None);
    };
    if headers.next().is_some() {
        return Err(AppError::MalformedEdit(format!(
            "symbol `{name}` is defined more than once"
        )));
    }

    let start = leading_attributes_start(content, header.start());
    let Some(end) = item_end(content, header.start()) else {
        return Err(AppError::MalformedEdit(format!(
            "symbol `{name}` has no terminated body"
        )));
    };
    Ok(Some(start..end))
}

/// Header regex for a named item.
///
/// `impl Foo` addresses the inherent impl block of `Foo`; `impl Trait for Foo`
/// addresses a trait impl.
fn symbol_pattern(name: &str) -> Result<String> {
    let not_ident = || AppError::MalformedEdit(format!("symbol `{name}` is not an identifier"));
    let ident = |part: &str| -> Result<String> {
        let part = part.trim();
        if part.is_empty() || !part.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(not_ident());
        }
        Ok(regex::escape(part))
    };

    let Some(target) = name.trim().strip_prefix("impl ") else {
        let ident = ident(name)?;
        return Ok(format!(
            r#"(?m)^[ \t]*(?:pub(?:\([^)\n]*\))?[ \t]+)?(?:(?:async|const|unsafe|default|extern(?:[ \t]+"[^"\n]*")?)[ \t]+)*(?:fn|struct|enum|trait|mod|type|union|static|const|macro_rules!)[ \t]+{ident}\b"#
        ));
    };

    Ok(match target.split_once(" for ") {
        Some((trait_name, ty)) => {
            let (trait_name, ty) = (ident(trait_name)?, ident(ty)?);
            format!(r"{IMPL_HEAD}(?:\w+::)*{trait_name}\b[^\n{{]*?[ \t]+for[ \t]+{ty}\b")
        }
        None => {
            let ty = ident(target)?;
            format!(r"{IMPL_HEAD}{ty}\b(?:<[^>\n]*>)?[ \t]*(?:\{{|where\b|$)")
        }
    })
}

/// Walk back from the header's line over doc comments and attributes.
fn leading_attributes_start(content: &str, header_start: usize) -> usize {
    let mut start = content[..header_start].rfind('\n').map_or(0, |idx| idx + 1);
    while start > 0 {
        let prev_start = content[..start - 1].rfind('\n').map_or(0, |idx| idx + 1);
        let line = content[prev_start..start - 1].trim_start();
        if line.starts_with("///") || line.starts_with("#[") {
            start = prev_start;
        } else {
            break;
        }
    }
    start
}

/// End of the item whose header starts at `from`: past the matching `}` of
/// its body, or past `;` for body-less items, including the line break.
fn item_end(content: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut body_depth = None;

    for (idx, byte) in CodeBytes::new(content, from) {
        match (byte, body_depth) {
            (b'(' | b'[', _) => depth += 1,
            (b')' | b']', _) => depth = depth.checked_sub(1)?,
            (b'{', None) if depth == 0 => body_depth = Some(1usize),
            (b'{', Some(d)) => body_depth = Some(d + 1),
            (b'}', Some(1)) => return Some(include_line_break(content, idx + 1)),
            (b'}', Some(d)) => body_depth = Some(d - 1),
            (b';', None) if depth == 0 => return Some(include_line_break(content, idx + 1)),
            _ => {}
        }
    }
    None
}

fn include_line_break(content: &str, end: usize) -> usize {
    if content[end..].starts_with("\r\n") {
        end + 2
    } else if content[end..].starts_with('\n') {
        end + 1
    } else {
        end
    }
}

/// Whether every `()`, `[]` and `{}` outside comments and literals is balanced.
#[must_use]
pub fn is_balanced(content: &str) -> bool {
    let mut stack = Vec::new();
    for (_, byte) in CodeBytes::new(content, 0) {
        match byte {
            b'(' | b'[' | b'{' => stack.push(byte),
            b')' | b']' | b'}' => {
                let expected = match byte {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Iterator over bytes of code, skipping comments, strings and char literals.
struct CodeBytes<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> CodeBytes<'a> {
    fn new(content: &'a str, from: usize) -> Self {
        Self {
            bytes: content.as_bytes(),
            pos: from,
        }
    }

    fn at(&self, idx: usize) -> Option<u8> {
        self.bytes.get(idx).copied()
    }

    fn skip_line_comment(&mut self) {
        while let Some(b) = self.at(self.pos) {
            if b == b'\n' {
                return;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        let mut nesting = 1usize;
        self.pos += 2;
        while nesting > 0 && self.pos < self.bytes.len() {
            match (self.at(self.pos), self.at(self.pos + 1)) {
                (Some(b'/'), Some(b'*')) => {
                    nesting += 1;
                    self.pos += 2;
                }
                (Some(b'*'), Some(b'/')) => {
                    nesting -= 1;
                    self.pos += 2;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_string(&mut self) {
        self.pos += 1;
        while let Some(b) = self.at(self.pos) {
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b'"' => return,
                _ => {}
            }
        }
    }

    /// Raw string starting at `self.pos` (`r`, hashes, quote); false if not one.
    fn skip_raw_string(&mut self) -> bool {
        let prev_is_ident = self.pos > 0
            && self
                .at(self.pos - 1)
                .is_some_and(|b| (b.is_ascii_alphanumeric() || b == b'_') && b != b'b');
        if prev_is_ident {
            return false;
        }
        let mut cursor = self.pos + 1;
        let mut hashes = 0usize;
        while self.at(cursor) == Some(b'#') {
            hashes += 1;
            cursor += 1;
        }
        if self.at(cursor) != Some(b'"') {
            return false;
        }
        cursor += 1;
        while cursor < self.bytes.len() {
            if self.bytes[cursor] == b'"'
                && self.bytes[cursor + 1..]
                    .iter()
                    .take(hashes)
                    .filter(|&&b| b == b'#')
                    .count()
                    == hashes
            {
                self.pos = cursor + 1 + hashes;
                return true;
            }
            cursor += 1;
        }
        self.pos = self.bytes.len();
        true
    }

    /// Char literal at `self.pos`; lifetimes and labels are left alone.
    fn skip_char_literal(&mut self) -> bool {
        match self.at(self.pos + 1) {
            Some(b'\\') => {
                let mut cursor = self.pos + 2;
                while let Some(b) = self.at(cursor) {
                    cursor += 1;
                    if b == b'\'' && cursor > self.pos + 3 {
                        self.pos = cursor;
                        return true;
                    }
                    if b == b'\n' {
                        return false;
                    }
                }
                false
            }
            Some(first) => {
                let width = utf8_width(first);
                if self.at(self.pos + 1 + width) == Some(b'\'') {
                    self.pos += width + 2;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

fn utf8_width(first: u8) -> usize {
    match first {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

impl Iterator for CodeBytes<'_> {
    type Item = (usize, u8);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let byte = self.at(self.pos)?;
            match (byte, self.at(self.pos + 1)) {
                (b'/', Some(b'/')) => self.skip_line_comment(),
                (b'/', Some(b'*')) => self.skip_block_comment(),
                (b'"', _) => self.skip_string(),
                (b'r', Some(b'"' | b'#')) if self.skip_raw_string() => {}
                (b'\'', _) if self.skip_char_literal() => {}
                _ => {
                    let idx = self.pos;
                    self.pos += 1;
                    return Some((idx, byte));
                }
            }
        }
    }
}
