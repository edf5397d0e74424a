use crate::interval::IntervalSet;

pub const MIN_CHAR: i32 = 0;
pub const MAX_CHAR: i32 = 0x10FFFF;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LiteralError {
    /// Character offset into the literal text.
    pub offset: u32,
    pub message: &'static str,
}

#[derive(Clone)]
struct Lexer<'a> {
    inner: std::str::Chars<'a>,
    consumed: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Lexer<'a> {
        Self {
            inner: src.chars(),
            consumed: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.inner.clone().next()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.inner.next();
        if c.is_some() {
            self.consumed += 1;
        }
        c
    }

    fn char(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.next();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: &'static str) -> Result<T, LiteralError> {
        Err(LiteralError {
            offset: self.consumed,
            message,
        })
    }

    /// Reads one possibly escaped character, `extra` lists characters that may additionally
    /// be escaped in this context.
    fn character(&mut self, extra: &[char]) -> Result<Option<i32>, LiteralError> {
        match self.next() {
            Some('\\') => {
                let c = match self.next() {
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('b') => '\u{8}',
                    Some('f') => '\u{c}',
                    Some('\\') => '\\',
                    Some('\'') => '\'',
                    Some('u') => return self.unicode_escape().map(Some),
                    Some(c) if extra.contains(&c) => c,
                    Some(_) => return self.error("Unknown character escape"),
                    None => return self.error("Unterminated escape"),
                };
                Ok(Some(c as i32))
            }
            Some(c) => Ok(Some(c as i32)),
            None => Ok(None),
        }
    }

    /// `\uXXXX` or `\u{X..}`, the `\u` is already consumed.
    fn unicode_escape(&mut self) -> Result<i32, LiteralError> {
        let braced = self.char('{');
        let mut value: u32 = 0;
        let mut digits = 0;
        loop {
            if braced && self.char('}') {
                break;
            }
            if !braced && digits == 4 {
                break;
            }
            let Some(digit) = self.peek().and_then(|c| c.to_digit(16)) else {
                return self.error("Invalid unicode escape");
            };
            self.next();
            value = value * 16 + digit;
            digits += 1;
            if value > MAX_CHAR as u32 {
                return self.error("Unicode escape out of range");
            }
        }
        if digits == 0 {
            return self.error("Empty unicode escape");
        }
        Ok(value as i32)
    }
}

/// Decodes a quoted string literal like `'a\n'` into its code points.
pub fn decode_literal(text: &str) -> Result<Vec<i32>, LiteralError> {
    let mut l = Lexer::new(text);
    if !l.char('\'') {
        return l.error("Expected opening quote");
    }
    let mut out = Vec::new();
    loop {
        if l.peek() == Some('\'') {
            l.next();
            break;
        }
        match l.character(&[])? {
            Some(c) => out.push(c),
            None => return l.error("Expected closing quote"),
        }
    }
    if l.peek().is_some() {
        return l.error("Trailing characters after closing quote");
    }
    Ok(out)
}

/// Code point of a literal that is exactly one character long.
pub fn char_value(text: &str) -> Option<i32> {
    match decode_literal(text).ok()?.as_slice() {
        &[c] => Some(c),
        _ => None,
    }
}

/// Parses a lexer character set like `[a-z_\]]`.
pub fn parse_char_set(text: &str) -> Result<IntervalSet, LiteralError> {
    const ESCAPABLE: &[char] = &[']', '-', '['];

    let mut l = Lexer::new(text);
    if !l.char('[') {
        return l.error("Expected opening bracket");
    }
    let mut set = IntervalSet::new();
    loop {
        if l.char(']') {
            break;
        }
        let Some(from) = l.character(ESCAPABLE)? else {
            return l.error("Expected closing bracket");
        };
        let mut lookahead = l.clone();
        if lookahead.char('-') && !matches!(lookahead.peek(), Some(']') | None) {
            l = lookahead;
            let Some(to) = l.character(ESCAPABLE)? else {
                return l.error("Expected closing bracket");
            };
            if from > to {
                return l.error("Reversed character range");
            }
            set.add_range(from, to);
        } else {
            set.add(from);
        }
    }
    if l.peek().is_some() {
        return l.error("Trailing characters after closing bracket");
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(decode_literal("'ab'"), Ok(vec!['a' as i32, 'b' as i32]));
        assert_eq!(decode_literal(r"'\n\''"), Ok(vec![10, '\'' as i32]));
        assert_eq!(decode_literal(r"'é\u{1F600}'"), Ok(vec![0xe9, 0x1F600]));
        assert_eq!(decode_literal("''"), Ok(vec![]));
        assert!(decode_literal("'abc").is_err());
        assert!(decode_literal(r"'\q'").is_err());
        assert_eq!(char_value("'x'"), Some('x' as i32));
        assert_eq!(char_value("'xy'"), None);
    }

    #[test]
    fn char_sets() {
        let set = parse_char_set(r"[a-z_\]-]").unwrap();
        assert!(set.contains('m' as i32));
        assert!(set.contains('_' as i32));
        assert!(set.contains(']' as i32));
        assert!(set.contains('-' as i32));
        assert!(!set.contains('A' as i32));
        assert_eq!(set.len(), 29);

        assert!(parse_char_set("[z-a]").is_err());
        assert!(parse_char_set("[ab").is_err());
        assert!(parse_char_set("[]").unwrap().is_empty());
    }
}
