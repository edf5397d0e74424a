use std::{fmt::Display, ops::Deref, rc::Rc};

use serde::Deserialize;

pub type RcString = Rc<str>;

/// Byte range into the grammar source that produced a tree node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Deserialize)]
pub struct Span {
    start: u32,
    end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Span {
        Self { start, end }
    }
    pub fn empty() -> Span {
        Self { start: 0, end: 0 }
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spanned<T> {
    pub inner: T,
    pub span: Option<Span>,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Option<Span>) -> Spanned<T> {
        Spanned { inner: value, span }
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Text of a grammar token together with its position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: RcString,
    pub span: Span,
}

impl Token {
    pub fn new(text: impl Into<RcString>, span: Span) -> Token {
        Token {
            text: text.into(),
            span,
        }
    }
}
