use std::{borrow::Cow, cell::RefCell, fmt};

use crate::{
    atn::VerifyError,
    pattern::MatchError,
    span::{RcString, Span, Spanned},
};

pub type Message = Cow<'static, str>;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: Spanned<Message>,
}

/// Collects diagnostics that do not abort the pass producing them.
#[derive(Default)]
pub struct ErrorAccumulator {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
    fn push(&self, severity: Severity, span: Option<Span>, message: Message) {
        self.diagnostics.borrow_mut().push(Diagnostic {
            severity,
            message: Spanned::new(message, span),
        });
    }
    pub fn error(&self, span: Option<Span>, err: impl ToString) {
        self.push(Severity::Error, span, err.to_string().into());
    }
    pub fn warning(&self, span: Option<Span>, warning: impl ToString) {
        self.push(Severity::Warning, span, warning.to_string().into());
    }
    pub fn get(&self) -> std::cell::Ref<Vec<Diagnostic>> {
        self.diagnostics.borrow()
    }
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
    pub fn is_empty(&self) -> bool {
        self.diagnostics.borrow().is_empty()
    }
    pub fn clear(&self) {
        self.diagnostics.borrow_mut().clear();
    }
}

/// Reasons a rule could not be turned into an automaton.
#[derive(Clone, Debug, PartialEq)]
pub enum AtnError {
    /// The tree does not have the shape the builder walks.
    Structure(MatchError),
    UnknownToken {
        name: RcString,
        span: Option<Span>,
    },
    UnknownRule {
        name: RcString,
        span: Option<Span>,
    },
    InvalidLiteral {
        text: RcString,
        message: &'static str,
        span: Option<Span>,
    },
    EmptyRange {
        from: i32,
        to: i32,
        span: Option<Span>,
    },
    EmptySet {
        span: Option<Span>,
    },
    /// Ranges and character sets only make sense over characters.
    LexerOnly {
        what: &'static str,
        span: Option<Span>,
    },
    TokenInLexerSet {
        name: RcString,
        span: Option<Span>,
    },
    UnknownLexerCommand {
        name: RcString,
        span: Option<Span>,
    },
    UnknownChannel {
        name: RcString,
        span: Option<Span>,
    },
    MissingCommandArgument {
        name: RcString,
        span: Option<Span>,
    },
    /// The finished automaton breaks a structural invariant.
    Malformed {
        error: VerifyError,
        span: Option<Span>,
    },
}

impl AtnError {
    pub fn span(&self) -> Option<Span> {
        match self {
            AtnError::Structure(err) => err.span,
            AtnError::UnknownToken { span, .. }
            | AtnError::UnknownRule { span, .. }
            | AtnError::InvalidLiteral { span, .. }
            | AtnError::EmptyRange { span, .. }
            | AtnError::EmptySet { span }
            | AtnError::LexerOnly { span, .. }
            | AtnError::TokenInLexerSet { span, .. }
            | AtnError::UnknownLexerCommand { span, .. }
            | AtnError::UnknownChannel { span, .. }
            | AtnError::MissingCommandArgument { span, .. }
            | AtnError::Malformed { span, .. } => *span,
        }
    }
}

impl From<MatchError> for AtnError {
    fn from(value: MatchError) -> Self {
        AtnError::Structure(value)
    }
}

impl fmt::Display for AtnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtnError::Structure(err) => write!(f, "malformed tree: {err}"),
            AtnError::UnknownToken { name, .. } => write!(f, "unknown token {name}"),
            AtnError::UnknownRule { name, .. } => write!(f, "unknown rule {name}"),
            AtnError::InvalidLiteral { text, message, .. } => {
                write!(f, "invalid literal {text}: {message}")
            }
            AtnError::EmptyRange { from, to, .. } => {
                write!(f, "range {from}..{to} matches nothing")
            }
            AtnError::EmptySet { .. } => f.write_str("set matches nothing"),
            AtnError::LexerOnly { what, .. } => write!(f, "{what} is only allowed in lexer rules"),
            AtnError::TokenInLexerSet { name, .. } => {
                write!(f, "token reference {name} is not allowed in a lexer set")
            }
            AtnError::UnknownLexerCommand { name, .. } => {
                write!(f, "unknown lexer command {name}")
            }
            AtnError::UnknownChannel { name, .. } => write!(f, "unknown channel {name}"),
            AtnError::MissingCommandArgument { name, .. } => {
                write!(f, "lexer command {name} requires an argument")
            }
            AtnError::Malformed { error, .. } => write!(f, "malformed automaton, {error}"),
        }
    }
}

impl std::error::Error for AtnError {}
