//! Matching over flattened grammar trees.
//!
//! A subtree is serialized into a [`TreeStream`] of node kinds interleaved with [`Symbol::Down`]
//! and [`Symbol::Up`] markers. The passes walk that stream with a [`Matcher`], choosing between
//! alternatives with a precomputed [`Decision`] and speculatively trying shapes where the choice
//! depends on more than a bounded lookahead.

mod decision;
mod rewrite;

pub use decision::{AltIndex, Decision, DecisionBuilder, PredicateCx};
pub use rewrite::{instantiate, Captures, Replacement, Slot, Template};

use std::fmt;

use crate::{
    span::Span,
    tree::{NodeId, NodeKind, Tree},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Symbol {
    Node(NodeKind),
    Down,
    Up,
    Eof,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Node(kind) => f.write_str(kind.name()),
            Symbol::Down => f.write_str("DOWN"),
            Symbol::Up => f.write_str("UP"),
            Symbol::Eof => f.write_str("EOF"),
        }
    }
}

#[derive(Clone, Copy)]
struct Item {
    symbol: Symbol,
    /// The node itself, or for `Down`/`Up` the node whose children are entered or left.
    node: NodeId,
}

/// Position in a [`TreeStream`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Cursor(u32);

impl Cursor {
    pub fn index(self) -> usize {
        self.0 as usize
    }
    pub fn next(self) -> Cursor {
        Cursor(self.0 + 1)
    }
    pub fn offset(self, n: u32) -> Cursor {
        Cursor(self.0 + n)
    }
}

/// Preorder serialization of a subtree.
pub struct TreeStream {
    items: Vec<Item>,
}

impl TreeStream {
    pub fn new(tree: &Tree, root: NodeId) -> TreeStream {
        let mut items = Vec::new();
        Self::flatten(tree, root, &mut items);
        TreeStream { items }
    }

    fn flatten(tree: &Tree, node: NodeId, out: &mut Vec<Item>) {
        out.push(Item {
            symbol: Symbol::Node(tree.kind(node)),
            node,
        });
        let children = tree.children(node);
        if children.is_empty() {
            return;
        }
        out.push(Item {
            symbol: Symbol::Down,
            node,
        });
        for &child in children {
            Self::flatten(tree, child, out);
        }
        out.push(Item {
            symbol: Symbol::Up,
            node,
        });
    }

    pub fn start(&self) -> Cursor {
        Cursor(0)
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn symbol(&self, at: Cursor) -> Symbol {
        self.items
            .get(at.index())
            .map_or(Symbol::Eof, |i| i.symbol)
    }
    /// Node under the cursor, `None` for markers and past the end.
    pub fn node(&self, at: Cursor) -> Option<NodeId> {
        let item = self.items.get(at.index())?;
        match item.symbol {
            Symbol::Node(_) => Some(item.node),
            _ => None,
        }
    }
    /// Like [`TreeStream::node`] but also reports the owner of `Down`/`Up` markers.
    fn owner(&self, at: Cursor) -> Option<NodeId> {
        self.items.get(at.index()).map(|i| i.node)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MatchErrorKind {
    /// No alternative of a decision accepts the lookahead.
    NoViableAlternative {
        decision: &'static str,
        found: Symbol,
    },
    /// A one-or-more loop matched zero times.
    EarlyExit { decision: &'static str },
    Mismatch { expected: Symbol, found: Symbol },
    /// A rewrite template names a capture the match did not produce.
    MissingCapture { name: &'static str },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MatchError {
    pub kind: MatchErrorKind,
    pub span: Option<Span>,
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MatchErrorKind::NoViableAlternative { decision, found } => {
                write!(f, "no viable alternative for {decision} at {found}")?
            }
            MatchErrorKind::EarlyExit { decision } => {
                write!(f, "{decision} requires at least one element")?
            }
            MatchErrorKind::Mismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")?
            }
            MatchErrorKind::MissingCapture { name } => write!(f, "missing capture `{name}`")?,
        }
        if let Some(span) = self.span {
            write!(f, " at {span}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MatchError {}

/// Cursor over a [`TreeStream`].
///
/// The matcher is `Copy`, a speculative attempt runs on a copy and the result is committed by
/// moving the original cursor.
#[derive(Clone, Copy)]
pub struct Matcher<'a> {
    tree: &'a Tree,
    stream: &'a TreeStream,
    cursor: Cursor,
}

impl<'a> Matcher<'a> {
    pub fn new(tree: &'a Tree, stream: &'a TreeStream) -> Matcher<'a> {
        Matcher {
            tree,
            stream,
            cursor: stream.start(),
        }
    }
    pub fn tree(&self) -> &'a Tree {
        self.tree
    }
    pub fn stream(&self) -> &'a TreeStream {
        self.stream
    }
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }
    pub fn reset(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// Symbol `k` positions ahead, `la(1)` is the next one.
    pub fn la(&self, k: u32) -> Symbol {
        debug_assert!(k > 0);
        self.stream.symbol(self.cursor.offset(k - 1))
    }
    pub fn peek(&self) -> Symbol {
        self.la(1)
    }
    pub fn peek_kind(&self) -> Option<NodeKind> {
        match self.peek() {
            Symbol::Node(kind) => Some(kind),
            _ => None,
        }
    }
    pub fn peek_node(&self) -> Option<NodeId> {
        self.stream.node(self.cursor)
    }
    pub fn next_is(&self, kind: NodeKind) -> bool {
        self.peek() == Symbol::Node(kind)
    }
    pub fn at_up(&self) -> bool {
        self.peek() == Symbol::Up
    }

    fn span_here(&self) -> Option<Span> {
        let owner = self.stream.owner(self.cursor)?;
        self.tree.span(owner)
    }

    pub fn mismatch(&self, expected: Symbol) -> MatchError {
        MatchError {
            kind: MatchErrorKind::Mismatch {
                expected,
                found: self.peek(),
            },
            span: self.span_here(),
        }
    }
    pub fn no_viable(&self, decision: &'static str) -> MatchError {
        MatchError {
            kind: MatchErrorKind::NoViableAlternative {
                decision,
                found: self.peek(),
            },
            span: self.span_here(),
        }
    }
    pub fn early_exit(&self, decision: &'static str) -> MatchError {
        MatchError {
            kind: MatchErrorKind::EarlyExit { decision },
            span: self.span_here(),
        }
    }

    fn consume(&mut self, expected: Symbol) -> Result<(), MatchError> {
        if self.peek() != expected {
            return Err(self.mismatch(expected));
        }
        self.cursor = self.cursor.next();
        Ok(())
    }

    /// Consumes a node of `kind`, its children are left to the caller.
    pub fn expect(&mut self, kind: NodeKind) -> Result<NodeId, MatchError> {
        let node = self.peek_node();
        self.consume(Symbol::Node(kind))?;
        // consume only succeeds on a node symbol
        node.ok_or_else(|| self.mismatch(Symbol::Node(kind)))
    }
    pub fn expect_one_of(&mut self, kinds: &[NodeKind]) -> Result<NodeId, MatchError> {
        match self.peek_kind() {
            Some(kind) if kinds.contains(&kind) => self.expect(kind),
            _ => Err(self.mismatch(Symbol::Node(kinds[0]))),
        }
    }
    pub fn down(&mut self) -> Result<(), MatchError> {
        self.consume(Symbol::Down)
    }
    pub fn up(&mut self) -> Result<(), MatchError> {
        self.consume(Symbol::Up)
    }

    /// Skips the children of the node just consumed, if it has any.
    pub fn skip_children(&mut self) {
        if self.peek() != Symbol::Down {
            return;
        }
        let mut depth = 0u32;
        loop {
            match self.peek() {
                Symbol::Down => depth += 1,
                Symbol::Up => depth -= 1,
                Symbol::Eof => return,
                Symbol::Node(_) => {}
            }
            self.cursor = self.cursor.next();
            if depth == 0 {
                return;
            }
        }
    }

    /// Consumes any one node together with its subtree.
    pub fn any(&mut self) -> Result<NodeId, MatchError> {
        let Some(node) = self.peek_node() else {
            return Err(self.no_viable("wildcard"));
        };
        self.cursor = self.cursor.next();
        self.skip_children();
        Ok(node)
    }

    /// Runs `f` on a copy of the matcher, on success returns its value and the cursor it
    /// stopped at. The matcher itself never moves.
    pub fn speculate<T>(
        &self,
        f: impl FnOnce(&mut Matcher<'a>) -> Result<T, MatchError>,
    ) -> Result<(T, Cursor), MatchError> {
        let mut copy = *self;
        let value = f(&mut copy)?;
        Ok((value, copy.cursor))
    }

    /// Runs `f` speculatively and commits the cursor only if it succeeded.
    pub fn attempt<T>(
        &mut self,
        f: impl FnOnce(&mut Matcher<'a>) -> Result<T, MatchError>,
    ) -> Result<T, MatchError> {
        let (value, cursor) = self.speculate(f)?;
        self.cursor = cursor;
        Ok(value)
    }

    /// Predicts the alternative of `decision` from the current position.
    pub fn predict(
        &self,
        decision: &Decision,
        ancestors: &[NodeId],
        in_lexer: bool,
    ) -> Result<AltIndex, MatchError> {
        let cx = PredicateCx {
            tree: self.tree,
            stream: self.stream,
            ancestors,
            start: self.cursor,
            in_lexer,
        };
        decision.predict(&cx).ok_or_else(|| self.no_viable(decision.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn stream_text(stream: &TreeStream) -> String {
        (0..stream.len())
            .map(|i| stream.symbol(Cursor(i as u32)).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn flattening() {
        let mut tree = Tree::new();
        let root = tree.insert(&block(vec![alt(vec![lit("'a'"), tok("B")]), alt(vec![])]));
        let stream = TreeStream::new(&tree, root);
        assert_eq!(
            stream_text(&stream),
            "BLOCK DOWN ALT DOWN STRING_LITERAL TOKEN_REF UP ALT UP"
        );
    }

    #[test]
    fn expect_skip_and_speculate() {
        let mut tree = Tree::new();
        let root = tree.insert(&alt(vec![
            assign("x", rref("e")),
            tok("A").with_options(&[("fail", None)]),
            tok("B"),
        ]));
        let stream = TreeStream::new(&tree, root);
        let mut m = Matcher::new(&tree, &stream);

        m.expect(NodeKind::Alt).unwrap();
        m.down().unwrap();
        let assign = m.any().unwrap();
        assert_eq!(tree.text(assign), Some("x"));

        let err = m.speculate(|m| m.expect(NodeKind::RuleRef)).unwrap_err();
        assert_eq!(
            err.kind,
            MatchErrorKind::Mismatch {
                expected: Symbol::Node(NodeKind::RuleRef),
                found: Symbol::Node(NodeKind::TokenRef)
            }
        );

        let before = m.cursor();
        let (a, after) = m
            .speculate(|m| {
                let a = m.expect(NodeKind::TokenRef)?;
                m.skip_children();
                Ok(a)
            })
            .unwrap();
        assert_eq!(m.cursor(), before);
        assert_eq!(tree.text(a), Some("A"));
        m.reset(after);

        m.expect(NodeKind::TokenRef).unwrap();
        m.up().unwrap();
        assert_eq!(m.peek(), Symbol::Eof);
        assert!(m.up().is_err());
    }
}
