use std::fmt::{self, Write};

use cranelift_entity::{entity_impl, PrimaryMap};
use serde::Deserialize;

use crate::{
    ast::Ast,
    span::{RcString, Span, Token},
};

/// Handle to a node stored in a [`Tree`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);
entity_impl!(NodeId, "n");

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize)]
pub enum NodeKind {
    Rule,
    Block,
    Alt,
    Action,
    SemanticPredicate,
    Assign,
    PlusAssign,
    StringLiteral,
    TokenRef,
    RuleRef,
    Range,
    Set,
    Not,
    Wildcard,
    CharSet,
    Optional,
    Closure,
    PositiveClosure,
    ElementOptions,
    Epsilon,
    LexerAltWithCommands,
    LexerCommand,
}

impl NodeKind {
    pub const ALL: [NodeKind; 22] = [
        NodeKind::Rule,
        NodeKind::Block,
        NodeKind::Alt,
        NodeKind::Action,
        NodeKind::SemanticPredicate,
        NodeKind::Assign,
        NodeKind::PlusAssign,
        NodeKind::StringLiteral,
        NodeKind::TokenRef,
        NodeKind::RuleRef,
        NodeKind::Range,
        NodeKind::Set,
        NodeKind::Not,
        NodeKind::Wildcard,
        NodeKind::CharSet,
        NodeKind::Optional,
        NodeKind::Closure,
        NodeKind::PositiveClosure,
        NodeKind::ElementOptions,
        NodeKind::Epsilon,
        NodeKind::LexerAltWithCommands,
        NodeKind::LexerCommand,
    ];

    /// Upper case name used in tree patterns and s-expressions.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Rule => "RULE",
            NodeKind::Block => "BLOCK",
            NodeKind::Alt => "ALT",
            NodeKind::Action => "ACTION",
            NodeKind::SemanticPredicate => "SEMPRED",
            NodeKind::Assign => "ASSIGN",
            NodeKind::PlusAssign => "PLUS_ASSIGN",
            NodeKind::StringLiteral => "STRING_LITERAL",
            NodeKind::TokenRef => "TOKEN_REF",
            NodeKind::RuleRef => "RULE_REF",
            NodeKind::Range => "RANGE",
            NodeKind::Set => "SET",
            NodeKind::Not => "NOT",
            NodeKind::Wildcard => "WILDCARD",
            NodeKind::CharSet => "LEXER_CHAR_SET",
            NodeKind::Optional => "OPTIONAL",
            NodeKind::Closure => "CLOSURE",
            NodeKind::PositiveClosure => "POSITIVE_CLOSURE",
            NodeKind::ElementOptions => "ELEMENT_OPTIONS",
            NodeKind::Epsilon => "EPSILON",
            NodeKind::LexerAltWithCommands => "LEXER_ALT_ACTION",
            NodeKind::LexerCommand => "LEXER_ACTION_CALL",
        }
    }
    pub fn from_name(name: &str) -> Option<NodeKind> {
        NodeKind::ALL.into_iter().find(|k| k.name() == name)
    }
    /// `?`, `*` and `+` suffixes.
    pub fn is_ebnf_suffix(self) -> bool {
        matches!(
            self,
            NodeKind::Optional | NodeKind::Closure | NodeKind::PositiveClosure
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Option<Token>,
    /// Alternative label, `# name` in the grammar.
    pub label: Option<RcString>,
    pub non_greedy: bool,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind, token: Option<Token>) -> Node {
        Node {
            kind,
            token,
            label: None,
            non_greedy: false,
            children: Vec::new(),
        }
    }
    pub fn with_children(mut self, children: Vec<NodeId>) -> Node {
        self.children = children;
        self
    }
    pub fn text(&self) -> Option<&str> {
        self.token.as_ref().map(|t| &*t.text)
    }
    pub fn span(&self) -> Option<Span> {
        self.token.as_ref().map(|t| t.span)
    }
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Arena of grammar syntax tree nodes.
///
/// Nodes are never removed, rewrites allocate new nodes and splice them into the parent's
/// child slot so that handles held by callers stay valid.
#[derive(Clone, Default)]
pub struct Tree {
    nodes: PrimaryMap<NodeId, Node>,
}

impl Tree {
    pub fn new() -> Tree {
        Tree::default()
    }
    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node)
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id].kind
    }
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.nodes[id].text()
    }
    pub fn span(&self, id: NodeId) -> Option<Span> {
        self.nodes[id].span()
    }
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }
    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id].children.get(index).copied()
    }
    /// Overwrites a single child slot, returns the previous occupant.
    pub fn set_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> NodeId {
        std::mem::replace(&mut self.nodes[parent].children[index], child)
    }

    /// Finds the `ELEMENT_OPTIONS` child of a node, alternatives carry it as their first child
    /// while terminals and rule references carry it as a nested child.
    pub fn element_options(&self, id: NodeId) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.kind(c) == NodeKind::ElementOptions)
    }

    /// Looks up `key` in an `ELEMENT_OPTIONS` node.
    ///
    /// Entries are either `ASSIGN` nodes whose token is the key and whose single child holds
    /// the value, or bare leaves which act as flags and yield their own text.
    pub fn option(&self, options: NodeId, key: &str) -> Option<&str> {
        for &entry in self.children(options) {
            let node = &self.nodes[entry];
            if node.text() != Some(key) {
                continue;
            }
            if node.kind == NodeKind::Assign {
                return node.children.first().and_then(|&v| self.text(v));
            }
            return node.text();
        }
        None
    }

    /// Shorthand for [`Tree::element_options`] followed by [`Tree::option`].
    pub fn node_option(&self, id: NodeId, key: &str) -> Option<&str> {
        let options = self.element_options(id)?;
        self.option(options, key)
    }

    /// Copies an owned tree into the arena, returns the handle of its root.
    pub fn insert(&mut self, ast: &Ast) -> NodeId {
        let children = ast.children.iter().map(|c| self.insert(c)).collect();
        let token = ast
            .text
            .as_deref()
            .map(|text| Token::new(text, ast.span));
        let mut node = Node::new(ast.kind, token).with_children(children);
        node.label = ast.label.as_deref().map(RcString::from);
        node.non_greedy = ast.non_greedy;
        self.push(node)
    }

    /// Copies a subtree out of the arena.
    pub fn extract(&self, id: NodeId) -> Ast {
        let node = &self.nodes[id];
        Ast {
            kind: node.kind,
            text: node.text().map(ToOwned::to_owned),
            span: node.span().unwrap_or_default(),
            label: node.label.as_deref().map(ToOwned::to_owned),
            non_greedy: node.non_greedy,
            children: node.children.iter().map(|&c| self.extract(c)).collect(),
        }
    }

    pub fn to_sexpr(&self, id: NodeId) -> String {
        let mut buf = String::new();
        _ = self.write_sexpr(&mut buf, id);
        buf
    }

    /// Writes the subtree in the `(HEAD child child)` form.
    pub fn write_sexpr(&self, buf: &mut dyn Write, id: NodeId) -> fmt::Result {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            return self.write_head(buf, node);
        }
        buf.write_char('(')?;
        self.write_head(buf, node)?;
        for &child in &node.children {
            buf.write_char(' ')?;
            self.write_sexpr(buf, child)?;
        }
        buf.write_char(')')
    }

    fn write_head(&self, buf: &mut dyn Write, node: &Node) -> fmt::Result {
        match (node.kind, node.text()) {
            (NodeKind::Rule, Some(name)) => write!(buf, "RULE {name}")?,
            (NodeKind::Assign, Some(label)) => write!(buf, "= {label}")?,
            (NodeKind::PlusAssign, Some(label)) => write!(buf, "+= {label}")?,
            (
                NodeKind::StringLiteral
                | NodeKind::TokenRef
                | NodeKind::RuleRef
                | NodeKind::Action
                | NodeKind::SemanticPredicate
                | NodeKind::CharSet
                | NodeKind::LexerCommand,
                Some(text),
            ) => buf.write_str(text)?,
            (kind, _) => buf.write_str(kind.name())?,
        }
        if node.non_greedy {
            buf.write_char('?')?;
        }
        if let Some(label) = &node.label {
            write!(buf, "#{label}")?;
        }
        Ok(())
    }

    pub fn display_into(&self, buf: &mut dyn Write, id: NodeId) -> fmt::Result {
        self.display_into_indent(buf, id, 0)
    }

    fn display_into_indent(&self, buf: &mut dyn Write, id: NodeId, indent: u32) -> fmt::Result {
        for _ in 0..indent {
            buf.write_str("  ")?;
        }
        let node = &self.nodes[id];
        self.write_head(buf, node)?;
        if let Some(span) = node.span() {
            write!(buf, " @{span}")?;
        }
        buf.write_char('\n')?;
        for &child in &node.children {
            self.display_into_indent(buf, child, indent + 1)?;
        }
        Ok(())
    }
}

impl std::ops::Index<NodeId> for Tree {
    type Output = Node;
    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index]
    }
}

impl std::ops::IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, index: NodeId) -> &mut Self::Output {
        &mut self.nodes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    #[test]
    fn insert_and_extract() {
        let ast = rule(
            "a",
            block(vec![
                alt(vec![lit("'x'"), tok("ID")]),
                alt(vec![closure(block(vec![alt(vec![rref("b")])])).non_greedy()]),
            ]),
        );
        let mut tree = Tree::new();
        let root = tree.insert(&ast);
        assert_eq!(tree.extract(root), ast);
        assert_eq!(
            tree.to_sexpr(root),
            "(RULE a (BLOCK (ALT 'x' ID) (ALT (CLOSURE? (BLOCK (ALT b))))))"
        );
    }

    #[test]
    fn option_lookup() {
        let ast = alt(vec![
            options(&[("assoc", Some("right")), ("fail", None)]),
            rref("e"),
        ]);
        let mut tree = Tree::new();
        let root = tree.insert(&ast);
        assert_eq!(tree.node_option(root, "assoc"), Some("right"));
        assert_eq!(tree.node_option(root, "fail"), Some("fail"));
        assert_eq!(tree.node_option(root, "p"), None);
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(NodeKind::from_name("DOWN"), None);
    }
}
