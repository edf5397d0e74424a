use std::{collections::HashMap, fmt};

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};

use crate::{
    ast::Ast,
    atn::{build_rule, build_token_start, Atn, RuleAutomaton},
    collapse::SetCollapser,
    error::{AtnError, ErrorAccumulator},
    left_recursion::{Classifier, LeftRecursion},
    pattern::{MatchError, MatchErrorKind, Symbol},
    span::{RcString, Span},
    tree::{NodeId, NodeKind, Tree},
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleHandle(u32);
entity_impl!(RuleHandle, "r");

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RuleKind {
    Lexer,
    Parser,
}

impl RuleKind {
    /// Lexer rules start with an uppercase letter.
    pub fn from_name(name: &str) -> RuleKind {
        match name.starts_with(|c: char| c.is_uppercase()) {
            true => RuleKind::Lexer,
            false => RuleKind::Parser,
        }
    }
    pub fn is_lexer(self) -> bool {
        self == RuleKind::Lexer
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Lexer => f.write_str("lexer"),
            RuleKind::Parser => f.write_str("parser"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub name: RcString,
    pub root: NodeId,
    pub kind: RuleKind,
    /// Lexer rules only usable from other lexer rules.
    pub fragment: bool,
    /// Set by the caller for rules that the precedence rewrite should handle.
    pub left_recursive: bool,
    pub span: Option<Span>,
}

pub const EOF: i32 = -1;
pub const DEFAULT_CHANNEL: i32 = 0;
pub const HIDDEN_CHANNEL: i32 = 1;

/// Names the automaton builder resolves.
#[derive(Clone, Default, Debug)]
pub struct SymbolTable {
    tokens: HashMap<RcString, i32>,
    /// Display name of token type `i + 1`.
    token_names: Vec<RcString>,
    literals: HashMap<RcString, i32>,
    rules: HashMap<RcString, RuleHandle>,
    channels: HashMap<RcString, i32>,
}

impl SymbolTable {
    fn next_token_type(&mut self, display: &str) -> i32 {
        self.token_names.push(display.into());
        self.token_names.len() as i32
    }
    /// Returns the type of the named token, assigning a fresh one if it is new.
    pub fn define_token(&mut self, name: &str) -> i32 {
        if let Some(&ty) = self.tokens.get(name) {
            return ty;
        }
        let ty = self.next_token_type(name);
        self.tokens.insert(name.into(), ty);
        ty
    }
    /// Maps a literal (with quotes) to an existing token type.
    pub fn define_literal(&mut self, literal: &str, ty: i32) {
        self.literals.entry(literal.into()).or_insert(ty);
    }
    /// Defines a token that only exists as a literal, returns its type.
    pub fn define_literal_token(&mut self, literal: &str) -> i32 {
        if let Some(&ty) = self.literals.get(literal) {
            return ty;
        }
        let ty = self.next_token_type(literal);
        self.literals.insert(literal.into(), ty);
        ty
    }
    pub fn define_channel(&mut self, name: &str) -> i32 {
        let next = self.channels.len() as i32 + 2;
        *self.channels.entry(name.into()).or_insert(next)
    }
    pub fn define_rule(&mut self, name: &str, handle: RuleHandle) {
        self.rules.insert(name.into(), handle);
    }

    pub fn token_type(&self, name: &str) -> Option<i32> {
        match name {
            "EOF" => Some(EOF),
            _ => self.tokens.get(name).copied(),
        }
    }
    pub fn literal_type(&self, literal: &str) -> Option<i32> {
        self.literals.get(literal).copied()
    }
    pub fn token_name(&self, ty: i32) -> Option<&str> {
        match ty {
            EOF => Some("EOF"),
            _ => self
                .token_names
                .get(usize::try_from(ty - 1).ok()?)
                .map(|n| &**n),
        }
    }
    pub fn token_count(&self) -> usize {
        self.token_names.len()
    }
    pub fn channel(&self, name: &str) -> Option<i32> {
        match name {
            "DEFAULT_TOKEN_CHANNEL" => Some(DEFAULT_CHANNEL),
            "HIDDEN" => Some(HIDDEN_CHANNEL),
            _ => self.channels.get(name).copied(),
        }
    }
    pub fn rule(&self, name: &str) -> Option<RuleHandle> {
        self.rules.get(name).copied()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CompileOptions {
    pub collapse_sets: bool,
    pub classify_left_recursion: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            collapse_sets: true,
            classify_left_recursion: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuleFailure {
    pub rule: RuleHandle,
    pub error: AtnError,
}

pub struct Compiled {
    pub atn: Atn,
    pub left_recursion: SecondaryMap<RuleHandle, Option<LeftRecursion>>,
    /// Rules without an automaton, every other rule compiled.
    pub failures: Vec<RuleFailure>,
}

#[derive(Clone, Default)]
pub struct Grammar {
    pub tree: Tree,
    pub rules: PrimaryMap<RuleHandle, Rule>,
    pub symbols: SymbolTable,
}

impl Grammar {
    pub fn new() -> Grammar {
        Grammar::default()
    }

    pub fn add_rule(&mut self, ast: &Ast) -> Result<RuleHandle, MatchError> {
        self.insert_rule(ast, false)
    }
    pub fn add_fragment(&mut self, ast: &Ast) -> Result<RuleHandle, MatchError> {
        self.insert_rule(ast, true)
    }

    fn insert_rule(&mut self, ast: &Ast, fragment: bool) -> Result<RuleHandle, MatchError> {
        let name = match (ast.kind, &ast.text) {
            (NodeKind::Rule, Some(name)) => name.as_str(),
            (found, _) => {
                return Err(MatchError {
                    kind: MatchErrorKind::Mismatch {
                        expected: Symbol::Node(NodeKind::Rule),
                        found: Symbol::Node(found),
                    },
                    span: Some(ast.span),
                })
            }
        };
        let root = self.tree.insert(ast);
        let kind = RuleKind::from_name(name);
        let handle = self.rules.push(Rule {
            name: name.into(),
            root,
            kind,
            fragment,
            left_recursive: false,
            span: self.tree.span(root),
        });
        self.symbols.define_rule(name, handle);

        if kind.is_lexer() && !fragment {
            let ty = self.symbols.define_token(name);
            if let Some(literal) = self.single_literal(root) {
                self.symbols.define_literal(&literal, ty);
            }
        }
        Ok(handle)
    }

    /// `(RULE X (BLOCK (ALT 'literal')))`, lexer rules of this shape name their literal.
    fn single_literal(&self, root: NodeId) -> Option<RcString> {
        let only = |node: NodeId| match self.tree.children(node) {
            &[child] => Some(child),
            _ => None,
        };
        let block = self
            .tree
            .children(root)
            .iter()
            .copied()
            .find(|&c| self.tree.kind(c) == NodeKind::Block)?;
        let alt = only(block)?;
        let literal = only(alt)?;
        if self.tree.kind(alt) != NodeKind::Alt || self.tree.kind(literal) != NodeKind::StringLiteral
        {
            return None;
        }
        self.tree.text(literal).map(RcString::from)
    }

    pub fn mark_left_recursive(&mut self, handle: RuleHandle) {
        self.rules[handle].left_recursive = true;
    }

    pub fn rule_by_name(&self, name: &str) -> Option<RuleHandle> {
        self.symbols.rule(name)
    }

    /// Swaps in a rewritten tree for a rule, used after the precedence rewrite.
    pub fn replace_rule(&mut self, handle: RuleHandle, ast: &Ast) {
        let root = self.tree.insert(ast);
        self.rules[handle].root = root;
    }

    /// Gives every parser literal without a lexer rule its own token type.
    pub fn define_implicit_literals(&mut self) {
        let mut literals = Vec::new();
        for rule in self.rules.values() {
            if rule.kind == RuleKind::Parser {
                collect_literals(&self.tree, rule.root, &mut literals);
            }
        }
        for literal in literals {
            if self.symbols.literal_type(&literal).is_none() {
                let ty = self.symbols.define_literal_token(&literal);
                log::trace!("implicit token {ty} for {literal}");
            }
        }
    }

    pub fn collapse_sets(&mut self) {
        let collapser = SetCollapser::new();
        for rule in self.rules.values_mut() {
            rule.root = collapser.collapse(&mut self.tree, rule.root, rule.kind.is_lexer());
        }
    }

    /// Classifies the rules marked left-recursive.
    pub fn classify_left_recursion(
        &self,
        err: &ErrorAccumulator,
    ) -> Vec<(RuleHandle, Result<LeftRecursion, MatchError>)> {
        self.rules
            .iter()
            .filter(|(_, rule)| rule.left_recursive)
            .map(|(handle, rule)| {
                let classifier = Classifier::new(&self.tree, &rule.name, err);
                (handle, classifier.classify(rule.root))
            })
            .collect()
    }

    pub fn build_rule(&self, handle: RuleHandle) -> Result<RuleAutomaton, AtnError> {
        build_rule(self, handle)
    }

    /// Runs the enabled passes and builds an automaton for every rule.
    ///
    /// A rule that fails is reported in [`Compiled::failures`] and gets no automaton, the
    /// remaining rules are unaffected.
    pub fn compile(&mut self, options: &CompileOptions, err: &ErrorAccumulator) -> Compiled {
        self.define_implicit_literals();
        if options.collapse_sets {
            self.collapse_sets();
        }

        let mut failures = Vec::new();
        let mut failed: SecondaryMap<RuleHandle, bool> = SecondaryMap::new();
        let mut left_recursion = SecondaryMap::new();
        if options.classify_left_recursion {
            for (handle, result) in self.classify_left_recursion(err) {
                match result {
                    Ok(classified) => {
                        for alt in classified.unsupported(&self.tree) {
                            err.error(
                                self.tree.span(alt.node),
                                format!(
                                    "Alternative {} of left-recursive rule {} has no supported operator shape",
                                    alt.alt, classified.rule
                                ),
                            );
                        }
                        left_recursion[handle] = Some(classified);
                    }
                    Err(error) => {
                        log::debug!("{} not classified: {error}", self.rules[handle].name);
                        failed[handle] = true;
                        failures.push(RuleFailure {
                            rule: handle,
                            error: error.into(),
                        });
                    }
                }
            }
        }

        let mut atn = Atn::new();
        for handle in self.rules.keys() {
            if failed[handle] {
                continue;
            }
            let built = build_rule(self, handle).and_then(|automaton| match automaton.verify() {
                Ok(()) => Ok(automaton),
                Err(error) => {
                    log::warn!("{}: malformed automaton, {error}", self.rules[handle].name);
                    Err(AtnError::Malformed {
                        error,
                        span: self.rules[handle].span,
                    })
                }
            });
            match built {
                Ok(automaton) => atn.rules[handle] = Some(automaton),
                Err(error) => {
                    log::debug!("{} failed: {error}", self.rules[handle].name);
                    failures.push(RuleFailure {
                        rule: handle,
                        error,
                    });
                }
            }
        }
        atn.token_start = build_token_start(self, &atn);

        Compiled {
            atn,
            left_recursion,
            failures,
        }
    }

    pub fn display_rules(&self, buf: &mut dyn fmt::Write) -> fmt::Result {
        for rule in self.rules.values() {
            if rule.fragment {
                buf.write_str("fragment ")?;
            }
            self.tree.write_sexpr(buf, rule.root)?;
            buf.write_char('\n')?;
        }
        Ok(())
    }
}

fn collect_literals(tree: &Tree, node: NodeId, out: &mut Vec<RcString>) {
    if tree.kind(node) == NodeKind::StringLiteral {
        if let Some(text) = tree.text(node) {
            out.push(text.into());
        }
    }
    for &child in tree.children(node) {
        collect_literals(tree, child, out);
    }
}
