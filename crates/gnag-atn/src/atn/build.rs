use crate::{
    error::AtnError,
    grammar::{Grammar, RuleHandle, RuleKind},
    pattern::{MatchError, Matcher, TreeStream},
    tree::{NodeId, NodeKind},
};

use super::{
    Atn, AtnFactory, Automaton, Fragments, Handle, LexerFactory, ParserFactory, RuleAutomaton,
    StateId, StateKind, TokenStart,
};

/// Builds the automaton of one rule.
pub fn build_rule(grammar: &Grammar, handle: RuleHandle) -> Result<RuleAutomaton, AtnError> {
    let rule = &grammar.rules[handle];
    let fragments = Fragments::new(&grammar.tree);
    let (graph, start, stop) = match rule.kind {
        RuleKind::Parser => {
            AtnBuilder::new(ParserFactory::new(fragments, &grammar.symbols)).rule(rule.root)?
        }
        RuleKind::Lexer => {
            AtnBuilder::new(LexerFactory::new(fragments, &grammar.symbols)).rule(rule.root)?
        }
    };
    log::trace!("{}: {} states", rule.name, graph.len());
    Ok(RuleAutomaton {
        rule: handle,
        kind: rule.kind,
        start,
        stop,
        graph,
    })
}

/// Builds the lexer entry automaton, `None` if there are no token rules.
pub fn build_token_start(grammar: &Grammar, atn: &Atn) -> Option<TokenStart> {
    let tokens: Vec<_> = grammar
        .rules
        .iter()
        .filter(|(_, r)| r.kind == RuleKind::Lexer && !r.fragment)
        .filter(|&(h, _)| atn.rule(h).is_some())
        .map(|(h, r)| (h, r.root))
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut fragments = Fragments::new(&grammar.tree);
    let start = fragments.new_state(StateKind::TokenStart, None);
    let stop = fragments.new_state(StateKind::RuleStop, None);
    for (alt, (rule, root)) in tokens.into_iter().enumerate() {
        fragments.set_outer_alt(alt as u32 + 1);
        let call = fragments.rule_call(root, rule, 0);
        fragments.link(start, call.entry);
        fragments.link(call.exit, stop);
    }
    let mut graph = fragments.finish();
    graph.define_decision(start);
    Some(TokenStart { start, stop, graph })
}

/// Walks a rule tree and asks the factory for a fragment at every element.
pub struct AtnBuilder<'g, F> {
    factory: F,
    _grammar: std::marker::PhantomData<&'g ()>,
}

impl<'g, F: AtnFactory<'g>> AtnBuilder<'g, F> {
    pub fn new(factory: F) -> AtnBuilder<'g, F> {
        AtnBuilder {
            factory,
            _grammar: std::marker::PhantomData,
        }
    }

    /// `^(RULE ... BLOCK ...)`, returns the automaton with its start and stop state.
    pub fn rule(
        mut self,
        root: NodeId,
    ) -> Result<(Automaton, StateId, StateId), AtnError> {
        let tree = self.factory.fragments().tree();
        let stream = TreeStream::new(tree, root);
        let mut m = Matcher::new(tree, &stream);

        let node = m.expect(NodeKind::Rule)?;
        let fragments = self.factory.fragments();
        let start = fragments.new_state(StateKind::RuleStart, Some(node));
        let stop = fragments.new_state(StateKind::RuleStop, Some(node));

        m.down()?;
        while !m.next_is(NodeKind::Block) {
            m.any()?;
        }
        let body = self.rule_block(&mut m)?;
        while !m.at_up() {
            m.any()?;
        }
        m.up()?;

        self.factory.fragments().rule(start, stop, body);
        Ok((self.factory.finish(), start, stop))
    }

    fn rule_block(&mut self, m: &mut Matcher) -> Result<Handle, AtnError> {
        let block = m.expect(NodeKind::Block)?;
        m.down()?;
        if m.next_is(NodeKind::ElementOptions) {
            m.any()?;
        }
        let mut alts = Vec::new();
        while !m.at_up() {
            self.factory.fragments().set_outer_alt(alts.len() as u32 + 1);
            alts.push(self.alternative(m)?);
        }
        if alts.is_empty() {
            return Err(m.early_exit("rule_block").into());
        }
        m.up()?;
        self.factory.fragments().set_outer_alt(0);
        Ok(self.factory.fragments().block(block, None, &alts))
    }

    fn block(&mut self, m: &mut Matcher, ebnf: Option<NodeId>) -> Result<Handle, AtnError> {
        let block = m.expect(NodeKind::Block)?;
        m.down()?;
        if m.next_is(NodeKind::ElementOptions) {
            m.any()?;
        }
        let mut alts = Vec::new();
        while !m.at_up() {
            alts.push(self.alternative(m)?);
        }
        if alts.is_empty() {
            return Err(m.early_exit("block").into());
        }
        m.up()?;
        Ok(self.factory.fragments().block(block, ebnf, &alts))
    }

    fn alternative(&mut self, m: &mut Matcher) -> Result<Handle, AtnError> {
        match m.peek_kind() {
            Some(NodeKind::LexerAltWithCommands) => {
                m.expect(NodeKind::LexerAltWithCommands)?;
                m.down()?;
                let alt = self.alternative(m)?;
                let mut commands = Vec::new();
                while !m.at_up() {
                    commands.push(m.expect(NodeKind::LexerCommand)?);
                    m.skip_children();
                }
                if commands.is_empty() {
                    return Err(m.early_exit("lexer_commands").into());
                }
                m.up()?;
                self.factory.lexer_commands(alt, &commands)
            }
            Some(NodeKind::Alt) => {
                let alt = m.expect(NodeKind::Alt)?;
                m.down()?;
                if m.next_is(NodeKind::ElementOptions) {
                    m.any()?;
                }
                let mut elements = Vec::new();
                while !m.at_up() {
                    elements.push(self.element(m)?);
                }
                if elements.is_empty() {
                    return Err(m.early_exit("alternative").into());
                }
                m.up()?;
                log::trace!("alternative {alt} with {} elements", elements.len());
                Ok(self.factory.fragments().elem_list(&elements))
            }
            _ => Err(m.no_viable("alternative").into()),
        }
    }

    fn element(&mut self, m: &mut Matcher) -> Result<Handle, AtnError> {
        let Some(kind) = m.peek_kind() else {
            return Err(m.no_viable("element").into());
        };
        match kind {
            NodeKind::Assign | NodeKind::PlusAssign => self.labeled_element(m),
            NodeKind::StringLiteral
            | NodeKind::TokenRef
            | NodeKind::RuleRef
            | NodeKind::Range
            | NodeKind::Set
            | NodeKind::Not
            | NodeKind::Wildcard => self.atom(m),
            NodeKind::CharSet => {
                let node = m.expect(NodeKind::CharSet)?;
                m.skip_children();
                self.factory.char_set_literal(node)
            }
            NodeKind::Optional | NodeKind::Closure | NodeKind::PositiveClosure => self.subrule(m),
            NodeKind::Block => self.block(m, None),
            NodeKind::Action => {
                let node = m.expect(NodeKind::Action)?;
                m.skip_children();
                Ok(self.factory.action(node))
            }
            NodeKind::SemanticPredicate => {
                let node = m.expect(NodeKind::SemanticPredicate)?;
                m.skip_children();
                Ok(self.factory.sempred(node))
            }
            NodeKind::Epsilon => {
                let node = m.expect(NodeKind::Epsilon)?;
                m.skip_children();
                Ok(self.factory.fragments().epsilon(Some(node)))
            }
            NodeKind::Rule
            | NodeKind::Alt
            | NodeKind::ElementOptions
            | NodeKind::LexerAltWithCommands
            | NodeKind::LexerCommand => Err(m.no_viable("element").into()),
        }
    }

    /// `^(= label element)`, the label itself does not change the automaton.
    fn labeled_element(&mut self, m: &mut Matcher) -> Result<Handle, AtnError> {
        m.expect_one_of(&[NodeKind::Assign, NodeKind::PlusAssign])?;
        m.down()?;
        let handle = if m.next_is(NodeKind::Block) {
            self.block(m, None)?
        } else {
            self.atom(m)?
        };
        m.up()?;
        Ok(handle)
    }

    /// `^(suffix BLOCK)`, a bare element under the suffix is treated as a one-alternative block.
    fn subrule(&mut self, m: &mut Matcher) -> Result<Handle, AtnError> {
        let suffix = m.expect_one_of(&[
            NodeKind::Optional,
            NodeKind::Closure,
            NodeKind::PositiveClosure,
        ])?;
        m.down()?;
        let handle = if m.next_is(NodeKind::Block) {
            self.block(m, Some(suffix))?
        } else {
            let Some(node) = m.peek_node() else {
                return Err(m.no_viable("subrule").into());
            };
            let inner = self.element(m)?;
            self.factory
                .fragments()
                .block(node, Some(suffix), &[inner])
        };
        m.up()?;
        Ok(handle)
    }

    fn atom(&mut self, m: &mut Matcher) -> Result<Handle, AtnError> {
        match m.peek_kind() {
            Some(NodeKind::Not) => {
                m.expect(NodeKind::Not)?;
                m.down()?;
                let handle = match m.peek_kind() {
                    Some(NodeKind::Set) => self.block_set(m, true)?,
                    // `~'a'` and `~A` are sets of one
                    Some(_) => {
                        let element = Self::set_element(m)?;
                        self.factory.set(element, &[element], true)?
                    }
                    None => return Err(m.no_viable("not").into()),
                };
                m.up()?;
                Ok(handle)
            }
            Some(NodeKind::Range) => {
                let (node, from, to) = Self::range(m)?;
                self.factory.range(node, from, to)
            }
            Some(NodeKind::Wildcard) => {
                let node = m.expect(NodeKind::Wildcard)?;
                m.skip_children();
                Ok(self.factory.wildcard(node))
            }
            Some(NodeKind::Set) => self.block_set(m, false),
            Some(NodeKind::StringLiteral) => {
                let node = m.expect(NodeKind::StringLiteral)?;
                m.skip_children();
                self.factory.string_literal(node)
            }
            Some(NodeKind::TokenRef) => {
                let node = m.expect(NodeKind::TokenRef)?;
                m.skip_children();
                self.factory.token_ref(node)
            }
            Some(NodeKind::RuleRef) => {
                let node = m.expect(NodeKind::RuleRef)?;
                m.skip_children();
                self.factory.rule_ref(node)
            }
            _ => Err(m.no_viable("atom").into()),
        }
    }

    fn block_set(&mut self, m: &mut Matcher, invert: bool) -> Result<Handle, AtnError> {
        let set = m.expect(NodeKind::Set)?;
        m.down()?;
        let mut elements = Vec::new();
        while !m.at_up() {
            elements.push(Self::set_element(m)?);
        }
        if elements.is_empty() {
            return Err(m.early_exit("set").into());
        }
        m.up()?;
        self.factory.set(set, &elements, invert)
    }

    fn set_element(m: &mut Matcher) -> Result<NodeId, MatchError> {
        match m.peek_kind() {
            Some(NodeKind::Range) => Self::range(m).map(|(node, _, _)| node),
            Some(kind @ (NodeKind::StringLiteral | NodeKind::TokenRef | NodeKind::CharSet)) => {
                let node = m.expect(kind)?;
                m.skip_children();
                Ok(node)
            }
            _ => Err(m.no_viable("set_element")),
        }
    }

    /// `^(RANGE STRING_LITERAL STRING_LITERAL)`
    fn range(m: &mut Matcher) -> Result<(NodeId, NodeId, NodeId), MatchError> {
        let node = m.expect(NodeKind::Range)?;
        m.down()?;
        let from = m.expect(NodeKind::StringLiteral)?;
        m.skip_children();
        let to = m.expect(NodeKind::StringLiteral)?;
        m.skip_children();
        m.up()?;
        Ok((node, from, to))
    }
}
