use std::rc::Rc;

use crate::{
    error::AtnError,
    grammar::{RuleHandle, SymbolTable},
    interval::IntervalSet,
    literal::{char_value, decode_literal, parse_char_set, LiteralError, MAX_CHAR, MIN_CHAR},
    span::RcString,
    tree::{NodeId, NodeKind, Tree},
};

use super::{Automaton, BlockFlavor, Handle, LexerCommand, State, StateId, StateKind, Transition};

/// Composition of automaton fragments shared by the parser and lexer factories.
pub struct Fragments<'g> {
    tree: &'g Tree,
    graph: Automaton,
    outer_alt: u32,
    predicates: u32,
    actions: u32,
}

impl<'g> Fragments<'g> {
    pub fn new(tree: &'g Tree) -> Fragments<'g> {
        Fragments {
            tree,
            graph: Automaton::new(),
            outer_alt: 0,
            predicates: 0,
            actions: 0,
        }
    }
    pub fn tree(&self) -> &'g Tree {
        self.tree
    }
    pub fn graph(&self) -> &Automaton {
        &self.graph
    }
    pub fn finish(self) -> Automaton {
        self.graph
    }
    /// States created from now on belong to outer alternative `alt`.
    pub fn set_outer_alt(&mut self, alt: u32) {
        self.outer_alt = alt;
    }

    pub fn new_state(&mut self, kind: StateKind, node: Option<NodeId>) -> StateId {
        self.graph.add_state(State::new(kind, node, self.outer_alt))
    }

    pub fn link(&mut self, from: StateId, to: StateId) {
        self.graph.epsilon(from, to);
    }

    /// `entry -transition-> exit`
    pub fn single(&mut self, node: NodeId, transition: Transition) -> Handle {
        let entry = self.new_state(StateKind::Basic, Some(node));
        let exit = self.new_state(StateKind::Basic, Some(node));
        self.graph.connect(entry, exit, transition);
        Handle { entry, exit }
    }

    /// A chain of transitions, one per consumed symbol.
    pub fn chain(&mut self, node: NodeId, transitions: impl IntoIterator<Item = Transition>) -> Handle {
        let entry = self.new_state(StateKind::Basic, Some(node));
        let mut exit = entry;
        for transition in transitions {
            let next = self.new_state(StateKind::Basic, Some(node));
            self.graph.connect(exit, next, transition);
            exit = next;
        }
        Handle { entry, exit }
    }

    pub fn epsilon(&mut self, node: Option<NodeId>) -> Handle {
        let entry = self.new_state(StateKind::Basic, node);
        let exit = self.new_state(StateKind::Basic, node);
        self.graph.epsilon(entry, exit);
        Handle { entry, exit }
    }

    /// Semantic predicate, `<p=N>` turns it into a precedence predicate.
    pub fn sempred(&mut self, node: NodeId) -> Handle {
        let precedence = self
            .tree
            .node_option(node, "p")
            .and_then(|p| p.parse::<u32>().ok());
        let transition = match precedence {
            Some(p) => Transition::PrecedencePredicate(p),
            None => {
                let index = self.predicates;
                self.predicates += 1;
                Transition::Predicate {
                    index,
                    ctx_dependent: self.references_context(node),
                }
            }
        };
        self.single(node, transition)
    }

    pub fn action(&mut self, node: NodeId, indexed: bool) -> Handle {
        let index = indexed.then(|| {
            let index = self.actions;
            self.actions += 1;
            index
        });
        let transition = Transition::Action {
            index,
            ctx_dependent: self.references_context(node),
        };
        self.single(node, transition)
    }

    fn references_context(&self, node: NodeId) -> bool {
        self.tree.text(node).is_some_and(|t| t.contains('$'))
    }

    /// Call of `rule`, the exit is the state the call returns to.
    pub fn rule_call(&mut self, node: NodeId, rule: RuleHandle, precedence: u32) -> Handle {
        self.single(node, Transition::Rule { rule, precedence })
    }

    /// Links consecutive elements with epsilon edges.
    pub fn elem_list(&mut self, elements: &[Handle]) -> Handle {
        for pair in elements.windows(2) {
            self.graph.epsilon(pair[0].exit, pair[1].entry);
        }
        Handle {
            entry: elements[0].entry,
            exit: elements[elements.len() - 1].exit,
        }
    }

    /// Fans out from a block start to every alternative and joins them in a block end, then
    /// wraps the block in the loop structure of its `ebnf` suffix.
    pub fn block(&mut self, block: NodeId, ebnf: Option<NodeId>, alts: &[Handle]) -> Handle {
        let suffix = ebnf.map(|e| (e, self.tree.kind(e), self.tree[e].non_greedy));
        let flavor = match suffix {
            Some((_, NodeKind::Closure, _)) => BlockFlavor::Star,
            Some((_, NodeKind::PositiveClosure, _)) => BlockFlavor::Plus,
            _ => BlockFlavor::Basic,
        };

        let start = self.new_state(StateKind::BlockStart(flavor), Some(block));
        let end = self.new_state(StateKind::BlockEnd, Some(block));
        self.graph[start].end = Some(end);
        for alt in alts {
            self.graph.epsilon(start, alt.entry);
            self.graph.epsilon(alt.exit, end);
        }
        if alts.len() > 1 {
            self.graph.define_decision(start);
        }
        let blk = Handle {
            entry: start,
            exit: end,
        };

        match suffix {
            Some((_, NodeKind::Optional, non_greedy)) => self.optional(blk, non_greedy),
            Some((node, NodeKind::Closure, non_greedy)) => self.star(node, blk, non_greedy),
            Some((node, NodeKind::PositiveClosure, non_greedy)) => self.plus(node, blk, non_greedy),
            _ => blk,
        }
    }

    /// Adds a bypass from the block start to its end.
    fn optional(&mut self, blk: Handle, non_greedy: bool) -> Handle {
        if non_greedy {
            self.graph.connect_first(blk.entry, blk.exit, Transition::Epsilon);
        } else {
            self.graph.epsilon(blk.entry, blk.exit);
        }
        self.graph[blk.entry].non_greedy = non_greedy;
        self.graph.define_decision(blk.entry);
        blk
    }

    /// `entry -> (block -> loop back -> entry)* -> end`
    fn star(&mut self, node: NodeId, blk: Handle, non_greedy: bool) -> Handle {
        let entry = self.new_state(StateKind::StarLoopEntry, Some(node));
        let loop_back = self.new_state(StateKind::StarLoopBack, Some(node));
        let end = self.new_state(StateKind::LoopEnd, Some(node));
        self.graph[entry].non_greedy = non_greedy;
        self.graph[entry].loop_back = Some(loop_back);
        self.graph[end].loop_back = Some(loop_back);

        if non_greedy {
            self.graph.epsilon(entry, end);
            self.graph.epsilon(entry, blk.entry);
        } else {
            self.graph.epsilon(entry, blk.entry);
            self.graph.epsilon(entry, end);
        }
        self.graph.epsilon(blk.exit, loop_back);
        self.graph.epsilon(loop_back, entry);
        self.graph.define_decision(entry);

        Handle { entry, exit: end }
    }

    /// `block -> loop back -> (block | end)`
    fn plus(&mut self, node: NodeId, blk: Handle, non_greedy: bool) -> Handle {
        let loop_back = self.new_state(StateKind::PlusLoopBack, Some(node));
        let end = self.new_state(StateKind::LoopEnd, Some(node));
        self.graph[blk.entry].loop_back = Some(loop_back);
        self.graph[blk.entry].non_greedy = non_greedy;
        self.graph[loop_back].non_greedy = non_greedy;
        self.graph[end].loop_back = Some(loop_back);

        self.graph.epsilon(blk.exit, loop_back);
        if non_greedy {
            self.graph.epsilon(loop_back, end);
            self.graph.epsilon(loop_back, blk.entry);
        } else {
            self.graph.epsilon(loop_back, blk.entry);
            self.graph.epsilon(loop_back, end);
        }
        self.graph.define_decision(loop_back);

        Handle {
            entry: blk.entry,
            exit: end,
        }
    }

    /// Connects the rule start and stop states around the rule body.
    pub fn rule(&mut self, start: StateId, stop: StateId, body: Handle) {
        self.graph.epsilon(start, body.entry);
        self.graph.epsilon(body.exit, stop);
    }
}

/// Terminal handling that differs between parser and lexer rules.
pub trait AtnFactory<'g> {
    fn fragments(&mut self) -> &mut Fragments<'g>;
    fn symbols(&self) -> &'g SymbolTable;
    fn finish(self) -> Automaton;

    fn token_ref(&mut self, node: NodeId) -> Result<Handle, AtnError>;
    fn string_literal(&mut self, node: NodeId) -> Result<Handle, AtnError>;
    fn range(&mut self, node: NodeId, from: NodeId, to: NodeId) -> Result<Handle, AtnError>;
    fn set(&mut self, node: NodeId, elements: &[NodeId], invert: bool) -> Result<Handle, AtnError>;
    fn char_set_literal(&mut self, node: NodeId) -> Result<Handle, AtnError>;
    fn lexer_commands(&mut self, alt: Handle, commands: &[NodeId]) -> Result<Handle, AtnError>;
    fn action(&mut self, node: NodeId) -> Handle;

    fn wildcard(&mut self, node: NodeId) -> Handle {
        self.fragments().single(node, Transition::Wildcard)
    }

    fn sempred(&mut self, node: NodeId) -> Handle {
        self.fragments().sempred(node)
    }

    /// Reference to another rule, `<p=N>` sets the precedence argument.
    fn rule_ref(&mut self, node: NodeId) -> Result<Handle, AtnError> {
        let tree = self.fragments().tree();
        let name = tree.text(node).unwrap_or_default();
        let Some(rule) = self.symbols().rule(name) else {
            return Err(AtnError::UnknownRule {
                name: name.into(),
                span: tree.span(node),
            });
        };
        let precedence = tree
            .node_option(node, "p")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        Ok(self.fragments().rule_call(node, rule, precedence))
    }
}

fn text_of(tree: &Tree, node: NodeId) -> RcString {
    tree.text(node).unwrap_or_default().into()
}

fn literal_error(tree: &Tree, node: NodeId, err: LiteralError) -> AtnError {
    AtnError::InvalidLiteral {
        text: text_of(tree, node),
        message: err.message,
        span: tree.span(node),
    }
}

pub struct ParserFactory<'g> {
    fragments: Fragments<'g>,
    symbols: &'g SymbolTable,
}

impl<'g> ParserFactory<'g> {
    pub fn new(fragments: Fragments<'g>, symbols: &'g SymbolTable) -> ParserFactory<'g> {
        ParserFactory { fragments, symbols }
    }

    fn token_type(&self, node: NodeId) -> Result<i32, AtnError> {
        let tree = self.fragments.tree();
        let text = tree.text(node).unwrap_or_default();
        let ty = match tree.kind(node) {
            NodeKind::TokenRef => self.symbols.token_type(text),
            NodeKind::StringLiteral => self.symbols.literal_type(text),
            _ => {
                return Err(AtnError::LexerOnly {
                    what: "character set",
                    span: tree.span(node),
                })
            }
        };
        ty.ok_or_else(|| AtnError::UnknownToken {
            name: text.into(),
            span: tree.span(node),
        })
    }
}

impl<'g> AtnFactory<'g> for ParserFactory<'g> {
    fn fragments(&mut self) -> &mut Fragments<'g> {
        &mut self.fragments
    }
    fn symbols(&self) -> &'g SymbolTable {
        self.symbols
    }
    fn finish(self) -> Automaton {
        self.fragments.finish()
    }

    fn token_ref(&mut self, node: NodeId) -> Result<Handle, AtnError> {
        let ty = self.token_type(node)?;
        Ok(self.fragments.single(node, Transition::Atom(ty)))
    }
    fn string_literal(&mut self, node: NodeId) -> Result<Handle, AtnError> {
        let ty = self.token_type(node)?;
        Ok(self.fragments.single(node, Transition::Atom(ty)))
    }
    fn range(&mut self, node: NodeId, _: NodeId, _: NodeId) -> Result<Handle, AtnError> {
        Err(AtnError::LexerOnly {
            what: "range",
            span: self.fragments.tree().span(node),
        })
    }
    fn set(&mut self, node: NodeId, elements: &[NodeId], invert: bool) -> Result<Handle, AtnError> {
        let mut set = IntervalSet::new();
        for &element in elements {
            set.add(self.token_type(element)?);
        }
        if set.is_empty() {
            return Err(AtnError::EmptySet {
                span: self.fragments.tree().span(node),
            });
        }
        let transition = if invert {
            Transition::NotSet(Rc::new(set))
        } else {
            Transition::Set(Rc::new(set))
        };
        Ok(self.fragments.single(node, transition))
    }
    fn char_set_literal(&mut self, node: NodeId) -> Result<Handle, AtnError> {
        Err(AtnError::LexerOnly {
            what: "character set",
            span: self.fragments.tree().span(node),
        })
    }
    fn lexer_commands(&mut self, _: Handle, commands: &[NodeId]) -> Result<Handle, AtnError> {
        Err(AtnError::LexerOnly {
            what: "lexer command",
            span: commands.first().and_then(|&c| self.fragments.tree().span(c)),
        })
    }
    fn action(&mut self, node: NodeId) -> Handle {
        self.fragments.action(node, false)
    }
}

pub struct LexerFactory<'g> {
    fragments: Fragments<'g>,
    symbols: &'g SymbolTable,
}

impl<'g> LexerFactory<'g> {
    pub fn new(fragments: Fragments<'g>, symbols: &'g SymbolTable) -> LexerFactory<'g> {
        LexerFactory { fragments, symbols }
    }

    fn char_of(&self, node: NodeId) -> Result<i32, AtnError> {
        let tree = self.fragments.tree();
        let text = tree.text(node).unwrap_or_default();
        char_value(text).ok_or_else(|| AtnError::InvalidLiteral {
            text: text.into(),
            message: "Expected a single character",
            span: tree.span(node),
        })
    }

    fn char_range(&self, from: NodeId, to: NodeId, node: NodeId) -> Result<(i32, i32), AtnError> {
        let (a, b) = (self.char_of(from)?, self.char_of(to)?);
        if a > b {
            return Err(AtnError::EmptyRange {
                from: a,
                to: b,
                span: self.fragments.tree().span(node),
            });
        }
        Ok((a, b))
    }

    fn char_set(&self, node: NodeId) -> Result<IntervalSet, AtnError> {
        let tree = self.fragments.tree();
        parse_char_set(tree.text(node).unwrap_or_default())
            .map_err(|err| literal_error(tree, node, err))
    }

    fn command(&self, node: NodeId) -> Result<LexerCommand, AtnError> {
        let tree = self.fragments.tree();
        let name = tree.text(node).unwrap_or_default();
        let argument = tree.children(node).first().and_then(|&a| tree.text(a));
        let span = tree.span(node);
        let required = || {
            argument.ok_or_else(|| AtnError::MissingCommandArgument {
                name: name.into(),
                span,
            })
        };
        let command = match name {
            "skip" => LexerCommand::Skip,
            "more" => LexerCommand::More,
            "popMode" => LexerCommand::PopMode,
            "mode" => LexerCommand::Mode(required()?.into()),
            "pushMode" => LexerCommand::PushMode(required()?.into()),
            "type" => {
                let arg = required()?;
                let ty = arg.parse().ok().or_else(|| self.symbols.token_type(arg));
                LexerCommand::Type(ty.ok_or_else(|| AtnError::UnknownToken {
                    name: arg.into(),
                    span,
                })?)
            }
            "channel" => {
                let arg = required()?;
                let channel = arg.parse().ok().or_else(|| self.symbols.channel(arg));
                LexerCommand::Channel(channel.ok_or_else(|| AtnError::UnknownChannel {
                    name: arg.into(),
                    span,
                })?)
            }
            _ => {
                return Err(AtnError::UnknownLexerCommand {
                    name: name.into(),
                    span,
                })
            }
        };
        Ok(command)
    }
}

impl<'g> AtnFactory<'g> for LexerFactory<'g> {
    fn fragments(&mut self) -> &mut Fragments<'g> {
        &mut self.fragments
    }
    fn symbols(&self) -> &'g SymbolTable {
        self.symbols
    }
    fn finish(self) -> Automaton {
        self.fragments.finish()
    }

    /// Token references in the lexer call the lexer rule.
    fn token_ref(&mut self, node: NodeId) -> Result<Handle, AtnError> {
        self.rule_ref(node)
    }
    fn string_literal(&mut self, node: NodeId) -> Result<Handle, AtnError> {
        let tree = self.fragments.tree();
        let chars = decode_literal(tree.text(node).unwrap_or_default())
            .map_err(|err| literal_error(tree, node, err))?;
        if chars.is_empty() {
            return Err(AtnError::InvalidLiteral {
                text: text_of(tree, node),
                message: "Empty literal",
                span: tree.span(node),
            });
        }
        Ok(self
            .fragments
            .chain(node, chars.into_iter().map(Transition::Atom)))
    }
    fn range(&mut self, node: NodeId, from: NodeId, to: NodeId) -> Result<Handle, AtnError> {
        let (a, b) = self.char_range(from, to, node)?;
        Ok(self.fragments.single(node, Transition::Range(a, b)))
    }
    fn set(&mut self, node: NodeId, elements: &[NodeId], invert: bool) -> Result<Handle, AtnError> {
        let tree = self.fragments.tree();
        let mut set = IntervalSet::new();
        for &element in elements {
            match tree.kind(element) {
                NodeKind::StringLiteral => set.add(self.char_of(element)?),
                NodeKind::Range => {
                    let (from, to) = match tree.children(element) {
                        &[from, to] => (from, to),
                        _ => {
                            return Err(AtnError::InvalidLiteral {
                                text: "..".into(),
                                message: "Range needs two bounds",
                                span: tree.span(element),
                            })
                        }
                    };
                    let (a, b) = self.char_range(from, to, element)?;
                    set.add_range(a, b);
                }
                NodeKind::CharSet => set.add_set(&self.char_set(element)?),
                _ => {
                    return Err(AtnError::TokenInLexerSet {
                        name: text_of(tree, element),
                        span: tree.span(element),
                    })
                }
            }
        }
        if invert {
            set = set.complement(MIN_CHAR, MAX_CHAR);
        }
        if set.is_empty() {
            return Err(AtnError::EmptySet {
                span: tree.span(node),
            });
        }
        Ok(self.fragments.single(node, Transition::Set(Rc::new(set))))
    }
    fn char_set_literal(&mut self, node: NodeId) -> Result<Handle, AtnError> {
        let set = self.char_set(node)?;
        if set.is_empty() {
            return Err(AtnError::EmptySet {
                span: self.fragments.tree().span(node),
            });
        }
        Ok(self.fragments.single(node, Transition::Set(Rc::new(set))))
    }
    fn lexer_commands(&mut self, alt: Handle, commands: &[NodeId]) -> Result<Handle, AtnError> {
        let mut elements = vec![alt];
        for &node in commands {
            let command = self.command(node)?;
            elements.push(self.fragments.single(node, Transition::LexerCommand(command)));
        }
        Ok(self.fragments.elem_list(&elements))
    }
    fn action(&mut self, node: NodeId) -> Handle {
        self.fragments.action(node, true)
    }
}
