//! Augmented transition networks built from grammar rules.
//!
//! Every rule gets its own [`Automaton`]. Calls to other rules are [`Transition::Rule`] edges
//! that jump to the state following the call, the callee is identified by its handle.

mod build;
mod factory;
#[cfg(test)]
mod tests;

pub use build::{build_rule, build_token_start, AtnBuilder};
pub use factory::{AtnFactory, Fragments, LexerFactory, ParserFactory};

use std::{
    fmt::{self, Write},
    rc::Rc,
};

use cranelift_bitset::CompoundBitSet;
use cranelift_entity::{entity_impl, EntityRef, PrimaryMap, SecondaryMap};

use crate::{
    grammar::{Grammar, RuleHandle, RuleKind},
    interval::IntervalSet,
    span::RcString,
    tree::NodeId,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u32);
entity_impl!(StateId, "s");

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockFlavor {
    Basic,
    Star,
    Plus,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StateKind {
    Basic,
    BlockStart(BlockFlavor),
    BlockEnd,
    StarLoopEntry,
    StarLoopBack,
    PlusLoopBack,
    LoopEnd,
    RuleStart,
    RuleStop,
    TokenStart,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LexerCommand {
    Skip,
    More,
    PopMode,
    Mode(RcString),
    PushMode(RcString),
    Type(i32),
    Channel(i32),
}

impl fmt::Display for LexerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexerCommand::Skip => f.write_str("skip"),
            LexerCommand::More => f.write_str("more"),
            LexerCommand::PopMode => f.write_str("popMode"),
            LexerCommand::Mode(mode) => write!(f, "mode({mode})"),
            LexerCommand::PushMode(mode) => write!(f, "pushMode({mode})"),
            LexerCommand::Type(ty) => write!(f, "type({ty})"),
            LexerCommand::Channel(channel) => write!(f, "channel({channel})"),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Transition {
    Epsilon,
    Atom(i32),
    Range(i32, i32),
    Set(Rc<IntervalSet>),
    NotSet(Rc<IntervalSet>),
    Wildcard,
    /// Call of `rule`, the edge target is the state the call returns to.
    Rule {
        rule: RuleHandle,
        precedence: u32,
    },
    Predicate {
        index: u32,
        ctx_dependent: bool,
    },
    PrecedencePredicate(u32),
    Action {
        index: Option<u32>,
        ctx_dependent: bool,
    },
    LexerCommand(LexerCommand),
}

impl Transition {
    /// Whether the transition can be taken without consuming input.
    pub fn is_epsilon(&self) -> bool {
        match self {
            Transition::Epsilon
            | Transition::Rule { .. }
            | Transition::Predicate { .. }
            | Transition::PrecedencePredicate(_)
            | Transition::Action { .. }
            | Transition::LexerCommand(_) => true,
            Transition::Atom(_)
            | Transition::Range(_, _)
            | Transition::Set(_)
            | Transition::NotSet(_)
            | Transition::Wildcard => false,
        }
    }

    pub fn display(&self, f: &mut dyn Write, grammar: &Grammar, lexer: bool) -> fmt::Result {
        match self {
            Transition::Epsilon => f.write_str("ε"),
            Transition::Atom(a) => write_symbol(f, *a, grammar, lexer),
            Transition::Range(a, b) => {
                write_symbol(f, *a, grammar, lexer)?;
                f.write_str("..")?;
                write_symbol(f, *b, grammar, lexer)
            }
            Transition::Set(set) => write_set(f, set, grammar, lexer),
            Transition::NotSet(set) => {
                f.write_char('~')?;
                write_set(f, set, grammar, lexer)
            }
            Transition::Wildcard => f.write_char('.'),
            Transition::Rule { rule, precedence } => {
                f.write_str(&grammar.rules[*rule].name)?;
                if *precedence > 0 {
                    write!(f, "[{precedence}]")?;
                }
                Ok(())
            }
            Transition::Predicate { index, .. } => write!(f, "pred{index}"),
            Transition::PrecedencePredicate(p) => write!(f, "precpred({p})"),
            Transition::Action { index: Some(i), .. } => write!(f, "action{i}"),
            Transition::Action { index: None, .. } => f.write_str("action"),
            Transition::LexerCommand(command) => write!(f, "-> {command}"),
        }
    }
}

fn write_symbol(f: &mut dyn Write, value: i32, grammar: &Grammar, lexer: bool) -> fmt::Result {
    if lexer {
        return match char::from_u32(value as u32) {
            Some(c) => write!(f, "'{}'", c.escape_debug()),
            None => write!(f, "{value}"),
        };
    }
    match grammar.symbols.token_name(value) {
        Some(name) => f.write_str(name),
        None => write!(f, "{value}"),
    }
}

fn write_set(f: &mut dyn Write, set: &IntervalSet, grammar: &Grammar, lexer: bool) -> fmt::Result {
    f.write_char('{')?;
    for (k, i) in set.intervals().iter().enumerate() {
        if k > 0 {
            f.write_str(", ")?;
        }
        if lexer && i.start != i.end {
            write_symbol(f, i.start, grammar, lexer)?;
            f.write_str("..")?;
            write_symbol(f, i.end, grammar, lexer)?;
        } else {
            for (n, value) in (i.start..=i.end).enumerate() {
                if n > 0 {
                    f.write_str(", ")?;
                }
                write_symbol(f, value, grammar, lexer)?;
            }
        }
    }
    f.write_char('}')
}

#[derive(Clone, PartialEq, Debug)]
pub struct Edge {
    pub target: StateId,
    pub transition: Transition,
}

#[derive(Clone, Debug)]
pub struct State {
    pub kind: StateKind,
    pub edges: Vec<Edge>,
    pub node: Option<NodeId>,
    /// Outer alternative of the rule the state was created for, zero outside of one.
    pub outer_alt: u32,
    pub non_greedy: bool,
    /// Block starts point to their end.
    pub end: Option<StateId>,
    /// Loop entries, plus block starts and loop ends point to the loop back state.
    pub loop_back: Option<StateId>,
    pub decision: Option<u32>,
}

impl State {
    pub fn new(kind: StateKind, node: Option<NodeId>, outer_alt: u32) -> State {
        State {
            kind,
            edges: Vec::new(),
            node,
            outer_alt,
            non_greedy: false,
            end: None,
            loop_back: None,
            decision: None,
        }
    }
    pub fn only_epsilon_edges(&self) -> bool {
        self.edges.iter().all(|e| e.transition.is_epsilon())
    }
}

/// Entry and exit state of a partially built fragment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle {
    pub entry: StateId,
    pub exit: StateId,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VerifyError {
    pub state: StateId,
    pub message: &'static str,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.message)
    }
}

impl std::error::Error for VerifyError {}

#[derive(Clone, Default, Debug)]
pub struct Automaton {
    states: PrimaryMap<StateId, State>,
    decisions: Vec<StateId>,
}

impl Automaton {
    pub fn new() -> Automaton {
        Automaton::default()
    }
    pub fn add_state(&mut self, state: State) -> StateId {
        self.states.push(state)
    }
    pub fn len(&self) -> usize {
        self.states.len()
    }
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
        self.states.iter()
    }
    pub fn decisions(&self) -> &[StateId] {
        &self.decisions
    }
    /// Appends an edge, later edges have lower priority.
    pub fn connect(&mut self, from: StateId, to: StateId, transition: Transition) {
        self.states[from].edges.push(Edge {
            target: to,
            transition,
        });
    }
    /// Inserts an edge before all existing ones.
    pub fn connect_first(&mut self, from: StateId, to: StateId, transition: Transition) {
        self.states[from].edges.insert(
            0,
            Edge {
                target: to,
                transition,
            },
        );
    }
    pub fn epsilon(&mut self, from: StateId, to: StateId) {
        self.connect(from, to, Transition::Epsilon);
    }
    /// Registers `state` as a decision point, returns its decision number.
    pub fn define_decision(&mut self, state: StateId) -> u32 {
        if let Some(decision) = self.states[state].decision {
            return decision;
        }
        let decision = self.decisions.len() as u32;
        self.decisions.push(state);
        self.states[state].decision = Some(decision);
        decision
    }
    pub fn count(&self, kind: StateKind) -> usize {
        self.states.values().filter(|s| s.kind == kind).count()
    }
    pub fn edges_between(&self, from: StateId, to: StateId) -> impl Iterator<Item = &Transition> {
        self.states[from]
            .edges
            .iter()
            .filter(move |e| e.target == to)
            .map(|e| &e.transition)
    }

    pub fn reachable_from(&self, start: StateId) -> CompoundBitSet {
        let mut seen = CompoundBitSet::with_capacity(self.states.len());
        let mut stack = vec![start];
        while let Some(state) = stack.pop() {
            if seen.contains(state.index()) {
                continue;
            }
            seen.insert(state.index());
            stack.extend(self.states[state].edges.iter().map(|e| e.target));
        }
        seen
    }

    /// Checks the structural invariants of a finished automaton.
    pub fn verify(&self, start: StateId, stop: StateId) -> Result<(), VerifyError> {
        let error = |state, message| Err(VerifyError { state, message });

        let reachable = self.reachable_from(start);
        if !reachable.contains(stop.index()) {
            return error(stop, "stop state is unreachable");
        }
        for (id, state) in self.states.iter() {
            if !reachable.contains(id.index()) {
                return error(id, "state is unreachable");
            }
            if id != stop && state.edges.is_empty() {
                return error(id, "state has no outgoing edges");
            }
            if state.decision.is_some() && state.edges.is_empty() {
                return error(id, "decision state without alternatives");
            }
            match state.kind {
                StateKind::RuleStop if !state.edges.is_empty() => {
                    return error(id, "stop state has outgoing edges")
                }
                StateKind::BlockStart(flavor) => {
                    let end = state.end.map(|e| self.states[e].kind);
                    if end != Some(StateKind::BlockEnd) {
                        return error(id, "block start without block end");
                    }
                    if flavor == BlockFlavor::Plus && state.loop_back.is_none() {
                        return error(id, "plus block without loop back");
                    }
                }
                StateKind::StarLoopEntry | StateKind::LoopEnd if state.loop_back.is_none() => {
                    return error(id, "loop without loop back");
                }
                StateKind::StarLoopBack | StateKind::PlusLoopBack | StateKind::BlockEnd
                    if !state.only_epsilon_edges() =>
                {
                    return error(id, "structural state consumes input");
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Lists every state with its outgoing edges.
    pub fn display_statements(
        &self,
        buf: &mut dyn Write,
        grammar: &Grammar,
        lexer: bool,
    ) -> fmt::Result {
        for (id, state) in self.states.iter() {
            write!(buf, "{id} {:?}", state.kind)?;
            if state.outer_alt != 0 {
                write!(buf, " alt={}", state.outer_alt)?;
            }
            if let Some(decision) = state.decision {
                write!(buf, " d{decision}")?;
            }
            if state.non_greedy {
                buf.write_str(" non-greedy")?;
            }
            buf.write_str(":\n")?;
            for edge in &state.edges {
                buf.write_str("  ")?;
                edge.transition.display(buf, grammar, lexer)?;
                if edge.target == id.next() {
                    buf.write_str(" ↓\n")?;
                } else {
                    writeln!(buf, " {}", edge.target)?;
                }
            }
        }
        Ok(())
    }

    #[allow(unused_must_use)]
    pub fn debug_graphviz(&self, buf: &mut dyn Write, subgraph: &str, grammar: &Grammar, lexer: bool) {
        writeln!(buf, "subgraph cluster_{subgraph} {{");
        writeln!(buf, "    label={subgraph:?}");
        for (id, state) in self.states.iter() {
            let shape = match state.kind {
                StateKind::RuleStop => "doublecircle",
                _ if state.decision.is_some() => "diamond",
                _ => "circle",
            };
            writeln!(
                buf,
                "    {subgraph}_{id}[label=\"{}\",shape={shape}]",
                id.index()
            );
            for edge in &state.edges {
                write!(buf, "    {subgraph}_{id} -> {subgraph}_{}[label=\"", edge.target);
                let mut label = String::new();
                edge.transition.display(&mut label, grammar, lexer);
                write!(buf, "{}\"", label.escape_debug());
                if edge.transition.is_epsilon() {
                    write!(buf, ",style=dashed");
                }
                writeln!(buf, "]");
            }
        }
        writeln!(buf, "}}");
    }
}

impl std::ops::Index<StateId> for Automaton {
    type Output = State;
    fn index(&self, index: StateId) -> &Self::Output {
        &self.states[index]
    }
}

impl std::ops::IndexMut<StateId> for Automaton {
    fn index_mut(&mut self, index: StateId) -> &mut Self::Output {
        &mut self.states[index]
    }
}

impl StateId {
    pub fn next(self) -> StateId {
        StateId(self.0 + 1)
    }
}

#[derive(Clone, Debug)]
pub struct RuleAutomaton {
    pub rule: RuleHandle,
    pub kind: RuleKind,
    pub start: StateId,
    pub stop: StateId,
    pub graph: Automaton,
}

impl RuleAutomaton {
    pub fn verify(&self) -> Result<(), VerifyError> {
        self.graph.verify(self.start, self.stop)
    }
}

/// Lexer entry point, calls every non-fragment lexer rule.
#[derive(Clone, Debug)]
pub struct TokenStart {
    pub start: StateId,
    pub stop: StateId,
    pub graph: Automaton,
}

#[derive(Clone, Default)]
pub struct Atn {
    pub rules: SecondaryMap<RuleHandle, Option<RuleAutomaton>>,
    pub token_start: Option<TokenStart>,
}

impl Atn {
    pub fn new() -> Atn {
        Atn::default()
    }
    pub fn rule(&self, handle: RuleHandle) -> Option<&RuleAutomaton> {
        self.rules.get(handle).and_then(Option::as_ref)
    }
    pub fn iter(&self) -> impl Iterator<Item = &RuleAutomaton> {
        self.rules.values().filter_map(Option::as_ref)
    }

    pub fn display_statements(&self, buf: &mut dyn Write, grammar: &Grammar) -> fmt::Result {
        if let Some(token_start) = &self.token_start {
            buf.write_str("tokens:\n")?;
            token_start.graph.display_statements(buf, grammar, false)?;
            buf.write_char('\n')?;
        }
        for automaton in self.iter() {
            writeln!(buf, "{}:", grammar.rules[automaton.rule].name)?;
            automaton
                .graph
                .display_statements(buf, grammar, automaton.kind == RuleKind::Lexer)?;
            buf.write_char('\n')?;
        }
        Ok(())
    }

    #[allow(unused_must_use)]
    pub fn debug_graphviz(&self, buf: &mut dyn Write, grammar: &Grammar) {
        writeln!(buf, "digraph G {{");
        if let Some(token_start) = &self.token_start {
            token_start
                .graph
                .debug_graphviz(buf, "tokens", grammar, false);
        }
        for automaton in self.iter() {
            let name = &grammar.rules[automaton.rule].name;
            automaton
                .graph
                .debug_graphviz(buf, name, grammar, automaton.kind == RuleKind::Lexer);
        }
        writeln!(buf, "}}");
    }
}
