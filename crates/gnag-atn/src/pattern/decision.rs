use crate::tree::{NodeId, NodeKind, Tree};

use super::{Cursor, Symbol, TreeStream};

pub type AltIndex = u32;

/// What a predicate may inspect when two alternatives share the same lookahead.
pub struct PredicateCx<'a> {
    pub tree: &'a Tree,
    pub stream: &'a TreeStream,
    /// Path from the subtree root down to the parent of the node being predicted.
    pub ancestors: &'a [NodeId],
    pub start: Cursor,
    pub in_lexer: bool,
}

impl<'a> PredicateCx<'a> {
    /// The node `k` symbols from the prediction start, `1` is the first one.
    pub fn lookahead_node(&self, k: u32) -> Option<NodeId> {
        self.stream.node(self.start.offset(k - 1))
    }
    pub fn lookahead_text(&self, k: u32) -> Option<&'a str> {
        self.lookahead_node(k).and_then(|n| self.tree.text(n))
    }
    pub fn parent_kind(&self) -> Option<NodeKind> {
        self.ancestors.last().map(|&p| self.tree.kind(p))
    }
    /// Whether any ancestor is one of `kinds`.
    pub fn in_context(&self, kinds: &[NodeKind]) -> bool {
        self.ancestors
            .iter()
            .any(|&a| kinds.contains(&self.tree.kind(a)))
    }
}

type Predicate = Box<dyn Fn(&PredicateCx) -> bool>;

struct Accept {
    alt: AltIndex,
    predicate: Option<usize>,
}

#[derive(Default)]
struct State {
    edges: Vec<(Symbol, u32)>,
    accepts: Vec<Accept>,
}

impl State {
    fn edge(&self, symbol: Symbol) -> Option<u32> {
        self.edges
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|&(_, target)| target)
    }
}

/// Lookahead automaton choosing between the alternatives of one decision point.
///
/// Every alternative is a fixed symbol sequence, the sequences share a prefix tree. Prediction
/// walks the input as far as the tree allows and picks the alternative accepted deepest,
/// alternatives accepted at the same state are tried in declaration order with their
/// predicates.
pub struct Decision {
    name: &'static str,
    states: Vec<State>,
    predicates: Vec<Predicate>,
}

impl Decision {
    pub fn builder(name: &'static str) -> DecisionBuilder {
        DecisionBuilder {
            decision: Decision {
                name,
                states: vec![State::default()],
                predicates: Vec::new(),
            },
        }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn accepted(&self, state: &State, cx: &PredicateCx) -> Option<AltIndex> {
        state
            .accepts
            .iter()
            .find(|a| match a.predicate {
                Some(p) => (self.predicates[p])(cx),
                None => true,
            })
            .map(|a| a.alt)
    }

    pub fn predict(&self, cx: &PredicateCx) -> Option<AltIndex> {
        let mut state = 0;
        let mut cursor = cx.start;
        let mut best = None;
        loop {
            let current = &self.states[state];
            if let Some(alt) = self.accepted(current, cx) {
                best = Some(alt);
            }
            match current.edge(cx.stream.symbol(cursor)) {
                Some(next) => {
                    state = next as usize;
                    cursor = cursor.next();
                }
                None => break,
            }
        }
        log::trace!("{}: predicted {:?}", self.name, best);
        best
    }
}

pub struct DecisionBuilder {
    decision: Decision,
}

impl DecisionBuilder {
    /// Adds an alternative matched by `pattern`.
    ///
    /// Patterns are whitespace separated symbol names, `^(KIND` enters the children of `KIND`
    /// and `)` leaves them.
    pub fn alt(mut self, alt: AltIndex, pattern: &str) -> DecisionBuilder {
        self.insert(alt, pattern, None);
        self
    }

    /// Adds an alternative that is only viable if `predicate` holds.
    pub fn alt_if(
        mut self,
        alt: AltIndex,
        pattern: &str,
        predicate: impl Fn(&PredicateCx) -> bool + 'static,
    ) -> DecisionBuilder {
        let index = self.decision.predicates.len();
        self.decision.predicates.push(Box::new(predicate));
        self.insert(alt, pattern, Some(index));
        self
    }

    pub fn build(self) -> Decision {
        self.decision
    }

    fn insert(&mut self, alt: AltIndex, pattern: &str, predicate: Option<usize>) {
        let mut state = 0;
        for symbol in parse_pattern(self.decision.name, pattern) {
            state = match self.decision.states[state].edge(symbol) {
                Some(next) => next as usize,
                None => {
                    let next = self.decision.states.len();
                    self.decision.states.push(State::default());
                    self.decision.states[state]
                        .edges
                        .push((symbol, next as u32));
                    next
                }
            };
        }
        self.decision.states[state]
            .accepts
            .push(Accept { alt, predicate });
    }
}

fn parse_pattern(decision: &str, pattern: &str) -> Vec<Symbol> {
    let spaced = pattern.replace("^(", " ^( ").replace(')', " ) ");
    let mut symbols = Vec::new();
    let mut enter = false;
    for word in spaced.split_whitespace() {
        let symbol = match word {
            "^(" => {
                enter = true;
                continue;
            }
            ")" | "UP" => Symbol::Up,
            "DOWN" => Symbol::Down,
            "EOF" => Symbol::Eof,
            name => match NodeKind::from_name(name) {
                Some(kind) => Symbol::Node(kind),
                None => panic!("Unknown symbol `{name}` in pattern of decision {decision}"),
            },
        };
        symbols.push(symbol);
        if std::mem::take(&mut enter) {
            symbols.push(Symbol::Down);
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::*, pattern::Matcher};

    #[test]
    fn pattern_syntax() {
        assert_eq!(
            parse_pattern("t", "^(CLOSURE ^(BLOCK ALT) )"),
            vec![
                Symbol::Node(NodeKind::Closure),
                Symbol::Down,
                Symbol::Node(NodeKind::Block),
                Symbol::Down,
                Symbol::Node(NodeKind::Alt),
                Symbol::Up,
                Symbol::Up,
            ]
        );
    }

    #[test]
    fn longest_match_then_predicates() {
        let decision = Decision::builder("terminal")
            .alt(1, "TOKEN_REF")
            .alt(2, "^(TOKEN_REF ELEMENT_OPTIONS")
            .alt_if(3, "STRING_LITERAL", |cx| cx.lookahead_text(1) == Some("'x'"))
            .alt(4, "STRING_LITERAL")
            .build();

        let mut tree = Tree::new();
        let plain = tree.insert(&tok("A"));
        let with_options = tree.insert(&tok("A").with_options(&[("fail", None)]));
        let x = tree.insert(&lit("'x'"));
        let y = tree.insert(&lit("'y'"));
        let rule = tree.insert(&rref("r"));

        let predict = |node| {
            let stream = TreeStream::new(&tree, node);
            Matcher::new(&tree, &stream).predict(&decision, &[], false)
        };
        assert_eq!(predict(plain), Ok(1));
        assert_eq!(predict(with_options), Ok(2));
        assert_eq!(predict(x), Ok(3));
        assert_eq!(predict(y), Ok(4));
        assert!(predict(rule).is_err());
    }
}
