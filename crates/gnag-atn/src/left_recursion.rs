//! Classification of the outer alternatives of a left-recursive rule.
//!
//! The precedence-climbing rewrite needs to know, for `e : e '*' e | '-' e | e '!' | INT`, which
//! alternatives are binary operators, prefix operators, suffix operators and primaries. This
//! module only classifies, the rewrite itself happens elsewhere.

use std::fmt;

use crate::{
    error::ErrorAccumulator,
    pattern::{AltIndex, Decision, MatchError, Matcher, PredicateCx, TreeStream},
    span::RcString,
    tree::{NodeId, NodeKind, Tree},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AltShape {
    /// `e op e`
    Binary,
    /// `op e`
    Prefix,
    /// `e op`
    Suffix,
    /// Anything else, including primaries.
    Other,
}

impl fmt::Display for AltShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AltShape::Binary => "binary",
            AltShape::Prefix => "prefix",
            AltShape::Suffix => "suffix",
            AltShape::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Associativity {
    #[default]
    Left,
    Right,
}

#[derive(Clone, Debug)]
pub struct AltClassification {
    /// One based index of the outer alternative.
    pub alt: u32,
    pub node: NodeId,
    pub shape: AltShape,
    pub assoc: Associativity,
    pub label: Option<RcString>,
    /// Self references at the top level of the alternative, in order.
    pub recursive_calls: Vec<NodeId>,
    /// Alternatives listed first bind loosest.
    pub precedence: u32,
}

impl AltClassification {
    /// Precedence required of the operand following the operator.
    pub fn next_precedence(&self) -> u32 {
        match (self.shape, self.assoc) {
            (AltShape::Binary | AltShape::Suffix, Associativity::Left) => self.precedence + 1,
            _ => self.precedence,
        }
    }
    /// Whether the alternative begins with a self reference.
    pub fn starts_recursive(&self, tree: &Tree) -> bool {
        let Some(&first) = self.recursive_calls.first() else {
            return false;
        };
        tree.children(self.node)
            .iter()
            .find(|&&c| tree.kind(c) != NodeKind::ElementOptions)
            .is_some_and(|&c| c == first || tree.children(c).first() == Some(&first))
    }
}

#[derive(Clone, Debug)]
pub struct LeftRecursion {
    pub rule: RcString,
    pub alts: Vec<AltClassification>,
}

impl LeftRecursion {
    pub fn is_left_recursive(&self) -> bool {
        self.alts
            .iter()
            .any(|a| matches!(a.shape, AltShape::Binary | AltShape::Suffix))
    }
    pub fn of_shape(&self, shape: AltShape) -> impl Iterator<Item = &AltClassification> {
        self.alts.iter().filter(move |a| a.shape == shape)
    }
    /// Primaries and prefix operators, the alternatives that start an expression.
    pub fn primary_alts(&self) -> impl Iterator<Item = &AltClassification> {
        self.alts
            .iter()
            .filter(|a| matches!(a.shape, AltShape::Prefix | AltShape::Other))
    }
    /// Binary and suffix operators, the alternatives that continue an expression.
    pub fn operator_alts(&self) -> impl Iterator<Item = &AltClassification> {
        self.alts
            .iter()
            .filter(|a| matches!(a.shape, AltShape::Binary | AltShape::Suffix))
    }
    /// Alternatives that recurse on the left but fit none of the operator shapes, for
    /// example `e e e`. The rewrite cannot handle these.
    pub fn unsupported<'a>(
        &'a self,
        tree: &'a Tree,
    ) -> impl Iterator<Item = &'a AltClassification> + 'a {
        self.of_shape(AltShape::Other)
            .filter(move |a| a.starts_recursive(tree))
    }

    pub fn display_into(&self, buf: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(buf, "{}:", self.rule)?;
        for a in &self.alts {
            write!(
                buf,
                "  {} {} p={} next={}",
                a.alt,
                a.shape,
                a.precedence,
                a.next_precedence()
            )?;
            if a.assoc == Associativity::Right {
                buf.write_str(" right")?;
            }
            if let Some(label) = &a.label {
                write!(buf, " #{label}")?;
            }
            buf.write_char('\n')?;
        }
        Ok(())
    }
}

const ASSIGNED: AltIndex = 1;
const BARE: AltIndex = 2;

/// The rule reference `k` symbols ahead calls `rule`.
fn refers_to(rule: RcString, k: u32) -> impl Fn(&PredicateCx) -> bool {
    move |cx| cx.lookahead_text(k) == Some(&*rule)
}

/// Walks a rule's outer alternatives and records their operator shape.
pub struct Classifier<'a> {
    tree: &'a Tree,
    rule: RcString,
    recurse: Decision,
    err: &'a ErrorAccumulator,
}

impl<'a> Classifier<'a> {
    pub fn new(tree: &'a Tree, rule: &str, err: &'a ErrorAccumulator) -> Classifier<'a> {
        let rule = RcString::from(rule);
        let recurse = Decision::builder("recurse")
            .alt_if(ASSIGNED, "^(ASSIGN RULE_REF", refers_to(rule.clone(), 3))
            .alt_if(ASSIGNED, "^(PLUS_ASSIGN RULE_REF", refers_to(rule.clone(), 3))
            .alt_if(BARE, "RULE_REF", refers_to(rule.clone(), 1))
            .build();
        Classifier {
            tree,
            rule,
            recurse,
            err,
        }
    }

    pub fn classify(&self, root: NodeId) -> Result<LeftRecursion, MatchError> {
        let stream = TreeStream::new(self.tree, root);
        let mut m = Matcher::new(self.tree, &stream);

        m.expect(NodeKind::Rule)?;
        m.down()?;
        while !m.next_is(NodeKind::Block) {
            m.any()?;
        }
        let block = m.expect(NodeKind::Block)?;
        m.down()?;

        let count = self
            .tree
            .children(block)
            .iter()
            .filter(|&&c| self.tree.kind(c) != NodeKind::ElementOptions)
            .count() as u32;
        let mut alts = Vec::new();
        while !m.at_up() {
            if m.next_is(NodeKind::ElementOptions) {
                m.any()?;
                continue;
            }
            let alt = alts.len() as u32 + 1;
            alts.push(self.outer_alternative(&mut m, alt, count)?);
        }
        m.up()?;

        let result = LeftRecursion {
            rule: self.rule.clone(),
            alts,
        };
        log::debug!(
            "{}: {:?}",
            self.rule,
            result.alts.iter().map(|a| a.shape).collect::<Vec<_>>()
        );
        Ok(result)
    }

    fn outer_alternative(
        &self,
        m: &mut Matcher,
        alt: u32,
        count: u32,
    ) -> Result<AltClassification, MatchError> {
        let Some(node) = m.peek_node() else {
            return Err(m.no_viable("outer_alternative"));
        };

        let (shape, recursive_calls) = if let Ok(calls) = m.attempt(|m| self.binary(m)) {
            (AltShape::Binary, calls)
        } else if let Ok(calls) = m.attempt(|m| self.prefix(m)) {
            (AltShape::Prefix, calls)
        } else if let Ok(calls) = m.attempt(|m| self.suffix(m)) {
            (AltShape::Suffix, calls)
        } else {
            m.any()?;
            (AltShape::Other, self.top_level_calls(node))
        };

        let assoc = match shape {
            AltShape::Binary | AltShape::Suffix => self.associativity(node),
            AltShape::Prefix | AltShape::Other => Associativity::Left,
        };
        Ok(AltClassification {
            alt,
            node,
            shape,
            assoc,
            label: self.tree[node].label.clone(),
            recursive_calls,
            precedence: count - alt + 1,
        })
    }

    fn associativity(&self, alt: NodeId) -> Associativity {
        match self.tree.node_option(alt, "assoc") {
            None | Some("left") => Associativity::Left,
            Some("right") => Associativity::Right,
            Some(other) => {
                let span = self.tree.element_options(alt).and_then(|o| self.tree.span(o));
                self.err.warning(
                    span,
                    format!("Unsupported associativity `{other}` in rule {}", self.rule),
                );
                Associativity::Left
            }
        }
    }

    /// `e ordinary+ e epsilon*`
    fn binary(&self, m: &mut Matcher) -> Result<Vec<NodeId>, MatchError> {
        self.enter_alt(m)?;
        let first = self.recurse(m)?;
        self.ordinary_elements(m, "binary")?;
        let second = self.recurse(m)?;
        self.epsilon_elements(m)?;
        m.up()?;
        Ok(vec![first, second])
    }

    /// `ordinary+ e epsilon*`
    fn prefix(&self, m: &mut Matcher) -> Result<Vec<NodeId>, MatchError> {
        self.enter_alt(m)?;
        self.ordinary_elements(m, "prefix")?;
        let last = self.recurse(m)?;
        self.epsilon_elements(m)?;
        m.up()?;
        Ok(vec![last])
    }

    /// `e ordinary+`
    fn suffix(&self, m: &mut Matcher) -> Result<Vec<NodeId>, MatchError> {
        self.enter_alt(m)?;
        let first = self.recurse(m)?;
        self.ordinary_elements(m, "suffix")?;
        m.up()?;
        Ok(vec![first])
    }

    fn enter_alt(&self, m: &mut Matcher) -> Result<(), MatchError> {
        m.expect(NodeKind::Alt)?;
        m.down()?;
        if m.next_is(NodeKind::ElementOptions) {
            m.any()?;
        }
        Ok(())
    }

    /// A self reference, optionally labeled.
    fn recurse(&self, m: &mut Matcher) -> Result<NodeId, MatchError> {
        let call = match m.predict(&self.recurse, &[], false)? {
            ASSIGNED => {
                m.expect_one_of(&[NodeKind::Assign, NodeKind::PlusAssign])?;
                m.down()?;
                let call = m.expect(NodeKind::RuleRef)?;
                m.skip_children();
                m.up()?;
                call
            }
            _ => {
                let call = m.expect(NodeKind::RuleRef)?;
                m.skip_children();
                call
            }
        };
        Ok(call)
    }

    /// One or more elements that are not self references.
    fn ordinary_elements(&self, m: &mut Matcher, decision: &'static str) -> Result<(), MatchError> {
        let mut count = 0;
        while !m.at_up() && m.speculate(|m| self.recurse(m)).is_err() {
            m.any()?;
            count += 1;
        }
        if count == 0 {
            return Err(m.early_exit(decision));
        }
        Ok(())
    }

    /// Actions and predicates trailing the last operand.
    fn epsilon_elements(&self, m: &mut Matcher) -> Result<(), MatchError> {
        while !m.at_up() {
            m.expect_one_of(&[
                NodeKind::Action,
                NodeKind::SemanticPredicate,
                NodeKind::Epsilon,
            ])?;
            m.skip_children();
        }
        Ok(())
    }

    fn top_level_calls(&self, alt: NodeId) -> Vec<NodeId> {
        let is_self = |n: NodeId| {
            self.tree.kind(n) == NodeKind::RuleRef && self.tree.text(n) == Some(&*self.rule)
        };
        let mut calls = Vec::new();
        for &element in self.tree.children(alt) {
            match self.tree.kind(element) {
                NodeKind::Assign | NodeKind::PlusAssign => calls.extend(
                    self.tree
                        .children(element)
                        .iter()
                        .copied()
                        .filter(|&c| is_self(c)),
                ),
                _ if is_self(element) => calls.push(element),
                _ => {}
            }
        }
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn classify(body: Ast) -> (Tree, LeftRecursion, ErrorAccumulator) {
        let mut tree = Tree::new();
        let root = tree.insert(&rule("expr", body));
        let err = ErrorAccumulator::new();
        let result = Classifier::new(&tree, "expr", &err).classify(root).unwrap();
        (tree, result, err)
    }

    fn shapes(result: &LeftRecursion) -> Vec<AltShape> {
        result.alts.iter().map(|a| a.shape).collect()
    }

    #[test]
    fn binary_operators_and_primary() {
        let (_, result, _) = classify(block(vec![
            alt(vec![rref("expr"), lit("'*'"), rref("expr")]),
            alt(vec![rref("expr"), lit("'+'"), rref("expr")]),
            alt(vec![tok("INT")]),
        ]));
        assert_eq!(
            shapes(&result),
            [AltShape::Binary, AltShape::Binary, AltShape::Other]
        );
        let precedence: Vec<_> = result.alts.iter().map(|a| a.precedence).collect();
        assert_eq!(precedence, [3, 2, 1]);
        assert_eq!(result.alts[0].next_precedence(), 4);
        assert_eq!(result.alts[0].recursive_calls.len(), 2);
        assert!(result.is_left_recursive());
        assert_eq!(result.operator_alts().count(), 2);
        assert_eq!(result.primary_alts().count(), 1);
    }

    #[test]
    fn prefix_suffix_and_labels() {
        let (_, result, _) = classify(block(vec![
            alt(vec![lit("'-'"), rref("expr")]).labeled("Negate"),
            alt(vec![rref("expr"), lit("'!'")]),
            alt(vec![
                assign("lhs", rref("expr")),
                lit("'.'"),
                tok("ID"),
                lit("'='"),
                plus_assign("rhs", rref("expr")),
                action("{ build(); }"),
            ]),
            alt(vec![lit("'('"), rref("expr"), lit("')'")]),
        ]));
        assert_eq!(
            shapes(&result),
            [
                AltShape::Prefix,
                AltShape::Suffix,
                AltShape::Binary,
                AltShape::Other
            ]
        );
        assert_eq!(result.alts[0].label.as_deref(), Some("Negate"));
        assert_eq!(result.alts[0].next_precedence(), result.alts[0].precedence);
        assert_eq!(result.alts[1].next_precedence(), result.alts[1].precedence + 1);
    }

    #[test]
    fn right_associativity() {
        let (_, result, err) = classify(block(vec![
            alt(vec![
                options(&[("assoc", Some("right"))]),
                rref("expr"),
                lit("'^'"),
                rref("expr"),
            ]),
            alt(vec![
                options(&[("assoc", Some("sideways"))]),
                rref("expr"),
                lit("'-'"),
                rref("expr"),
            ]),
            alt(vec![tok("INT")]),
        ]));
        assert_eq!(result.alts[0].assoc, Associativity::Right);
        assert_eq!(result.alts[0].next_precedence(), 3);
        assert_eq!(result.alts[1].assoc, Associativity::Left);
        assert_eq!(err.get().len(), 1);
    }

    #[test]
    fn prefix_ignores_associativity() {
        let (_, result, err) = classify(block(vec![
            alt(vec![
                options(&[("assoc", Some("right"))]),
                lit("'-'"),
                rref("expr"),
            ]),
            alt(vec![
                options(&[("assoc", Some("sideways"))]),
                lit("'!'"),
                rref("expr"),
            ]),
            alt(vec![tok("INT")]),
        ]));
        assert_eq!(shapes(&result)[..2], [AltShape::Prefix, AltShape::Prefix]);
        assert_eq!(result.alts[0].assoc, Associativity::Left);
        assert_eq!(result.alts[1].assoc, Associativity::Left);
        assert!(err.is_empty());
    }

    #[test]
    fn unsupported_shapes_fall_through() {
        let (tree, result, _) = classify(block(vec![
            alt(vec![rref("expr"), rref("expr"), rref("expr")]),
            alt(vec![rref("expr"), lit("'+'"), rref("expr"), lit("'!'")]),
            alt(vec![lit("'-'"), rref("expr"), lit("'+'"), rref("expr")]),
            alt(vec![rref("other"), lit("'+'"), rref("other")]),
        ]));
        assert_eq!(shapes(&result), [AltShape::Other; 4]);
        let unsupported: Vec<_> = result.unsupported(&tree).map(|a| a.alt).collect();
        assert_eq!(unsupported, [1, 2]);
        assert!(!result.is_left_recursive());
    }
}
