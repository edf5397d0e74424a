//! Collapses blocks whose alternatives are each a single set element into one `SET` node.
//!
//! `('a' | 'b' | ID)` becomes `(SET 'a' 'b' ID)` so the automaton builder can emit a single set
//! transition instead of a decision between single-symbol alternatives.

use crate::{
    literal::char_value,
    pattern::{
        instantiate, AltIndex, Captures, Decision, MatchError, Matcher, PredicateCx, Replacement,
        Slot, Template, TreeStream,
    },
    tree::{NodeId, NodeKind, Tree},
};

const EBNF_BLOCK: AltIndex = 1;
const EBNF_SET: AltIndex = 2;
const RULE_BLOCK: AltIndex = 3;
const NESTED_BLOCK: AltIndex = 4;

const LITERAL: AltIndex = 1;
const LITERAL_WITH_OPTIONS: AltIndex = 2;
const TOKEN: AltIndex = 3;
const TOKEN_WITH_OPTIONS: AltIndex = 4;
const RANGE: AltIndex = 5;
const CHAR_SET: AltIndex = 6;

pub struct SetCollapser {
    block_set: Decision,
    set_element: Decision,
    ebnf_block: Template,
    ebnf_set: Template,
    rule_block: Template,
    nested_block: Template,
}

impl Default for SetCollapser {
    fn default() -> Self {
        Self::new()
    }
}

impl SetCollapser {
    pub fn new() -> SetCollapser {
        let block_set = Decision::builder("block_set")
            .alt(EBNF_BLOCK, "^(OPTIONAL ^(BLOCK ALT")
            .alt(EBNF_BLOCK, "^(CLOSURE ^(BLOCK ALT")
            .alt(EBNF_BLOCK, "^(POSITIVE_CLOSURE ^(BLOCK ALT")
            .alt(EBNF_SET, "^(OPTIONAL SET")
            .alt(EBNF_SET, "^(CLOSURE SET")
            .alt(EBNF_SET, "^(POSITIVE_CLOSURE SET")
            .alt_if(RULE_BLOCK, "^(BLOCK ALT", |cx| {
                cx.parent_kind() == Some(NodeKind::Rule)
            })
            .alt_if(NESTED_BLOCK, "^(BLOCK ALT", |cx| {
                cx.parent_kind() != Some(NodeKind::Rule)
            })
            .build();

        let set_element = Decision::builder("set_element")
            .alt_if(LITERAL, "STRING_LITERAL", single_char)
            .alt_if(LITERAL_WITH_OPTIONS, "^(STRING_LITERAL ELEMENT_OPTIONS", single_char)
            .alt_if(TOKEN, "TOKEN_REF", |cx| !cx.in_lexer)
            .alt_if(TOKEN_WITH_OPTIONS, "^(TOKEN_REF ELEMENT_OPTIONS", |cx| {
                !cx.in_lexer
            })
            .alt_if(RANGE, "^(RANGE STRING_LITERAL STRING_LITERAL )", char_range)
            .alt_if(CHAR_SET, "LEXER_CHAR_SET", |cx| cx.in_lexer)
            .build();

        let set = || {
            Template::node(
                NodeKind::Set,
                "block",
                vec![Template::Splice("element")],
            )
        };
        let wrapped = |inner: Template| {
            Template::node(
                NodeKind::Block,
                "block",
                vec![Template::node(NodeKind::Alt, "block", vec![inner])],
            )
        };

        SetCollapser {
            block_set,
            set_element,
            ebnf_block: Template::dup("suffix", vec![wrapped(set())]),
            ebnf_set: Template::dup("suffix", vec![wrapped(Template::Splice("set"))]),
            rule_block: wrapped(set()),
            nested_block: set(),
        }
    }

    /// Rewrites every qualifying block below `root`, returns the (possibly new) root.
    ///
    /// The walk is top-down and continues into replacement subtrees, running it again on its
    /// own output changes nothing.
    pub fn collapse(&self, tree: &mut Tree, root: NodeId, in_lexer: bool) -> NodeId {
        let mut ancestors = Vec::new();
        self.visit(tree, Slot::Root, root, in_lexer, &mut ancestors)
    }

    fn visit(
        &self,
        tree: &mut Tree,
        slot: Slot,
        node: NodeId,
        in_lexer: bool,
        ancestors: &mut Vec<NodeId>,
    ) -> NodeId {
        let node = match self.try_collapse(tree, slot, node, in_lexer, ancestors) {
            Some(replacement) => replacement.apply(tree),
            None => node,
        };
        ancestors.push(node);
        let children = tree.children(node).to_vec();
        for (index, child) in children.into_iter().enumerate() {
            let slot = Slot::Child {
                parent: node,
                index,
            };
            self.visit(tree, slot, child, in_lexer, ancestors);
        }
        ancestors.pop();
        node
    }

    fn try_collapse(
        &self,
        tree: &mut Tree,
        slot: Slot,
        node: NodeId,
        in_lexer: bool,
        ancestors: &[NodeId],
    ) -> Option<Replacement> {
        let kind = tree.kind(node);
        if kind != NodeKind::Block && !kind.is_ebnf_suffix() {
            return None;
        }

        let (alt, captures) = {
            let stream = TreeStream::new(tree, node);
            let mut m = Matcher::new(tree, &stream);
            let matched = m
                .predict(&self.block_set, ancestors, in_lexer)
                .and_then(|alt| {
                    let captures = match alt {
                        EBNF_BLOCK => self.ebnf_block_set(&mut m, ancestors, in_lexer)?,
                        EBNF_SET => Self::ebnf_bare_set(&mut m)?,
                        RULE_BLOCK => self.block_elements(&mut m, ancestors, in_lexer, true)?,
                        _ => self.block_elements(&mut m, ancestors, in_lexer, false)?,
                    };
                    Ok((alt, captures))
                });
            match matched {
                Ok(matched) => matched,
                Err(err) => {
                    log::trace!("{} not collapsed: {err}", tree.to_sexpr(node));
                    return None;
                }
            }
        };

        let template = match alt {
            EBNF_BLOCK => &self.ebnf_block,
            EBNF_SET => &self.ebnf_set,
            RULE_BLOCK => &self.rule_block,
            _ => &self.nested_block,
        };
        match instantiate(tree, template, &captures, slot, node) {
            Ok(replacement) => {
                log::debug!(
                    "collapsed {} into {}",
                    tree.to_sexpr(node),
                    tree.to_sexpr(replacement.new)
                );
                Some(replacement)
            }
            Err(err) => {
                log::warn!("set collapse template failed: {err}");
                None
            }
        }
    }

    /// `^(suffix ^(BLOCK alt alt+))`
    fn ebnf_block_set(
        &self,
        m: &mut Matcher,
        ancestors: &[NodeId],
        in_lexer: bool,
    ) -> Result<Captures, MatchError> {
        let suffix = m.expect_one_of(&[
            NodeKind::Optional,
            NodeKind::Closure,
            NodeKind::PositiveClosure,
        ])?;
        m.down()?;
        let mut captures = self.block_elements(m, ancestors, in_lexer, false)?;
        m.up()?;
        captures.push("suffix", suffix);
        Ok(captures)
    }

    /// `^(suffix SET)`, a set left bare under a suffix by a previous rewrite.
    fn ebnf_bare_set(m: &mut Matcher) -> Result<Captures, MatchError> {
        let suffix = m.expect_one_of(&[
            NodeKind::Optional,
            NodeKind::Closure,
            NodeKind::PositiveClosure,
        ])?;
        m.down()?;
        let set = m.expect(NodeKind::Set)?;
        m.skip_children();
        m.up()?;

        let mut captures = Captures::new();
        captures.push("suffix", suffix);
        captures.push("block", set);
        captures.push("set", set);
        Ok(captures)
    }

    /// `^(BLOCK ^(ALT ELEMENT_OPTIONS? set_element) ...)` with at least two alternatives.
    fn block_elements(
        &self,
        m: &mut Matcher,
        ancestors: &[NodeId],
        in_lexer: bool,
        rule_level: bool,
    ) -> Result<Captures, MatchError> {
        let mut captures = Captures::new();
        let block = m.expect(NodeKind::Block)?;
        captures.push("block", block);
        m.down()?;

        let mut count = 0;
        while m.next_is(NodeKind::Alt) {
            let alt = m.expect(NodeKind::Alt)?;
            // labels would be lost
            if rule_level && count == 0 && m.tree()[alt].label.is_some() {
                return Err(m.no_viable("block_set"));
            }
            m.down()?;
            if m.next_is(NodeKind::ElementOptions) {
                m.any()?;
            }
            let element = self.set_element(m, ancestors, in_lexer)?;
            captures.push("element", element);
            m.up()?;
            count += 1;
        }
        if count < 2 {
            return Err(m.early_exit("block_set"));
        }
        m.up()?;
        Ok(captures)
    }

    fn set_element(
        &self,
        m: &mut Matcher,
        ancestors: &[NodeId],
        in_lexer: bool,
    ) -> Result<NodeId, MatchError> {
        let element = match m.predict(&self.set_element, ancestors, in_lexer)? {
            LITERAL | LITERAL_WITH_OPTIONS => m.expect(NodeKind::StringLiteral)?,
            TOKEN | TOKEN_WITH_OPTIONS => m.expect(NodeKind::TokenRef)?,
            RANGE => m.expect(NodeKind::Range)?,
            CHAR_SET => m.expect(NodeKind::CharSet)?,
            _ => return Err(m.no_viable("set_element")),
        };
        m.skip_children();
        Ok(element)
    }
}

/// In the lexer only single characters can join a set.
fn single_char(cx: &PredicateCx) -> bool {
    !cx.in_lexer || cx.lookahead_text(1).and_then(char_value).is_some()
}

/// `^(RANGE 'a' 'z')` with both bounds single characters.
fn char_range(cx: &PredicateCx) -> bool {
    cx.in_lexer
        && cx.lookahead_text(3).and_then(char_value).is_some()
        && cx.lookahead_text(4).and_then(char_value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn collapsed(ast: Ast, in_lexer: bool) -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let root = tree.insert(&ast);
        let root = SetCollapser::new().collapse(&mut tree, root, in_lexer);
        (tree, root)
    }

    fn sexpr(ast: Ast, in_lexer: bool) -> String {
        let (tree, root) = collapsed(ast, in_lexer);
        tree.to_sexpr(root)
    }

    #[test]
    fn rule_block_of_terminals() {
        let ast = rule(
            "a",
            block(vec![
                alt(vec![lit("'a'")]),
                alt(vec![lit("'b'")]),
                alt(vec![tok("ID")]),
            ]),
        );
        assert_eq!(sexpr(ast, false), "(RULE a (BLOCK (ALT (SET 'a' 'b' ID))))");
    }

    #[test]
    fn lexer_ranges() {
        let ast = rule(
            "LETTER",
            block(vec![
                alt(vec![range("'a'", "'z'")]),
                alt(vec![range("'A'", "'Z'")]),
            ]),
        );
        assert_eq!(
            sexpr(ast, true),
            "(RULE LETTER (BLOCK (ALT (SET (RANGE 'a' 'z') (RANGE 'A' 'Z')))))"
        );
    }

    #[test]
    fn nested_and_suffixed_blocks() {
        let ast = rule(
            "a",
            block(vec![alt(vec![
                tok("X"),
                block(vec![alt(vec![tok("A")]), alt(vec![tok("B")])]),
                closure(block(vec![
                    alt(vec![tok("C")]),
                    alt(vec![lit("'d'").with_options(&[("fail", None)])]),
                ]))
                .non_greedy(),
            ])]),
        );
        assert_eq!(
            sexpr(ast, false),
            "(RULE a (BLOCK (ALT X (SET A B) (CLOSURE? (BLOCK (ALT (SET C ('d' (ELEMENT_OPTIONS fail)))))))))"
        );
    }

    #[test]
    fn suffixed_bare_set_is_wrapped() {
        let ast = rule(
            "a",
            block(vec![alt(vec![plus(set(vec![tok("A"), tok("B")]))])]),
        );
        assert_eq!(
            sexpr(ast, false),
            "(RULE a (BLOCK (ALT (POSITIVE_CLOSURE (BLOCK (ALT (SET A B)))))))"
        );
    }

    #[test]
    fn non_qualifying_blocks_are_untouched() {
        let cases = [
            // rule references are not set elements
            (
                rule("a", block(vec![alt(vec![rref("b")]), alt(vec![tok("C")])])),
                false,
            ),
            // two elements in one alternative
            (
                rule(
                    "a",
                    block(vec![alt(vec![tok("A"), tok("B")]), alt(vec![tok("C")])]),
                ),
                false,
            ),
            // single alternative
            (rule("a", block(vec![alt(vec![tok("A")])])), false),
            // first rule alternative is labeled
            (
                rule(
                    "a",
                    block(vec![
                        alt(vec![tok("A")]).labeled("first"),
                        alt(vec![tok("B")]),
                    ]),
                ),
                false,
            ),
            // multi character literal in the lexer
            (
                rule("A", block(vec![alt(vec![lit("'ab'")]), alt(vec![lit("'c'")])])),
                true,
            ),
            // token reference in the lexer
            (
                rule("A", block(vec![alt(vec![tok("B")]), alt(vec![lit("'c'")])])),
                true,
            ),
            // range in the parser
            (
                rule(
                    "a",
                    block(vec![alt(vec![range("'a'", "'z'")]), alt(vec![tok("C")])]),
                ),
                false,
            ),
            // lexer commands
            (
                rule(
                    "WS",
                    block(vec![
                        lexer_commands(alt(vec![lit("' '")]), vec![command("skip", None)]),
                        alt(vec![lit("'\\t'")]),
                    ]),
                ),
                true,
            ),
        ];
        for (ast, in_lexer) in cases {
            let (tree, root) = collapsed(ast.clone(), in_lexer);
            assert_eq!(tree.extract(root), ast);
        }
    }

    #[test]
    fn idempotent() {
        let ast = rule(
            "a",
            block(vec![
                alt(vec![tok("A")]),
                alt(vec![optional(block(vec![
                    alt(vec![tok("B")]),
                    alt(vec![tok("C")]),
                ]))]),
                alt(vec![tok("D")]),
            ]),
        );
        let (mut tree, root) = collapsed(ast, false);
        let once = tree.extract(root);
        let size = tree.len();
        let again = SetCollapser::new().collapse(&mut tree, root, false);
        assert_eq!(tree.extract(again), once);
        assert_eq!(tree.len(), size);
    }

    #[test]
    fn wrapped_bare_set_is_stable() {
        let ast = rule(
            "a",
            block(vec![alt(vec![
                plus(set(vec![tok("A"), tok("B")])),
                closure(set(vec![tok("C"), tok("D")])),
            ])]),
        );
        let (mut tree, root) = collapsed(ast, false);
        let once = tree.to_sexpr(root);
        assert_eq!(
            once,
            "(RULE a (BLOCK (ALT (POSITIVE_CLOSURE (BLOCK (ALT (SET A B)))) (CLOSURE (BLOCK (ALT (SET C D)))))))"
        );
        let size = tree.len();
        let again = SetCollapser::new().collapse(&mut tree, root, false);
        assert_eq!(tree.to_sexpr(again), once);
        assert_eq!(tree.len(), size);
    }

    #[test]
    fn lexer_set_elements_are_characters() {
        let ast = rule(
            "A",
            block(vec![
                alt(vec![lit("'x'")]),
                alt(vec![char_set("[0-9]")]),
                alt(vec![range("'a'", "'f'")]),
            ]),
        );
        let (tree, root) = collapsed(ast, true);
        let body = tree.children(root)[0];
        let set = tree.children(tree.children(body)[0])[0];
        assert_eq!(tree.kind(set), NodeKind::Set);
        let kinds: Vec<_> = tree.children(set).iter().map(|&c| tree.kind(c)).collect();
        assert_eq!(
            kinds,
            [NodeKind::StringLiteral, NodeKind::CharSet, NodeKind::Range]
        );
    }
}
