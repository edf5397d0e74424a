use crate::{
    ast::*,
    error::{AtnError, ErrorAccumulator},
    grammar::{CompileOptions, Compiled, Grammar, RuleHandle},
    tree::NodeKind,
};

use super::{
    Automaton, BlockFlavor, LexerCommand, RuleAutomaton, StateId, StateKind, Transition,
};

fn grammar(rules: Vec<Ast>) -> Grammar {
    let mut grammar = Grammar::new();
    for rule in rules {
        grammar.add_rule(&rule).unwrap();
    }
    grammar
}

fn compile(grammar: &mut Grammar, collapse_sets: bool) -> (Compiled, ErrorAccumulator) {
    let err = ErrorAccumulator::new();
    let options = CompileOptions {
        collapse_sets,
        ..Default::default()
    };
    let compiled = grammar.compile(&options, &err);
    (compiled, err)
}

fn automaton<'a>(compiled: &'a Compiled, grammar: &Grammar, name: &str) -> &'a RuleAutomaton {
    let handle = grammar.rule_by_name(name).unwrap();
    compiled.atn.rule(handle).unwrap()
}

fn state(graph: &Automaton, kind: StateKind) -> StateId {
    graph
        .states()
        .find(|(_, s)| s.kind == kind)
        .map(|(id, _)| id)
        .unwrap()
}

fn transitions(graph: &Automaton) -> Vec<&Transition> {
    graph
        .states()
        .flat_map(|(_, s)| s.edges.iter().map(|e| &e.transition))
        .collect()
}

fn consuming(graph: &Automaton) -> Vec<&Transition> {
    transitions(graph)
        .into_iter()
        .filter(|t| !t.is_epsilon())
        .collect()
}

/// `a : ('a' | 'b')* ;`
fn star_of_literals() -> Grammar {
    grammar(vec![rule(
        "a",
        block(vec![alt(vec![closure(block(vec![
            alt(vec![lit("'a'")]),
            alt(vec![lit("'b'")]),
        ]))])]),
    )])
}

#[test]
fn star_loop_structure() {
    let mut g = star_of_literals();
    let (compiled, err) = compile(&mut g, false);
    assert!(compiled.failures.is_empty());
    assert!(!err.has_errors());

    let graph = &automaton(&compiled, &g, "a").graph;
    let entry = state(graph, StateKind::StarLoopEntry);
    let loop_back = state(graph, StateKind::StarLoopBack);
    let end = state(graph, StateKind::LoopEnd);
    let blk = state(graph, StateKind::BlockStart(BlockFlavor::Star));

    // enter the block first, bypass second
    let targets: Vec<_> = graph[entry].edges.iter().map(|e| e.target).collect();
    assert_eq!(targets, [blk, end]);
    assert_eq!(graph.edges_between(loop_back, entry).count(), 1);
    assert_eq!(graph[entry].loop_back, Some(loop_back));
    assert_eq!(graph[end].loop_back, Some(loop_back));

    // the alternatives of the inner block and the loop entry
    assert_eq!(graph.decisions(), [blk, entry]);
    assert_eq!(
        consuming(graph),
        [&Transition::Atom(1), &Transition::Atom(2)]
    );
}

#[test]
fn collapsed_star_uses_one_set() {
    let mut g = star_of_literals();
    let (compiled, _) = compile(&mut g, true);
    let graph = &automaton(&compiled, &g, "a").graph;

    let consumed = consuming(graph);
    assert_eq!(consumed.len(), 1);
    assert!(matches!(consumed[0], Transition::Set(set) if set.len() == 2));
    assert_eq!(graph.decisions().len(), 1);
    assert_eq!(graph.count(StateKind::StarLoopEntry), 1);
}

#[test]
fn plus_loop_structure() {
    let mut g = grammar(vec![
        rule("a", block(vec![alt(vec![plus(block(vec![alt(vec![tok("X")])]))])])),
        rule("X", block(vec![alt(vec![lit("'x'")])])),
    ]);
    let (compiled, _) = compile(&mut g, true);
    let graph = &automaton(&compiled, &g, "a").graph;

    let blk = state(graph, StateKind::BlockStart(BlockFlavor::Plus));
    let loop_back = state(graph, StateKind::PlusLoopBack);
    let end = state(graph, StateKind::LoopEnd);
    assert_eq!(graph[blk].loop_back, Some(loop_back));
    let targets: Vec<_> = graph[loop_back].edges.iter().map(|e| e.target).collect();
    assert_eq!(targets, [blk, end]);
    assert_eq!(graph.decisions(), [loop_back]);
}

#[test]
fn plus_over_three_alternatives() {
    let mut g = grammar(vec![
        rule(
            "a",
            block(vec![alt(vec![plus(block(vec![
                alt(vec![tok("X")]),
                alt(vec![tok("X"), tok("X")]),
                alt(vec![rref("a")]),
            ]))])]),
        ),
        rule("X", block(vec![alt(vec![lit("'x'")])])),
    ]);
    let (compiled, err) = compile(&mut g, false);
    assert!(compiled.failures.is_empty());
    assert!(!err.has_errors());

    let automaton = automaton(&compiled, &g, "a");
    assert!(automaton.verify().is_ok());
    let graph = &automaton.graph;
    let blk = state(graph, StateKind::BlockStart(BlockFlavor::Plus));
    let loop_back = state(graph, StateKind::PlusLoopBack);
    let end = graph[blk].end.unwrap();
    assert_eq!(graph[blk].edges.len(), 3);
    assert_eq!(graph.decisions(), [blk, loop_back]);
    assert_eq!(graph.edges_between(end, loop_back).count(), 1);
}

#[test]
fn non_greedy_optional_prefers_bypass() {
    let mut g = grammar(vec![
        rule(
            "a",
            block(vec![alt(vec![
                optional(block(vec![alt(vec![tok("X")])])).non_greedy(),
                tok("X"),
            ])]),
        ),
        rule("X", block(vec![alt(vec![lit("'x'")])])),
    ]);
    let (compiled, err) = compile(&mut g, true);
    assert!(!err.has_errors());
    let graph = &automaton(&compiled, &g, "a").graph;

    let (start, blk) = graph
        .states()
        .find(|(_, s)| s.non_greedy)
        .unwrap();
    assert_eq!(blk.kind, StateKind::BlockStart(BlockFlavor::Basic));
    assert_eq!(blk.edges[0].target, blk.end.unwrap());
    assert_eq!(graph.decisions(), [start]);
}

#[test]
fn lexer_literal_is_a_chain() {
    let mut g = grammar(vec![rule("ABC", block(vec![alt(vec![lit("'abc'")])]))]);
    let (compiled, _) = compile(&mut g, true);
    let graph = &automaton(&compiled, &g, "ABC").graph;
    assert_eq!(
        consuming(graph),
        [
            &Transition::Atom('a' as i32),
            &Transition::Atom('b' as i32),
            &Transition::Atom('c' as i32)
        ]
    );
    assert_eq!(g.symbols.literal_type("'abc'"), g.symbols.token_type("ABC"));
}

#[test]
fn lexer_command_transitions() {
    let mut g = grammar(vec![rule(
        "WS",
        block(vec![lexer_commands(
            alt(vec![plus(char_set("[ \\t]"))]),
            vec![command("skip", None), command("channel", Some("HIDDEN"))],
        )]),
    )]);
    let (compiled, _) = compile(&mut g, true);
    assert!(compiled.failures.is_empty());
    let graph = &automaton(&compiled, &g, "WS").graph;
    let commands: Vec<_> = transitions(graph)
        .into_iter()
        .filter_map(|t| match t {
            Transition::LexerCommand(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(commands, [LexerCommand::Skip, LexerCommand::Channel(1)]);

    let mut g = grammar(vec![rule(
        "WS",
        block(vec![lexer_commands(
            alt(vec![lit("' '")]),
            vec![command("frob", None)],
        )]),
    )]);
    let (compiled, _) = compile(&mut g, true);
    assert!(matches!(
        &compiled.failures[0].error,
        AtnError::UnknownLexerCommand { name, .. } if &**name == "frob"
    ));
}

#[test]
fn token_start_calls_token_rules() {
    let mut g = Grammar::new();
    let a = g.add_rule(&rule("A", block(vec![alt(vec![lit("'a'")])]))).unwrap();
    g.add_fragment(&rule("DIGIT", block(vec![alt(vec![range("'0'", "'9'")])])))
        .unwrap();
    let b = g
        .add_rule(&rule("B", block(vec![alt(vec![plus(tok("DIGIT"))])])))
        .unwrap();
    let broken = g
        .add_rule(&rule("C", block(vec![alt(vec![tok("MISSING")])])))
        .unwrap();
    let (compiled, err) = compile(&mut g, true);
    let failed: Vec<_> = compiled.failures.iter().map(|f| f.rule).collect();
    assert_eq!(failed, [broken]);
    assert!(!err.has_errors());

    let tokens = compiled.atn.token_start.as_ref().unwrap();
    let called: Vec<RuleHandle> = tokens.graph[tokens.start]
        .edges
        .iter()
        .flat_map(|e| tokens.graph[e.target].edges.iter())
        .filter_map(|e| match e.transition {
            Transition::Rule { rule, .. } => Some(rule),
            _ => None,
        })
        .collect();
    assert_eq!(called, [a, b]);
    assert_eq!(tokens.graph.decisions(), [tokens.start]);
    assert!(tokens.graph.verify(tokens.start, tokens.stop).is_ok());
    assert_eq!(g.symbols.token_type("DIGIT"), None);
}

#[test]
fn precedence_arguments() {
    let mut g = grammar(vec![rule(
        "e",
        block(vec![alt(vec![
            pred("{precpred(_ctx, 2)}?").with_options(&[("p", Some("2"))]),
            rref("e").with_options(&[("p", Some("3"))]),
            pred("{$x > 0}?"),
        ])]),
    )]);
    let (compiled, _) = compile(&mut g, false);
    let graph = &automaton(&compiled, &g, "e").graph;
    let handle = g.rule_by_name("e").unwrap();
    let semantic: Vec<_> = transitions(graph)
        .into_iter()
        .filter(|t| !matches!(t, Transition::Epsilon))
        .cloned()
        .collect();
    assert_eq!(
        semantic,
        [
            Transition::PrecedencePredicate(2),
            Transition::Rule {
                rule: handle,
                precedence: 3
            },
            Transition::Predicate {
                index: 0,
                ctx_dependent: true
            },
        ]
    );
}

#[test]
fn failures_do_not_affect_other_rules() {
    let mut g = grammar(vec![
        rule("a", block(vec![alt(vec![tok("ID")])])),
        rule("b", block(vec![alt(vec![lit("'x'")])])),
        rule(
            "C",
            block(vec![alt(vec![
                Ast::new(NodeKind::Range).with_children(vec![lit("'a'")])
            ])]),
        ),
        rule("d", block(vec![alt(vec![range("'a'", "'z'")])])),
    ]);
    let (compiled, _) = compile(&mut g, true);
    let failed: Vec<_> = compiled
        .failures
        .iter()
        .map(|f| (&*g.rules[f.rule].name, f.error.clone()))
        .collect();
    assert_eq!(failed.len(), 3);
    assert!(matches!(&failed[0], ("a", AtnError::UnknownToken { name, .. }) if &**name == "ID"));
    assert!(matches!(&failed[1], ("C", AtnError::Structure(_))));
    assert!(matches!(&failed[2], ("d", AtnError::LexerOnly { what: "range", .. })));

    let b = g.rule_by_name("b").unwrap();
    assert!(compiled.atn.rule(b).is_some());
    assert!(compiled.atn.rule(g.rule_by_name("a").unwrap()).is_none());
}

#[test]
fn malformed_rule_fails_once() {
    let mut g = grammar(vec![
        rule("e", block(vec![])),
        rule("b", block(vec![alt(vec![lit("'x'")])])),
    ]);
    let e = g.rule_by_name("e").unwrap();
    g.mark_left_recursive(e);
    let (compiled, _) = compile(&mut g, true);
    let failed: Vec<_> = compiled.failures.iter().map(|f| f.rule).collect();
    assert_eq!(failed, [e]);
    assert!(matches!(compiled.failures[0].error, AtnError::Structure(_)));
    assert!(compiled.atn.rule(e).is_none());
    assert!(compiled.left_recursion[e].is_none());
    assert!(compiled.atn.rule(g.rule_by_name("b").unwrap()).is_some());
}

#[test]
fn replaced_rule_is_recompiled() {
    let mut g = grammar(vec![
        rule(
            "e",
            block(vec![
                alt(vec![rref("e"), lit("'+'"), rref("e")]),
                alt(vec![tok("INT")]),
            ]),
        ),
        rule("INT", block(vec![alt(vec![plus(range("'0'", "'9'"))])])),
    ]);
    let e = g.rule_by_name("e").unwrap();
    g.mark_left_recursive(e);
    let (compiled, _) = compile(&mut g, true);
    assert!(compiled.left_recursion[e].is_some());

    // primary followed by a loop over the operator suffix
    let rewritten = rule(
        "e",
        block(vec![alt(vec![
            tok("INT"),
            closure(block(vec![alt(vec![lit("'+'"), tok("INT")])])),
        ])]),
    );
    g.replace_rule(e, &rewritten);
    g.rules[e].left_recursive = false;
    assert_eq!(
        g.tree.to_sexpr(g.rules[e].root),
        "(RULE e (BLOCK (ALT INT (CLOSURE (BLOCK (ALT '+' INT))))))"
    );

    let (compiled, err) = compile(&mut g, true);
    assert!(compiled.failures.is_empty());
    assert!(!err.has_errors());
    assert!(compiled.left_recursion[e].is_none());
    let graph = &automaton(&compiled, &g, "e").graph;
    assert_eq!(graph.count(StateKind::StarLoopEntry), 1);
    let plus = g.symbols.literal_type("'+'").unwrap();
    let int = g.symbols.token_type("INT").unwrap();
    assert_eq!(
        consuming(graph),
        [&Transition::Atom(int), &Transition::Atom(plus), &Transition::Atom(int)]
    );
}

#[test]
fn left_recursion_is_classified() {
    let mut g = grammar(vec![
        rule(
            "e",
            block(vec![
                alt(vec![rref("e"), lit("'*'"), rref("e")]),
                alt(vec![rref("e"), lit("'+'"), rref("e")]),
                alt(vec![tok("INT")]),
            ]),
        ),
        rule("INT", block(vec![alt(vec![plus(range("'0'", "'9'"))])])),
    ]);
    let e = g.rule_by_name("e").unwrap();
    g.mark_left_recursive(e);
    let (compiled, err) = compile(&mut g, true);
    assert!(compiled.failures.is_empty());
    assert!(!err.has_errors());

    let classified = compiled.left_recursion[e].as_ref().unwrap();
    assert!(classified.is_left_recursive());
    assert_eq!(classified.operator_alts().count(), 2);
    assert_eq!(classified.primary_alts().count(), 1);
    assert!(compiled.left_recursion[g.rule_by_name("INT").unwrap()].is_none());
}

#[test]
fn display_statements() {
    let mut g = grammar(vec![
        rule("a", block(vec![alt(vec![tok("ID")])])),
        rule("ID", block(vec![alt(vec![lit("'x'")])])),
    ]);
    let (compiled, _) = compile(&mut g, true);
    let mut out = String::new();
    automaton(&compiled, &g, "a")
        .graph
        .display_statements(&mut out, &g, false)
        .unwrap();
    let expect = "\
s0 RuleStart:
  ε s4
s1 RuleStop:
s2 Basic alt=1:
  ID ↓
s3 Basic alt=1:
  ε s5
s4 BlockStart(Basic):
  ε s2
s5 BlockEnd:
  ε s1
";
    assert_eq!(out, expect);
}
