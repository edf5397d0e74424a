//! Owned grammar syntax trees.
//!
//! This is the form front ends hand over (and the form read from json by the cli), it is
//! copied into a [`Tree`](crate::tree::Tree) arena before any pass runs. The free functions
//! build the node shapes the passes expect.

use serde::Deserialize;

use crate::{span::Span, tree::NodeKind};

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Ast {
    pub kind: NodeKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub span: Span,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "nonGreedy")]
    pub non_greedy: bool,
    #[serde(default)]
    pub children: Vec<Ast>,
}

impl Ast {
    pub fn new(kind: NodeKind) -> Ast {
        Ast {
            kind,
            text: None,
            span: Span::empty(),
            label: None,
            non_greedy: false,
            children: Vec::new(),
        }
    }
    pub fn with_text(mut self, text: impl Into<String>) -> Ast {
        self.text = Some(text.into());
        self
    }
    pub fn with_children(mut self, children: Vec<Ast>) -> Ast {
        self.children = children;
        self
    }
    pub fn with_child(mut self, child: Ast) -> Ast {
        self.children.push(child);
        self
    }
    fn with_children_appended(mut self, children: Vec<Ast>) -> Ast {
        self.children.extend(children);
        self
    }
    pub fn at(mut self, span: Span) -> Ast {
        self.span = span;
        self
    }
    pub fn labeled(mut self, label: impl Into<String>) -> Ast {
        self.label = Some(label.into());
        self
    }
    pub fn non_greedy(mut self) -> Ast {
        self.non_greedy = true;
        self
    }
    /// Appends an `ELEMENT_OPTIONS` child, used for terminals and rule references.
    pub fn with_options(self, entries: &[(&str, Option<&str>)]) -> Ast {
        self.with_child(options(entries))
    }
}

pub fn rule(name: &str, body: Ast) -> Ast {
    Ast::new(NodeKind::Rule).with_text(name).with_child(body)
}

pub fn block(alts: Vec<Ast>) -> Ast {
    Ast::new(NodeKind::Block).with_children(alts)
}

pub fn alt(elements: Vec<Ast>) -> Ast {
    Ast::new(NodeKind::Alt).with_children(elements)
}

/// String literal, `text` includes the quotes.
pub fn lit(text: &str) -> Ast {
    Ast::new(NodeKind::StringLiteral).with_text(text)
}

pub fn tok(name: &str) -> Ast {
    Ast::new(NodeKind::TokenRef).with_text(name)
}

pub fn rref(name: &str) -> Ast {
    Ast::new(NodeKind::RuleRef).with_text(name)
}

pub fn range(from: &str, to: &str) -> Ast {
    Ast::new(NodeKind::Range).with_children(vec![lit(from), lit(to)])
}

pub fn set(elements: Vec<Ast>) -> Ast {
    Ast::new(NodeKind::Set).with_children(elements)
}

pub fn not(inner: Ast) -> Ast {
    Ast::new(NodeKind::Not).with_child(inner)
}

pub fn wildcard() -> Ast {
    Ast::new(NodeKind::Wildcard).with_text(".")
}

/// Lexer character set, `text` includes the brackets.
pub fn char_set(text: &str) -> Ast {
    Ast::new(NodeKind::CharSet).with_text(text)
}

pub fn optional(inner: Ast) -> Ast {
    Ast::new(NodeKind::Optional).with_child(inner)
}

pub fn closure(inner: Ast) -> Ast {
    Ast::new(NodeKind::Closure).with_child(inner)
}

pub fn plus(inner: Ast) -> Ast {
    Ast::new(NodeKind::PositiveClosure).with_child(inner)
}

pub fn action(text: &str) -> Ast {
    Ast::new(NodeKind::Action).with_text(text)
}

pub fn pred(text: &str) -> Ast {
    Ast::new(NodeKind::SemanticPredicate).with_text(text)
}

pub fn epsilon() -> Ast {
    Ast::new(NodeKind::Epsilon)
}

pub fn assign(label: &str, element: Ast) -> Ast {
    Ast::new(NodeKind::Assign)
        .with_text(label)
        .with_child(element)
}

pub fn plus_assign(label: &str, element: Ast) -> Ast {
    Ast::new(NodeKind::PlusAssign)
        .with_text(label)
        .with_child(element)
}

/// `<key=value, flag>`
pub fn options(entries: &[(&str, Option<&str>)]) -> Ast {
    let children = entries
        .iter()
        .map(|&(key, value)| match value {
            Some(value) => assign(key, tok(value)),
            None => tok(key),
        })
        .collect();
    Ast::new(NodeKind::ElementOptions).with_children(children)
}

/// `alternative -> command, command(arg)`
pub fn lexer_commands(alternative: Ast, commands: Vec<Ast>) -> Ast {
    Ast::new(NodeKind::LexerAltWithCommands)
        .with_child(alternative)
        .with_children_appended(commands)
}

pub fn command(name: &str, argument: Option<&str>) -> Ast {
    let node = Ast::new(NodeKind::LexerCommand).with_text(name);
    match argument {
        Some(arg) => node.with_child(tok(arg)),
        None => node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_with_defaults() {
        let json = r#"{
            "kind": "Rule",
            "text": "a",
            "children": [{
                "kind": "Block",
                "children": [{
                    "kind": "Alt",
                    "children": [
                        { "kind": "TokenRef", "text": "ID", "span": { "start": 4, "end": 6 } },
                        { "kind": "Closure", "nonGreedy": true, "children": [{ "kind": "RuleRef", "text": "b" }] }
                    ]
                }]
            }]
        }"#;
        let ast: Ast = serde_json::from_str(json).unwrap();
        let expected = rule(
            "a",
            block(vec![alt(vec![
                tok("ID").at(Span::new(4, 6)),
                closure(rref("b")).non_greedy(),
            ])]),
        );
        assert_eq!(ast, expected);
    }
}
