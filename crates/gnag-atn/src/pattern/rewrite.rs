use crate::{
    span::Token,
    tree::{Node, NodeId, NodeKind, Tree},
};

use super::{MatchError, MatchErrorKind};

/// Nodes bound by name during a match, a name may be bound repeatedly.
#[derive(Default, Debug)]
pub struct Captures {
    bound: Vec<(&'static str, NodeId)>,
}

impl Captures {
    pub fn new() -> Captures {
        Captures::default()
    }
    pub fn push(&mut self, name: &'static str, node: NodeId) {
        self.bound.push((name, node));
    }
    pub fn get(&self, name: &'static str) -> Option<NodeId> {
        self.all(name).next()
    }
    pub fn all(&self, name: &'static str) -> impl Iterator<Item = NodeId> + '_ {
        self.bound
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|&(_, node)| node)
    }
}

/// Shape of a replacement subtree.
pub enum Template {
    /// A fresh node positioned at the token of the capture `at`, its text is the kind name.
    Node {
        kind: NodeKind,
        at: &'static str,
        children: Vec<Template>,
    },
    /// Copy of the captured node (kind, token and flags) with new children.
    Dup {
        capture: &'static str,
        children: Vec<Template>,
    },
    /// Every node bound to the name, in match order.
    Splice(&'static str),
}

impl Template {
    pub fn node(kind: NodeKind, at: &'static str, children: Vec<Template>) -> Template {
        Template::Node { kind, at, children }
    }
    pub fn dup(capture: &'static str, children: Vec<Template>) -> Template {
        Template::Dup { capture, children }
    }

    fn children(&self) -> &[Template] {
        match self {
            Template::Node { children, .. } | Template::Dup { children, .. } => children,
            Template::Splice(_) => &[],
        }
    }

    /// Checks that every capture the template refers to is bound.
    fn check(&self, captures: &Captures) -> Result<(), MatchError> {
        let name = match *self {
            Template::Node { at, .. } => at,
            Template::Dup { capture, .. } => capture,
            Template::Splice(name) => name,
        };
        if captures.get(name).is_none() {
            return Err(MatchError {
                kind: MatchErrorKind::MissingCapture { name },
                span: None,
            });
        }
        self.children().iter().try_for_each(|c| c.check(captures))
    }

    fn build(&self, tree: &mut Tree, captures: &Captures, out: &mut Vec<NodeId>) {
        let node = match *self {
            Template::Splice(name) => {
                out.extend(captures.all(name));
                return;
            }
            Template::Node { kind, at, .. } => {
                let token = captures
                    .get(at)
                    .and_then(|c| tree.span(c))
                    .map(|span| Token::new(kind.name(), span));
                Node::new(kind, token)
            }
            Template::Dup { capture, .. } => match captures.get(capture) {
                Some(c) => tree[c].clone().with_children(Vec::new()),
                None => return,
            },
        };
        let mut children = Vec::new();
        for child in self.children() {
            child.build(tree, captures, &mut children);
        }
        out.push(tree.push(node.with_children(children)));
    }
}

/// Where a replacement lands.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Slot {
    /// The root of the walked subtree, the caller owns the reference to it.
    Root,
    Child { parent: NodeId, index: usize },
}

/// Instruction to swap `old` for `new`, applied by the walker that owns the traversal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Replacement {
    pub slot: Slot,
    pub old: NodeId,
    pub new: NodeId,
}

impl Replacement {
    /// Splices the new subtree in, returns the node now occupying the slot.
    pub fn apply(self, tree: &mut Tree) -> NodeId {
        if let Slot::Child { parent, index } = self.slot {
            let previous = tree.set_child(parent, index, self.new);
            debug_assert_eq!(previous, self.old);
        }
        self.new
    }
}

/// Builds `template` from `captures` as a replacement for `old`.
///
/// Either the whole template is built or, if a capture is missing, nothing is allocated.
pub fn instantiate(
    tree: &mut Tree,
    template: &Template,
    captures: &Captures,
    slot: Slot,
    old: NodeId,
) -> Result<Replacement, MatchError> {
    template.check(captures)?;
    let mut out = Vec::with_capacity(1);
    template.build(tree, captures, &mut out);
    match out.as_slice() {
        &[new] => Ok(Replacement { slot, old, new }),
        _ => Err(MatchError {
            kind: MatchErrorKind::MissingCapture { name: "root" },
            span: tree.span(old),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    #[test]
    fn builds_and_splices() {
        let mut tree = Tree::new();
        let root = tree.insert(&alt(vec![closure(block(vec![
            alt(vec![lit("'a'")]),
            alt(vec![lit("'b'")]),
        ]))]));
        let star = tree.children(root)[0];
        let inner = tree.children(star)[0];

        let mut captures = Captures::new();
        captures.push("suffix", star);
        captures.push("block", inner);
        for &a in tree.children(inner).to_vec().iter() {
            captures.push("element", tree.children(a)[0]);
        }

        let template = Template::dup(
            "suffix",
            vec![Template::node(
                NodeKind::Set,
                "block",
                vec![Template::Splice("element")],
            )],
        );
        let size = tree.len();
        let slot = Slot::Child {
            parent: root,
            index: 0,
        };
        let replacement = instantiate(&mut tree, &template, &captures, slot, star).unwrap();
        assert_eq!(tree.len(), size + 2);
        assert_eq!(tree.to_sexpr(root), "(ALT (CLOSURE (BLOCK (ALT 'a') (ALT 'b'))))");

        replacement.apply(&mut tree);
        assert_eq!(tree.to_sexpr(root), "(ALT (CLOSURE (SET 'a' 'b')))");
    }

    #[test]
    fn missing_capture_allocates_nothing() {
        let mut tree = Tree::new();
        let root = tree.insert(&alt(vec![tok("A")]));
        let template = Template::node(NodeKind::Set, "block", vec![Template::Splice("element")]);
        let size = tree.len();
        let err = instantiate(&mut tree, &template, &Captures::new(), Slot::Root, root);
        assert_eq!(
            err.unwrap_err().kind,
            MatchErrorKind::MissingCapture { name: "block" }
        );
        assert_eq!(tree.len(), size);
    }
}
