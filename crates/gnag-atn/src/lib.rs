//! Grammar compilation core: tree pattern matching, set collapsing, left recursion
//! classification and construction of augmented transition networks.

pub mod ast;
pub mod atn;
pub mod collapse;
pub mod error;
pub mod grammar;
pub mod interval;
pub mod left_recursion;
pub mod literal;
pub mod pattern;
pub mod span;
pub mod tree;
