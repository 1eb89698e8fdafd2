//! # Filtering
//!
//! The query-condition engine: parsing filter strings, compiling them into
//! dialect-aware predicates and composing those into one predicate tree.
//!
//! ```text
//! "*Richa*" ──parse──▶ Condition{Contains, "Richa"}
//!           ──compile─▶ UPPER("users"."first_name") LIKE UPPER('%Richa%') ESCAPE '!'
//!           ──compose─▶ PredicateTree (+ search OR group)
//! ```

pub mod conditions;
pub mod dates;
pub mod pagination;
pub mod predicates;
pub mod search;
pub mod sort;
pub mod tree;

pub use conditions::{Condition, Operand, Operator, parse};
pub use dates::{RelativeBoundary, RelativeDirection, parse_timezone, resolve};
pub use pagination::{PageParams, Pagination, content_range};
pub use predicates::{CompileContext, CompiledPredicate, FieldPath, PredicateCompiler};
pub use sort::SortSpec;
pub use tree::{PredicateTree, compose};
