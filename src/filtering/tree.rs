//! # Condition Tree Composer
//!
//! Combines the compiled per-field predicates of a request and its free-text
//! search clause into one [`PredicateTree`]:
//!
//! ```text
//! AND(
//!   <filterType>(plain entries..., OR(AND(group 1)..., AND(group n)...)),
//!   OR(search predicates...)
//! )
//! ```

use sea_orm::Condition;
use sea_orm::sea_query::Expr;
use std::collections::BTreeSet;

use super::predicates::{CompiledPredicate, PredicateCompiler};
use super::search::build_search_group;
use crate::errors::QueryError;
use crate::models::{Aggregator, FilterSpec, FilterValue};

#[derive(Debug, Clone)]
pub enum PredicateTree {
    And(Vec<PredicateTree>),
    Or(Vec<PredicateTree>),
    Leaf(CompiledPredicate),
}

impl PredicateTree {
    /// Tree that matches every row
    #[must_use]
    pub fn always() -> Self {
        Self::And(Vec::new())
    }

    fn combine(aggregator: Aggregator, children: Vec<Self>) -> Self {
        match aggregator {
            Aggregator::And => Self::And(children),
            Aggregator::Or => Self::Or(children),
        }
    }

    /// Render as a sea-query condition. An empty `And` matches everything, an
    /// empty `Or` nothing.
    #[must_use]
    pub fn to_condition(&self) -> Condition {
        match self {
            Self::Leaf(predicate) => Condition::all().add(predicate.expr.clone()),
            Self::And(children) => children
                .iter()
                .filter(|child| !child.matches_everything())
                .fold(Condition::all(), |condition, child| condition.add(child.to_condition())),
            Self::Or(children) if children.is_empty() => {
                Condition::all().add(Expr::cust("1 = 0"))
            }
            Self::Or(children) => children
                .iter()
                .fold(Condition::any(), |condition, child| condition.add(child.to_condition())),
        }
    }

    /// Whether the tree is made of empty `And`s only
    #[must_use]
    pub fn matches_everything(&self) -> bool {
        match self {
            Self::And(children) => children.iter().all(Self::matches_everything),
            Self::Or(_) | Self::Leaf(_) => false,
        }
    }

    /// Associations referenced anywhere in the tree
    #[must_use]
    pub fn associations(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_associations(&mut names);
        names
    }

    fn collect_associations(&self, names: &mut BTreeSet<String>) {
        match self {
            Self::Leaf(predicate) => {
                if let Some(name) = &predicate.association {
                    names.insert(name.clone());
                }
            }
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_associations(names);
                }
            }
        }
    }

    /// Number of leaves
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::And(children) | Self::Or(children) => children.iter().map(Self::len).sum(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compile a filter specification, including its search clause, into one tree.
///
/// Every condition is parsed and compiled before anything is returned, so a
/// bad value anywhere fails the whole request.
pub fn compose(compiler: &PredicateCompiler<'_>, spec: &FilterSpec) -> Result<PredicateTree, QueryError> {
    let mut siblings = Vec::new();
    let mut groups = Vec::new();
    for (path, value) in &spec.filter {
        match value {
            FilterValue::Raw(raw) => {
                siblings.push(PredicateTree::Leaf(compiler.compile_raw(path, raw)?));
            }
            FilterValue::Group(members) => {
                let leaves = members
                    .iter()
                    .map(|(member, raw)| compiler.compile_raw(member, raw).map(PredicateTree::Leaf))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push(PredicateTree::And(leaves));
            }
        }
    }
    if !groups.is_empty() {
        siblings.push(PredicateTree::Or(groups));
    }

    // No entries means no restriction, whatever the combinator
    let filters = if siblings.is_empty() {
        PredicateTree::always()
    } else {
        PredicateTree::combine(spec.filter_type, siblings)
    };
    let search = spec
        .search
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let tree = match search {
        Some(text) => {
            let group = build_search_group(compiler, text, spec.search_extended)?;
            PredicateTree::And(vec![filters, group])
        }
        None => filters,
    };

    tracing::debug!(
        collection = %compiler.collection().name,
        predicates = tree.len(),
        "Composed predicate tree"
    );
    Ok(tree)
}
