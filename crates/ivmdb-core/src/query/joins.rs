//! Join condition analysis.

use std::collections::BTreeSet;

use ivmdb_proto::Expr;

use crate::error::{Error, Result};

/// The single source alias an expression reads from, if there is exactly one.
pub fn expression_alias(expr: &Expr) -> Option<String> {
    let mut aliases = BTreeSet::new();
    expr.for_each_ref(&mut |path| {
        if let Some(alias) = path.first().filter(|a| !a.is_empty()) {
            aliases.insert(alias.clone());
        }
    });
    if aliases.len() == 1 {
        aliases.into_iter().next()
    } else {
        None
    }
}

/// Validate a join condition and orient it as `(main side, joined side)`.
///
/// `available` holds the aliases introduced before this join; `joined` is the
/// alias the join introduces. Conditions written the other way round are
/// swapped. The joined alias never counts as available, even when an earlier
/// source reused it.
pub fn analyze_join_expressions(
    left: &Expr,
    right: &Expr,
    available: &[String],
    joined: &str,
) -> Result<(Expr, Expr)> {
    let left_alias = expression_alias(left);
    let right_alias = expression_alias(right);
    let is_available = |alias: &Option<String>| {
        alias
            .as_deref()
            .is_some_and(|a| a != joined && available.iter().any(|known| known == a))
    };
    let is_joined = |alias: &Option<String>| alias.as_deref() == Some(joined);

    if is_available(&left_alias) && is_joined(&right_alias) {
        return Ok((left.clone(), right.clone()));
    }
    if is_joined(&left_alias) && is_available(&right_alias) {
        return Ok((right.clone(), left.clone()));
    }

    let left_available = is_available(&left_alias);
    match (left_alias, right_alias) {
        (None, _) | (_, None) => Err(Error::JoinConditionWithoutSource),
        (Some(l), Some(r)) if l == r => Err(Error::JoinConditionSameSource { alias: l }),
        (Some(l), Some(_)) if !left_available => Err(Error::JoinConditionLeftSource { alias: l }),
        (Some(_), Some(r)) if r != joined => Err(Error::JoinConditionRightSource {
            alias: joined.to_string(),
        }),
        _ => Err(Error::JoinConditionWithoutSource),
    }
}
