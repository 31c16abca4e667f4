//! Account-set helpers shared by the engines.
//!
//! Account sets are held as indexes into [`RepositoryContext::accounts`], so
//! iteration order always follows the repository's account order.

use std::collections::{BTreeMap, BTreeSet};

use iambic_core::{AccountContext, IambicError, Result};
use iambic_template::{AccessModel, RepositoryContext, Slice, VariableScope};
use serde_json::Value;

/// Indexes into the repository account list.
pub(crate) type AccountSet = BTreeSet<usize>;

/// Smallest predicate selecting exactly `class` out of `universe`.
///
/// - `class == universe` with at least `threshold` accounts becomes `*`
/// - a class of at least `threshold` accounts whose complement is strictly
///   smaller becomes `*` minus the complement
/// - anything else lists the class explicitly
pub(crate) fn minimal_scope(
    class: &AccountSet,
    universe: &AccountSet,
    accounts: &[AccountContext],
    threshold: usize,
) -> AccessModel {
    let k = class.len();
    if class == universe {
        if k >= threshold {
            return AccessModel::default();
        }
        return AccessModel::including(sorted_names(class, accounts));
    }

    let complement: AccountSet = universe.difference(class).copied().collect();
    if k >= threshold && complement.len() < k {
        AccessModel::excluding(sorted_names(&complement, accounts))
    } else {
        AccessModel::including(sorted_names(class, accounts))
    }
}

/// Scope for a slice inside an attribute: a class covering the whole
/// universe needs no predicate at all.
pub(crate) fn slice_scope(
    class: &AccountSet,
    universe: &AccountSet,
    accounts: &[AccountContext],
    threshold: usize,
) -> AccessModel {
    if class == universe {
        AccessModel::default()
    } else {
        minimal_scope(class, universe, accounts, threshold)
    }
}

fn sorted_names(set: &AccountSet, accounts: &[AccountContext]) -> Vec<String> {
    let mut names: Vec<String> = set
        .iter()
        .filter_map(|&i| accounts.get(i))
        .map(|a| a.account_name.clone())
        .collect();
    names.sort();
    names
}

/// Partition accounts by value.
///
/// Classes come out largest first; equal sizes keep the order in which the
/// first account of each class appears.
pub(crate) fn partition(values: &BTreeMap<usize, Value>) -> Vec<(Value, AccountSet)> {
    let mut classes: Vec<(Value, AccountSet)> = Vec::new();
    for (&account, value) in values {
        match classes.iter_mut().find(|(v, _)| v == value) {
            Some((_, members)) => {
                members.insert(account);
            }
            None => classes.push((value.clone(), AccountSet::from([account]))),
        }
    }
    // Stable sort keeps first-appearance order among equal sizes.
    classes.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    classes
}

/// One slice per value class.
pub(crate) fn cluster(
    values: &BTreeMap<usize, Value>,
    universe: &AccountSet,
    accounts: &[AccountContext],
    threshold: usize,
) -> Vec<Slice> {
    partition(values)
        .into_iter()
        .map(|(value, class)| Slice::new(slice_scope(&class, universe, accounts, threshold), value))
        .collect()
}

/// Accounts of the repository an access model's predicate covers.
pub(crate) fn covered(
    access: &AccessModel,
    repo: &RepositoryContext,
    template: &str,
) -> Result<AccountSet> {
    let Some(first) = repo.accounts.first() else {
        return Ok(AccountSet::new());
    };
    let compiled = access.compile().map_err(|e| {
        IambicError::resolution(template, first.account_name.clone(), e.to_string())
    })?;
    Ok(repo
        .accounts
        .iter()
        .enumerate()
        .filter(|(_, account)| compiled.match_account(account).is_some())
        .map(|(index, _)| index)
        .collect())
}

/// Compare two template values as they would resolve on one account.
pub(crate) fn values_agree(
    left: &Value,
    right: &Value,
    scope: &VariableScope<'_>,
    template: &str,
    account: &AccountContext,
) -> Result<bool> {
    if left == right {
        return Ok(true);
    }
    let substitute = |value: &Value| {
        iambic_template::variables::substitute_value(value, scope).map_err(|e| {
            IambicError::resolution(template, account.account_name.clone(), e.to_string())
        })
    };
    Ok(substitute(left)? == substitute(right)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accounts(names: &[&str]) -> Vec<AccountContext> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| AccountContext::new(format!("{i:012}"), *n))
            .collect()
    }

    fn set(items: &[usize]) -> AccountSet {
        items.iter().copied().collect()
    }

    #[test]
    fn test_universal_class_above_threshold_is_wildcard() {
        let accts = accounts(&["a", "b", "c"]);
        let scope = minimal_scope(&set(&[0, 1, 2]), &set(&[0, 1, 2]), &accts, 3);
        assert!(scope.is_unscoped());
    }

    #[test]
    fn test_universal_class_below_threshold_is_explicit() {
        let accts = accounts(&["b", "a"]);
        let scope = minimal_scope(&set(&[0, 1]), &set(&[0, 1]), &accts, 3);
        assert_eq!(scope.included_accounts, vec!["a", "b"]);
    }

    #[test]
    fn test_small_class_stays_explicit_even_with_small_complement() {
        let accts = accounts(&["acc1", "acc2", "acc3"]);
        let scope = minimal_scope(&set(&[0, 1]), &set(&[0, 1, 2]), &accts, 3);
        assert_eq!(scope.included_accounts, vec!["acc1", "acc2"]);
        assert!(scope.excluded_accounts.is_empty());
    }

    #[test]
    fn test_large_class_uses_exclusion() {
        let accts = accounts(&["a", "b", "c", "d", "e"]);
        let scope = minimal_scope(&set(&[0, 1, 2, 3]), &set(&[0, 1, 2, 3, 4]), &accts, 3);
        assert_eq!(scope.included_accounts, vec!["*"]);
        assert_eq!(scope.excluded_accounts, vec!["e"]);
    }

    #[test]
    fn test_tie_prefers_explicit() {
        let accts = accounts(&["a", "b", "c", "d", "e", "f"]);
        let scope = minimal_scope(&set(&[0, 1, 2]), &set(&[0, 1, 2, 3, 4, 5]), &accts, 3);
        assert_eq!(scope.included_accounts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_partition_orders_by_size_then_first_account() {
        let values = BTreeMap::from([
            (0, json!("x")),
            (1, json!("y")),
            (2, json!("y")),
            (3, json!("z")),
        ]);
        let classes = partition(&values);
        let order: Vec<&Value> = classes.iter().map(|(v, _)| v).collect();
        assert_eq!(order, vec![&json!("y"), &json!("x"), &json!("z")]);
    }
}
