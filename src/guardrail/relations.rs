use std::ops::ControlFlow;

use indexmap::IndexMap;
use sqlparser::ast::{ObjectName, Query, Statement, Visit, Visitor};

/// Table referenced by a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Last name part, as written (without quotes)
    pub name: String,
    /// Fully qualified reference as written
    pub full: String
}

/// Collect tables referenced from `FROM` / `JOIN` anywhere in the statement.
///
/// Derived tables, nested joins, set operations and subqueries in
/// expressions are all visited. An unqualified name bound by a `WITH`
/// clause is not reported inside the query that defines it. CTE bodies see
/// only the CTEs declared before them, or all of them under `RECURSIVE`.
/// Order is first appearance, duplicates are folded case-insensitively.
pub fn referenced_tables(statement: &Statement) -> Vec<TableRef> {
    let mut collector = RelationCollector::default();
    let _ = statement.visit(&mut collector);
    collector.relations.into_values().collect()
}

#[derive(Default)]
struct RelationCollector {
    relations: IndexMap<String, TableRef>,
    /// CTE names in scope, innermost query last
    scopes:    Vec<Vec<String>>
}

impl RelationCollector {
    fn is_cte(&self, name: &str) -> bool {
        let name = fold(name);
        self.scopes.iter().flatten().any(|cte| *cte == name)
    }
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let Some(with) = &query.with else {
            self.scopes.push(Vec::new());
            return ControlFlow::Continue(());
        };
        let names: Vec<String> = with
            .cte_tables
            .iter()
            .map(|cte| fold(&cte.alias.name.value))
            .collect();

        // Bodies are visited again by the regular traversal with the whole
        // clause in scope; this pass records them under their own scope.
        for (i, cte) in with.cte_tables.iter().enumerate() {
            let visible = if with.recursive { names.clone() } else { names[..i].to_vec() };
            self.scopes.push(visible);
            let _ = cte.query.visit(self);
            self.scopes.pop();
        }

        self.scopes.push(names);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let full = relation.to_string();
        let parts = split_name(&full);
        if let Some(last) = parts.last() {
            let name = unquote(last);
            if parts.len() == 1 && self.is_cte(&name) {
                return ControlFlow::Continue(());
            }
            self.relations
                .entry(fold(&full))
                .or_insert_with(|| TableRef {
                    name,
                    full: full.clone()
                });
        }
        ControlFlow::Continue(())
    }
}

fn fold(name: &str) -> String {
    name.to_uppercase()
}

/// Split a rendered object name on `.` outside of quoted parts
fn split_name(full: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut closing: Option<char> = None;
    for (i, c) in full.char_indices() {
        match closing {
            Some(end) if c == end => closing = None,
            Some(_) => {}
            None => match c {
                '"' => closing = Some('"'),
                '`' => closing = Some('`'),
                '[' => closing = Some(']'),
                '.' => {
                    parts.push(&full[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
    }
    parts.push(&full[start..]);
    parts
}

fn unquote(part: &str) -> String {
    let trimmed = part.trim();
    let stripped = trimmed
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('`').and_then(|p| p.strip_suffix('`')))
        .or_else(|| trimmed.strip_prefix('[').and_then(|p| p.strip_suffix(']')))
        .unwrap_or(trimmed);
    stripped.to_string()
}
