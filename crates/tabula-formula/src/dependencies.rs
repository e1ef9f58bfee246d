use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::error::{FormulaError, FormulaResult};

/// A reference path that returns to its starting column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular reference: {}", self.path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Gray,
    Black,
}

/// Reference graph between calculated columns.
///
/// Nodes are calculated column keys in creation order. An edge `consumer -> provider` exists when
/// the consumer's formula references the provider; references to raw columns are kept but are not
/// nodes, so they never take part in cycles or ordering.
#[derive(Clone, Debug, Default)]
pub struct DependencyTracker {
    order: Vec<String>,
    references: HashMap<String, Vec<String>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from `(column, references)` pairs in creation order.
    pub fn from_calculations<I, S>(calculations: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let mut tracker = Self::new();
        for (column, references) in calculations {
            tracker.insert(column, references);
        }
        tracker
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.references.contains_key(column)
    }

    /// Add or replace the node for `column`.
    pub fn insert(&mut self, column: impl Into<String>, references: Vec<String>) {
        let column = column.into();
        if !self.references.contains_key(&column) {
            self.order.push(column.clone());
        }
        self.references.insert(column, references);
    }

    pub fn remove(&mut self, column: &str) -> Option<Vec<String>> {
        let removed = self.references.remove(column)?;
        self.order.retain(|c| c != column);
        Some(removed)
    }

    pub fn would_create_cycle(&self, column: &str, references: &[String]) -> bool {
        self.check_cycle(column, references).is_err()
    }

    /// Check whether defining `column` with `references` closes a cycle.
    ///
    /// The returned error carries the offending path, starting and ending at `column`.
    pub fn check_cycle(&self, column: &str, references: &[String]) -> Result<(), CycleError> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        // Explicit DFS frames: (node, next edge index).
        let mut stack: Vec<(&str, usize)> = vec![(column, 0)];
        marks.insert(column, Mark::Gray);

        while let Some(&(node, next)) = stack.last() {
            let children = if node == column {
                references
            } else {
                self.references.get(node).map(Vec::as_slice).unwrap_or(&[])
            };
            let Some(child) = children.get(next) else {
                marks.insert(node, Mark::Black);
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            let child = child.as_str();
            if child != column && !self.references.contains_key(child) {
                continue;
            }
            match marks.get(child) {
                Some(Mark::Gray) => {
                    let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                    path.push(child.to_string());
                    return Err(CycleError { path });
                }
                Some(Mark::Black) => {}
                None => {
                    marks.insert(child, Mark::Gray);
                    stack.push((child, 0));
                }
            }
        }
        Ok(())
    }

    /// Calculated columns whose formulas reference `column` directly, in creation order.
    pub fn dependents_of(&self, column: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|c| c.as_str() != column)
            .filter(|c| self.references[c.as_str()].iter().any(|r| r == column))
            .cloned()
            .collect()
    }

    /// Fail if any calculated column still references `column`.
    pub fn guard_delete(&self, column: &str) -> FormulaResult<()> {
        let dependents = self.dependents_of(column);
        if dependents.is_empty() {
            Ok(())
        } else {
            Err(FormulaError::Dependents {
                column: column.to_string(),
                dependents,
            })
        }
    }

    /// Calculated columns ordered so every provider precedes its consumers.
    ///
    /// Ties keep creation order.
    pub fn evaluation_order(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(self.order.len());
        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        for column in &self.order {
            let providers: HashSet<&str> = self.references[column.as_str()]
                .iter()
                .map(String::as_str)
                .filter(|r| self.contains(r))
                .collect();
            in_degree.insert(column, providers.len());
            for provider in providers {
                consumers.entry(provider).or_default().push(column);
            }
        }

        let mut ready: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|c| in_degree[c] == 0)
            .collect();
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(column) = ready.pop_front() {
            out.push(column.to_string());
            for &consumer in consumers.get(column).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(deg) = in_degree.get_mut(consumer) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.push_back(consumer);
                    }
                }
            }
        }

        if out.len() != self.order.len() {
            // Report a concrete cycle among the columns that never became ready.
            for column in &self.order {
                if !out.contains(column) {
                    self.check_cycle(column, &self.references[column.as_str()])?;
                }
            }
            return Err(CycleError { path: Vec::new() });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn refs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn raw_column_references_never_form_cycles() {
        let tracker = DependencyTracker::from_calculations([("a", refs(&["price"]))]);
        assert!(!tracker.would_create_cycle("b", &refs(&["a", "price"])));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let tracker = DependencyTracker::new();
        let err = tracker.check_cycle("a", &refs(&["a"])).unwrap_err();
        assert_eq!(err.path, refs(&["a", "a"]));
        assert_eq!(err.to_string(), "circular reference: a -> a");
    }

    #[test]
    fn redefinition_closing_a_loop_reports_the_path() {
        let tracker = DependencyTracker::from_calculations([
            ("a", refs(&["price"])),
            ("b", refs(&["a"])),
            ("c", refs(&["b"])),
        ]);
        let err = tracker.check_cycle("a", &refs(&["c"])).unwrap_err();
        assert_eq!(err.path, refs(&["a", "c", "b", "a"]));
    }

    #[test]
    fn guard_delete_lists_direct_dependents() {
        let mut tracker = DependencyTracker::from_calculations([
            ("a", refs(&["price"])),
            ("b", refs(&["a"])),
        ]);
        assert_eq!(
            tracker.guard_delete("a").unwrap_err(),
            FormulaError::Dependents {
                column: "a".into(),
                dependents: refs(&["b"]),
            }
        );
        assert!(tracker.guard_delete("b").is_ok());
        tracker.remove("b");
        assert!(tracker.guard_delete("a").is_ok());
    }

    #[test]
    fn evaluation_order_puts_providers_first() {
        let tracker = DependencyTracker::from_calculations([
            ("total", refs(&["share"])),
            ("share", refs(&["price"])),
            ("other", refs(&["price"])),
        ]);
        assert_eq!(
            tracker.evaluation_order().unwrap(),
            refs(&["share", "other", "total"])
        );
    }
}
