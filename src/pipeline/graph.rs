//! Pipeline Graph - Computational dependency graph
//!
//! Interns every term reachable from the requested outputs, orders them so
//! each node follows its inputs and mask, and works out how many extra
//! historical rows each node must produce for its windowed consumers.

use crate::error::{PipelineError, Result};
use crate::pipeline::term::Term;
use hashbrown::HashMap;
use std::collections::VecDeque;

/// Index of a node in a [`TermGraph`]
pub type NodeId = usize;

/// Deduplicated dependency graph of terms
#[derive(Debug, Clone)]
pub struct TermGraph {
    /// Interned terms, dependencies before dependents
    nodes: Vec<Term>,
    index: HashMap<Term, NodeId>,
    /// node -> inputs, then mask
    dependencies: Vec<Vec<NodeId>>,
    /// node -> nodes reading it
    dependents: Vec<Vec<NodeId>>,
    execution_order: Vec<NodeId>,
    /// Rows each node must produce before the first requested session
    extra_rows: Vec<usize>,
    outputs: Vec<NodeId>,
}

impl TermGraph {
    /// Build the graph for `terms`, failing on structural errors before any computation
    pub fn new(terms: &[Term]) -> Result<Self> {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            execution_order: Vec::new(),
            extra_rows: Vec::new(),
            outputs: Vec::new(),
        };
        for term in terms {
            if term.output_names().is_some() {
                return Err(PipelineError::MultiOutputTermUsedDirectly(term.to_string()));
            }
            let id = graph.intern(term);
            graph.outputs.push(id);
        }
        graph.validate()?;
        graph.topological_sort()?;
        graph.compute_extra_rows();
        log::debug!(
            "built term graph: {} nodes, {} outputs, {} extra rows",
            graph.len(),
            graph.outputs.len(),
            graph.max_extra_rows()
        );
        Ok(graph)
    }

    /// Add `term` and everything it reads, returning its id
    fn intern(&mut self, term: &Term) -> NodeId {
        if let Some(&id) = self.index.get(term) {
            return id;
        }
        let deps: Vec<NodeId> = term.dependencies().map(|dep| self.intern(dep)).collect();
        let id = self.nodes.len();
        self.nodes.push(term.clone());
        self.index.insert(term.clone(), id);
        self.dependents.push(Vec::new());
        for &dep in &deps {
            self.dependents[dep].push(id);
        }
        self.dependencies.push(deps);
        id
    }

    /// Windowed consumers may only read window-safe inputs
    fn validate(&self) -> Result<()> {
        for term in &self.nodes {
            if !term.is_windowed() || term.window_length() <= 1 {
                continue;
            }
            if let Some(child) = term.inputs().iter().find(|input| !input.window_safe()) {
                return Err(PipelineError::NonWindowSafeInput {
                    parent: term.to_string(),
                    child: child.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Kahn's algorithm; ties resolve in interning order
    fn topological_sort(&mut self) -> Result<()> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut queue: VecDeque<NodeId> = (0..self.nodes.len()).filter(|&id| in_degree[id] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &dependent in &self.dependents[id] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(PipelineError::InvalidInput {
                term: "TermGraph".to_string(),
                reason: "term dependencies contain a cycle".to_string(),
            });
        }
        self.execution_order = order;
        Ok(())
    }

    /// Walk consumers before producers, pushing each node's lookback onto what it reads
    fn compute_extra_rows(&mut self) {
        let mut extra = vec![0usize; self.nodes.len()];
        for &id in self.execution_order.iter().rev() {
            let term = &self.nodes[id];
            let n_inputs = term.inputs().len();
            let window_extra = if term.is_windowed() {
                term.window_length().saturating_sub(1)
            } else {
                0
            };
            for (k, &dep) in self.dependencies[id].iter().enumerate() {
                let need = if k < n_inputs { extra[id] + window_extra } else { extra[id] };
                extra[dep] = extra[dep].max(need);
            }
        }
        self.extra_rows = extra;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn term(&self, id: NodeId) -> &Term {
        &self.nodes[id]
    }

    pub fn node_id(&self, term: &Term) -> Option<NodeId> {
        self.index.get(term).copied()
    }

    pub fn dependencies_of(&self, id: NodeId) -> &[NodeId] {
        &self.dependencies[id]
    }

    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    /// Requested terms, in request order
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn extra_rows(&self, id: NodeId) -> usize {
        self.extra_rows[id]
    }

    /// Lookback the whole graph needs before the first requested session
    pub fn max_extra_rows(&self) -> usize {
        self.extra_rows.iter().copied().max().unwrap_or(0)
    }

    /// Every interned term with its id
    pub fn terms(&self) -> impl Iterator<Item = (NodeId, &Term)> {
        self.nodes.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::EquityPricing;
    use crate::pipeline::dtype::DType;
    use crate::pipeline::factors::Factor;
    use crate::pipeline::filters::Filter;
    use crate::pipeline::rank::RankMethod;

    fn position(graph: &TermGraph, term: &Term) -> usize {
        let id = graph.node_id(term).unwrap();
        graph.execution_order().iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn test_identical_terms_are_deduplicated() {
        let close = EquityPricing::close().latest_factor().unwrap();
        let a = close.rank(RankMethod::Ordinal, true, None, None).unwrap();
        let b = close.rank(RankMethod::Ordinal, true, None, None).unwrap();
        let graph = TermGraph::new(&[a.term().clone(), b.term().clone()]).unwrap();
        // column, latest, rank
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.outputs(), &[2, 2]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let close = EquityPricing::close().latest_factor().unwrap();
        let mask = close.notnan().unwrap();
        let demeaned = close.demean(Some(&mask), None).unwrap();
        let graph = TermGraph::new(&[demeaned.term().clone()]).unwrap();
        assert!(position(&graph, close.term()) < position(&graph, mask.term()));
        assert!(position(&graph, mask.term()) < position(&graph, demeaned.term()));
    }

    #[test]
    fn test_extra_rows_accumulate_through_windows() {
        let close = EquityPricing::close();
        let sma = Factor::simple_moving_average(&close, 10).unwrap();
        let ranked = sma.rank(RankMethod::Ordinal, true, None, None).unwrap();
        let shifted = ranked.shift(2).unwrap();
        let returns = Factor::returns(&close, 5, 0).unwrap();
        let graph = TermGraph::new(&[shifted.term().clone(), returns.term().clone()]).unwrap();

        let extra = |t: &Term| graph.extra_rows(graph.node_id(t).unwrap());
        assert_eq!(extra(shifted.term()), 0);
        assert_eq!(extra(ranked.term()), 2);
        assert_eq!(extra(sma.term()), 2);
        assert_eq!(extra(close.term()), 11);
        assert_eq!(extra(returns.term()), 0);
        assert_eq!(graph.max_extra_rows(), 11);
    }

    #[test]
    fn test_mask_needs_consumer_rows_only() {
        let f = Factor::external("f", DType::Float64, None, true).unwrap();
        let mask = Filter::external("m", true).unwrap();
        let demeaned = f.demean(Some(&mask), None).unwrap();
        let shifted = demeaned.shift(3).unwrap();
        let graph = TermGraph::new(&[shifted.term().clone()]).unwrap();
        assert_eq!(graph.extra_rows(graph.node_id(mask.term()).unwrap()), 3);
        assert_eq!(graph.extra_rows(graph.node_id(f.term()).unwrap()), 3);
    }

    #[test]
    fn test_non_window_safe_input_rejected() {
        let f = Factor::external("f", DType::Float64, None, false).unwrap();
        let demeaned = f.demean(None, None).unwrap();
        let sma = Factor::simple_moving_average(&demeaned, 5).unwrap();
        let err = TermGraph::new(&[sma.term().clone()]).unwrap_err();
        assert!(matches!(err, PipelineError::NonWindowSafeInput { .. }));

        // zscore inherits the input's safety
        let z = f.zscore(None, None).unwrap();
        let sma = Factor::simple_moving_average(&z, 5).unwrap();
        assert!(matches!(
            TermGraph::new(&[sma.term().clone()]),
            Err(PipelineError::NonWindowSafeInput { .. })
        ));
        let safe = Factor::external("g", DType::Float64, None, true).unwrap();
        let sma = Factor::simple_moving_average(safe.zscore(None, None).unwrap(), 5).unwrap();
        assert!(TermGraph::new(&[sma.term().clone()]).is_ok());

        // a length-1 window cannot look back, so any input is fine
        let shifted = demeaned.shift(0).unwrap();
        assert!(TermGraph::new(&[shifted.term().clone()]).is_ok());
    }
}
