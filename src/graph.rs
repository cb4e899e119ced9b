use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::error::{CoreError, CoreResult};
use crate::operation::{Operation, OperationInput};

/// A registered node: either a leaf value written by the caller, or a
/// computed node written back by [`OperableGraphManager::evaluate`].
#[derive(Debug, Clone)]
enum Node {
    Input {
        value: f64,
    },
    Operable {
        operation: Operation,
        value: f64,
    },
}

/// Dependency-graph engine shared by the extractors. Nodes are keyed by
/// name; the graph owns the node storage outright, so no handle can dangle
/// and no reference loop can form through computed nodes.
///
/// Single-threaded: one caller drives registration and evaluation; nothing
/// is retained between [`evaluate`](Self::evaluate) calls besides node
/// values.
#[derive(Debug, Default)]
pub struct OperableGraphManager {
    nodes: BTreeMap<String, Node>,
}

impl OperableGraphManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leaf value. The caller updates it through
    /// [`set_input`](Self::set_input).
    pub fn register_input<S: Into<String>>(&mut self, name: S, value: f64) -> CoreResult<()> {
        self.register_node(name.into(), Node::Input { value })
    }

    /// Register a computed node. Its dependencies are the operation's
    /// declared inputs; its value is written on every successful
    /// [`evaluate`](Self::evaluate).
    pub fn register_operable<S: Into<String>>(
        &mut self,
        name: S,
        operation: Operation,
    ) -> CoreResult<()> {
        self.register_node(
            name.into(),
            Node::Operable {
                operation,
                value: 0.0,
            },
        )
    }

    fn register_node(&mut self, name: String, node: Node) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::InvalidInput(
                "graph node name must not be empty".to_string(),
            ));
        }
        if self.nodes.contains_key(&name) {
            return Err(CoreError::InvalidInput(format!(
                "node '{}' is already registered",
                name
            )));
        }
        self.nodes.insert(name, node);
        Ok(())
    }

    /// Overwrite the value of a registered input. Operables are owned by the
    /// graph and cannot be written externally.
    pub fn set_input(&mut self, name: &str, value: f64) -> CoreResult<()> {
        match self.nodes.get_mut(name) {
            Some(Node::Input { value: stored }) => {
                *stored = value;
                Ok(())
            }
            Some(Node::Operable { .. }) => Err(CoreError::InvalidInput(format!(
                "node '{}' is an operable and cannot be written externally",
                name
            ))),
            None => Err(CoreError::MissingInput(name.to_string())),
        }
    }

    /// Current value of any registered node. For operables this is the
    /// result of the last successful evaluation.
    pub fn get_value(&self, name: &str) -> Option<f64> {
        self.nodes.get(name).map(|node| match node {
            Node::Input { value } | Node::Operable { value, .. } => *value,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Re-run every operable in dependency order. A cycle aborts before any
    /// node is computed; a missing named source or a failing operation
    /// aborts the pass, leaving already-computed values in place.
    pub fn evaluate(&mut self) -> CoreResult<()> {
        let order = self.evaluation_order()?;
        for name in order {
            let operation = match &self.nodes[&name] {
                Node::Operable { operation, .. } => operation.clone(),
                Node::Input { .. } => continue,
            };
            let mut values = Vec::with_capacity(operation.inputs().len());
            for spec in operation.inputs() {
                let value = self
                    .get_value(&spec.name)
                    .ok_or_else(|| CoreError::MissingInput(spec.name.clone()))?;
                values.push(OperationInput::new(spec.name.clone(), value));
            }
            let result = operation.evaluate(&values)?;
            debug!("operable '{}' evaluated to {}", name, result);
            if let Some(Node::Operable { value, .. }) = self.nodes.get_mut(&name) {
                *value = result;
            }
        }
        Ok(())
    }

    /// Topological order over the operables (Kahn). Only edges between two
    /// operables constrain the order; inputs are always ready, and nodes
    /// unreachable from any operable simply serve as pure inputs.
    fn evaluation_order(&self) -> CoreResult<Vec<String>> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (name, node) in &self.nodes {
            if let Node::Operable { operation, .. } = node {
                let mut degree = 0;
                for spec in operation.inputs() {
                    if let Some(Node::Operable { .. }) = self.nodes.get(&spec.name) {
                        degree += 1;
                        dependents
                            .entry(spec.name.as_str())
                            .or_default()
                            .push(name.as_str());
                    }
                }
                indegree.insert(name.as_str(), degree);
            }
        }

        // Name-ordered ready set keeps evaluation deterministic.
        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&name, _)| name)
            .collect();
        let mut order = Vec::with_capacity(indegree.len());

        loop {
            let Some(name) = ready.iter().next().copied() else {
                break;
            };
            ready.remove(name);
            order.push(name.to_string());
            for &dependent in dependents.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != indegree.len() {
            let done: std::collections::HashSet<&str> =
                order.iter().map(String::as_str).collect();
            let mut cycle: Vec<String> = indegree
                .keys()
                .filter(|name| !done.contains(*name))
                .map(|name| name.to_string())
                .collect();
            cycle.sort();
            return Err(CoreError::DependencyCycle(cycle));
        }
        Ok(order)
    }
}
