//! Module dependency graph
//!
//! Records which identifiers each loaded module depends on and provides:
//! - Cycle detection (whole graph, or before linking a new module)
//! - Transitive dependency queries
//! - Topological ordering

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

/// Errors related to graph operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Circular dependency detected
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// Module not found in graph
    #[error("Module not found in graph: {0}")]
    ModuleNotFound(String),
}

/// A node in the dependency graph
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Module identifier
    pub id: String,
    /// Identifiers this module depends on, in declared order
    pub imports: Vec<String>,
    /// Identifiers that depend on this module
    pub imported_by: Vec<String>,
}

impl ModuleNode {
    /// Create a new module node
    pub fn new(id: String) -> Self {
        Self {
            id,
            imports: Vec::new(),
            imported_by: Vec::new(),
        }
    }
}

/// Dependency graph keyed by identifier
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: FxHashMap<String, ModuleNode>,
}

impl DependencyGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the graph
    pub fn add_module(&mut self, id: &str) {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(id.to_string(), ModuleNode::new(id.to_string()));
        }
    }

    /// Add a dependency edge (`from` depends on `to`)
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        self.add_module(from);
        self.add_module(to);

        if let Some(node) = self.nodes.get_mut(from) {
            if !node.imports.iter().any(|d| d == to) {
                node.imports.push(to.to_string());
            }
        }

        if let Some(node) = self.nodes.get_mut(to) {
            if !node.imported_by.iter().any(|d| d == from) {
                node.imported_by.push(from.to_string());
            }
        }
    }

    /// Link `id` to all of `deps`, refusing edges that would close a cycle
    ///
    /// Nothing is linked when an error is returned.
    pub fn link(&mut self, id: &str, deps: &[String]) -> Result<(), GraphError> {
        for dep in deps {
            if let Some(back) = self.path_between(dep, id) {
                let mut cycle = Vec::with_capacity(back.len() + 1);
                cycle.push(id.to_string());
                cycle.extend(back);
                return Err(GraphError::CircularDependency(cycle));
            }
        }

        self.add_module(id);
        for dep in deps {
            self.add_dependency(id, dep);
        }
        Ok(())
    }

    /// Shortest dependency path from `from` to `to`, both ends included
    pub fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut parent: FxHashMap<&str, &str> = FxHashMap::default();
        let mut queue = VecDeque::new();
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for dep in &node.imports {
                let dep = dep.as_str();
                if dep == from || parent.contains_key(dep) {
                    continue;
                }
                parent.insert(dep, current);
                if dep == to {
                    let mut path = vec![to.to_string()];
                    let mut step = to;
                    while let Some(&prev) = parent.get(step) {
                        path.push(prev.to_string());
                        step = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(dep);
            }
        }

        None
    }

    /// Get a module node
    pub fn get(&self, id: &str) -> Option<&ModuleNode> {
        self.nodes.get(id)
    }

    /// Whether `id` is in the graph
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterate over all identifiers
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Get the number of modules in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove every node and edge
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Detect cycles in the graph
    ///
    /// Returns `Err(GraphError::CircularDependency)` with the cycle path if
    /// one is found.
    pub fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = FxHashSet::default();
        let mut rec_stack = FxHashSet::default();
        let mut path = Vec::new();

        let mut starts: Vec<&String> = self.nodes.keys().collect();
        starts.sort();

        for start in starts {
            if !visited.contains(start.as_str()) {
                if let Some(cycle) =
                    self.dfs_detect_cycle(start, &mut visited, &mut rec_stack, &mut path)
                {
                    return Err(GraphError::CircularDependency(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_detect_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut FxHashSet<&'a str>,
        rec_stack: &mut FxHashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        rec_stack.insert(id);
        path.push(id);

        if let Some(node) = self.nodes.get(id) {
            for dep in &node.imports {
                let dep = dep.as_str();
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_detect_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(id);
        None
    }

    /// Modules ordered so that each comes after all its dependencies
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        self.detect_cycles()?;

        // Remaining unprocessed imports per module; leaves go first.
        let mut remaining: FxHashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (id.as_str(), node.imports.len()))
            .collect();

        let mut leaves: Vec<&str> = remaining
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(id, _)| *id)
            .collect();
        leaves.sort_unstable();
        let mut queue: VecDeque<&str> = leaves.into();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(node) = self.nodes.get(id) {
                for dependent in &node.imported_by {
                    if let Some(n) = remaining.get_mut(dependent.as_str()) {
                        *n -= 1;
                        if *n == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        Ok(order)
    }

    /// Identifiers `id` depends on, transitively, breadth-first
    pub fn transitive_dependencies(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::ModuleNotFound(id.to_string()))?;

        let mut deps = Vec::new();
        let mut visited = FxHashSet::default();
        let mut queue: VecDeque<&str> = node.imports.iter().map(String::as_str).collect();

        while let Some(dep) = queue.pop_front() {
            if visited.insert(dep) {
                deps.push(dep.to_string());
                if let Some(node) = self.nodes.get(dep) {
                    queue.extend(
                        node.imports
                            .iter()
                            .map(String::as_str)
                            .filter(|d| !visited.contains(d)),
                    );
                }
            }
        }

        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_dependency() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("main", "utils");

        assert_eq!(graph.len(), 2);
        assert!(graph.get("main").unwrap().imports.contains(&"utils".to_string()));
        assert!(graph.get("utils").unwrap().imported_by.contains(&"main".to_string()));
    }

    #[test]
    fn test_no_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "c");

        assert!(graph.detect_cycles().is_ok());
    }

    #[test]
    fn test_simple_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");

        assert!(matches!(
            graph.detect_cycles(),
            Err(GraphError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_link_rejects_closing_edge() {
        let mut graph = DependencyGraph::new();
        graph.link("a", &ids(&["b"])).unwrap();
        graph.link("b", &ids(&["c"])).unwrap();

        let err = graph.link("c", &ids(&["a"])).unwrap_err();
        assert_eq!(err, GraphError::CircularDependency(ids(&["c", "a", "b", "c"])));
        assert!(graph.get("c").unwrap().imports.is_empty());
    }

    #[test]
    fn test_link_self_dependency() {
        let mut graph = DependencyGraph::new();
        let err = graph.link("a", &ids(&["a"])).unwrap_err();
        assert_eq!(err, GraphError::CircularDependency(ids(&["a", "a"])));
    }

    #[test]
    fn test_link_diamond_is_fine() {
        let mut graph = DependencyGraph::new();
        graph.link("main", &ids(&["a", "b"])).unwrap();
        graph.link("a", &ids(&["shared"])).unwrap();
        graph.link("b", &ids(&["shared"])).unwrap();
        graph.link("shared", &[]).unwrap();

        assert!(graph.detect_cycles().is_ok());
    }

    #[test]
    fn test_topological_order() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("main", "a");
        graph.add_dependency("main", "b");
        graph.add_dependency("a", "shared");
        graph.add_dependency("b", "shared");

        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|p| p == id).unwrap();

        assert!(pos("shared") < pos("a"));
        assert!(pos("shared") < pos("b"));
        assert!(pos("a") < pos("main"));
        assert!(pos("b") < pos("main"));
    }

    #[test]
    fn test_transitive_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("main", "utils");
        graph.add_dependency("utils", "logger");

        let deps = graph.transitive_dependencies("main").unwrap();
        assert_eq!(deps, ids(&["utils", "logger"]));

        assert_eq!(
            graph.transitive_dependencies("missing"),
            Err(GraphError::ModuleNotFound("missing".into()))
        );
    }
}
