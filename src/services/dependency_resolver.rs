use crate::domain::models::ServiceDefinition;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Dependency graph problems found while ordering services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    Unknown { service: String, dependency: String },

    #[error("Service '{0}' depends on itself")]
    SelfReference(String),

    /// Cycle path, first node repeated at the end (`a -> b -> a`)
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Resolves service start order and detects circular dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|&name| name == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Validate that every dependency names another known service.
    pub fn validate_dependencies(
        &self,
        services: &[ServiceDefinition],
    ) -> Result<(), DependencyError> {
        let known: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();

        for service in services {
            for dep in &service.depends_on {
                if dep == &service.name {
                    return Err(DependencyError::SelfReference(service.name.clone()));
                }
                if !known.contains(dep.as_str()) {
                    return Err(DependencyError::Unknown {
                        service: service.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Detect a circular dependency, returning the cycle path.
    ///
    /// Traversal visits services by name so the reported cycle is stable.
    pub fn detect_cycle(&self, services: &[ServiceDefinition]) -> Option<Vec<String>> {
        let graph: BTreeMap<&str, Vec<&str>> = services
            .iter()
            .map(|s| {
                let mut deps: Vec<&str> = s.depends_on.iter().map(String::as_str).collect();
                deps.sort_unstable();
                (s.name.as_str(), deps)
            })
            .collect();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for &name in graph.keys() {
            if !visited.contains(name)
                && detect_cycle_util(name, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path.into_iter().map(str::to_string).collect());
            }
        }

        None
    }

    /// Topological sort, dependencies before dependents.
    ///
    /// Among services whose dependencies are all satisfied the
    /// alphabetically smallest name goes first, so the order is deterministic.
    pub fn topological_sort(
        &self,
        services: &[ServiceDefinition],
    ) -> Result<Vec<ServiceDefinition>, DependencyError> {
        self.validate_dependencies(services)?;
        if let Some(cycle) = self.detect_cycle(services) {
            return Err(DependencyError::Cycle(cycle));
        }

        let mut by_name: BTreeMap<&str, &ServiceDefinition> =
            services.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for service in services {
            in_degree.entry(service.name.as_str()).or_insert(0);
            let unique: BTreeSet<&str> = service.depends_on.iter().map(String::as_str).collect();
            for dep in unique {
                dependents.entry(dep).or_default().push(service.name.as_str());
                *in_degree.entry(service.name.as_str()).or_insert(0) += 1;
            }
        }

        // Kahn's algorithm with an ordered ready set
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&name, _)| name)
            .collect();

        let mut sorted = Vec::with_capacity(services.len());

        while let Some(name) = ready.pop_first() {
            if let Some(service) = by_name.remove(name) {
                sorted.push(service.clone());
            }

            if let Some(neighbors) = dependents.get(name) {
                for &neighbor in neighbors {
                    if let Some(degree) = in_degree.get_mut(neighbor) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(neighbor);
                        }
                    }
                }
            }
        }

        Ok(sorted)
    }
}
