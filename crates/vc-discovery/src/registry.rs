use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::budget::preset;
use crate::worker::{CostEstimate, DiscoveryWorker};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate worker name: `{0}`")]
    DuplicateWorker(String),
    #[error("worker not found: `{0}`")]
    WorkerNotFound(String),
    #[error("unknown preset: `{0}`")]
    UnknownPreset(String),
    #[error("dependency cycle among workers: {0:?}")]
    CycleDetected(Vec<String>),
}

// ---------------------------------------------------------------------------
// WorkerRegistry
// ---------------------------------------------------------------------------

/// Holds registered discovery workers and resolves requested subsets into a
/// dependency-respecting execution order.
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn DiscoveryWorker>>,
    /// Registration order, for deterministic tie-breaking.
    order: Vec<String>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// A registry pre-populated with the built-in workers.
    pub fn with_builtin_workers() -> Self {
        let mut registry = Self::new();
        for worker in crate::workers::builtin_workers() {
            // Built-in names are unique by construction.
            let _ = registry.register(worker);
        }
        registry
    }

    /// Register a worker. Fails when the name is already present.
    pub fn register(&mut self, worker: Arc<dyn DiscoveryWorker>) -> Result<(), RegistryError> {
        let name = worker.name().to_string();
        if self.workers.contains_key(&name) {
            return Err(RegistryError::DuplicateWorker(name));
        }
        debug!(worker = %name, "registered discovery worker");
        self.order.push(name.clone());
        self.workers.insert(name, worker);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DiscoveryWorker>> {
        self.workers.get(name).cloned()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Resolve the requested workers into a topologically sorted execution
    /// order (Kahn's algorithm).
    ///
    /// Only dependencies that are themselves in `requested` induce edges;
    /// dependencies on unrequested workers are silently dropped. A cycle
    /// among the requested workers fails the whole call.
    pub fn resolve_workers(
        &self,
        requested: &[String],
    ) -> Result<Vec<Arc<dyn DiscoveryWorker>>, RegistryError> {
        // Deduplicate while preserving request order.
        let mut names: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for name in requested {
            if seen.insert(name.as_str()) {
                names.push(name.as_str());
            }
        }
        for name in &names {
            if !self.workers.contains_key(*name) {
                return Err(RegistryError::WorkerNotFound((*name).to_string()));
            }
        }
        let requested_set: HashSet<&str> = names.iter().copied().collect();

        // Edge d -> w for every declared dependency d inside the request.
        let mut in_degree: HashMap<&str, usize> = names.iter().map(|n| (*n, 0)).collect();
        let mut dependants: HashMap<&str, Vec<&str>> = HashMap::new();
        for name in &names {
            let worker = &self.workers[*name];
            for dep in worker.dependencies() {
                let Some(&dep_name) = requested_set.get(dep.as_str()) else {
                    continue;
                };
                dependants.entry(dep_name).or_default().push(*name);
                if let Some(degree) = in_degree.get_mut(*name) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = names
            .iter()
            .copied()
            .filter(|n| in_degree[n] == 0)
            .collect();
        let mut resolved: Vec<Arc<dyn DiscoveryWorker>> = Vec::with_capacity(names.len());
        let mut resolved_names: HashSet<&str> = HashSet::new();

        while let Some(current) = queue.pop_front() {
            resolved.push(self.workers[current].clone());
            resolved_names.insert(current);
            if let Some(next) = dependants.get(current) {
                for &dependant in next {
                    if let Some(degree) = in_degree.get_mut(dependant) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependant);
                        }
                    }
                }
            }
        }

        if resolved.len() < names.len() {
            let mut stuck: Vec<String> = names
                .iter()
                .filter(|n| !resolved_names.contains(*n))
                .map(|n| (*n).to_string())
                .collect();
            stuck.sort();
            return Err(RegistryError::CycleDetected(stuck));
        }
        Ok(resolved)
    }

    /// Resolve the worker list a preset declares.
    pub fn get_preset_workers(
        &self,
        preset_name: &str,
    ) -> Result<Vec<Arc<dyn DiscoveryWorker>>, RegistryError> {
        let preset =
            preset(preset_name).ok_or_else(|| RegistryError::UnknownPreset(preset_name.into()))?;
        let names: Vec<String> = preset.workers.iter().map(|s| (*s).to_string()).collect();
        self.resolve_workers(&names)
    }

    /// Aggregate cost estimate for a set of workers: dollars and AI calls
    /// sum, the category is the max of the constituents.
    pub fn worker_cost(&self, names: &[String]) -> Result<CostEstimate, RegistryError> {
        let mut total: Option<CostEstimate> = None;
        for name in names {
            let worker = self
                .workers
                .get(name)
                .ok_or_else(|| RegistryError::WorkerNotFound(name.clone()))?;
            match &mut total {
                Some(estimate) => estimate.combine(&worker.cost()),
                None => total = Some(worker.cost()),
            }
        }
        Ok(total.unwrap_or_else(|| CostEstimate {
            category: crate::worker::CostCategory::Cheap,
            est_usd: 0.0,
            est_ai_calls: 0,
        }))
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{WorkerError, WorkerResult};
    use async_trait::async_trait;
    use vc_core::cancel::CancelToken;
    use vc_core::context::CodebaseContext;

    struct StubWorker {
        name: String,
        deps: Vec<String>,
        cost: CostEstimate,
    }

    impl StubWorker {
        fn new(name: &str, deps: &[&str]) -> Arc<dyn DiscoveryWorker> {
            Arc::new(Self {
                name: name.to_string(),
                deps: deps.iter().map(|s| (*s).to_string()).collect(),
                cost: CostEstimate::cheap(),
            })
        }

        fn with_cost(name: &str, cost: CostEstimate) -> Arc<dyn DiscoveryWorker> {
            Arc::new(Self {
                name: name.to_string(),
                deps: Vec::new(),
                cost,
            })
        }
    }

    #[async_trait]
    impl DiscoveryWorker for StubWorker {
        fn name(&self) -> &str {
            &self.name
        }
        fn philosophy(&self) -> &str {
            "stub"
        }
        fn scope(&self) -> &str {
            "stub"
        }
        fn cost(&self) -> CostEstimate {
            self.cost.clone()
        }
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }
        async fn analyze(
            &self,
            _cancel: &CancelToken,
            _ctx: &CodebaseContext,
        ) -> Result<WorkerResult, WorkerError> {
            Ok(WorkerResult::new())
        }
    }

    fn req(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = WorkerRegistry::new();
        registry.register(StubWorker::new("alpha", &[])).unwrap();
        let err = registry.register(StubWorker::new("alpha", &[])).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateWorker(_)));
    }

    #[test]
    fn resolve_orders_dependencies_first() {
        let mut registry = WorkerRegistry::new();
        registry.register(StubWorker::new("c", &["b"])).unwrap();
        registry.register(StubWorker::new("a", &[])).unwrap();
        registry.register(StubWorker::new("b", &["a"])).unwrap();

        let resolved = registry.resolve_workers(&req(&["c", "b", "a"])).unwrap();
        let order: Vec<&str> = resolved.iter().map(|w| w.name()).collect();

        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn resolve_drops_dependencies_outside_request() {
        let mut registry = WorkerRegistry::new();
        registry.register(StubWorker::new("a", &[])).unwrap();
        registry.register(StubWorker::new("b", &["a"])).unwrap();

        // `a` exists but is not requested; the edge is silently dropped.
        let resolved = registry.resolve_workers(&req(&["b"])).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name(), "b");
    }

    #[test]
    fn resolve_detects_cycles() {
        let mut registry = WorkerRegistry::new();
        registry.register(StubWorker::new("a", &["b"])).unwrap();
        registry.register(StubWorker::new("b", &["a"])).unwrap();
        registry.register(StubWorker::new("c", &[])).unwrap();

        let err = registry.resolve_workers(&req(&["a", "b", "c"])).unwrap_err();
        match err {
            RegistryError::CycleDetected(stuck) => {
                assert_eq!(stuck, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn resolve_unknown_worker_fails() {
        let registry = WorkerRegistry::new();
        let err = registry.resolve_workers(&req(&["ghost"])).unwrap_err();
        assert!(matches!(err, RegistryError::WorkerNotFound(_)));
    }

    #[test]
    fn resolve_deduplicates_request() {
        let mut registry = WorkerRegistry::new();
        registry.register(StubWorker::new("a", &[])).unwrap();
        let resolved = registry.resolve_workers(&req(&["a", "a", "a"])).unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn preset_workers_resolve() {
        let registry = WorkerRegistry::with_builtin_workers();
        let quick = registry.get_preset_workers("quick").unwrap();
        assert_eq!(quick.len(), 2);

        let thorough = registry.get_preset_workers("thorough").unwrap();
        let order: Vec<&str> = thorough.iter().map(|w| w.name()).collect();
        // doc-coverage declares a dependency on code-structure.
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("code-structure") < pos("doc-coverage"));

        let err = registry.get_preset_workers("nope").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownPreset(_)));
    }

    #[test]
    fn worker_cost_aggregates() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(StubWorker::with_cost("cheap-one", CostEstimate::cheap()))
            .unwrap();
        registry
            .register(StubWorker::with_cost("pricey", CostEstimate::expensive()))
            .unwrap();

        let total = registry
            .worker_cost(&req(&["cheap-one", "pricey"]))
            .unwrap();
        assert_eq!(total.category, crate::worker::CostCategory::Expensive);
        assert!((total.est_usd - 2.01).abs() < 1e-9);

        let empty = registry.worker_cost(&[]).unwrap();
        assert_eq!(empty.est_ai_calls, 0);
    }
}
