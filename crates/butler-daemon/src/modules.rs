//! Module lifecycle orchestration (§4.N): topological sort over declared
//! dependencies, then per-module config validation and startup, grounded
//! in `mqk-config`'s layered-load-then-validate shape.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Config,
    Startup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    Active,
    Failed { phase: FailurePhase },
    CascadeFailed,
}

impl ModuleStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ModuleStatus::Active)
    }
}

/// One daemon-managed module. `validate_config`/`on_startup` own storing
/// whatever typed config they parse out of `raw` (interior mutability, e.g.
/// `OnceLock<T>`) — this trait only needs to express the three lifecycle
/// calls, not the per-module config type.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    fn dependencies(&self) -> &[String];
    fn validate_config(&self, raw: Option<&toml::Value>) -> Result<(), String>;
    async fn on_startup(&self) -> Result<(), String>;
    async fn on_shutdown(&self);
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    pub statuses: BTreeMap<String, ModuleStatus>,
    /// Topological processing order, cyclic modules excluded.
    pub order: Vec<String>,
}

/// Kahn's algorithm. Modules that can't be placed (part of a dependency
/// cycle, or depending on a name not present in `modules`) are returned
/// separately so the caller can mark them cascade-failed without ever
/// attempting config validation or startup on them.
fn topo_sort(modules: &[Arc<dyn Module>]) -> (Vec<String>, Vec<String>) {
    let names: HashMap<&str, &Arc<dyn Module>> = modules.iter().map(|m| (m.name(), m)).collect();

    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for m in modules {
        indegree.entry(m.name()).or_insert(0);
        for dep in m.dependencies() {
            if names.contains_key(dep.as_str()) {
                *indegree.entry(m.name()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(m.name());
            }
        }
    }

    // Deterministic order among equally-ready modules.
    let mut ready_initial: Vec<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    ready_initial.sort();
    let mut queue: VecDeque<&str> = ready_initial.into();

    let mut order = Vec::with_capacity(modules.len());
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        if let Some(children) = dependents.get(name) {
            let mut ready = Vec::new();
            for &child in children {
                let deg = indegree.get_mut(child).expect("child tracked in indegree");
                *deg -= 1;
                if *deg == 0 {
                    ready.push(child);
                }
            }
            ready.sort();
            for r in ready {
                queue.push_back(r);
            }
        }
    }

    let placed: std::collections::HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
    let unplaced: Vec<String> = modules
        .iter()
        .map(|m| m.name().to_string())
        .filter(|n| !placed.contains(n.as_str()))
        .collect();

    (order, unplaced)
}

/// Runs the full §4.N lifecycle: cascade check first (a module with a
/// not-yet-active dependency never reaches config validation or startup),
/// then config validation, then startup.
pub async fn run_lifecycle(
    modules: &[Arc<dyn Module>],
    module_configs: &BTreeMap<String, toml::Value>,
) -> LifecycleReport {
    let (order, unplaced) = topo_sort(modules);
    let by_name: HashMap<&str, &Arc<dyn Module>> = modules.iter().map(|m| (m.name(), m)).collect();

    let mut statuses: BTreeMap<String, ModuleStatus> = BTreeMap::new();
    for name in &unplaced {
        statuses.insert(name.clone(), ModuleStatus::CascadeFailed);
    }

    for name in &order {
        let module = by_name[name.as_str()];
        let deps_active = module
            .dependencies()
            .iter()
            .all(|dep| statuses.get(dep).is_some_and(ModuleStatus::is_active));

        if !deps_active {
            statuses.insert(name.clone(), ModuleStatus::CascadeFailed);
            continue;
        }

        let raw = module_configs.get(name);
        if let Err(_err) = module.validate_config(raw) {
            statuses.insert(name.clone(), ModuleStatus::Failed { phase: FailurePhase::Config });
            continue;
        }

        match module.on_startup().await {
            Ok(()) => {
                statuses.insert(name.clone(), ModuleStatus::Active);
            }
            Err(_err) => {
                statuses.insert(name.clone(), ModuleStatus::Failed { phase: FailurePhase::Startup });
            }
        }
    }

    LifecycleReport { statuses, order }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeModule {
        name: String,
        deps: Vec<String>,
        fail_config: bool,
        fail_startup: bool,
        startup_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Module for FakeModule {
        fn name(&self) -> &str {
            &self.name
        }

        fn dependencies(&self) -> &[String] {
            &self.deps
        }

        fn validate_config(&self, _raw: Option<&toml::Value>) -> Result<(), String> {
            if self.fail_config {
                Err("bad config".to_string())
            } else {
                Ok(())
            }
        }

        async fn on_startup(&self) -> Result<(), String> {
            self.startup_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_startup {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }

        async fn on_shutdown(&self) {}
    }

    fn fake(name: &str, deps: &[&str]) -> Arc<dyn Module> {
        Arc::new(FakeModule {
            name: name.to_string(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            fail_config: false,
            fail_startup: false,
            startup_calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[tokio::test]
    async fn independent_modules_all_activate() {
        let modules = vec![fake("a", &[]), fake("b", &[])];
        let report = run_lifecycle(&modules, &BTreeMap::new()).await;
        assert_eq!(report.statuses["a"], ModuleStatus::Active);
        assert_eq!(report.statuses["b"], ModuleStatus::Active);
    }

    #[tokio::test]
    async fn dependent_module_activates_after_its_dependency() {
        let modules = vec![fake("b", &["a"]), fake("a", &[])];
        let report = run_lifecycle(&modules, &BTreeMap::new()).await;
        assert_eq!(report.order, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.statuses["a"], ModuleStatus::Active);
        assert_eq!(report.statuses["b"], ModuleStatus::Active);
    }

    #[tokio::test]
    async fn failed_config_cascades_to_dependents_without_invoking_startup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let broken = Arc::new(FakeModule {
            name: "a".to_string(),
            deps: vec![],
            fail_config: true,
            fail_startup: false,
            startup_calls: calls.clone(),
        });
        let dependent = fake("b", &["a"]);
        let modules: Vec<Arc<dyn Module>> = vec![broken, dependent];

        let report = run_lifecycle(&modules, &BTreeMap::new()).await;
        assert_eq!(report.statuses["a"], ModuleStatus::Failed { phase: FailurePhase::Config });
        assert_eq!(report.statuses["b"], ModuleStatus::CascadeFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_startup_cascades_to_dependents() {
        let broken = Arc::new(FakeModule {
            name: "a".to_string(),
            deps: vec![],
            fail_config: false,
            fail_startup: true,
            startup_calls: Arc::new(AtomicUsize::new(0)),
        });
        let dependent = fake("b", &["a"]);
        let modules: Vec<Arc<dyn Module>> = vec![broken, dependent];

        let report = run_lifecycle(&modules, &BTreeMap::new()).await;
        assert_eq!(report.statuses["a"], ModuleStatus::Failed { phase: FailurePhase::Startup });
        assert_eq!(report.statuses["b"], ModuleStatus::CascadeFailed);
    }

    #[tokio::test]
    async fn cyclic_modules_are_cascade_failed_without_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = Arc::new(FakeModule {
            name: "a".to_string(),
            deps: vec!["b".to_string()],
            fail_config: false,
            fail_startup: false,
            startup_calls: calls.clone(),
        });
        let b = Arc::new(FakeModule {
            name: "b".to_string(),
            deps: vec!["a".to_string()],
            fail_config: false,
            fail_startup: false,
            startup_calls: calls.clone(),
        });
        let modules: Vec<Arc<dyn Module>> = vec![a, b];

        let report = run_lifecycle(&modules, &BTreeMap::new()).await;
        assert_eq!(report.statuses["a"], ModuleStatus::CascadeFailed);
        assert_eq!(report.statuses["b"], ModuleStatus::CascadeFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dependency_on_undeclared_module_name_cascades() {
        let modules: Vec<Arc<dyn Module>> = vec![fake("b", &["missing"])];
        let report = run_lifecycle(&modules, &BTreeMap::new()).await;
        assert_eq!(report.statuses["b"], ModuleStatus::CascadeFailed);
    }
}
