//! Compiled-in communicator registry.
//!
//! Communicators ship in *packages*. Each package exports a set of
//! named factories. At startup the agent selects packages (all of them,
//! or the ordered list from configuration) and folds their exports into
//! one name → factory map. A later package overwrites an earlier one that
//! exports the same name, so deployments can override a stock
//! communicator by listing their own package after it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::communicator::{Communicator, StubCommunicator};
use crate::error::CoreError;

/// Builds a fresh, unconfigured communicator.
pub type CommunicatorFactory = Arc<dyn Fn() -> Box<dyn Communicator> + Send + Sync>;

/// A named bundle of communicator factories.
pub trait CommunicatorPackage: Send + Sync {
    fn name(&self) -> &str;

    /// Factories exported by this package, in declaration order.
    fn communicators(&self) -> Result<Vec<(String, CommunicatorFactory)>, CoreError>;
}

/// A package assembled from a fixed list of factories.
#[derive(Clone)]
pub struct StaticPackage {
    name: String,
    exports: Vec<(String, CommunicatorFactory)>,
}

impl StaticPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: Vec::new(),
        }
    }

    /// Export `factory` under `communicator`.
    pub fn with<F, C>(mut self, communicator: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: Communicator + 'static,
    {
        self.exports.push((
            communicator.into(),
            Arc::new(move || -> Box<dyn Communicator> { Box::new(factory()) }),
        ));
        self
    }
}

impl CommunicatorPackage for StaticPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn communicators(&self) -> Result<Vec<(String, CommunicatorFactory)>, CoreError> {
        Ok(self.exports.clone())
    }
}

/// Package name of the communicators built into this crate.
pub const BUILTIN_PACKAGE: &str = "ncontrol-builtin";

/// Every package compiled into the agent.
pub fn builtin_packages() -> Vec<Arc<dyn CommunicatorPackage>> {
    vec![Arc::new(
        StaticPackage::new(BUILTIN_PACKAGE).with(StubCommunicator::NAME, StubCommunicator::new),
    )]
}

/// Pick packages from `available` in the order `enabled` names them.
///
/// `None` keeps every package in its original order. Names with no
/// matching package are logged and skipped.
pub fn select_packages(
    available: Vec<Arc<dyn CommunicatorPackage>>,
    enabled: Option<&[String]>,
) -> Vec<Arc<dyn CommunicatorPackage>> {
    let Some(enabled) = enabled else {
        return available;
    };
    enabled
        .iter()
        .filter_map(|wanted| {
            let found = available.iter().find(|p| p.name() == wanted).cloned();
            if found.is_none() {
                warn!(package = %wanted, "configured communicator package is not compiled in");
            }
            found
        })
        .collect()
}

// ── Registry ────────────────────────────────────────────────────────

/// Name → factory lookup built once at process start.
#[derive(Default, Clone)]
pub struct CommunicatorRegistry {
    factories: HashMap<String, CommunicatorFactory>,
}

impl CommunicatorRegistry {
    /// Fold every package's exports into one registry.
    ///
    /// A package that fails to enumerate is logged and skipped; the rest
    /// still load. An empty result is not an error here: a missing type
    /// only becomes fatal when an endpoint asks for it.
    pub fn discover(packages: &[Arc<dyn CommunicatorPackage>]) -> Self {
        let mut factories = HashMap::new();
        for package in packages {
            let exports = match package.communicators() {
                Ok(exports) => exports,
                Err(e) => {
                    warn!(package = package.name(), error = %e, "failed to load communicator package");
                    continue;
                }
            };
            for (name, factory) in exports {
                if factories.insert(name.clone(), factory).is_some() {
                    info!(communicator = %name, package = package.name(), "communicator overridden");
                } else {
                    debug!(communicator = %name, package = package.name(), "communicator registered");
                }
            }
        }
        Self { factories }
    }

    pub fn get(&self, name: &str) -> Option<&CommunicatorFactory> {
        self.factories.get(name)
    }

    /// Build an unconfigured communicator of type `name`.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Communicator>, CoreError> {
        let factory = self
            .get(name)
            .ok_or_else(|| CoreError::CommunicatorNotFound {
                name: name.to_owned(),
                available: self.names().join(", "),
            })?;
        Ok(factory())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for CommunicatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicatorRegistry")
            .field("communicators", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::communicator::{CommunicatorContext, TemplateSet};
    use crate::model::ControlUpdate;
    use crate::store::ControlSet;
    use pretty_assertions::assert_eq;

    /// Communicator whose name records which package built it.
    struct Tagged(&'static str);

    impl Communicator for Tagged {
        fn name(&self) -> &str {
            self.0
        }
        fn configure(&mut self, _ctx: CommunicatorContext) {}
        fn control_templates(&self) -> TemplateSet {
            TemplateSet::new()
        }
        fn set_templates(&mut self, _controls: &ControlSet) {}
        fn connect(&mut self) {}
        fn disconnect(&mut self) {}
        fn is_connected(&self) -> bool {
            false
        }
        fn handle_control_update_request(&mut self, _update: &ControlUpdate) {}
    }

    struct Broken;

    impl CommunicatorPackage for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn communicators(&self) -> Result<Vec<(String, CommunicatorFactory)>, CoreError> {
            Err(CoreError::PackageLoad {
                package: "broken".into(),
                reason: "bad manifest".into(),
            })
        }
    }

    #[test]
    fn later_package_wins_on_name_collision() {
        let packages: Vec<Arc<dyn CommunicatorPackage>> = vec![
            Arc::new(StaticPackage::new("first").with("Projector", || Tagged("first"))),
            Arc::new(StaticPackage::new("second").with("Projector", || Tagged("second"))),
        ];
        let registry = CommunicatorRegistry::discover(&packages);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.instantiate("Projector").unwrap().name(), "second");
    }

    #[test]
    fn failing_package_does_not_block_others() {
        let packages: Vec<Arc<dyn CommunicatorPackage>> = vec![
            Arc::new(Broken),
            Arc::new(StaticPackage::new("ok").with("Switcher", || Tagged("ok"))),
        ];
        let registry = CommunicatorRegistry::discover(&packages);
        assert_eq!(registry.names(), vec!["Switcher"]);
    }

    #[test]
    fn missing_type_names_alternatives() {
        let registry = CommunicatorRegistry::discover(&builtin_packages());
        let Err(err) = registry.instantiate("PJLink") else {
            panic!("expected lookup to fail");
        };
        assert!(matches!(err, CoreError::CommunicatorNotFound { .. }));
        assert!(err.to_string().contains(StubCommunicator::NAME));
    }

    #[test]
    fn empty_registry_is_allowed() {
        let registry = CommunicatorRegistry::discover(&[]);
        assert!(registry.is_empty());
    }

    #[test]
    fn select_follows_configured_order() {
        let available: Vec<Arc<dyn CommunicatorPackage>> = vec![
            Arc::new(StaticPackage::new("a").with("X", || Tagged("a"))),
            Arc::new(StaticPackage::new("b").with("X", || Tagged("b"))),
        ];
        let order = vec!["b".to_owned(), "missing".to_owned(), "a".to_owned()];
        let selected = select_packages(available, Some(order.as_slice()));
        let names: Vec<_> = selected.iter().map(|p| p.name().to_owned()).collect();
        assert_eq!(names, vec!["b", "a"]);

        let registry = CommunicatorRegistry::discover(&selected);
        assert_eq!(registry.instantiate("X").unwrap().name(), "a");
    }
}
