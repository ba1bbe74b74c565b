//! Catalog: namespaced registry of factories, plus the resolver that maps
//! `(module, symbol)` references to executable compute steps.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::error::DataflowError;
use crate::model::factory::AnyFactory;
use crate::model::node::Compute;

/// Lookup surface the instantiation machinery depends on. Kept as a trait so
/// blueprints can be materialized against any registry shape, including test
/// doubles.
pub trait FactoryCatalog {
    fn lookup(&self, namespace: &str, name: &str) -> Result<AnyFactory, DataflowError>;
}

/// A named group of factories. Registration stamps the package namespace onto
/// the factory so instances it produces carry a resolvable back-reference.
#[derive(Clone, Debug, Default)]
pub struct Package {
    name: String,
    factories: HashMap<String, AnyFactory>,
}

impl Package {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            factories: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_factory(&mut self, factory: impl Into<AnyFactory>) -> &mut Self {
        let mut factory = factory.into();
        factory.set_package(&self.name);
        self.factories.insert(factory.name().to_string(), factory);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AnyFactory> {
        self.factories.get(name)
    }

    /// Factory names, sorted for stable display.
    pub fn get_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// In-memory catalog of packages keyed by namespace.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    packages: HashMap<String, Package>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_package(&mut self, package: Package) {
        self.packages.insert(package.name().to_string(), package);
    }

    pub fn package(&self, namespace: &str) -> Option<&Package> {
        self.packages.get(namespace)
    }

    pub fn package_mut(&mut self, namespace: &str) -> Option<&mut Package> {
        self.packages.get_mut(namespace)
    }
}

impl FactoryCatalog for Catalog {
    fn lookup(&self, namespace: &str, name: &str) -> Result<AnyFactory, DataflowError> {
        self.packages
            .get(namespace)
            .and_then(|p| p.get(name))
            .cloned()
            .ok_or_else(|| DataflowError::Lookup {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

/// Maps a factory's `(module, symbol)` reference to a fresh compute step.
pub trait ComputeResolver {
    fn resolve(&self, module: &str, symbol: &str) -> Result<Compute, DataflowError>;
}

type ComputeBuilder = Arc<dyn Fn() -> Compute + Send + Sync>;

/// Resolver backed by a table of registered builders. Each resolution invokes
/// the builder, so stateful compute steps start fresh per node instance.
#[derive(Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<(String, String), ComputeBuilder>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        module: &str,
        symbol: &str,
        builder: impl Fn() -> Compute + Send + Sync + 'static,
    ) {
        self.symbols
            .insert((module.to_string(), symbol.to_string()), Arc::new(builder));
    }

    pub fn contains(&self, module: &str, symbol: &str) -> bool {
        self.symbols
            .contains_key(&(module.to_string(), symbol.to_string()))
    }
}

impl ComputeResolver for SymbolTable {
    fn resolve(&self, module: &str, symbol: &str) -> Result<Compute, DataflowError> {
        match self.symbols.get(&(module.to_string(), symbol.to_string())) {
            Some(builder) => Ok(builder()),
            None => {
                warn!("no implementation registered for {}::{}", module, symbol);
                Err(DataflowError::Instantiation(format!(
                    "no implementation registered for {}::{}",
                    module, symbol
                )))
            }
        }
    }
}
