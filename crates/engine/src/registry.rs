//! Known mountains, looked up by id.

use std::collections::HashMap;

use common::{Error, MountainConfig, Result};

#[derive(Debug, Clone, Default)]
pub struct MountainRegistry {
    ordered: Vec<String>,
    by_id: HashMap<String, MountainConfig>,
}

impl MountainRegistry {
    pub fn new(mountains: Vec<MountainConfig>) -> Self {
        let mut registry = Self::default();
        for m in mountains {
            if !registry.by_id.contains_key(&m.id) {
                registry.ordered.push(m.id.clone());
            }
            registry.by_id.insert(m.id.clone(), m);
        }
        registry
    }

    pub fn get(&self, id: &str) -> Result<&MountainConfig> {
        self.by_id
            .get(id)
            .ok_or_else(|| Error::UnknownLocation(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Ids in configuration order.
    pub fn ids(&self) -> &[String] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
