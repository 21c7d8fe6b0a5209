//! Plugin registry: declaration-ordered descriptor storage and dependency ordering.

use std::collections::HashMap;

use slotmap::{SecondaryMap, SlotMap, new_key_type};

use crate::error::{Error, Result};
use crate::plugin::descriptor::{PluginDescriptor, PluginId};

new_key_type! {
    pub struct PluginKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

#[derive(Debug, Default)]
pub struct Registry {
    plugins: SlotMap<PluginKey, PluginDescriptor>,
    by_id: HashMap<PluginId, PluginKey>,
    /// Declaration order.
    order: Vec<PluginKey>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor. A second descriptor with the same id is rejected and
    /// the first one stays.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<PluginKey> {
        if self.by_id.contains_key(&descriptor.id) {
            return Err(Error::DuplicateIdentifier(descriptor.id));
        }

        tracing::debug!(
            plugin = %descriptor.id,
            trigger = %descriptor.activation,
            "registering plugin"
        );
        let id = descriptor.id.clone();
        let key = self.plugins.insert(descriptor);
        self.by_id.insert(id, key);
        self.order.push(key);
        Ok(key)
    }

    pub fn key(&self, id: &PluginId) -> Option<PluginKey> {
        self.by_id.get(id).copied()
    }

    pub fn get(&self, id: &PluginId) -> Option<&PluginDescriptor> {
        self.key(id).map(|key| &self.plugins[key])
    }

    pub fn by_key(&self, key: PluginKey) -> &PluginDescriptor {
        &self.plugins[key]
    }

    pub fn by_key_mut(&mut self, key: PluginKey) -> &mut PluginDescriptor {
        &mut self.plugins[key]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Descriptors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.order.iter().map(|key| &self.plugins[*key])
    }

    /// Topological order: every plugin comes after its dependencies. Plugins
    /// with no dependency edge between them keep declaration order.
    pub fn resolve_order(&self) -> Result<Vec<PluginId>> {
        let mut marks = SecondaryMap::with_capacity(self.plugins.len());
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(self.plugins.len());

        for &key in &self.order {
            self.visit(key, &mut marks, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        key: PluginKey,
        marks: &mut SecondaryMap<PluginKey, Mark>,
        stack: &mut Vec<PluginKey>,
        order: &mut Vec<PluginId>,
    ) -> Result<()> {
        match marks.get(key) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|k| *k == key).unwrap_or(0);
                let cycle = stack[start..]
                    .iter()
                    .map(|k| self.plugins[*k].id.clone())
                    .collect();
                return Err(Error::CyclicDependency(cycle));
            }
            None => {}
        }

        marks.insert(key, Mark::Visiting);
        stack.push(key);

        let plugin = &self.plugins[key];
        for dependency in &plugin.dependencies {
            let dep_key = self
                .key(dependency)
                .ok_or_else(|| Error::UnknownDependency {
                    plugin: plugin.id.clone(),
                    dependency: dependency.clone(),
                })?;
            self.visit(dep_key, marks, stack, order)?;
        }

        stack.pop();
        marks.insert(key, Mark::Done);
        order.push(plugin.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(order: &[PluginId]) -> Vec<&str> {
        order.iter().map(PluginId::as_str).collect()
    }

    #[test]
    fn duplicate_keeps_first_descriptor() {
        let mut registry = Registry::new();
        registry
            .register(PluginDescriptor::new("folke/which-key.nvim").on_event("VeryLazy"))
            .unwrap();

        let err = registry
            .register(PluginDescriptor::new("folke/which-key.nvim"))
            .unwrap_err();
        let which_key = PluginId::new("folke/which-key.nvim");
        assert!(matches!(err, Error::DuplicateIdentifier(ref id) if *id == which_key));
        assert_eq!(registry.len(), 1);
        let kept = registry.get(&which_key).unwrap();
        assert!(kept.activation.is_lazy());
    }

    #[test]
    fn dependencies_come_first() {
        let mut registry = Registry::new();
        registry
            .register(PluginDescriptor::new("neo-tree").depends_on("plenary").depends_on("nui"))
            .unwrap();
        registry.register(PluginDescriptor::new("telescope").depends_on("plenary")).unwrap();
        registry.register(PluginDescriptor::new("nui")).unwrap();
        registry.register(PluginDescriptor::new("plenary")).unwrap();
        registry.register(PluginDescriptor::new("alpha")).unwrap();

        let order = registry.resolve_order().unwrap();
        assert_eq!(ids(&order), vec!["plenary", "nui", "neo-tree", "telescope", "alpha"]);
    }

    #[test]
    fn two_node_cycle_names_both() {
        let mut registry = Registry::new();
        registry.register(PluginDescriptor::new("a").depends_on("b")).unwrap();
        registry.register(PluginDescriptor::new("b").depends_on("a")).unwrap();

        match registry.resolve_order() {
            Err(Error::CyclicDependency(cycle)) => assert_eq!(ids(&cycle), vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn cycle_excludes_the_path_leading_into_it() {
        let mut registry = Registry::new();
        registry.register(PluginDescriptor::new("root").depends_on("x")).unwrap();
        registry.register(PluginDescriptor::new("x").depends_on("y")).unwrap();
        registry.register(PluginDescriptor::new("y").depends_on("x")).unwrap();

        match registry.resolve_order() {
            Err(Error::CyclicDependency(cycle)) => assert_eq!(ids(&cycle), vec!["x", "y"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut registry = Registry::new();
        registry.register(PluginDescriptor::new("loop").depends_on("loop")).unwrap();
        let order = registry.resolve_order();
        assert!(matches!(order, Err(Error::CyclicDependency(c)) if c.len() == 1));
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let mut registry = Registry::new();
        registry.register(PluginDescriptor::new("gp").depends_on("plenary")).unwrap();
        assert!(matches!(
            registry.resolve_order(),
            Err(Error::UnknownDependency { ref dependency, .. }) if dependency.as_str() == "plenary"
        ));
    }
}
