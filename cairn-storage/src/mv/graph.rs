use super::definition::MatViewDefinition;
use super::state::MatViewRefreshState;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct GraphInner {
    /// Views by lowercase base table name, in creation order.
    by_base: HashMap<String, Vec<Arc<MatViewRefreshState>>>,
    /// Views by lowercase view name.
    views: HashMap<String, Arc<MatViewRefreshState>>,
}

/// Dependency graph from base tables to their materialized views.
#[derive(Default)]
pub struct MatViewGraph {
    inner: RwLock<GraphInner>,
}

impl MatViewGraph {
    pub fn add_view(&self, definition: MatViewDefinition) -> Result<Arc<MatViewRefreshState>> {
        let view_key = definition.view_name.to_lowercase();
        let base_key = definition.base_table_name.to_lowercase();
        let mut g = self.inner.write();
        if g.views.contains_key(&view_key) {
            return Err(Error::TableAlreadyExists(definition.view_name));
        }
        let state = Arc::new(MatViewRefreshState::new(definition));
        g.views.insert(view_key, Arc::clone(&state));
        g.by_base.entry(base_key).or_default().push(Arc::clone(&state));
        Ok(state)
    }

    pub fn remove_view(&self, view_name: &str) -> Option<Arc<MatViewRefreshState>> {
        let mut g = self.inner.write();
        let state = g.views.remove(&view_name.to_lowercase())?;
        let base_key = state.base_table_name().to_lowercase();
        if let Some(views) = g.by_base.get_mut(&base_key) {
            views.retain(|v| !Arc::ptr_eq(v, &state));
            if views.is_empty() {
                g.by_base.remove(&base_key);
            }
        }
        Some(state)
    }

    #[inline]
    pub fn view_state(&self, view_name: &str) -> Option<Arc<MatViewRefreshState>> {
        self.inner.read().views.get(&view_name.to_lowercase()).cloned()
    }

    /// Base table names having at least one view, as given by the
    /// view definitions.
    pub fn base_tables(&self) -> Vec<String> {
        let g = self.inner.read();
        let mut res: Vec<String> = g
            .by_base
            .values()
            .filter_map(|views| views.first().map(|v| v.base_table_name().to_string()))
            .collect();
        res.sort();
        res
    }

    pub fn dependent_views(&self, base_table_name: &str) -> Vec<Arc<MatViewRefreshState>> {
        self.inner
            .read()
            .by_base
            .get(&base_table_name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.read().views.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
