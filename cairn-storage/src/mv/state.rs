use super::copier::RecordToRowCopier;
use super::definition::MatViewDefinition;
use super::query::RecordCursorFactory;
use parking_lot::{Mutex, MutexGuard};

#[derive(Default)]
struct RefreshCache {
    factory: Option<Box<dyn RecordCursorFactory>>,
    copier: Option<RecordToRowCopier>,
}

/// In-memory state of one materialized view.
///
/// The cached query plan lives behind the refresh lock, so only the
/// refresh holding the guard can use or replace it.
pub struct MatViewRefreshState {
    definition: MatViewDefinition,
    cache: Mutex<RefreshCache>,
    last_error: Mutex<Option<String>>,
}

impl MatViewRefreshState {
    #[inline]
    pub fn new(definition: MatViewDefinition) -> Self {
        MatViewRefreshState {
            definition,
            cache: Mutex::new(RefreshCache::default()),
            last_error: Mutex::new(None),
        }
    }

    #[inline]
    pub fn definition(&self) -> &MatViewDefinition {
        &self.definition
    }

    #[inline]
    pub fn view_name(&self) -> &str {
        &self.definition.view_name
    }

    #[inline]
    pub fn base_table_name(&self) -> &str {
        &self.definition.base_table_name
    }

    /// Returns guard of the refresh lock, `None` if another refresh of
    /// this view is running.
    #[inline]
    pub fn try_begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.cache.try_lock().map(|cache| RefreshGuard { cache })
    }

    /// Error of the last failed refresh.
    #[inline]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    #[inline]
    pub fn set_error(&self, msg: impl Into<String>) {
        *self.last_error.lock() = Some(msg.into());
    }

    #[inline]
    pub fn clear_error(&self) {
        *self.last_error.lock() = None;
    }
}

/// Exclusive right to refresh a view, released on drop.
pub struct RefreshGuard<'a> {
    cache: MutexGuard<'a, RefreshCache>,
}

impl RefreshGuard<'_> {
    #[inline]
    pub fn factory(&self) -> Option<&dyn RecordCursorFactory> {
        self.cache.factory.as_deref()
    }

    #[inline]
    pub fn set_factory(&mut self, factory: Box<dyn RecordCursorFactory>) {
        self.cache.factory = Some(factory);
        self.cache.copier = None;
    }

    #[inline]
    pub fn copier(&self) -> Option<&RecordToRowCopier> {
        self.cache.copier.as_ref()
    }

    #[inline]
    pub fn set_copier(&mut self, copier: RecordToRowCopier) {
        self.cache.copier = Some(copier);
    }

    /// Drops cached plan so the next refresh compiles again.
    #[inline]
    pub fn invalidate(&mut self) {
        self.cache.factory = None;
        self.cache.copier = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::mv::query::{ExecutionContext, RecordCursor, RecordMetadata};

    struct EmptyFactory(RecordMetadata);

    impl RecordCursorFactory for EmptyFactory {
        fn metadata(&self) -> &RecordMetadata {
            &self.0
        }

        fn cursor<'a>(
            &'a self,
            _ctx: &'a ExecutionContext<'_>,
        ) -> Result<Box<dyn RecordCursor + 'a>> {
            unreachable!()
        }
    }

    #[test]
    fn test_refresh_is_exclusive() {
        let state = MatViewRefreshState::new(MatViewDefinition::new("v", "b", "q", 1, 0));
        let mut g = state.try_begin_refresh().unwrap();
        assert!(state.try_begin_refresh().is_none());
        assert!(g.factory().is_none());
        g.set_factory(Box::new(EmptyFactory(RecordMetadata::default())));
        assert!(g.factory().is_some());
        drop(g);

        let mut g = state.try_begin_refresh().unwrap();
        assert!(g.factory().is_some());
        g.invalidate();
        assert!(g.factory().is_none());
    }

    #[test]
    fn test_last_error() {
        let state = MatViewRefreshState::new(MatViewDefinition::new("v", "b", "q", 1, 0));
        assert_eq!(state.last_error(), None);
        state.set_error("compile failed");
        assert_eq!(state.last_error().as_deref(), Some("compile failed"));
        state.clear_error();
        assert_eq!(state.last_error(), None);
    }
}
