use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{Handler, HandlerId, internal::Invocation};

/// Registered handlers keyed by identity.
///
/// Guarded by a read/write lock: dispatch takes the read side only long
/// enough to copy the matching bindings out.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<HandlerId, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, returning the handler it replaced, if any.
    pub fn add(&self, handler: Arc<dyn Handler>) -> Option<Arc<dyn Handler>> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.insert(handler.id(), handler)
    }

    pub fn remove(&self, id: &HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.remove(id).is_some()
    }

    pub fn contains(&self, id: &HandlerId) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.len()
    }

    /// Collects every binding matching `event` across all handlers.
    ///
    /// A handler binding the same event twice yields two invocations.
    pub fn resolve(&self, event: &str) -> Vec<Invocation> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut invocations = Vec::new();
        for (id, handler) in handlers.iter() {
            let mut handler_config = None;
            for binding in handler.bindings().iter().filter(|b| b.event() == event) {
                let config = handler_config
                    .get_or_insert_with(|| handler.config())
                    .clone();
                invocations.push(Invocation {
                    handler_id: id.clone(),
                    callback: binding.callback().clone(),
                    config,
                });
            }
        }
        invocations
    }
}
