use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::{Callback, Event, HandlerConfig, HandlerId, internal::panic_message};

/// A binding resolved for one event: who owns it, what to call, and with
/// which config. Detached from the registry so it can run without any lock.
#[derive(Clone)]
pub(crate) struct Invocation {
    pub handler_id: HandlerId,
    pub callback: Callback,
    pub config: HandlerConfig,
}

impl Invocation {
    /// Runs the callback, containing any panic it raises.
    ///
    /// Returns `false` if the callback panicked.
    pub fn run(&self, event: &Event) -> bool {
        let result = catch_unwind(AssertUnwindSafe(|| (self.callback)(event, &self.config)));
        match result {
            Ok(()) => true,
            Err(payload) => {
                tracing::error!(
                    handler = %self.handler_id,
                    event = %event.name(),
                    panic = %panic_message(payload.as_ref()),
                    "Handler panicked while processing event"
                );
                false
            }
        }
    }
}
