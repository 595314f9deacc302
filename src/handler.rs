use std::{any::Any, fmt, hash::Hash, ops::Deref, sync::Arc};

use crate::Event;

/// Function invoked for every delivered event a binding matches.
///
/// Callbacks may run on the publisher's thread or on a pool worker, so they
/// must be `Send + Sync`. They may re-enter the dispatcher.
pub type Callback = Arc<dyn Fn(&Event, &HandlerConfig) + Send + Sync>;

/// Stable identity of a registered handler.
///
/// The dispatcher keys its registry by this id: registering a second handler
/// with an equal id replaces the first one. Ids are cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandlerId(Arc<str>);

impl HandlerId {
    pub fn new<N: Into<Arc<str>>>(id: N) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Hash for HandlerId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Deref for HandlerId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for HandlerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for HandlerId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<Arc<str>> for HandlerId {
    fn from(id: Arc<str>) -> Self {
        Self(id)
    }
}

impl From<&HandlerId> for HandlerId {
    fn from(id: &HandlerId) -> Self {
        id.clone()
    }
}

/// Opaque per-handler value handed unchanged to each of its callbacks.
///
/// The dispatcher never looks inside. Callbacks recover the concrete type
/// with [`HandlerConfig::get`].
#[derive(Clone, Default)]
pub struct HandlerConfig(Option<Arc<dyn Any + Send + Sync>>);

impl HandlerConfig {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the config value if it is of type `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("HandlerConfig(..)"),
            None => f.write_str("HandlerConfig(None)"),
        }
    }
}

/// Binds one event name to a callback.
#[derive(Clone)]
pub struct EventBinding {
    event: Arc<str>,
    callback: Callback,
}

impl EventBinding {
    pub fn new<N, F>(event: N, callback: F) -> Self
    where
        N: Into<Arc<str>>,
        F: Fn(&Event, &HandlerConfig) + Send + Sync + 'static,
    {
        Self {
            event: event.into(),
            callback: Arc::new(callback),
        }
    }

    #[inline]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[inline]
    pub fn callback(&self) -> &Callback {
        &self.callback
    }
}

impl fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBinding")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// Something that can be registered with a [`Dispatcher`](crate::Dispatcher).
///
/// A handler exposes a stable [`id`](Handler::id), the ordered list of
/// events it listens to, and an opaque config passed to every callback.
///
/// # Example
///
/// ```rust
/// use pulse::{EventBinding, Handler, HandlerId};
///
/// struct Counter {
///     bindings: Vec<EventBinding>,
/// }
///
/// impl Counter {
///     fn new() -> Self {
///         let bindings = vec![EventBinding::new("request.end", |event, _config| {
///             println!("request took {:?}ms", event.measurement().get("duration"));
///         })];
///         Self { bindings }
///     }
/// }
///
/// impl Handler for Counter {
///     fn id(&self) -> HandlerId {
///         "counter".into()
///     }
///
///     fn bindings(&self) -> &[EventBinding] {
///         &self.bindings
///     }
/// }
/// ```
pub trait Handler: Send + Sync {
    fn id(&self) -> HandlerId;

    fn bindings(&self) -> &[EventBinding];

    fn config(&self) -> HandlerConfig {
        HandlerConfig::none()
    }
}
