mod invocation;
mod panic;
mod registry;

pub(crate) use invocation::Invocation;
pub(crate) use panic::panic_message;
pub(crate) use registry::HandlerRegistry;
