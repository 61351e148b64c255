//! Engine-opaque message values.
//!
//! The overseer never inspects what a message *is*. States decide that for
//! themselves through their [`Receive`](crate::Receive) tables, which match on
//! the concrete type carried inside a [`Message`].
//!
//! # Example
//!
//! ```ignore
//! use overseer::Message;
//!
//! #[derive(Debug, Clone)]
//! struct Tick(u32);
//!
//! let msg = Message::new(Tick(3));
//! assert!(msg.is::<Tick>());
//! assert_eq!(msg.downcast_ref::<Tick>().map(|t| t.0), Some(3));
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A dynamically typed message handed to states.
///
/// Cloning a `Message` is cheap: the payload is shared. Periodic timers rely
/// on this to deliver the same payload on every tick.
#[derive(Clone)]
pub struct Message {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Message {
    /// Wrap a value as a message.
    ///
    /// Passing a `Message` returns it unchanged instead of nesting it.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        let type_name = std::any::type_name::<T>();
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
        match boxed.downcast::<Message>() {
            Ok(message) => *message,
            Err(boxed) => Self {
                payload: Arc::from(boxed),
                type_name,
            },
        }
    }

    /// Type name of the wrapped value, for logging.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// `TypeId` of the wrapped value.
    pub fn payload_type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }

    /// Returns true if the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// True for the unit payload produced by fire-and-forget background work.
    pub(crate) fn is_unit(&self) -> bool {
        self.is::<()>()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Default payload delivered when a background task fails.
///
/// States opt into failure handling by matching on `Failure` in their
/// receive table.
#[derive(Debug, Clone)]
pub struct Failure {
    /// The error the task (or its failure mapper) produced.
    pub cause: Arc<anyhow::Error>,
}

impl Failure {
    /// Wrap a task error.
    pub fn new(cause: Arc<anyhow::Error>) -> Self {
        Self { cause }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "background task failed: {}", self.cause)
    }
}
