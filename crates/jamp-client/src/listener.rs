//! Listeners: client-side objects the server can call back into.
//!
//! A query may carry listener arguments. Each one is replaced on the wire
//! by the query's callback address (`/callback-<id>`) and recorded in the
//! [`ListenerTable`]. When the server later sends a message to that
//! address, the client looks the listener up and calls
//! [`Listener::invoke`] with the method name and positional parameters.
//!
//! There is no reflection: a listener either implements [`Listener`] and
//! matches on the method name itself, or is a [`MethodTable`] of named
//! closures.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::ListenerError;

/// Something an inbound send can be dispatched to.
pub trait Listener: Send + Sync + 'static {
    /// Invokes `method` with the message's positional parameters.
    ///
    /// # Errors
    /// [`ListenerError::UnknownMethod`] if `method` is not handled, or
    /// [`ListenerError::Failed`] if handling it failed.
    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), ListenerError>;
}

type Handler = Box<dyn Fn(Vec<Value>) -> Result<(), ListenerError> + Send + Sync>;

/// A [`Listener`] built from named closures.
///
/// ```rust
/// use jamp_client::{Listener, MethodTable};
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let table = MethodTable::new().on("update", move |args| {
///     sink.lock().unwrap().extend(args);
/// });
///
/// table.invoke("update", vec![1i64.into()]).unwrap();
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// assert!(table.invoke("other", vec![]).is_err());
/// ```
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, Handler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an infallible handler for `method`.
    pub fn on<F>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.try_on(method, move |args| {
            handler(args);
            Ok(())
        })
    }

    /// Registers a handler for `method` that may reject the call.
    pub fn try_on<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.methods.insert(method.into(), Box::new(handler));
        self
    }

    /// Returns `true` if `method` has a handler.
    pub fn handles(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }
}

impl Listener for MethodTable {
    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), ListenerError> {
        match self.methods.get(method) {
            Some(handler) => handler(args),
            None => Err(ListenerError::UnknownMethod(method.to_string())),
        }
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Arg
// ---------------------------------------------------------------------------

/// One positional argument of a query: a plain value or a listener.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Listener(Arc<dyn Listener>),
}

impl Arg {
    /// Wraps a listener so it can be passed as a query argument.
    pub fn listener(listener: impl Listener) -> Self {
        Self::Listener(Arc::new(listener))
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Listener(_) => f.write_str("Listener(..)"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Arc<dyn Listener>> for Arg {
    fn from(listener: Arc<dyn Listener>) -> Self {
        Self::Listener(listener)
    }
}

impl From<MethodTable> for Arg {
    fn from(table: MethodTable) -> Self {
        Self::listener(table)
    }
}

macro_rules! arg_from_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(value: $ty) -> Self {
                Self::Value(Value::from(value))
            }
        })*
    };
}

arg_from_value!(&str, String, bool, i32, i64, u32, u64, f64);

// ---------------------------------------------------------------------------
// ListenerTable
// ---------------------------------------------------------------------------

/// Callback address → listener.
///
/// Entries live as long as the client: the server may call a listener at
/// any time after the query that introduced it, so nothing here is ever
/// evicted. [`len`](Self::len) makes the growth observable.
#[derive(Default)]
pub struct ListenerTable {
    entries: HashMap<String, Arc<dyn Listener>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` at `address`, replacing (and returning) any
    /// listener already there.
    pub fn register(
        &mut self,
        address: String,
        listener: Arc<dyn Listener>,
    ) -> Option<Arc<dyn Listener>> {
        let previous = self.entries.insert(address, listener);
        if previous.is_some() {
            warn!("callback address reused, previous listener replaced");
        }
        previous
    }

    pub fn get(&self, address: &str) -> Option<&Arc<dyn Listener>> {
        self.entries.get(address)
    }

    /// Drops the listener at `address`. Used to roll back a query the
    /// transport refused.
    pub(crate) fn remove(&mut self, address: &str) -> Option<Arc<dyn Listener>> {
        self.entries.remove(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
