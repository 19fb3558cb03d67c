//! Values crossing the SDK boundary.
//!
//! The SDK's object model is only known at runtime, so everything it hands
//! back is a [`DynValue`]: a primitive, a list, an opaque [`Instance`] of some
//! SDK type, or an [`Awaitable`] for members that complete asynchronously.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::error::BackendFault;

/// Future produced by an asynchronous SDK member.
pub type PendingOutcome = BoxFuture<'static, Result<DynValue, BackendFault>>;

/// An opaque object owned by the SDK, tagged with its runtime type name.
#[derive(Clone)]
pub struct Instance {
    type_name: Arc<str>,
    state: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    pub fn new<T: Any + Send + Sync>(type_name: impl AsRef<str>, state: T) -> Self {
        Self {
            type_name: Arc::from(type_name.as_ref()),
            state: Arc::new(state),
        }
    }

    /// Wrap already-shared state, so several instances can alias it.
    pub fn from_shared<T: Any + Send + Sync>(type_name: impl AsRef<str>, state: Arc<T>) -> Self {
        Self {
            type_name: Arc::from(type_name.as_ref()),
            state,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.state.downcast_ref::<T>()
    }

    /// Identity comparison (same underlying SDK object).
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance<{}>", self.type_name)
    }
}

/// A not-yet-completed result. Can be awaited once; clones share the slot.
#[derive(Clone)]
pub struct Awaitable {
    label: Arc<str>,
    slot: Arc<Mutex<Option<PendingOutcome>>>,
}

impl Awaitable {
    pub fn new<F>(label: impl AsRef<str>, fut: F) -> Self
    where
        F: Future<Output = Result<DynValue, BackendFault>> + Send + 'static,
    {
        Self {
            label: Arc::from(label.as_ref()),
            slot: Arc::new(Mutex::new(Some(fut.boxed()))),
        }
    }

    /// An awaitable that is already complete.
    pub fn ready(label: impl AsRef<str>, outcome: Result<DynValue, BackendFault>) -> Self {
        Self::new(label, futures::future::ready(outcome))
    }

    /// Runtime type name of the awaitable (e.g. `Task<Response>`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the underlying future. Returns `None` if it was already taken.
    pub fn take(&self) -> Option<PendingOutcome> {
        self.slot.lock().take()
    }

    pub fn is_consumed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl fmt::Debug for Awaitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Awaitable<{}>{}",
            self.label,
            if self.is_consumed() { " (consumed)" } else { "" }
        )
    }
}

/// Any value produced or consumed by an SDK member.
#[derive(Clone, Debug, Default)]
pub enum DynValue {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<DynValue>),
    Object(Instance),
    Pending(Awaitable),
}

impl DynValue {
    /// Runtime type name, used in diagnostics and overload signatures.
    pub fn type_name(&self) -> String {
        match self {
            DynValue::Unit => "Void".to_string(),
            DynValue::Bool(_) => "Boolean".to_string(),
            DynValue::Int(_) => "Int64".to_string(),
            DynValue::Float(_) => "Double".to_string(),
            DynValue::Text(_) => "String".to_string(),
            DynValue::Bytes(_) => "Byte[]".to_string(),
            DynValue::List(_) => "List".to_string(),
            DynValue::Object(inst) => inst.type_name().to_string(),
            DynValue::Pending(a) => a.label().to_string(),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, DynValue::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DynValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Instance> {
        match self {
            DynValue::Object(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DynValue]> {
        match self {
            DynValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short human-readable rendering for transcripts and error payloads.
    pub fn describe(&self) -> String {
        match self {
            DynValue::Unit => "<none>".to_string(),
            DynValue::Bool(b) => b.to_string(),
            DynValue::Int(i) => i.to_string(),
            DynValue::Float(x) => x.to_string(),
            DynValue::Text(s) => s.clone(),
            DynValue::Bytes(b) => format!("<{} bytes>", b.len()),
            DynValue::List(items) => items
                .iter()
                .map(DynValue::describe)
                .collect::<Vec<_>>()
                .join("; "),
            DynValue::Object(inst) => format!("<{}>", inst.type_name()),
            DynValue::Pending(a) => format!("<pending {}>", a.label()),
        }
    }
}

impl From<()> for DynValue {
    fn from(_: ()) -> Self {
        DynValue::Unit
    }
}

impl From<bool> for DynValue {
    fn from(value: bool) -> Self {
        DynValue::Bool(value)
    }
}

impl From<i64> for DynValue {
    fn from(value: i64) -> Self {
        DynValue::Int(value)
    }
}

impl From<i32> for DynValue {
    fn from(value: i32) -> Self {
        DynValue::Int(value as i64)
    }
}

impl From<u64> for DynValue {
    fn from(value: u64) -> Self {
        DynValue::Int(value as i64)
    }
}

impl From<f64> for DynValue {
    fn from(value: f64) -> Self {
        DynValue::Float(value)
    }
}

impl From<String> for DynValue {
    fn from(value: String) -> Self {
        DynValue::Text(value)
    }
}

impl From<&str> for DynValue {
    fn from(value: &str) -> Self {
        DynValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for DynValue {
    fn from(value: Vec<u8>) -> Self {
        DynValue::Bytes(value)
    }
}

impl From<Vec<DynValue>> for DynValue {
    fn from(value: Vec<DynValue>) -> Self {
        DynValue::List(value)
    }
}

impl From<Instance> for DynValue {
    fn from(value: Instance) -> Self {
        DynValue::Object(value)
    }
}

impl From<Awaitable> for DynValue {
    fn from(value: Awaitable) -> Self {
        DynValue::Pending(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Widget(u32);

    #[test]
    fn test_instance_downcast_and_identity() {
        let a = Instance::new("Sdk.Widget", Widget(7));
        let b = a.clone();
        let c = Instance::new("Sdk.Widget", Widget(7));

        assert_eq!(a.downcast_ref::<Widget>(), Some(&Widget(7)));
        assert!(a.downcast_ref::<String>().is_none());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(format!("{:?}", a), "Instance<Sdk.Widget>");
    }

    #[tokio::test]
    async fn test_awaitable_is_single_shot() {
        let pending = Awaitable::ready("Task<Int64>", Ok(DynValue::Int(3)));
        let shared = pending.clone();
        let fut = pending.take().expect("first take succeeds");
        assert!(shared.is_consumed());
        assert!(shared.take().is_none());
        assert_eq!(fut.await.unwrap().as_int(), Some(3));
    }

    #[test]
    fn test_describe_list() {
        let v = DynValue::List(vec!["a".into(), DynValue::Int(2)]);
        assert_eq!(v.describe(), "a; 2");
        assert_eq!(v.type_name(), "List");
    }
}
