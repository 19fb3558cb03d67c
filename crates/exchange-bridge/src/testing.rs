//! In-memory object model for tests.
//!
//! Provides builders for SDK-shaped types without a real SDK loaded, plus a
//! generic [`Record`] state that backs "plain data" SDK objects such as
//! result envelopes.
//!
//! # Example
//!
//! ```ignore
//! let model = ModelBuilder::new()
//!     .module("Autodesk.DataExchange.Core", |m| {
//!         m.add(TypeBuilder::record("Sdk.Response", &[("Success", "Boolean"), ("Value", "Int64")]))
//!     })
//!     .build();
//! let response = record_instance("Sdk.Response", [("Success", true.into()), ("Value", 42i64.into())]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::BackendFault;
use crate::model::{
    DataKind, DataMember, GetterFn, MethodFn, MethodInfo, ModuleInfo, ObjectModel, Receiver,
    SetterFn, TypeHandle, TypeInfo, Visibility,
};
use crate::value::{DynValue, Instance};

// ==================== Model ====================

/// A module holding a fixed set of types. Counts `find_type` calls.
pub struct InMemoryModule {
    name: String,
    types: HashMap<String, TypeHandle>,
    lookups: Arc<AtomicUsize>,
}

impl ModuleInfo for InMemoryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_type(&self, full_name: &str) -> Option<TypeHandle> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.types.get(full_name).cloned()
    }
}

/// An [`ObjectModel`] whose modules can be loaded while in use.
pub struct InMemoryModel {
    modules: RwLock<Vec<Arc<InMemoryModule>>>,
    lookups: Arc<AtomicUsize>,
}

impl InMemoryModel {
    /// Total `find_type` calls across all modules.
    pub fn type_lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Load another module, as when the SDK pulls in an assembly lazily.
    pub fn load_module(&self, name: &str, build: impl FnOnce(ModuleBuilder) -> ModuleBuilder) {
        let module = build(ModuleBuilder::new(name)).finish(self.lookups.clone());
        self.modules.write().push(Arc::new(module));
    }
}

impl ObjectModel for InMemoryModel {
    fn modules(&self) -> Vec<Arc<dyn ModuleInfo>> {
        self.modules
            .read()
            .iter()
            .map(|m| m.clone() as Arc<dyn ModuleInfo>)
            .collect()
    }
}

#[derive(Default)]
pub struct ModelBuilder {
    modules: Vec<ModuleBuilder>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, name: &str, build: impl FnOnce(ModuleBuilder) -> ModuleBuilder) -> Self {
        self.modules.push(build(ModuleBuilder::new(name)));
        self
    }

    pub fn build(self) -> Arc<InMemoryModel> {
        let lookups = Arc::new(AtomicUsize::new(0));
        let modules = self
            .modules
            .into_iter()
            .map(|m| Arc::new(m.finish(lookups.clone())))
            .collect();
        Arc::new(InMemoryModel {
            modules: RwLock::new(modules),
            lookups,
        })
    }
}

pub struct ModuleBuilder {
    name: String,
    types: Vec<TypeBuilder>,
}

impl ModuleBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            types: Vec::new(),
        }
    }

    pub fn add(mut self, ty: TypeBuilder) -> Self {
        self.types.push(ty);
        self
    }

    fn finish(self, lookups: Arc<AtomicUsize>) -> InMemoryModule {
        let types = self
            .types
            .into_iter()
            .map(|t| {
                let mut info = t.info;
                info.module = self.name.clone();
                (info.full_name.clone(), Arc::new(info))
            })
            .collect();
        InMemoryModule {
            name: self.name,
            types,
            lookups,
        }
    }
}

// ==================== Types ====================

/// Builder for one SDK type.
pub struct TypeBuilder {
    info: TypeInfo,
}

impl TypeBuilder {
    pub fn new(full_name: &str) -> Self {
        Self {
            info: TypeInfo::new(full_name, ""),
        }
    }

    /// A type whose listed members are settable properties stored in a
    /// [`Record`]. Instances come from [`record_instance`].
    pub fn record(full_name: &str, members: &[(&str, &str)]) -> Self {
        members
            .iter()
            .fold(Self::new(full_name), |ty, (name, value_type)| {
                ty.record_property(name, value_type)
            })
    }

    pub fn base(mut self, base: &str) -> Self {
        self.info.base = Some(base.to_string());
        self
    }

    fn push_method(
        mut self,
        name: &str,
        params: &[&str],
        returns: &str,
        receiver: Receiver,
        visibility: Visibility,
        invoker: MethodFn,
    ) -> Self {
        self.info.methods.push(Arc::new(MethodInfo {
            declaring_type: self.info.full_name.clone(),
            name: name.to_string(),
            receiver,
            visibility,
            params: params.iter().map(|p| p.to_string()).collect(),
            returns: returns.to_string(),
            invoker,
        }));
        self
    }

    pub fn method<F>(self, name: &str, params: &[&str], returns: &str, f: F) -> Self
    where
        F: Fn(Option<&Instance>, &[DynValue]) -> Result<DynValue, BackendFault>
            + Send
            + Sync
            + 'static,
    {
        self.push_method(name, params, returns, Receiver::Instance, Visibility::Public, Arc::new(f))
    }

    pub fn non_public_method<F>(self, name: &str, params: &[&str], returns: &str, f: F) -> Self
    where
        F: Fn(Option<&Instance>, &[DynValue]) -> Result<DynValue, BackendFault>
            + Send
            + Sync
            + 'static,
    {
        self.push_method(name, params, returns, Receiver::Instance, Visibility::NonPublic, Arc::new(f))
    }

    pub fn static_method<F>(self, name: &str, params: &[&str], returns: &str, f: F) -> Self
    where
        F: Fn(Option<&Instance>, &[DynValue]) -> Result<DynValue, BackendFault>
            + Send
            + Sync
            + 'static,
    {
        self.push_method(name, params, returns, Receiver::Static, Visibility::Public, Arc::new(f))
    }

    fn push_data(
        mut self,
        name: &str,
        kind: DataKind,
        value_type: &str,
        getter: Option<GetterFn>,
        setter: Option<SetterFn>,
    ) -> Self {
        self.info.data.push(Arc::new(DataMember {
            declaring_type: self.info.full_name.clone(),
            name: name.to_string(),
            kind,
            receiver: Receiver::Instance,
            visibility: Visibility::Public,
            value_type: value_type.to_string(),
            getter,
            setter,
        }));
        self
    }

    pub fn property<G>(self, name: &str, value_type: &str, getter: G) -> Self
    where
        G: Fn(Option<&Instance>) -> Result<DynValue, BackendFault> + Send + Sync + 'static,
    {
        self.push_data(name, DataKind::Property, value_type, Some(Arc::new(getter)), None)
    }

    pub fn field<G>(self, name: &str, value_type: &str, getter: G) -> Self
    where
        G: Fn(Option<&Instance>) -> Result<DynValue, BackendFault> + Send + Sync + 'static,
    {
        self.push_data(name, DataKind::Field, value_type, Some(Arc::new(getter)), None)
    }

    /// A settable property backed by the instance's [`Record`].
    pub fn record_property(self, name: &str, value_type: &str) -> Self {
        let key = name.to_string();
        let getter: GetterFn = Arc::new(move |target: Option<&Instance>| {
            Ok(record_of(target)?.get(&key).unwrap_or_default())
        });
        let key = name.to_string();
        let setter: SetterFn = Arc::new(move |target: Option<&Instance>, value: DynValue| {
            record_of(target)?.set(&key, value);
            Ok(())
        });
        self.push_data(name, DataKind::Property, value_type, Some(getter), Some(setter))
    }
}

// ==================== Records ====================

/// Mutable name → value state for plain-data SDK objects.
#[derive(Debug, Default)]
pub struct Record {
    values: Mutex<BTreeMap<String, DynValue>>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<DynValue> {
        self.values.lock().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: DynValue) {
        self.values.lock().insert(name.to_string(), value);
    }
}

fn record_of(target: Option<&Instance>) -> Result<&Record, BackendFault> {
    let target = target.ok_or_else(|| {
        BackendFault::new("NullReferenceException", "Object reference not set to an instance of an object.")
    })?;
    target.downcast_ref::<Record>().ok_or_else(|| {
        BackendFault::new(
            "InvalidCastException",
            format!("{} is not backed by a record", target.type_name()),
        )
    })
}

/// Create an instance of a [`TypeBuilder::record`] type.
pub fn record_instance<'a, I>(type_name: &str, values: I) -> Instance
where
    I: IntoIterator<Item = (&'a str, DynValue)>,
{
    let record = Record::default();
    for (name, value) in values {
        record.set(name, value);
    }
    Instance::new(type_name, record)
}

/// Read a record field of an instance built by [`record_instance`].
pub fn record_value(instance: &Instance, name: &str) -> Option<DynValue> {
    instance.downcast_ref::<Record>().and_then(|r| r.get(name))
}

// ==================== Envelopes ====================

/// Module name used by [`envelope_model`].
pub const ENVELOPE_MODULE: &str = "Autodesk.DataExchange.Core";

/// Type names registered by [`envelope_model`].
pub const SUCCESS_VALUE_ENVELOPE: &str = "Sdk.Response";
pub const IS_SUCCESS_ERROR_ENVELOPE: &str = "Sdk.IResponse";
pub const RESULT_ENVELOPE: &str = "Sdk.ResultWrapper";

/// A model holding the three common response envelope shapes.
pub fn envelope_model() -> Arc<InMemoryModel> {
    ModelBuilder::new()
        .module(ENVELOPE_MODULE, envelope_types)
        .build()
}

/// Add the envelope types to a module under construction.
pub fn envelope_types(module: ModuleBuilder) -> ModuleBuilder {
    module
        .add(TypeBuilder::record(
            SUCCESS_VALUE_ENVELOPE,
            &[("Success", "Boolean"), ("Value", "Object"), ("Errors", "List")],
        ))
        .add(TypeBuilder::record(
            IS_SUCCESS_ERROR_ENVELOPE,
            &[("IsSuccess", "Boolean"), ("Error", "Object"), ("Data", "Object")],
        ))
        .add(TypeBuilder::record(RESULT_ENVELOPE, &[("Result", "Object")]))
}

/// `{Success: true/false, Value: value}`.
pub fn success_envelope(success: bool, value: impl Into<DynValue>) -> Instance {
    record_instance(
        SUCCESS_VALUE_ENVELOPE,
        [("Success", success.into()), ("Value", value.into())],
    )
}

/// `{IsSuccess: false, Error: message}`.
pub fn failed_envelope(message: &str) -> Instance {
    record_instance(
        IS_SUCCESS_ERROR_ENVELOPE,
        [("IsSuccess", false.into()), ("Error", message.into())],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_loaded_module_is_visible() {
        let model = ModelBuilder::new().build();
        assert!(model.modules().is_empty());
        model.load_module("Autodesk.DataExchange.Late", |m| m.add(TypeBuilder::new("Sdk.Late")));
        let module = model.module_named("Autodesk.DataExchange.Late").unwrap();
        assert_eq!(module.find_type("Sdk.Late").unwrap().module, "Autodesk.DataExchange.Late");
        assert_eq!(model.type_lookups(), 1);
    }

    #[test]
    fn test_record_property_roundtrip() {
        let model = envelope_model();
        let module = model.module_named(ENVELOPE_MODULE).unwrap();
        let ty = module.find_type(SUCCESS_VALUE_ENVELOPE).unwrap();
        let value = ty.data.iter().find(|d| d.name == "Value").unwrap();

        let env = success_envelope(true, 42i64);
        let getter = value.getter.as_ref().unwrap();
        assert_eq!(getter(Some(&env)).unwrap().as_int(), Some(42));

        let setter = value.setter.as_ref().unwrap();
        setter(Some(&env), DynValue::Int(7)).unwrap();
        assert_eq!(record_value(&env, "Value").unwrap().as_int(), Some(7));
        assert!(getter(None).is_err());
    }
}
