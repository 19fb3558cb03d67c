//! Member resolution with a process-lifetime cache.
//!
//! Lookups go through a fixed search order:
//!
//! 1. the local cache,
//! 2. the declaring module of the type the search starts from,
//! 3. every loaded module whose name matches the project filter.
//!
//! The first hit is memoized; misses are never cached, so an SDK module that
//! is loaded late is still found on the next attempt. Cache entries are
//! insert-if-absent and never mutated, so two threads racing on the same key
//! both end up holding the same handle.
//!
//! # Example
//!
//! ```ignore
//! let resolver = MemberResolver::new(model, ResolverConfig::from_env());
//! let client = resolver.resolve_type("Sdk.Client", None)?;
//! let sync = resolver.resolve_method(&client, "SyncAsync", BindingScope::PUBLIC_INSTANCE, Some(&["String"]))?;
//! let pending = resolver.invoke(Some(&client_obj), &sync, &["ex-1".into()])?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use exchange_types::env_utils::{env_bool, env_string_or};
use tracing::{debug, trace};

use crate::error::{BackendFault, BridgeError, BridgeResult};
use crate::model::{
    BindingScope, DataHandle, DataKind, MethodHandle, ObjectModel, Receiver, TypeHandle,
};
use crate::value::{DynValue, Instance};

/// Default project-name filter for module search.
pub const DEFAULT_MODULE_FILTER: &str = "Autodesk.DataExchange";

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Only modules whose name starts with this prefix are searched in the
    /// fallback pass. Empty means every module.
    pub module_filter: String,
    /// Emit a debug line for every cache miss.
    pub verbose: bool,
}

impl ResolverConfig {
    pub fn new(module_filter: impl Into<String>) -> Self {
        Self {
            module_filter: module_filter.into(),
            verbose: false,
        }
    }

    /// Read `EXCHANGE_MODULE_FILTER` and `EXCHANGE_DEBUG_RESOLVER`.
    pub fn from_env() -> Self {
        Self {
            module_filter: env_string_or("EXCHANGE_MODULE_FILTER", DEFAULT_MODULE_FILTER),
            verbose: env_bool("EXCHANGE_DEBUG_RESOLVER"),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODULE_FILTER)
    }
}

/// Cache key for a member lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub owner: String,
    pub member: String,
    pub scope: BindingScope,
    /// `None` means "any overload"; otherwise the exact parameter types.
    pub signature: Option<Vec<String>>,
}

impl MemberKey {
    pub fn new(
        owner: &str,
        member: &str,
        scope: BindingScope,
        signature: Option<&[&str]>,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            member: member.to_string(),
            scope,
            signature: signature.map(|s| s.iter().map(|p| p.to_string()).collect()),
        }
    }
}

/// Lookup counters (relaxed atomics, for diagnostics only).
#[derive(Debug, Default)]
pub struct ResolverStats {
    type_hits: AtomicU64,
    type_lookups: AtomicU64,
    member_hits: AtomicU64,
    member_lookups: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of [`ResolverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStatsSnapshot {
    pub type_hits: u64,
    pub type_lookups: u64,
    pub member_hits: u64,
    pub member_lookups: u64,
    pub misses: u64,
}

impl ResolverStats {
    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            type_hits: self.type_hits.load(Ordering::Relaxed),
            type_lookups: self.type_lookups.load(Ordering::Relaxed),
            member_hits: self.member_hits.load(Ordering::Relaxed),
            member_lookups: self.member_lookups.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Resolves and invokes SDK members by name.
pub struct MemberResolver {
    model: Arc<dyn ObjectModel>,
    config: ResolverConfig,
    types: DashMap<String, TypeHandle>,
    methods: DashMap<MemberKey, MethodHandle>,
    properties: DashMap<MemberKey, DataHandle>,
    fields: DashMap<MemberKey, DataHandle>,
    stats: ResolverStats,
}

impl MemberResolver {
    pub fn new(model: Arc<dyn ObjectModel>, config: ResolverConfig) -> Self {
        Self {
            model,
            config,
            types: DashMap::new(),
            methods: DashMap::new(),
            properties: DashMap::new(),
            fields: DashMap::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of memoized entries across all caches.
    pub fn cached_entries(&self) -> usize {
        self.types.len() + self.methods.len() + self.properties.len() + self.fields.len()
    }

    fn module_matches(&self, name: &str) -> bool {
        self.config.module_filter.is_empty() || name.starts_with(&self.config.module_filter)
    }

    // ==================== Types ====================

    /// Resolve a type by full name.
    ///
    /// `search_from` puts that type's declaring module first in the search.
    pub fn resolve_type(
        &self,
        name: &str,
        search_from: Option<&TypeHandle>,
    ) -> BridgeResult<TypeHandle> {
        if let Some(hit) = self.types.get(name).map(|r| r.value().clone()) {
            ResolverStats::bump(&self.stats.type_hits);
            return Ok(hit);
        }
        ResolverStats::bump(&self.stats.type_lookups);

        let from_declaring = search_from
            .and_then(|origin| self.model.module_named(&origin.module))
            .and_then(|module| module.find_type(name));

        let found = from_declaring.or_else(|| {
            self.model
                .modules()
                .into_iter()
                .filter(|m| self.module_matches(m.name()))
                .find_map(|m| m.find_type(name))
        });

        match found {
            Some(ty) => {
                if self.config.verbose {
                    debug!(type_name = name, module = %ty.module, "resolved type");
                }
                Ok(self.types.entry(name.to_string()).or_insert(ty).value().clone())
            }
            None => {
                ResolverStats::bump(&self.stats.misses);
                Err(BridgeError::NotFound {
                    owner: search_from
                        .map(|t| t.full_name.clone())
                        .unwrap_or_else(|| "<sdk>".to_string()),
                    member: name.to_string(),
                    detail: Some(format!(
                        "type not found in modules matching '{}'",
                        self.config.module_filter
                    )),
                })
            }
        }
    }

    /// The type of an SDK object, resolved from its runtime type name.
    pub fn type_of(&self, instance: &Instance) -> BridgeResult<TypeHandle> {
        self.resolve_type(instance.type_name(), None)
    }

    /// `owner` followed by its base types, nearest first.
    ///
    /// A base that cannot be resolved ends the chain; the SDK's own root
    /// types live outside the filtered modules.
    fn type_chain(&self, owner: &TypeHandle) -> Vec<TypeHandle> {
        let mut chain = vec![owner.clone()];
        let mut current = owner.clone();
        while let Some(base) = current.base.clone() {
            if chain.iter().any(|t| t.full_name == base) {
                break;
            }
            match self.resolve_type(&base, Some(&current)) {
                Ok(next) => {
                    chain.push(next.clone());
                    current = next;
                }
                Err(_) => break,
            }
        }
        chain
    }

    /// Whether an object of type `actual` may stand where `expected` is required.
    pub fn is_assignable(&self, actual: &str, expected: &str) -> bool {
        if actual == expected {
            return true;
        }
        match self.resolve_type(actual, None) {
            Ok(ty) => self
                .type_chain(&ty)
                .iter()
                .any(|t| t.full_name == expected),
            Err(_) => false,
        }
    }

    // ==================== Methods ====================

    /// Resolve a method overload.
    ///
    /// With `params = None` exactly one admitted overload must exist; more
    /// than one is reported as NotFound rather than guessed.
    pub fn resolve_method(
        &self,
        owner: &TypeHandle,
        name: &str,
        scope: BindingScope,
        params: Option<&[&str]>,
    ) -> BridgeResult<MethodHandle> {
        let key = MemberKey::new(&owner.full_name, name, scope, params);
        if let Some(hit) = self.methods.get(&key).map(|r| r.value().clone()) {
            ResolverStats::bump(&self.stats.member_hits);
            return Ok(hit);
        }
        ResolverStats::bump(&self.stats.member_lookups);

        let mut candidates: Vec<MethodHandle> = Vec::new();
        for ty in self.type_chain(owner) {
            candidates.extend(ty.methods_named(name, scope).cloned());
            if !candidates.is_empty() {
                // Nearest declaration hides base overloads.
                break;
            }
        }

        let chosen = match &key.signature {
            Some(wanted) => candidates.into_iter().find(|m| m.matches_params(wanted)),
            None if candidates.len() > 1 => {
                ResolverStats::bump(&self.stats.misses);
                return Err(BridgeError::NotFound {
                    owner: owner.full_name.clone(),
                    member: name.to_string(),
                    detail: Some(format!(
                        "ambiguous: {} overloads match scope {}",
                        candidates.len(),
                        scope
                    )),
                });
            }
            None => candidates.into_iter().next(),
        };

        match chosen {
            Some(method) => {
                if self.config.verbose {
                    debug!(signature = %method.signature(), "resolved method");
                }
                Ok(self.methods.entry(key).or_insert(method).value().clone())
            }
            None => {
                ResolverStats::bump(&self.stats.misses);
                Err(BridgeError::NotFound {
                    owner: owner.full_name.clone(),
                    member: name.to_string(),
                    detail: Some(match &key.signature {
                        Some(sig) => format!("no overload ({}) in scope {}", sig.join(", "), scope),
                        None => format!("no method in scope {}", scope),
                    }),
                })
            }
        }
    }

    // ==================== Properties & fields ====================

    pub fn resolve_property(
        &self,
        owner: &TypeHandle,
        name: &str,
        scope: BindingScope,
    ) -> BridgeResult<DataHandle> {
        self.resolve_data(owner, name, scope, DataKind::Property)
    }

    pub fn resolve_field(
        &self,
        owner: &TypeHandle,
        name: &str,
        scope: BindingScope,
    ) -> BridgeResult<DataHandle> {
        self.resolve_data(owner, name, scope, DataKind::Field)
    }

    /// Property first, then field of the same name.
    pub fn resolve_property_or_field(
        &self,
        owner: &TypeHandle,
        name: &str,
        scope: BindingScope,
    ) -> BridgeResult<DataHandle> {
        self.resolve_property(owner, name, scope)
            .or_else(|_| self.resolve_field(owner, name, scope))
    }

    fn resolve_data(
        &self,
        owner: &TypeHandle,
        name: &str,
        scope: BindingScope,
        kind: DataKind,
    ) -> BridgeResult<DataHandle> {
        let cache = match kind {
            DataKind::Property => &self.properties,
            DataKind::Field => &self.fields,
        };
        let key = MemberKey::new(&owner.full_name, name, scope, None);
        if let Some(hit) = cache.get(&key).map(|r| r.value().clone()) {
            ResolverStats::bump(&self.stats.member_hits);
            return Ok(hit);
        }
        ResolverStats::bump(&self.stats.member_lookups);

        let found = self
            .type_chain(owner)
            .iter()
            .find_map(|ty| ty.data_member(name, kind, scope).cloned());

        match found {
            Some(member) => Ok(cache.entry(key).or_insert(member).value().clone()),
            None => {
                ResolverStats::bump(&self.stats.misses);
                Err(BridgeError::NotFound {
                    owner: owner.full_name.clone(),
                    member: name.to_string(),
                    detail: Some(format!(
                        "no {} in scope {}",
                        match kind {
                            DataKind::Property => "property",
                            DataKind::Field => "field",
                        },
                        scope
                    )),
                })
            }
        }
    }

    // ==================== Invocation ====================

    /// Call a resolved method.
    ///
    /// A fault raised by the SDK is unwrapped exactly one layer, so the
    /// caller sees the exception the SDK code actually threw.
    pub fn invoke(
        &self,
        target: Option<&Instance>,
        method: &MethodHandle,
        args: &[DynValue],
    ) -> BridgeResult<DynValue> {
        let fail = |fault: BackendFault| BridgeError::Invocation {
            owner: method.declaring_type.clone(),
            member: method.name.clone(),
            fault,
        };

        if args.len() != method.params.len() {
            return Err(fail(BackendFault::new(
                "TargetParameterCountException",
                format!(
                    "expected {} arguments, got {}",
                    method.params.len(),
                    args.len()
                ),
            )));
        }
        let target = match (method.receiver, target) {
            (Receiver::Instance, None) => {
                return Err(fail(BackendFault::new(
                    "TargetException",
                    "Non-static method requires a target.",
                )))
            }
            (Receiver::Static, _) => None,
            (Receiver::Instance, t) => t,
        };

        trace!(signature = %method.signature(), "invoke");
        (method.invoker)(target, args).map_err(|fault| fail(fault.unwrap_one()))
    }

    /// Read a property or field.
    pub fn get_value(&self, target: Option<&Instance>, member: &DataHandle) -> BridgeResult<DynValue> {
        let getter = member.getter.as_ref().ok_or_else(|| BridgeError::NotFound {
            owner: member.declaring_type.clone(),
            member: member.name.clone(),
            detail: Some("member has no getter".to_string()),
        })?;
        if member.receiver == Receiver::Instance && target.is_none() {
            return Err(BridgeError::Invocation {
                owner: member.declaring_type.clone(),
                member: member.name.clone(),
                fault: BackendFault::new("TargetException", "Non-static member requires a target."),
            });
        }
        getter(target).map_err(|fault| BridgeError::Invocation {
            owner: member.declaring_type.clone(),
            member: member.name.clone(),
            fault: fault.unwrap_one(),
        })
    }

    /// Write a property or field.
    pub fn set_value(
        &self,
        target: Option<&Instance>,
        member: &DataHandle,
        value: DynValue,
    ) -> BridgeResult<()> {
        let setter = member.setter.as_ref().ok_or_else(|| BridgeError::NotFound {
            owner: member.declaring_type.clone(),
            member: member.name.clone(),
            detail: Some("member is read-only".to_string()),
        })?;
        setter(target, value).map_err(|fault| BridgeError::Invocation {
            owner: member.declaring_type.clone(),
            member: member.name.clone(),
            fault: fault.unwrap_one(),
        })
    }

    // ==================== Convenience ====================

    /// Resolve and call an instance method on `target` in one step.
    pub fn call(
        &self,
        target: &Instance,
        name: &str,
        params: Option<&[&str]>,
        args: &[DynValue],
    ) -> BridgeResult<DynValue> {
        let ty = self.type_of(target)?;
        let method = self.resolve_method(&ty, name, BindingScope::ANY_INSTANCE, params)?;
        self.invoke(Some(target), &method, args)
    }

    /// Resolve and read a property (or field) of `target` in one step.
    pub fn read(&self, target: &Instance, name: &str) -> BridgeResult<DynValue> {
        let ty = self.type_of(target)?;
        let member = self.resolve_property_or_field(&ty, name, BindingScope::ANY_INSTANCE)?;
        self.get_value(Some(target), &member)
    }

    /// Resolve and write a property (or field) of `target` in one step.
    pub fn write(&self, target: &Instance, name: &str, value: DynValue) -> BridgeResult<()> {
        let ty = self.type_of(target)?;
        let member = self.resolve_property_or_field(&ty, name, BindingScope::ANY_INSTANCE)?;
        self.set_value(Some(target), &member, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ModelBuilder, TypeBuilder};

    fn model() -> (Arc<crate::testing::InMemoryModel>, MemberResolver) {
        let model = ModelBuilder::new()
            .module("Autodesk.DataExchange.Core", |m| {
                m.add(
                    TypeBuilder::new("Sdk.Base")
                        .property("Id", "String", |_| Ok(DynValue::Text("base-id".into())))
                        .method("Describe", &[], "String", |_, _| Ok("base".into())),
                )
                .add(
                    TypeBuilder::new("Sdk.Client")
                        .base("Sdk.Base")
                        .method("Sync", &[], "Int64", |_, _| Ok(DynValue::Int(0)))
                        .method("Sync", &["String"], "Int64", |_, args| {
                            Ok(DynValue::Int(args[0].as_str().map(|s| s.len() as i64).unwrap_or(-1)))
                        })
                        .static_method("Create", &[], "Sdk.Client", |_, _| Ok(DynValue::Unit))
                        .non_public_method("Hidden", &[], "Boolean", |_, _| Ok(true.into()))
                        .method("Explode", &[], "Void", |_, _| {
                            Err(BackendFault::wrapping(
                                "TargetInvocationException",
                                BackendFault::new("InvalidOperationException", "not signed in"),
                            ))
                        })
                        .field("count", "Int64", |_| Ok(DynValue::Int(3))),
                )
            })
            .module("Autodesk.DataExchange.Extra", |m| {
                m.add(TypeBuilder::new("Sdk.Extra"))
            })
            .module("ThirdParty.Json", |m| m.add(TypeBuilder::new("Json.Token")))
            .build();
        let resolver = MemberResolver::new(model.clone(), ResolverConfig::default());
        (model, resolver)
    }

    #[test]
    fn test_resolve_type_is_memoized() {
        let (model, resolver) = model();
        let a = resolver.resolve_type("Sdk.Client", None).unwrap();
        let lookups_after_first = model.type_lookups();
        let b = resolver.resolve_type("Sdk.Client", None).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(model.type_lookups(), lookups_after_first);
        let stats = resolver.stats();
        assert_eq!(stats.type_lookups, 1);
        assert_eq!(stats.type_hits, 1);
    }

    #[test]
    fn test_declaring_module_searched_first() {
        let (model, resolver) = model();
        let client = resolver.resolve_type("Sdk.Client", None).unwrap();
        let before = model.type_lookups();
        resolver.resolve_type("Sdk.Base", Some(&client)).unwrap();
        // Found in the declaring module on the first lookup.
        assert_eq!(model.type_lookups(), before + 1);
    }

    #[test]
    fn test_module_filter_excludes_foreign_modules() {
        let (_, resolver) = model();
        let err = resolver.resolve_type("Json.Token", None).unwrap_err();
        assert!(matches!(err, BridgeError::NotFound { .. }));
        assert!(resolver.resolve_type("Sdk.Extra", None).is_ok());
    }

    #[test]
    fn test_misses_are_not_cached() {
        let (model, resolver) = model();
        assert!(resolver.resolve_type("Sdk.Missing", None).is_err());
        let after_first = model.type_lookups();
        assert!(resolver.resolve_type("Sdk.Missing", None).is_err());
        assert!(model.type_lookups() > after_first);
        assert_eq!(resolver.stats().misses, 2);
    }

    #[test]
    fn test_overloads_keyed_by_signature() {
        let (_, resolver) = model();
        let client = resolver.resolve_type("Sdk.Client", None).unwrap();

        let no_args = resolver
            .resolve_method(&client, "Sync", BindingScope::PUBLIC_INSTANCE, Some(&[]))
            .unwrap();
        let one_arg = resolver
            .resolve_method(&client, "Sync", BindingScope::PUBLIC_INSTANCE, Some(&["String"]))
            .unwrap();
        assert!(no_args.params.is_empty());
        assert_eq!(one_arg.params, vec!["String".to_string()]);

        let again = resolver
            .resolve_method(&client, "Sync", BindingScope::PUBLIC_INSTANCE, Some(&["String"]))
            .unwrap();
        assert!(Arc::ptr_eq(&one_arg, &again));
    }

    #[test]
    fn test_unspecified_signature_with_overloads_is_ambiguous() {
        let (_, resolver) = model();
        let client = resolver.resolve_type("Sdk.Client", None).unwrap();
        let err = resolver
            .resolve_method(&client, "Sync", BindingScope::PUBLIC_INSTANCE, None)
            .unwrap_err();
        assert!(err.to_string().contains("ambiguous: 2 overloads"));
    }

    #[test]
    fn test_scope_hides_non_public_and_static() {
        let (_, resolver) = model();
        let client = resolver.resolve_type("Sdk.Client", None).unwrap();
        assert!(resolver
            .resolve_method(&client, "Hidden", BindingScope::PUBLIC_INSTANCE, None)
            .is_err());
        assert!(resolver
            .resolve_method(&client, "Hidden", BindingScope::ANY_INSTANCE, None)
            .is_ok());
        assert!(resolver
            .resolve_method(&client, "Create", BindingScope::PUBLIC_STATIC, None)
            .is_ok());
    }

    #[test]
    fn test_base_members_found_through_chain() {
        let (_, resolver) = model();
        let client = resolver.resolve_type("Sdk.Client", None).unwrap();
        let describe = resolver
            .resolve_method(&client, "Describe", BindingScope::PUBLIC_INSTANCE, None)
            .unwrap();
        assert_eq!(describe.declaring_type, "Sdk.Base");
        assert!(resolver
            .resolve_property(&client, "Id", BindingScope::PUBLIC_INSTANCE)
            .is_ok());
        assert!(resolver.is_assignable("Sdk.Client", "Sdk.Base"));
        assert!(!resolver.is_assignable("Sdk.Base", "Sdk.Client"));
    }

    #[test]
    fn test_invoke_unwraps_one_fault_layer() {
        let (_, resolver) = model();
        let client_ty = resolver.resolve_type("Sdk.Client", None).unwrap();
        let explode = resolver
            .resolve_method(&client_ty, "Explode", BindingScope::PUBLIC_INSTANCE, None)
            .unwrap();
        let client = Instance::new("Sdk.Client", ());

        let err = resolver.invoke(Some(&client), &explode, &[]).unwrap_err();
        match err {
            BridgeError::Invocation { fault, member, .. } => {
                assert_eq!(member, "Explode");
                assert_eq!(fault.type_name, "InvalidOperationException");
                assert_eq!(fault.message, "not signed in");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invoke_checks_arity_and_target() {
        let (_, resolver) = model();
        let client_ty = resolver.resolve_type("Sdk.Client", None).unwrap();
        let sync = resolver
            .resolve_method(&client_ty, "Sync", BindingScope::PUBLIC_INSTANCE, Some(&["String"]))
            .unwrap();
        let client = Instance::new("Sdk.Client", ());

        assert!(resolver.invoke(Some(&client), &sync, &[]).is_err());
        assert!(resolver.invoke(None, &sync, &["abc".into()]).is_err());
        let out = resolver.invoke(Some(&client), &sync, &["abcd".into()]).unwrap();
        assert_eq!(out.as_int(), Some(4));
    }

    #[test]
    fn test_read_falls_back_to_field() {
        let (_, resolver) = model();
        let client = Instance::new("Sdk.Client", ());
        assert_eq!(resolver.read(&client, "count").unwrap().as_int(), Some(3));
        assert!(resolver.write(&client, "count", DynValue::Int(4)).is_err());
    }

    #[test]
    fn test_concurrent_resolution_converges() {
        let (_, resolver) = model();
        let resolver = Arc::new(resolver);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = resolver.clone();
                std::thread::spawn(move || r.resolve_type("Sdk.Client", None).unwrap())
            })
            .collect();
        let resolved: Vec<TypeHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let cached = resolver.resolve_type("Sdk.Client", None).unwrap();
        assert!(resolved.iter().all(|t| Arc::ptr_eq(t, &cached)));
    }
}
