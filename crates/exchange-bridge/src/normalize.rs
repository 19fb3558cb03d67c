//! Response normalization.
//!
//! SDK members answer in several shapes: the bare value, a
//! `{Success, Value}`-style envelope, or an `{IsSuccess, Error}` failure. The
//! [`Normalizer`] turns any of them into the type the caller asked for,
//! applying these rules in order:
//!
//! 1. the response already is the requested type;
//! 2. the response carries a success indicator that is `false` → rejected,
//!    with the carried error payload;
//! 3. the response carries a value member → coerce that;
//! 4. coerce the whole response;
//! 5. otherwise fail, naming the response type and the value member's type.
//!
//! Which members make up the envelope is decided once per response type.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::error::{BridgeError, BridgeResult};
use crate::model::{BindingScope, DataHandle};
use crate::resolver::MemberResolver;
use crate::value::{DynValue, Instance};

pub const SUCCESS_MEMBERS: &[&str] = &["Success", "IsSuccess", "Succeeded"];
pub const ERROR_MEMBERS: &[&str] = &["Error", "Errors", "ErrorMessage", "Message"];
pub const VALUE_MEMBERS: &[&str] = &["Value", "Result", "Data"];

// ==================== Conversions ====================

/// Conversion from a [`DynValue`] into a Rust type.
///
/// `from_exact` accepts only a value that already is the target;
/// `coerce` may convert between representations.
pub trait FromDyn: Sized {
    fn target_name() -> String;

    fn from_exact(value: &DynValue) -> Option<Self>;

    fn coerce(value: &DynValue) -> Option<Self> {
        Self::from_exact(value)
    }
}

impl FromDyn for bool {
    fn target_name() -> String {
        "Boolean".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        value.as_bool()
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Bool(b) => Some(*b),
            DynValue::Text(s) => s.trim().to_ascii_lowercase().parse().ok(),
            _ => None,
        }
    }
}

impl FromDyn for i64 {
    fn target_name() -> String {
        "Int64".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        value.as_int()
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Int(i) => Some(*i),
            DynValue::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            DynValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromDyn for i32 {
    fn target_name() -> String {
        "Int32".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        value.as_int().and_then(|i| i32::try_from(i).ok())
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        i64::coerce(value).and_then(|i| i32::try_from(i).ok())
    }
}

impl FromDyn for u64 {
    fn target_name() -> String {
        "UInt64".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        value.as_int().and_then(|i| u64::try_from(i).ok())
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        i64::coerce(value).and_then(|i| u64::try_from(i).ok())
    }
}

impl FromDyn for f64 {
    fn target_name() -> String {
        "Double".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Float(x) => Some(*x),
            DynValue::Int(i) => Some(*i as f64),
            DynValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromDyn for String {
    fn target_name() -> String {
        "String".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Text(s) => Some(s.clone()),
            DynValue::Bool(_) | DynValue::Int(_) | DynValue::Float(_) => Some(value.describe()),
            _ => None,
        }
    }
}

impl FromDyn for Vec<u8> {
    fn target_name() -> String {
        "Byte[]".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        match value {
            DynValue::Bytes(b) => Some(b.clone()),
            DynValue::List(items) => items
                .iter()
                .map(|v| v.as_int().and_then(|i| u8::try_from(i).ok()))
                .collect(),
            _ => None,
        }
    }
}

/// Void: any completed response is accepted once the envelope checks pass.
impl FromDyn for () {
    fn target_name() -> String {
        "Void".to_string()
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        value.is_unit().then_some(())
    }

    fn coerce(_value: &DynValue) -> Option<Self> {
        Some(())
    }
}

impl<T: FromDyn> FromDyn for Vec<T> {
    fn target_name() -> String {
        format!("List<{}>", T::target_name())
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        value.as_list()?.iter().map(T::from_exact).collect()
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        value.as_list()?.iter().map(T::coerce).collect()
    }
}

impl<T: FromDyn> FromDyn for Option<T> {
    fn target_name() -> String {
        format!("Nullable<{}>", T::target_name())
    }

    fn from_exact(value: &DynValue) -> Option<Self> {
        if value.is_unit() {
            return Some(None);
        }
        T::from_exact(value).map(Some)
    }

    fn coerce(value: &DynValue) -> Option<Self> {
        if value.is_unit() {
            return Some(None);
        }
        T::coerce(value).map(Some)
    }
}

// ==================== Envelope detection ====================

/// Members of a response type that form its envelope, if any.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeShape {
    pub success: Option<DataHandle>,
    pub error: Option<DataHandle>,
    pub value: Option<DataHandle>,
}

impl EnvelopeShape {
    pub fn is_envelope(&self) -> bool {
        self.success.is_some() || self.value.is_some()
    }
}

/// Applies the normalization rules to SDK responses.
pub struct Normalizer {
    resolver: Arc<MemberResolver>,
    shapes: DashMap<String, Arc<EnvelopeShape>>,
}

impl Normalizer {
    pub fn new(resolver: Arc<MemberResolver>) -> Self {
        Self {
            resolver,
            shapes: DashMap::new(),
        }
    }

    pub fn resolver(&self) -> &Arc<MemberResolver> {
        &self.resolver
    }

    /// Number of response types whose shape has been decided.
    pub fn known_shapes(&self) -> usize {
        self.shapes.len()
    }

    /// Envelope shape of `instance`'s type, detected on first sight.
    ///
    /// Types the resolver cannot find are treated as bare values and not
    /// memoized.
    pub fn shape_of(&self, instance: &Instance) -> Arc<EnvelopeShape> {
        let type_name = instance.type_name();
        if let Some(shape) = self.shapes.get(type_name).map(|r| r.value().clone()) {
            return shape;
        }
        let Ok(ty) = self.resolver.type_of(instance) else {
            return Arc::new(EnvelopeShape::default());
        };

        let first = |names: &[&str]| {
            names.iter().find_map(|name| {
                self.resolver
                    .resolve_property_or_field(&ty, name, BindingScope::ANY_INSTANCE)
                    .ok()
            })
        };
        let shape = EnvelopeShape {
            success: first(SUCCESS_MEMBERS),
            error: first(ERROR_MEMBERS),
            value: first(VALUE_MEMBERS),
        };
        trace!(
            response_type = type_name,
            envelope = shape.is_envelope(),
            "detected response shape"
        );
        self.shapes
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(shape))
            .value()
            .clone()
    }

    // ==================== Normalization ====================

    /// Normalize `response` into `T`.
    pub fn normalize<T: FromDyn>(&self, response: DynValue) -> BridgeResult<T> {
        self.normalize_with(response, &T::target_name(), T::from_exact, T::coerce)
    }

    /// Normalize into an SDK object assignable to `expected_type`.
    pub fn normalize_object(&self, response: DynValue, expected_type: &str) -> BridgeResult<Instance> {
        let accept = |value: &DynValue| match value {
            DynValue::Object(obj) if self.resolver.is_assignable(obj.type_name(), expected_type) => {
                Some(obj.clone())
            }
            _ => None,
        };
        self.normalize_with(response, expected_type, accept, accept)
    }

    /// Normalize into a list of SDK objects assignable to `expected_type`.
    pub fn normalize_objects(
        &self,
        response: DynValue,
        expected_type: &str,
    ) -> BridgeResult<Vec<Instance>> {
        let accept = |value: &DynValue| {
            value
                .as_list()?
                .iter()
                .map(|item| match item {
                    DynValue::Object(obj)
                        if self.resolver.is_assignable(obj.type_name(), expected_type) =>
                    {
                        Some(obj.clone())
                    }
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
        };
        self.normalize_with(response, &format!("List<{}>", expected_type), accept, accept)
    }

    /// Strip a successful envelope and return its payload untouched.
    pub fn unwrap_envelope(&self, response: DynValue) -> BridgeResult<DynValue> {
        let DynValue::Object(obj) = &response else {
            return Ok(response);
        };
        let shape = self.shape_of(obj);
        self.check_success(obj, &shape)?;
        match &shape.value {
            Some(member) => self.resolver.get_value(Some(obj), member),
            None => Ok(response),
        }
    }

    fn normalize_with<T>(
        &self,
        response: DynValue,
        target: &str,
        exact: impl Fn(&DynValue) -> Option<T>,
        coerce: impl Fn(&DynValue) -> Option<T>,
    ) -> BridgeResult<T> {
        if let Some(done) = exact(&response) {
            return Ok(done);
        }

        let mut value_type = None;
        if let DynValue::Object(obj) = &response {
            let shape = self.shape_of(obj);
            self.check_success(obj, &shape)?;
            if let Some(member) = &shape.value {
                let inner = self.resolver.get_value(Some(obj), member)?;
                if let Some(done) = exact(&inner).or_else(|| coerce(&inner)) {
                    return Ok(done);
                }
                value_type = Some(inner.type_name());
            }
        }

        if let Some(done) = coerce(&response) {
            return Ok(done);
        }

        Err(BridgeError::Coercion {
            target: target.to_string(),
            response_type: response.type_name(),
            value_type,
        })
    }

    fn check_success(&self, obj: &Instance, shape: &EnvelopeShape) -> BridgeResult<()> {
        let Some(indicator) = &shape.success else {
            return Ok(());
        };
        let flag = self.resolver.get_value(Some(obj), indicator)?;
        if flag.as_bool() != Some(false) {
            return Ok(());
        }
        let payload = match &shape.error {
            Some(member) => {
                let carried = self.resolver.get_value(Some(obj), member)?;
                self.describe_payload(&carried)
            }
            None => "operation reported failure without an error payload".to_string(),
        };
        Err(BridgeError::Rejected {
            response_type: obj.type_name().to_string(),
            payload,
        })
    }

    /// Render an error payload: text as-is, lists joined, objects by their
    /// `Message` member when they have one.
    fn describe_payload(&self, payload: &DynValue) -> String {
        match payload {
            DynValue::Unit => "unspecified error".to_string(),
            DynValue::List(items) => items
                .iter()
                .map(|item| self.describe_payload(item))
                .collect::<Vec<_>>()
                .join("; "),
            DynValue::Object(obj) => self
                .resolver
                .read(obj, "Message")
                .ok()
                .and_then(|m| m.as_str().map(str::to_string))
                .unwrap_or_else(|| payload.describe()),
            other => other.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverConfig;
    use crate::testing::{
        envelope_types, failed_envelope, record_instance, success_envelope, ModelBuilder,
        TypeBuilder, IS_SUCCESS_ERROR_ENVELOPE, RESULT_ENVELOPE, SUCCESS_VALUE_ENVELOPE,
    };

    fn normalizer() -> Normalizer {
        let model = ModelBuilder::new()
            .module("Autodesk.DataExchange.Core", |m| {
                envelope_types(m)
                    .add(TypeBuilder::record("Sdk.ErrorDetail", &[("Message", "String")]))
                    .add(TypeBuilder::record("Sdk.ElementInfo", &[("Id", "String")]))
                    .add(TypeBuilder::new("Sdk.DesignInfo").base("Sdk.ElementInfo"))
            })
            .build();
        Normalizer::new(Arc::new(MemberResolver::new(model, ResolverConfig::default())))
    }

    #[test]
    fn test_success_value_envelope() {
        let n = normalizer();
        let v: i64 = n.normalize(success_envelope(true, 42i64).into()).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn test_failed_envelope_carries_payload() {
        let n = normalizer();
        let err = n.normalize::<i64>(failed_envelope("x").into()).unwrap_err();
        match &err {
            BridgeError::Rejected { payload, .. } => assert_eq!(payload, "x"),
            other => panic!("unexpected: {other}"),
        }
        assert!(err.to_string().contains('x'));
    }

    #[test]
    fn test_bare_value() {
        let n = normalizer();
        assert_eq!(n.normalize::<i64>(DynValue::Int(42)).unwrap(), 42);
        assert_eq!(n.normalize::<i64>(DynValue::Text(" 42 ".into())).unwrap(), 42);
    }

    #[test]
    fn test_error_list_and_object_payloads() {
        let n = normalizer();
        let listed = record_instance(
            SUCCESS_VALUE_ENVELOPE,
            [
                ("Success", false.into()),
                ("Errors", DynValue::List(vec!["quota".into(), "retry later".into()])),
            ],
        );
        let err = n.normalize::<()>(listed.into()).unwrap_err();
        assert!(err.to_string().contains("quota; retry later"));

        let detail = record_instance("Sdk.ErrorDetail", [("Message", "token expired".into())]);
        let nested = record_instance(
            IS_SUCCESS_ERROR_ENVELOPE,
            [("IsSuccess", false.into()), ("Error", detail.into())],
        );
        let err = n.normalize::<()>(nested.into()).unwrap_err();
        assert!(err.to_string().contains("token expired"));
    }

    #[test]
    fn test_result_member_and_coercion_failure() {
        let n = normalizer();
        let wrapped = record_instance(RESULT_ENVELOPE, [("Result", "ok".into())]);
        assert_eq!(n.normalize::<String>(wrapped.clone().into()).unwrap(), "ok");

        let err = n.normalize::<i64>(wrapped.into()).unwrap_err();
        match err {
            BridgeError::Coercion {
                response_type,
                value_type,
                ..
            } => {
                assert_eq!(response_type, RESULT_ENVELOPE);
                assert_eq!(value_type.as_deref(), Some("String"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_shape_memoized_per_type() {
        let n = normalizer();
        n.normalize::<i64>(success_envelope(true, 1i64).into()).unwrap();
        let lookups = n.resolver().stats().member_lookups;
        n.normalize::<i64>(success_envelope(true, 2i64).into()).unwrap();
        n.normalize::<i64>(success_envelope(true, 3i64).into()).unwrap();
        assert_eq!(n.known_shapes(), 1);
        assert_eq!(n.resolver().stats().member_lookups, lookups);
    }

    #[test]
    fn test_unit_accepts_success_envelope() {
        let n = normalizer();
        n.normalize::<()>(success_envelope(true, DynValue::Unit).into()).unwrap();
        n.normalize::<()>(DynValue::Unit).unwrap();
    }

    #[test]
    fn test_normalize_object_respects_base_types() {
        let n = normalizer();
        let design = Instance::new("Sdk.DesignInfo", ());
        let got = n
            .normalize_object(success_envelope(true, design.clone()).into(), "Sdk.ElementInfo")
            .unwrap();
        assert!(got.ptr_eq(&design));

        let err = n
            .normalize_object(DynValue::Object(design), "Sdk.ErrorDetail")
            .unwrap_err();
        assert!(matches!(err, BridgeError::Coercion { .. }));
    }

    #[test]
    fn test_normalize_objects_from_list() {
        let n = normalizer();
        let a = Instance::new("Sdk.ElementInfo", ());
        let b = Instance::new("Sdk.DesignInfo", ());
        let listed = DynValue::List(vec![a.into(), b.into()]);
        let got = n.normalize_objects(listed, "Sdk.ElementInfo").unwrap();
        assert_eq!(got.len(), 2);
    }
}
