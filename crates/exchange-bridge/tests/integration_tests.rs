//! Integration tests for exchange-bridge.
//!
//! Exercise resolution, invocation and normalization together against an
//! in-memory SDK model, the way the publish adapter drives them.

use std::sync::Arc;

use exchange_bridge::testing::{
    envelope_types, failed_envelope, success_envelope, ModelBuilder, TypeBuilder,
};
use exchange_bridge::{
    AsyncBridge, Awaitable, BindingScope, BridgeError, DynValue, ErrorKind, Instance,
    MemberResolver, ResolverConfig,
};
use tokio_util::sync::CancellationToken;

const CORE: &str = "Autodesk.DataExchange.Core";

fn sdk() -> (Arc<exchange_bridge::testing::InMemoryModel>, AsyncBridge) {
    let model = ModelBuilder::new()
        .module(CORE, |m| {
            envelope_types(m).add(
                TypeBuilder::new("Sdk.Client")
                    .method("GetAnswerAsync", &[], "Task<Response>", |_, _| {
                        Ok(Awaitable::ready("Task<Response>", Ok(success_envelope(true, 42i64).into())).into())
                    })
                    .method("GetFailureAsync", &[], "Task<IResponse>", |_, _| {
                        Ok(Awaitable::ready("Task<IResponse>", Ok(failed_envelope("x").into())).into())
                    })
                    .method("GetBare", &[], "Int64", |_, _| Ok(DynValue::Int(42))),
            )
        })
        .module("Newtonsoft.Json", |m| m.add(TypeBuilder::new("Json.Reader")))
        .build();
    let resolver = Arc::new(MemberResolver::new(model.clone(), ResolverConfig::default()));
    (model, AsyncBridge::new(resolver))
}

#[test]
fn test_resolution_is_idempotent() {
    let (model, bridge) = sdk();
    let resolver = bridge.resolver();

    let client = resolver.resolve_type("Sdk.Client", None).unwrap();
    let first = resolver
        .resolve_method(&client, "GetBare", BindingScope::PUBLIC_INSTANCE, Some(&[]))
        .unwrap();
    let lookups = model.type_lookups();

    let client_again = resolver.resolve_type("Sdk.Client", None).unwrap();
    let second = resolver
        .resolve_method(&client_again, "GetBare", BindingScope::PUBLIC_INSTANCE, Some(&[]))
        .unwrap();

    assert!(Arc::ptr_eq(&client, &client_again));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(model.type_lookups(), lookups, "second resolution must hit the cache");
    assert_eq!(resolver.stats().member_lookups, 1);
}

#[test]
fn test_unresolved_member_names_owner_and_member() {
    let (_, bridge) = sdk();
    let resolver = bridge.resolver();
    let client = resolver.resolve_type("Sdk.Client", None).unwrap();

    let err = resolver
        .resolve_method(&client, "UploadCustomGeometriesAsync", BindingScope::ANY_INSTANCE, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let message = err.to_string();
    assert!(message.contains("Sdk.Client"));
    assert!(message.contains("UploadCustomGeometriesAsync"));

    // Types outside the project filter are never searched.
    assert!(resolver.resolve_type("Json.Reader", None).is_err());
}

#[tokio::test]
async fn test_normalizer_shapes_through_async_calls() {
    let (_, bridge) = sdk();
    let token = CancellationToken::new();
    let client = Instance::new("Sdk.Client", ());

    let answer: i64 = bridge
        .call_async(&client, "GetAnswerAsync", None, &[], &token)
        .await
        .unwrap();
    assert_eq!(answer, 42);

    let bare: i64 = bridge
        .call_async(&client, "GetBare", None, &[], &token)
        .await
        .unwrap();
    assert_eq!(bare, 42);

    let err = bridge
        .call_async::<i64>(&client, "GetFailureAsync", None, &[], &token)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Rejected { ref payload, .. } if payload == "x"));
    assert_eq!(err.kind(), ErrorKind::InvocationError);
}
