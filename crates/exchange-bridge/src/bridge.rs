//! Asynchronous invocation: call a member, await what it hands back, and
//! normalize the completed result.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BackendFault, BridgeError, BridgeResult};
use crate::model::{BindingScope, MethodHandle};
use crate::normalize::{FromDyn, Normalizer};
use crate::resolver::MemberResolver;
use crate::value::{DynValue, Instance};

/// Resolver, normalizer and awaiting bundled for SDK calls.
#[derive(Clone)]
pub struct AsyncBridge {
    resolver: Arc<MemberResolver>,
    normalizer: Arc<Normalizer>,
}

impl AsyncBridge {
    pub fn new(resolver: Arc<MemberResolver>) -> Self {
        let normalizer = Arc::new(Normalizer::new(resolver.clone()));
        Self {
            resolver,
            normalizer,
        }
    }

    pub fn resolver(&self) -> &Arc<MemberResolver> {
        &self.resolver
    }

    pub fn normalizer(&self) -> &Arc<Normalizer> {
        &self.normalizer
    }

    /// Drive `value` to completion.
    ///
    /// A pending value is awaited, racing `cancel`; if it completes with
    /// another pending value, that one is awaited too. Anything else is
    /// returned as is.
    pub async fn await_value(
        &self,
        value: DynValue,
        cancel: &CancellationToken,
    ) -> BridgeResult<DynValue> {
        self.await_completion(value, "<awaitable>", "await", cancel)
            .await
    }

    async fn await_completion(
        &self,
        mut value: DynValue,
        owner: &str,
        member: &str,
        cancel: &CancellationToken,
    ) -> BridgeResult<DynValue> {
        loop {
            let awaitable = match value {
                DynValue::Pending(awaitable) => awaitable,
                done => return Ok(done),
            };
            let fut = awaitable.take().ok_or_else(|| BridgeError::Invocation {
                owner: owner.to_string(),
                member: member.to_string(),
                fault: BackendFault::new(
                    "InvalidOperationException",
                    format!("{} was already awaited", awaitable.label()),
                ),
            })?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(owner, member, "cancelled while awaiting");
                    return Err(BridgeError::cancelled(format!("{}::{}", owner, member)));
                }
                outcome = fut => outcome,
            };

            value = outcome.map_err(|fault| BridgeError::Invocation {
                owner: owner.to_string(),
                member: member.to_string(),
                fault: fault.unwrap_one(),
            })?;
        }
    }

    async fn invoke_completed(
        &self,
        target: Option<&Instance>,
        method: &MethodHandle,
        args: &[DynValue],
        cancel: &CancellationToken,
    ) -> BridgeResult<DynValue> {
        if cancel.is_cancelled() {
            return Err(BridgeError::cancelled(format!(
                "{}::{}",
                method.declaring_type, method.name
            )));
        }
        let raw = self.resolver.invoke(target, method, args)?;
        self.await_completion(raw, &method.declaring_type, &method.name, cancel)
            .await
    }

    /// Invoke, await and normalize into `T`.
    pub async fn invoke_async<T: FromDyn>(
        &self,
        target: Option<&Instance>,
        method: &MethodHandle,
        args: &[DynValue],
        cancel: &CancellationToken,
    ) -> BridgeResult<T> {
        let done = self.invoke_completed(target, method, args, cancel).await?;
        self.normalizer.normalize(done)
    }

    /// Invoke, await and normalize into an SDK object of `expected_type`.
    pub async fn invoke_async_object(
        &self,
        target: Option<&Instance>,
        method: &MethodHandle,
        args: &[DynValue],
        expected_type: &str,
        cancel: &CancellationToken,
    ) -> BridgeResult<Instance> {
        let done = self.invoke_completed(target, method, args, cancel).await?;
        self.normalizer.normalize_object(done, expected_type)
    }

    /// Invoke and await; only envelope failure matters.
    pub async fn invoke_async_unit(
        &self,
        target: Option<&Instance>,
        method: &MethodHandle,
        args: &[DynValue],
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        self.invoke_async::<()>(target, method, args, cancel).await
    }

    /// Invoke, await and strip a successful envelope without converting.
    pub async fn invoke_async_raw(
        &self,
        target: Option<&Instance>,
        method: &MethodHandle,
        args: &[DynValue],
        cancel: &CancellationToken,
    ) -> BridgeResult<DynValue> {
        let done = self.invoke_completed(target, method, args, cancel).await?;
        self.normalizer.unwrap_envelope(done)
    }

    /// Resolve an instance method of `target` by name and signature, then
    /// [`invoke_async`](Self::invoke_async) it.
    pub async fn call_async<T: FromDyn>(
        &self,
        target: &Instance,
        name: &str,
        params: Option<&[&str]>,
        args: &[DynValue],
        cancel: &CancellationToken,
    ) -> BridgeResult<T> {
        let ty = self.resolver.type_of(target)?;
        let method = self
            .resolver
            .resolve_method(&ty, name, BindingScope::ANY_INSTANCE, params)?;
        self.invoke_async(Some(target), &method, args, cancel).await
    }
}
