//! [`ExchangeBackend`] over the runtime-resolved SDK.
//!
//! All SDK access goes through the [`AsyncBridge`]: members are resolved by
//! the names in an [`SdkProfile`], invoked on the SDK client object, awaited,
//! and normalized. Required members are checked once at construction, so a
//! mismatched SDK fails before any fulfillment is opened. Optional members
//! that are absent make their phase report [`PhaseOutcome::Unsupported`].
//!
//! The SDK overloads many of its client methods, so each member is bound by
//! its parameter-type signature from the profile. A member without a
//! signature only binds when exactly one overload exists.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use exchange_bridge::{
    AsyncBridge, BindingScope, BridgeError, BridgeResult, DynValue, ErrorKind, FromDyn, Instance,
    MemberResolver, MethodHandle, ObjectModel, ResolverConfig, TypeHandle,
};
use exchange_staging::{ResolvedDescriptor, TranslationEntry, TranslationTable};
use exchange_types::{
    AssetId, AssetKind, AssetRecord, BinaryReference, ElementId, ExchangeIdentity, FulfillmentId,
    GeometryDescriptor, GeometryFormat, GeometryKind, RevisionId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{
    ElementInfo, ExchangeBackend, FulfillmentStatus, PhaseOutcome, SyncBatch, SyncMetadata,
    SyncRequest,
};
use crate::state::{ExecutionOrder, FulfillmentSession};

// ==================== Profile ====================

/// Names of the SDK types and members the backend binds to.
///
/// Every client method takes the exchange id, collection id and hub id as
/// its first three arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkProfile {
    pub client_type: String,

    /// Parameter types per member name, used to pick one overload.
    pub signatures: BTreeMap<String, Vec<String>>,

    pub start_fulfillment: String,
    pub process_render_styles: String,
    pub register_pending: String,
    pub pending_translations: String,
    pub upload_geometries: String,
    pub upload_custom_geometries: String,
    pub upload_large_primitives: String,
    pub sync_metadata: String,
    pub build_sync_request: String,
    pub split_sync_request: String,
    pub sync_batch: String,
    pub process_geometry: String,
    pub finish_fulfillment: String,
    pub fulfillment_status: String,
    pub discard_fulfillment: String,
    pub complete_local: String,
    pub generate_viewable: String,
    pub find_elements: String,
    pub create_element: String,
    pub create_geometry_asset: String,
    pub get_asset: String,

    /// Pending-translation descriptor properties.
    pub descriptor_asset_id: String,
    pub descriptor_source_path: String,
    pub descriptor_output_path: String,

    /// Shared by elements and assets.
    pub id_property: String,
    pub name_property: String,
    pub asset_count_property: String,
    pub asset_kind_property: String,
    pub blob_id_property: String,
    pub range_start_property: String,
    pub range_end_property: String,
    pub parents_property: String,
    pub children_property: String,
}

const IDS: [&str; 3] = ["String", "String", "String"];

fn client_signature(extra: &[&str]) -> Vec<String> {
    IDS.iter().chain(extra).map(|p| p.to_string()).collect()
}

fn default_signatures() -> BTreeMap<String, Vec<String>> {
    [
        ("StartFulfillmentAsync", client_signature(&["String"])),
        ("ProcessRenderStylesFromFileGeometryAsync", client_signature(&["String"])),
        ("RegisterPendingTranslation", client_signature(&["String", "String"])),
        ("GetPendingTranslations", client_signature(&[])),
        ("UploadGeometriesAsync", client_signature(&["String", "List"])),
        ("UploadCustomGeometriesAsync", client_signature(&["String"])),
        ("UploadLargePrimitiveGeometriesAsync", client_signature(&["String"])),
        ("GetSyncMetadataAsync", client_signature(&["String"])),
        ("BuildSyncRequestAsync", client_signature(&["String", "String"])),
        ("SplitSyncRequest", vec!["Sdk.SyncRequest".to_string()]),
        ("SyncBatchAsync", client_signature(&["String", "Sdk.SyncBatch"])),
        ("ProcessGeometryAsync", client_signature(&["String", "Sdk.SyncRequest"])),
        ("FinishFulfillmentAsync", client_signature(&["String"])),
        ("GetFulfillmentStatusAsync", client_signature(&["String"])),
        ("DiscardFulfillmentAsync", client_signature(&["String"])),
        ("ClearLocalStateAndSetRevisionAsync", client_signature(&[])),
        ("GenerateViewableAsync", client_signature(&[])),
        ("FindElementsByNameAsync", client_signature(&["String"])),
        ("CreateElementAsync", client_signature(&["String", "String"])),
        ("CreateGeometryAssetAsync", client_signature(&["String", "String"])),
        ("GetAssetAsync", client_signature(&["String"])),
    ]
    .into_iter()
    .map(|(name, params)| (name.to_string(), params))
    .collect()
}

impl Default for SdkProfile {
    fn default() -> Self {
        Self {
            client_type: "Autodesk.DataExchange.Client".to_string(),
            signatures: default_signatures(),

            start_fulfillment: "StartFulfillmentAsync".to_string(),
            process_render_styles: "ProcessRenderStylesFromFileGeometryAsync".to_string(),
            register_pending: "RegisterPendingTranslation".to_string(),
            pending_translations: "GetPendingTranslations".to_string(),
            upload_geometries: "UploadGeometriesAsync".to_string(),
            upload_custom_geometries: "UploadCustomGeometriesAsync".to_string(),
            upload_large_primitives: "UploadLargePrimitiveGeometriesAsync".to_string(),
            sync_metadata: "GetSyncMetadataAsync".to_string(),
            build_sync_request: "BuildSyncRequestAsync".to_string(),
            split_sync_request: "SplitSyncRequest".to_string(),
            sync_batch: "SyncBatchAsync".to_string(),
            process_geometry: "ProcessGeometryAsync".to_string(),
            finish_fulfillment: "FinishFulfillmentAsync".to_string(),
            fulfillment_status: "GetFulfillmentStatusAsync".to_string(),
            discard_fulfillment: "DiscardFulfillmentAsync".to_string(),
            complete_local: "ClearLocalStateAndSetRevisionAsync".to_string(),
            generate_viewable: "GenerateViewableAsync".to_string(),
            find_elements: "FindElementsByNameAsync".to_string(),
            create_element: "CreateElementAsync".to_string(),
            create_geometry_asset: "CreateGeometryAssetAsync".to_string(),
            get_asset: "GetAssetAsync".to_string(),

            descriptor_asset_id: "AssetId".to_string(),
            descriptor_source_path: "SourcePath".to_string(),
            descriptor_output_path: "OutputPath".to_string(),

            id_property: "Id".to_string(),
            name_property: "Name".to_string(),
            asset_count_property: "AssetCount".to_string(),
            asset_kind_property: "Kind".to_string(),
            blob_id_property: "BlobId".to_string(),
            range_start_property: "RangeStart".to_string(),
            range_end_property: "RangeEnd".to_string(),
            parents_property: "Parents".to_string(),
            children_property: "Children".to_string(),
        }
    }
}

impl SdkProfile {
    /// Pin `member` to the overload taking `params`.
    pub fn with_signature(mut self, member: &str, params: &[&str]) -> Self {
        self.signatures
            .insert(member.to_string(), params.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Drop the pinned signature, so `member` binds only when unambiguous.
    pub fn without_signature(mut self, member: &str) -> Self {
        self.signatures.remove(member);
        self
    }

    pub fn signature(&self, member: &str) -> Option<Vec<&str>> {
        self.signatures
            .get(member)
            .map(|params| params.iter().map(String::as_str).collect())
    }

    /// Members whose absence means the SDK cannot be driven at all.
    pub fn required_methods(&self) -> Vec<&str> {
        [
            &self.start_fulfillment,
            &self.register_pending,
            &self.pending_translations,
            &self.upload_geometries,
            &self.sync_metadata,
            &self.build_sync_request,
            &self.split_sync_request,
            &self.sync_batch,
            &self.process_geometry,
            &self.finish_fulfillment,
            &self.fulfillment_status,
            &self.discard_fulfillment,
            &self.complete_local,
            &self.find_elements,
            &self.create_element,
            &self.create_geometry_asset,
            &self.get_asset,
        ]
        .into_iter()
        .map(String::as_str)
        .collect()
    }

    /// Capabilities that not every SDK version offers.
    pub fn optional_methods(&self) -> Vec<&str> {
        [
            &self.process_render_styles,
            &self.upload_custom_geometries,
            &self.upload_large_primitives,
            &self.generate_viewable,
        ]
        .into_iter()
        .map(String::as_str)
        .collect()
    }
}

// ==================== Backend ====================

pub struct DynamicExchangeBackend {
    bridge: AsyncBridge,
    client: Instance,
    client_type: TypeHandle,
    profile: SdkProfile,
    available: HashSet<String>,
}

impl DynamicExchangeBackend {
    /// Bind to `client`, checking every required member up front.
    pub fn new(bridge: AsyncBridge, client: Instance, profile: SdkProfile) -> BridgeResult<Self> {
        let resolver = bridge.resolver().clone();
        let client_type = resolver.resolve_type(&profile.client_type, None)?;
        if !resolver.is_assignable(client.type_name(), &profile.client_type) {
            return Err(BridgeError::NotFound {
                owner: client.type_name().to_string(),
                member: profile.client_type.clone(),
                detail: Some("client object is not of the profiled client type".to_string()),
            });
        }

        for name in profile.required_methods() {
            Self::bind(&resolver, &client_type, &profile, name)?;
        }
        let mut available = HashSet::new();
        for name in profile.optional_methods() {
            match Self::bind(&resolver, &client_type, &profile, name) {
                Ok(_) => {
                    available.insert(name.to_string());
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(member = name, "optional SDK member not present");
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            client = %profile.client_type,
            optional = available.len(),
            "bound exchange SDK client"
        );
        Ok(Self {
            bridge,
            client,
            client_type,
            profile,
            available,
        })
    }

    /// Build the resolver and bridge over `model`, then bind.
    pub fn from_model(
        model: Arc<dyn ObjectModel>,
        config: ResolverConfig,
        client: Instance,
        profile: SdkProfile,
    ) -> BridgeResult<Self> {
        let resolver = Arc::new(MemberResolver::new(model, config));
        Self::new(AsyncBridge::new(resolver), client, profile)
    }

    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    pub fn profile(&self) -> &SdkProfile {
        &self.profile
    }

    pub fn supports(&self, member: &str) -> bool {
        self.available.contains(member)
    }

    // ==================== Invocation helpers ====================

    fn bind(
        resolver: &MemberResolver,
        client_type: &TypeHandle,
        profile: &SdkProfile,
        name: &str,
    ) -> BridgeResult<MethodHandle> {
        let signature = profile.signature(name);
        resolver.resolve_method(client_type, name, BindingScope::ANY_INSTANCE, signature.as_deref())
    }

    fn method(&self, name: &str) -> BridgeResult<MethodHandle> {
        Self::bind(self.bridge.resolver(), &self.client_type, &self.profile, name)
    }

    fn args(exchange: &ExchangeIdentity, rest: impl IntoIterator<Item = DynValue>) -> Vec<DynValue> {
        let mut args: Vec<DynValue> = vec![
            exchange.exchange_id.as_str().into(),
            exchange.collection_id.as_str().into(),
            exchange.hub_id.as_str().into(),
        ];
        args.extend(rest);
        args
    }

    fn session_args(session: &FulfillmentSession, rest: impl IntoIterator<Item = DynValue>) -> Vec<DynValue> {
        let mut args = Self::args(&session.exchange, [DynValue::from(session.fulfillment_str())]);
        args.extend(rest);
        args
    }

    async fn call<T: FromDyn>(&self, name: &str, args: Vec<DynValue>, cancel: &CancellationToken) -> BridgeResult<T> {
        let method = self.method(name)?;
        self.bridge
            .invoke_async(Some(&self.client), &method, &args, cancel)
            .await
    }

    async fn call_raw(&self, name: &str, args: Vec<DynValue>, cancel: &CancellationToken) -> BridgeResult<DynValue> {
        let method = self.method(name)?;
        self.bridge
            .invoke_async_raw(Some(&self.client), &method, &args, cancel)
            .await
    }

    async fn call_object(&self, name: &str, args: Vec<DynValue>, cancel: &CancellationToken) -> BridgeResult<Instance> {
        match self.call_raw(name, args, cancel).await? {
            DynValue::Object(obj) => Ok(obj),
            other => Err(BridgeError::Coercion {
                target: "Object".to_string(),
                response_type: other.type_name(),
                value_type: None,
            }),
        }
    }

    async fn call_objects(&self, name: &str, args: Vec<DynValue>, cancel: &CancellationToken) -> BridgeResult<Vec<Instance>> {
        let raw = self.call_raw(name, args, cancel).await?;
        raw.as_list()
            .and_then(|items| items.iter().map(|v| v.as_object().cloned()).collect::<Option<Vec<_>>>())
            .ok_or_else(|| BridgeError::Coercion {
                target: "List<Object>".to_string(),
                response_type: raw.type_name(),
                value_type: None,
            })
    }

    /// Call an optional member; absent members are `Unsupported`.
    async fn call_optional(&self, name: &str, args: Vec<DynValue>, cancel: &CancellationToken) -> BridgeResult<PhaseOutcome> {
        if !self.supports(name) {
            return Ok(PhaseOutcome::Unsupported);
        }
        self.call::<()>(name, args, cancel).await?;
        Ok(PhaseOutcome::Done)
    }

    fn read<T: FromDyn>(&self, obj: &Instance, property: &str) -> BridgeResult<T> {
        let value = self.bridge.resolver().read(obj, property)?;
        self.bridge.normalizer().normalize(value)
    }

    fn write(&self, obj: &Instance, property: &str, value: DynValue) -> BridgeResult<()> {
        self.bridge.resolver().write(obj, property, value)
    }

    // ==================== Object conversion ====================

    fn descriptor_asset_id(&self, descriptor: &Instance) -> BridgeResult<AssetId> {
        self.read::<String>(descriptor, &self.profile.descriptor_asset_id)
            .map(AssetId::new)
    }

    fn entry_from(&self, descriptor: &Instance) -> BridgeResult<TranslationEntry> {
        let source: String = self.read(descriptor, &self.profile.descriptor_source_path)?;
        let output: Option<String> = self.read(descriptor, &self.profile.descriptor_output_path)?;
        let output_path = output.filter(|p| !p.is_empty()).map(PathBuf::from);
        let source_path = PathBuf::from(source);
        let format = GeometryFormat::from_path(output_path.as_deref().unwrap_or(source_path.as_path()));
        Ok(TranslationEntry {
            asset_id: self.descriptor_asset_id(descriptor)?,
            source_path,
            output_path,
            geometry: GeometryDescriptor::brep(format),
        })
    }

    fn element_from(&self, obj: &Instance) -> BridgeResult<ElementInfo> {
        Ok(ElementInfo {
            id: ElementId::new(self.read::<String>(obj, &self.profile.id_property)?),
            name: self.read(obj, &self.profile.name_property)?,
        })
    }

    fn asset_from(&self, obj: &Instance, geometry: Option<GeometryDescriptor>) -> BridgeResult<AssetRecord> {
        let kind: String = self.read(obj, &self.profile.asset_kind_property)?;
        let kind = match kind.to_ascii_lowercase().as_str() {
            "root" => AssetKind::Root,
            "design" => AssetKind::Design,
            "instance" => AssetKind::Instance,
            _ => AssetKind::Geometry,
        };
        let blob: Option<String> = self.read(obj, &self.profile.blob_id_property)?;
        let binary_ref = match blob.filter(|b| !b.is_empty()) {
            Some(blob) => {
                let start: i64 = self.read(obj, &self.profile.range_start_property)?;
                let end: i64 = self.read(obj, &self.profile.range_end_property)?;
                Some(BinaryReference::new(blob, start.max(0) as u64, end.max(0) as u64))
            }
            None => None,
        };
        let ids = |values: Vec<String>| -> Vec<AssetId> { values.into_iter().map(AssetId::new).collect() };
        let geometry = match kind {
            AssetKind::Geometry => geometry.or(Some(GeometryDescriptor {
                kind: GeometryKind::BRep,
                format: GeometryFormat::Smb,
            })),
            _ => None,
        };
        Ok(AssetRecord {
            id: AssetId::new(self.read::<String>(obj, &self.profile.id_property)?),
            kind,
            binary_ref,
            geometry,
            parents: ids(self.read(obj, &self.profile.parents_property)?),
            children: ids(self.read(obj, &self.profile.children_property)?),
        })
    }

    fn handle<'a>(handle: &'a Option<Instance>, what: &str) -> BridgeResult<&'a Instance> {
        handle
            .as_ref()
            .ok_or_else(|| BridgeError::contract(format!("{} was not built by this backend", what)))
    }
}

#[async_trait]
impl TranslationTable for DynamicExchangeBackend {
    async fn register_pending(
        &self,
        exchange: &ExchangeIdentity,
        entry: TranslationEntry,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        let args = Self::args(
            exchange,
            [
                DynValue::from(entry.asset_id.as_str()),
                DynValue::from(entry.source_path.display().to_string()),
            ],
        );
        self.call::<()>(&self.profile.register_pending, args, cancel).await
    }

    async fn pending_entries(
        &self,
        exchange: &ExchangeIdentity,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<TranslationEntry>> {
        let descriptors = self
            .call_objects(
                &self.profile.pending_translations,
                Self::args(exchange, Vec::new()),
                cancel,
            )
            .await?;
        descriptors.iter().map(|d| self.entry_from(d)).collect()
    }
}

#[async_trait]
impl ExchangeBackend for DynamicExchangeBackend {
    async fn open_fulfillment(
        &self,
        exchange: &ExchangeIdentity,
        order: ExecutionOrder,
        cancel: &CancellationToken,
    ) -> BridgeResult<FulfillmentId> {
        let id: String = self
            .call(
                &self.profile.start_fulfillment,
                Self::args(exchange, [DynValue::from(order.to_string())]),
                cancel,
            )
            .await?;
        Ok(FulfillmentId::new(id))
    }

    async fn process_render_styles(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.call_optional(&self.profile.process_render_styles, Self::session_args(session, Vec::new()), cancel)
            .await
    }

    /// Point the SDK's own pending descriptors at the real payloads and
    /// upload only those.
    async fn upload_geometries(
        &self,
        session: &FulfillmentSession,
        descriptors: &[ResolvedDescriptor],
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        let pending = self
            .call_objects(
                &self.profile.pending_translations,
                Self::args(&session.exchange, Vec::new()),
                cancel,
            )
            .await?;

        let mut forwarded = Vec::with_capacity(descriptors.len());
        for resolved in descriptors {
            let mut matched = None;
            for candidate in &pending {
                if self.descriptor_asset_id(candidate)? == resolved.asset_id {
                    matched = Some(candidate.clone());
                    break;
                }
            }
            let sdk_descriptor = matched.ok_or_else(|| {
                BridgeError::contract(format!(
                    "resolved asset {} has no pending SDK descriptor",
                    resolved.asset_id
                ))
            })?;
            self.write(
                &sdk_descriptor,
                &self.profile.descriptor_output_path,
                DynValue::from(resolved.output_path.display().to_string()),
            )?;
            forwarded.push(DynValue::Object(sdk_descriptor));
        }

        debug!(count = forwarded.len(), "uploading geometries");
        self.call::<()>(
            &self.profile.upload_geometries,
            Self::session_args(session, [DynValue::List(forwarded)]),
            cancel,
        )
        .await
    }

    async fn upload_custom_geometries(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.call_optional(&self.profile.upload_custom_geometries, Self::session_args(session, Vec::new()), cancel)
            .await
    }

    async fn upload_large_primitives(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.call_optional(&self.profile.upload_large_primitives, Self::session_args(session, Vec::new()), cancel)
            .await
    }

    async fn sync_metadata(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<SyncMetadata> {
        let schema_namespace: String = self
            .call(&self.profile.sync_metadata, Self::session_args(session, Vec::new()), cancel)
            .await?;
        Ok(SyncMetadata { schema_namespace })
    }

    async fn build_sync_request(
        &self,
        session: &FulfillmentSession,
        metadata: &SyncMetadata,
        cancel: &CancellationToken,
    ) -> BridgeResult<SyncRequest> {
        let request = self
            .call_object(
                &self.profile.build_sync_request,
                Self::session_args(session, [DynValue::from(metadata.schema_namespace.as_str())]),
                cancel,
            )
            .await?;
        let asset_count: i64 = self.read(&request, &self.profile.asset_count_property)?;
        Ok(SyncRequest {
            schema_namespace: metadata.schema_namespace.clone(),
            asset_count: asset_count.max(0) as usize,
            handle: Some(request),
        })
    }

    async fn split_sync_request(
        &self,
        _session: &FulfillmentSession,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<SyncBatch>> {
        let handle = Self::handle(&request.handle, "sync request")?;
        let batches = self
            .call_objects(
                &self.profile.split_sync_request,
                vec![DynValue::Object(handle.clone())],
                cancel,
            )
            .await?;
        batches
            .into_iter()
            .enumerate()
            .map(|(index, batch)| {
                let count: i64 = self.read(&batch, &self.profile.asset_count_property)?;
                Ok(SyncBatch {
                    index,
                    asset_count: count.max(0) as usize,
                    handle: Some(batch),
                })
            })
            .collect()
    }

    async fn sync_batch(
        &self,
        session: &FulfillmentSession,
        batch: &SyncBatch,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        let handle = Self::handle(&batch.handle, "sync batch")?;
        self.call::<()>(
            &self.profile.sync_batch,
            Self::session_args(session, [DynValue::Object(handle.clone())]),
            cancel,
        )
        .await
    }

    async fn process_geometry(
        &self,
        session: &FulfillmentSession,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        let handle = Self::handle(&request.handle, "sync request")?;
        self.call::<()>(
            &self.profile.process_geometry,
            Self::session_args(session, [DynValue::Object(handle.clone())]),
            cancel,
        )
        .await
    }

    async fn finish_fulfillment(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        self.call::<()>(&self.profile.finish_fulfillment, Self::session_args(session, Vec::new()), cancel)
            .await
    }

    async fn poll_status(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<FulfillmentStatus> {
        let status: String = self
            .call(&self.profile.fulfillment_status, Self::session_args(session, Vec::new()), cancel)
            .await?;
        Ok(parse_status(&status))
    }

    async fn discard_fulfillment(
        &self,
        exchange: &ExchangeIdentity,
        fulfillment_id: &FulfillmentId,
        cancel: &CancellationToken,
    ) -> BridgeResult<()> {
        self.call::<()>(
            &self.profile.discard_fulfillment,
            Self::args(exchange, [DynValue::from(fulfillment_id.as_str())]),
            cancel,
        )
        .await
    }

    /// The SDK member drops the exchange's pending translations itself.
    async fn complete_local(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<RevisionId> {
        let revision: String = self
            .call(&self.profile.complete_local, Self::args(&session.exchange, Vec::new()), cancel)
            .await?;
        Ok(RevisionId::new(revision))
    }

    async fn request_viewable(
        &self,
        session: &FulfillmentSession,
        cancel: &CancellationToken,
    ) -> BridgeResult<PhaseOutcome> {
        self.call_optional(&self.profile.generate_viewable, Self::args(&session.exchange, Vec::new()), cancel)
            .await
    }

    async fn find_elements_by_name(
        &self,
        exchange: &ExchangeIdentity,
        name: &str,
        cancel: &CancellationToken,
    ) -> BridgeResult<Vec<ElementInfo>> {
        let found = self
            .call_objects(&self.profile.find_elements, Self::args(exchange, [DynValue::from(name)]), cancel)
            .await?;
        found.iter().map(|e| self.element_from(e)).collect()
    }

    async fn create_element(
        &self,
        exchange: &ExchangeIdentity,
        name: &str,
        unit: &str,
        cancel: &CancellationToken,
    ) -> BridgeResult<ElementInfo> {
        let element = self
            .call_object(
                &self.profile.create_element,
                Self::args(exchange, [DynValue::from(name), DynValue::from(unit)]),
                cancel,
            )
            .await?;
        self.element_from(&element)
    }

    async fn create_geometry_asset(
        &self,
        exchange: &ExchangeIdentity,
        element: &ElementId,
        descriptor: &GeometryDescriptor,
        cancel: &CancellationToken,
    ) -> BridgeResult<AssetRecord> {
        let asset = self
            .call_object(
                &self.profile.create_geometry_asset,
                Self::args(
                    exchange,
                    [DynValue::from(element.as_str()), DynValue::from(descriptor.format.extension())],
                ),
                cancel,
            )
            .await?;
        self.asset_from(&asset, Some(descriptor.clone()))
    }

    async fn asset_record(
        &self,
        exchange: &ExchangeIdentity,
        asset: &AssetId,
        cancel: &CancellationToken,
    ) -> BridgeResult<Option<AssetRecord>> {
        match self
            .call_raw(&self.profile.get_asset, Self::args(exchange, [DynValue::from(asset.as_str())]), cancel)
            .await?
        {
            DynValue::Unit => Ok(None),
            DynValue::Object(obj) => self.asset_from(&obj, None).map(Some),
            other => Err(BridgeError::Coercion {
                target: "Asset".to_string(),
                response_type: other.type_name(),
                value_type: None,
            }),
        }
    }
}

/// Map the service's status text onto [`FulfillmentStatus`].
pub fn parse_status(status: &str) -> FulfillmentStatus {
    let normalized = status.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "completed" | "complete" | "succeeded" | "success" => FulfillmentStatus::Completed,
        s if s.starts_with("failed") || s.starts_with("error") || s == "cancelled" => {
            FulfillmentStatus::Failed(status.trim().to_string())
        }
        _ => FulfillmentStatus::InProgress,
    }
}
