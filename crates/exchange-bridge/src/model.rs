//! Runtime description of the SDK's object model.
//!
//! The SDK is a set of loaded modules, each exposing types; each type exposes
//! methods (possibly overloaded), properties and fields. Nothing here is known
//! at compile time: members are found by name and called through the
//! invoker closures stored in their descriptors.

use std::fmt;
use std::sync::Arc;

use crate::error::BackendFault;
use crate::value::{DynValue, Instance};

/// Whether a member needs a target object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Receiver {
    Instance,
    Static,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    NonPublic,
}

/// Which members a lookup may bind to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BindingScope {
    pub instance: bool,
    pub statics: bool,
    pub public: bool,
    pub non_public: bool,
}

impl BindingScope {
    pub const PUBLIC_INSTANCE: BindingScope = BindingScope {
        instance: true,
        statics: false,
        public: true,
        non_public: false,
    };
    pub const ANY_INSTANCE: BindingScope = BindingScope {
        instance: true,
        statics: false,
        public: true,
        non_public: true,
    };
    pub const PUBLIC_STATIC: BindingScope = BindingScope {
        instance: false,
        statics: true,
        public: true,
        non_public: false,
    };
    pub const ANY_STATIC: BindingScope = BindingScope {
        instance: false,
        statics: true,
        public: true,
        non_public: true,
    };
    pub const ANY: BindingScope = BindingScope {
        instance: true,
        statics: true,
        public: true,
        non_public: true,
    };

    pub fn admits(&self, receiver: Receiver, visibility: Visibility) -> bool {
        let receiver_ok = match receiver {
            Receiver::Instance => self.instance,
            Receiver::Static => self.statics,
        };
        let visibility_ok = match visibility {
            Visibility::Public => self.public,
            Visibility::NonPublic => self.non_public,
        };
        receiver_ok && visibility_ok
    }
}

impl fmt::Display for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.instance {
            parts.push("Instance");
        }
        if self.statics {
            parts.push("Static");
        }
        if self.public {
            parts.push("Public");
        }
        if self.non_public {
            parts.push("NonPublic");
        }
        f.write_str(&parts.join("|"))
    }
}

pub type MethodFn =
    Arc<dyn Fn(Option<&Instance>, &[DynValue]) -> Result<DynValue, BackendFault> + Send + Sync>;
pub type GetterFn = Arc<dyn Fn(Option<&Instance>) -> Result<DynValue, BackendFault> + Send + Sync>;
pub type SetterFn =
    Arc<dyn Fn(Option<&Instance>, DynValue) -> Result<(), BackendFault> + Send + Sync>;

/// One method overload.
#[derive(Clone)]
pub struct MethodInfo {
    pub declaring_type: String,
    pub name: String,
    pub receiver: Receiver,
    pub visibility: Visibility,
    /// Parameter type names, in order. Forms the overload signature.
    pub params: Vec<String>,
    pub returns: String,
    pub invoker: MethodFn,
}

impl MethodInfo {
    pub fn signature(&self) -> String {
        format!(
            "{} {}::{}({})",
            self.returns,
            self.declaring_type,
            self.name,
            self.params.join(", ")
        )
    }

    pub fn matches_params(&self, params: &[String]) -> bool {
        self.params.len() == params.len()
            && self
                .params
                .iter()
                .zip(params)
                .all(|(have, want)| have == want)
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DataKind {
    Property,
    Field,
}

/// A property or field.
#[derive(Clone)]
pub struct DataMember {
    pub declaring_type: String,
    pub name: String,
    pub kind: DataKind,
    pub receiver: Receiver,
    pub visibility: Visibility,
    pub value_type: String,
    pub getter: Option<GetterFn>,
    pub setter: Option<SetterFn>,
}

impl fmt::Debug for DataMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} {}::{}",
            self.kind, self.value_type, self.declaring_type, self.name
        )
    }
}

/// A type exposed by an SDK module.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub full_name: String,
    /// Name of the declaring module.
    pub module: String,
    /// Base type name, searched when a member is not declared here.
    pub base: Option<String>,
    pub methods: Vec<MethodHandle>,
    pub data: Vec<DataHandle>,
}

impl TypeInfo {
    pub fn new(full_name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            module: module.into(),
            base: None,
            methods: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Overloads named `name` that the scope admits, in declaration order.
    pub fn methods_named<'a>(
        &'a self,
        name: &'a str,
        scope: BindingScope,
    ) -> impl Iterator<Item = &'a MethodHandle> + 'a {
        self.methods
            .iter()
            .filter(move |m| m.name == name && scope.admits(m.receiver, m.visibility))
    }

    pub fn data_member(&self, name: &str, kind: DataKind, scope: BindingScope) -> Option<&DataHandle> {
        self.data
            .iter()
            .find(|d| d.name == name && d.kind == kind && scope.admits(d.receiver, d.visibility))
    }
}

pub type TypeHandle = Arc<TypeInfo>;
pub type MethodHandle = Arc<MethodInfo>;
pub type DataHandle = Arc<DataMember>;

/// A loaded SDK module (assembly).
pub trait ModuleInfo: Send + Sync {
    fn name(&self) -> &str;

    /// Look up a type by full name in this module only.
    fn find_type(&self, full_name: &str) -> Option<TypeHandle>;
}

/// The full set of modules loaded for the SDK.
pub trait ObjectModel: Send + Sync {
    fn modules(&self) -> Vec<Arc<dyn ModuleInfo>>;

    fn module_named(&self, name: &str) -> Option<Arc<dyn ModuleInfo>> {
        self.modules().into_iter().find(|m| m.name() == name)
    }
}
