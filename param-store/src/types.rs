//! Type identities for store parameters.
//!
//! The value system that owns parameter types lives outside this crate; a
//! store only needs two facts about a key: how many bytes it occupies and
//! whether it refers to a data interface instead of plain bytes. Both are
//! derived from [`TypeDef`], a closed sum type, so no runtime type queries
//! are needed.

use std::fmt;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::error::{Result, StoreError};

/// Built-in value types with a fixed packed size.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Primitive {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Color,
    Quat,
    Matrix,
}

impl Primitive {
    /// Packed size in bytes.
    pub fn size(self) -> usize {
        match self {
            Primitive::Bool | Primitive::Int | Primitive::Float => 4,
            Primitive::Vec2 => 8,
            Primitive::Vec3 => 12,
            Primitive::Vec4 | Primitive::Color | Primitive::Quat => 16,
            Primitive::Matrix => 64,
        }
    }
}

/// Type identity of a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDef {
    Primitive(Primitive),
    /// Opaque fixed-size value type defined by the external type system.
    Struct { name: Arc<str>, size: usize },
    /// Reference to a data interface of the named class.
    DataInterface(Arc<str>),
}

/// Storage category of a parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// `size` bytes inside the packed buffer.
    Bytes(usize),
    /// One entry in the data interface table.
    Interface,
}

impl TypeDef {
    pub fn structure(name: impl Into<Arc<str>>, size: usize) -> Self {
        TypeDef::Struct {
            name: name.into(),
            size,
        }
    }

    pub fn data_interface(type_name: impl Into<Arc<str>>) -> Self {
        TypeDef::DataInterface(type_name.into())
    }

    pub fn slot_kind(&self) -> SlotKind {
        match self {
            TypeDef::Primitive(p) => SlotKind::Bytes(p.size()),
            TypeDef::Struct { size, .. } => SlotKind::Bytes(*size),
            TypeDef::DataInterface(_) => SlotKind::Interface,
        }
    }

    /// Size in bytes inside the packed buffer. Zero for data interfaces.
    pub fn size(&self) -> usize {
        match self.slot_kind() {
            SlotKind::Bytes(size) => size,
            SlotKind::Interface => 0,
        }
    }

    pub fn is_data_interface(&self) -> bool {
        matches!(self, TypeDef::DataInterface(_))
    }

    /// Class name of a data interface type.
    pub fn interface_type_name(&self) -> Option<&str> {
        match self {
            TypeDef::DataInterface(name) => Some(name),
            _ => None,
        }
    }
}

impl From<Primitive> for TypeDef {
    fn from(p: Primitive) -> Self {
        TypeDef::Primitive(p)
    }
}

impl fmt::Display for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDef::Primitive(p) => write!(f, "{}", p),
            TypeDef::Struct { name, size } => write!(f, "{}[{}]", name, size),
            TypeDef::DataInterface(name) => write!(f, "interface<{}>", name),
        }
    }
}

/// Key of a parameter: name plus type identity.
///
/// Two parameters with the same name but different types are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableKey {
    name: String,
    type_def: TypeDef,
}

impl VariableKey {
    pub fn new(type_def: impl Into<TypeDef>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_def: type_def.into(),
        }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(Primitive::Float, name)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(Primitive::Int, name)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(Primitive::Bool, name)
    }

    pub fn vec3(name: impl Into<String>) -> Self {
        Self::new(Primitive::Vec3, name)
    }

    pub fn interface(type_name: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        Self::new(TypeDef::data_interface(type_name), name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_def(&self) -> &TypeDef {
        &self.type_def
    }

    pub fn slot_kind(&self) -> SlotKind {
        self.type_def.slot_kind()
    }

    pub fn size(&self) -> usize {
        self.type_def.size()
    }

    pub fn is_data_interface(&self) -> bool {
        self.type_def.is_data_interface()
    }

    /// Same type under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_def: self.type_def.clone(),
        }
    }

    /// Fails with [`StoreError::SizeMismatch`] unless `actual` matches the
    /// key's packed size.
    pub(crate) fn check_size(&self, actual: usize) -> Result<()> {
        match self.slot_kind() {
            SlotKind::Bytes(expected) if expected == actual => Ok(()),
            SlotKind::Bytes(expected) => Err(StoreError::SizeMismatch {
                parameter: self.name.clone(),
                expected,
                actual,
            }),
            SlotKind::Interface => Err(StoreError::KindMismatch {
                parameter: self.name.clone(),
                expected: "value".to_string(),
            }),
        }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.type_def)
    }
}

/// A key that may carry initial data, used when adding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub key: VariableKey,
    data: Option<Vec<u8>>,
}

impl Variable {
    pub fn new(key: VariableKey) -> Self {
        Self { key, data: None }
    }

    /// Variable initialized with raw bytes. The length must match the key.
    pub fn with_data(key: VariableKey, data: Vec<u8>) -> Result<Self> {
        key.check_size(data.len())?;
        Ok(Self {
            key,
            data: Some(data),
        })
    }

    /// Variable initialized with a typed value.
    pub fn with_value<T: Pod>(key: VariableKey, value: T) -> Result<Self> {
        Self::with_data(key, bytemuck::bytes_of(&value).to_vec())
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn is_data_allocated(&self) -> bool {
        self.data.is_some()
    }
}

impl From<VariableKey> for Variable {
    fn from(key: VariableKey) -> Self {
        Variable::new(key)
    }
}

impl From<&VariableKey> for Variable {
    fn from(key: &VariableKey) -> Self {
        Variable::new(key.clone())
    }
}

/// Packed 4-byte boolean, the storage representation of [`Primitive::Bool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct StoreBool(u32);

impl StoreBool {
    pub const TRUE: Self = Self(1);
    pub const FALSE: Self = Self(0);

    pub fn get(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for StoreBool {
    fn from(v: bool) -> Self {
        if v { Self::TRUE } else { Self::FALSE }
    }
}

impl From<StoreBool> for bool {
    fn from(v: StoreBool) -> Self {
        v.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_primitive_names_round_trip() {
        for p in Primitive::iter() {
            assert_eq!(Primitive::from_str(&p.to_string()).unwrap(), p);
        }
        assert_eq!(Primitive::from_str("vec3").unwrap(), Primitive::Vec3);
        assert!(Primitive::from_str("vec5").is_err());
    }

    #[test]
    fn test_slot_kinds() {
        assert_eq!(VariableKey::float("a").slot_kind(), SlotKind::Bytes(4));
        assert_eq!(
            VariableKey::new(Primitive::Matrix, "m").slot_kind(),
            SlotKind::Bytes(64)
        );
        assert_eq!(
            VariableKey::new(TypeDef::structure("Range", 24), "r").size(),
            24
        );
        let di = VariableKey::interface("Curve", "c");
        assert_eq!(di.slot_kind(), SlotKind::Interface);
        assert_eq!(di.size(), 0);
        assert_eq!(di.type_def().interface_type_name(), Some("Curve"));
    }

    #[test]
    fn test_key_identity_includes_type() {
        assert_ne!(VariableKey::float("x"), VariableKey::int("x"));
        assert_eq!(VariableKey::float("x"), VariableKey::float("x"));
        let renamed = VariableKey::vec3("pos").renamed("position");
        assert_eq!(renamed, VariableKey::vec3("position"));
    }

    #[test]
    fn test_variable_with_value_checks_size() {
        let v = Variable::with_value(VariableKey::float("speed"), 3.0f32).unwrap();
        assert!(v.is_data_allocated());
        assert_eq!(v.data().unwrap().len(), 4);

        let err = Variable::with_value(VariableKey::vec3("pos"), 1.0f32).unwrap_err();
        assert_eq!(
            err,
            StoreError::SizeMismatch {
                parameter: "pos".into(),
                expected: 12,
                actual: 4
            }
        );

        assert!(matches!(
            Variable::with_value(VariableKey::interface("Curve", "c"), 0u32),
            Err(StoreError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_store_bool() {
        assert!(StoreBool::from(true).get());
        assert!(!bool::from(StoreBool::default()));
        assert_eq!(std::mem::size_of::<StoreBool>(), Primitive::Bool.size());
    }
}
