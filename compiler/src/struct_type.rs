// struct_type.rs — Registry of compiler-generated struct types
//
// Channel combination packs several element types into one struct. Each
// distinct ordered field list gets one registered name (`cgs$N`) that the
// backends declare once; repeated requests return the same type.

use serde::Serialize;

use crate::error::ChannelError;
use crate::id::NameAllocator;
use crate::ir::Type;

/// Backends index generated structs with 8 bits.
pub const MAX_GENERATED_STRUCTS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedStruct {
    pub name: String,
    pub fields: Vec<Type>,
}

#[derive(Debug, Default)]
pub struct StructRegistry {
    structs: Vec<GeneratedStruct>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The struct type with exactly these ordered fields, registering it on
    /// first use.
    pub fn generate(
        &mut self,
        fields: &[Type],
        names: &mut NameAllocator,
    ) -> Result<Type, ChannelError> {
        if self.lookup(fields).is_none() {
            if self.structs.len() >= MAX_GENERATED_STRUCTS {
                return Err(ChannelError::TooManyStructs {
                    limit: MAX_GENERATED_STRUCTS,
                });
            }
            self.structs.push(GeneratedStruct {
                name: names.unique("cgs"),
                fields: fields.to_vec(),
            });
        }
        Ok(Type::Struct(fields.to_vec()))
    }

    pub fn lookup(&self, fields: &[Type]) -> Option<&GeneratedStruct> {
        self.structs.iter().find(|s| s.fields == fields)
    }

    /// Registered name of a struct type, if `ty` is one.
    pub fn name_of(&self, ty: &Type) -> Option<&str> {
        match ty {
            Type::Struct(fields) => self.lookup(fields).map(|s| s.name.as_str()),
            _ => None,
        }
    }

    pub fn structs(&self) -> &[GeneratedStruct] {
        &self.structs
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }
}
