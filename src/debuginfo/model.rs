// The reconstructed program model. Everything in this module is
// self-contained after reconstruction: entities own their names and type
// references and never point back into the record store, so the store can be
// dropped once `DebugModel::build` returns. Type references are either
// scalar kinds with fixed sizes, names into the model's type table, or one
// of the opaque fallbacks. All code addresses are wrapped in
// `ProgramCounter`; raw data addresses of globals stay plain integers.

//! Reconstructed types, functions, and variables, plus the query facade.
//!
//! # Key Components
//!
//! - [`DebugModel`]: owns every reconstructed entity and answers lookups.
//! - [`TypeEntity`], [`FunctionEntity`], [`VariableEntity`]: the three
//!   entity kinds, linked by name and by program counter.
//! - [`TypeRef`] / [`ScalarKind`]: the resolved type language.
//! - [`ModelConfig`]: reconstruction switches.

use std::fmt;

use hashbrown::HashMap;

use super::records::{CollectionKind, RecordId, RecordStore, ScalarEncoding, Visibility};
use super::reconstruct::ModelBuilder;
use crate::core::containers::InsertionOrderedMap;
use crate::core::error::LinkResult;

/// Width of a data pointer on the modeled target.
pub(crate) const POINTER_BYTES: u32 = 8;

/// A code address. Wrapping these keeps function-table keys from being mixed
/// up with data addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramCounter(pub u64);

impl fmt::Display for ProgramCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// The scalar types the model distinguishes, mirroring the C base types the
/// debug records describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Char,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    LongLong,
    UnsignedLongLong,
    Float,
    Double,
    LongDouble,
    Bool,
}

impl ScalarKind {
    /// Storage size in bytes.
    pub fn byte_size(self) -> u32 {
        match self {
            ScalarKind::Char | ScalarKind::UnsignedChar | ScalarKind::Bool => 1,
            ScalarKind::Short | ScalarKind::UnsignedShort => 2,
            ScalarKind::Int | ScalarKind::UnsignedInt | ScalarKind::Float => 4,
            ScalarKind::LongLong | ScalarKind::UnsignedLongLong | ScalarKind::Double => 8,
            ScalarKind::LongDouble => 16,
        }
    }

    /// Classify a base-type record by its encoding and size. Returns `None`
    /// for combinations the model has no kind for, such as 16-byte
    /// integers.
    pub fn from_encoding(encoding: ScalarEncoding, byte_size: u32) -> Option<ScalarKind> {
        match encoding {
            ScalarEncoding::Float => match byte_size {
                4 => Some(ScalarKind::Float),
                8 => Some(ScalarKind::Double),
                16 => Some(ScalarKind::LongDouble),
                _ => None,
            },
            ScalarEncoding::Signed | ScalarEncoding::SignedChar => match byte_size {
                1 => Some(ScalarKind::Char),
                2 => Some(ScalarKind::Short),
                4 => Some(ScalarKind::Int),
                8 => Some(ScalarKind::LongLong),
                _ => None,
            },
            ScalarEncoding::Unsigned | ScalarEncoding::UnsignedChar => match byte_size {
                1 => Some(ScalarKind::UnsignedChar),
                2 => Some(ScalarKind::UnsignedShort),
                4 => Some(ScalarKind::UnsignedInt),
                8 => Some(ScalarKind::UnsignedLongLong),
                _ => None,
            },
            ScalarEncoding::Boolean => match byte_size {
                1 => Some(ScalarKind::Bool),
                _ => None,
            },
        }
    }
}

/// What a variable's base type resolved to, after all modifiers were
/// stripped off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// A scalar with a fixed storage size.
    Scalar(ScalarKind),
    /// A struct, union, or enum, by its name in the model's type table.
    Named(String),
    /// A pointer to code.
    FunctionPointer,
    /// A pointer-sized blob whose layout the model does not track.
    Opaque,
    /// No type, or a type the records could not describe.
    Void,
}

/// One direct base class of a collection.
#[derive(Debug, Clone)]
pub struct Superclass {
    pub name: String,
    pub visibility: Visibility,
    /// Byte offset of the base subobject within the derived object.
    pub offset: u64,
}

/// A member function of a collection. Methods are discovered by address
/// before the function table exists, then verified against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRef {
    /// The address found on the method's record; not yet known to be a real
    /// function-table entry.
    ByAddress(ProgramCounter),
    /// Verified start address in the function table; the function's
    /// `parent_type` points back at the collection.
    Resolved(ProgramCounter),
}

/// A reconstructed struct, union, or enum.
#[derive(Debug, Clone)]
pub struct TypeEntity {
    pub name: String,
    pub kind: CollectionKind,
    /// Aggregate size in bytes, rounded up to pointer alignment.
    pub byte_size: u32,
    pub members: Vec<VariableEntity>,
    /// Indexes into the model's global list for static data members that
    /// were spliced there.
    pub static_members: Vec<usize>,
    pub methods: Vec<MethodRef>,
    pub superclasses: Vec<Superclass>,
}

/// Where a variable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableOrigin {
    Global(GlobalOrigin),
    /// Frame-pointer-relative slot of a parameter or local.
    StackFrame { frame_offset: i64 },
    /// Field of a collection, at a byte offset within the parent named
    /// here.
    Member { offset: u64, parent: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalOrigin {
    pub address: u64,
    pub is_external: bool,
    /// File-static variables carry their defining file; externals and
    /// spliced static members do not.
    pub filename: Option<String>,
    /// For function-scoped statics, the owning function's start address.
    pub owner_start_pc: Option<ProgramCounter>,
}

/// A reconstructed variable: a global, a parameter, a local, a member, or a
/// return value.
#[derive(Debug, Clone)]
pub struct VariableEntity {
    pub name: String,
    pub ty: TypeRef,
    /// Pointer levels the model uses when walking the value at runtime.
    pub indirection: u32,
    /// Pointer levels as declared, before string and array adjustments.
    pub declared_indirection: u32,
    /// Declared as `char*` or deeper; one indirection level is folded into
    /// the string itself.
    pub is_string: bool,
    pub is_static_array: bool,
    /// Element counts per array dimension, outermost first.
    pub dimensions: Vec<u64>,
    pub origin: VariableOrigin,
}

/// A reconstructed function.
#[derive(Debug, Clone)]
pub struct FunctionEntity {
    pub name: String,
    pub mangled_name: Option<String>,
    /// Globally unique display name, derived from the mangled name when one
    /// exists.
    pub qualified_name: String,
    pub filename: Option<String>,
    pub start_pc: ProgramCounter,
    pub end_pc: ProgramCounter,
    /// Address after the prologue, where parameter slots are live. Starts
    /// equal to `start_pc` until adjusted.
    pub entry_pc: ProgramCounter,
    pub is_external: bool,
    pub visibility: Visibility,
    /// Name of the collection this function is a method of.
    pub parent_type: Option<String>,
    pub params: Vec<VariableEntity>,
    pub local_vars: Vec<VariableEntity>,
    pub return_var: Option<VariableEntity>,
}

/// Switches that control reconstruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelConfig {
    /// Skip the global-variable sweep entirely.
    pub ignore_globals: bool,
    /// Keep only externally visible globals.
    pub ignore_static_vars: bool,
}

/// The finished model: every type, function, and global reconstructed from
/// a linked record store, with the lookups the rest of the system runs on.
#[derive(Debug, Default)]
pub struct DebugModel {
    pub(crate) types: InsertionOrderedMap<String, TypeEntity>,
    pub(crate) type_names_by_record: HashMap<RecordId, String>,
    pub(crate) functions: InsertionOrderedMap<ProgramCounter, FunctionEntity>,
    pub(crate) entry_index: HashMap<ProgramCounter, ProgramCounter>,
    pub(crate) globals: Vec<VariableEntity>,
    pub(crate) global_range: Option<(u64, u64)>,
}

impl DebugModel {
    /// Reconstruct a model from a linked record store.
    pub fn build(store: &RecordStore, config: ModelConfig) -> LinkResult<DebugModel> {
        ModelBuilder::new(store, config).build()
    }

    /// Look up a collection by name.
    pub fn type_by_name(&self, name: &str) -> Option<&TypeEntity> {
        self.types.get(name)
    }

    /// Look up the collection reconstructed from a specific record.
    pub fn type_for_record(&self, id: RecordId) -> Option<&TypeEntity> {
        let name = self.type_names_by_record.get(&id)?;
        self.types.get(name.as_str())
    }

    /// All reconstructed collections, in reconstruction order.
    pub fn types(&self) -> impl Iterator<Item = &TypeEntity> {
        self.types.values()
    }

    /// Look up a function by its start address.
    pub fn function_by_start(&self, pc: ProgramCounter) -> Option<&FunctionEntity> {
        self.functions.get(&pc)
    }

    /// Look up a function by its post-prologue entry address.
    pub fn function_by_entry(&self, pc: ProgramCounter) -> Option<&FunctionEntity> {
        let start = self.entry_index.get(&pc)?;
        self.functions.get(start)
    }

    /// Look up a function by its qualified display name. Linear scan; name
    /// lookups are rare next to address lookups.
    pub fn function_by_qualified_name(&self, name: &str) -> Option<&FunctionEntity> {
        self.functions.values().find(|f| f.qualified_name == name)
    }

    /// Find the function whose address range contains `pc`. Both range ends
    /// are inclusive.
    pub fn function_containing(&self, pc: ProgramCounter) -> Option<&FunctionEntity> {
        self.functions
            .values()
            .find(|f| f.start_pc <= pc && pc <= f.end_pc)
    }

    /// All reconstructed functions, in reconstruction order.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionEntity> {
        self.functions.values()
    }

    /// All reconstructed global variables, including spliced static
    /// members.
    pub fn globals(&self) -> &[VariableEntity] {
        &self.globals
    }

    /// The address span `[lowest, highest)` covered by globals, when any
    /// global has a nonzero address.
    pub fn global_address_range(&self) -> Option<(u64, u64)> {
        self.global_range
    }

    /// Total storage size of a variable, accounting for indirection and
    /// static-array dimensions.
    pub fn variable_byte_size(&self, var: &VariableEntity) -> u64 {
        variable_byte_size_in(&self.types, var)
    }

    /// Record the post-prologue entry address of the function starting at
    /// `start`, and re-key the entry index. Unknown starts are ignored.
    pub fn set_entry_pc(&mut self, start: ProgramCounter, entry: ProgramCounter) {
        let Some(f) = self.functions.get_mut(&start) else {
            return;
        };
        let old = f.entry_pc;
        f.entry_pc = entry;
        self.entry_index.remove(&old);
        self.entry_index.insert(entry, start);
    }
}

/// Size of a variable given a type table. Pointers are pointer-sized;
/// static arrays multiply the element size out over every dimension.
pub(crate) fn variable_byte_size_in(
    types: &InsertionOrderedMap<String, TypeEntity>,
    var: &VariableEntity,
) -> u64 {
    if var.declared_indirection == 0 {
        return u64::from(type_byte_size_in(types, &var.ty));
    }
    if var.is_static_array {
        let element = if var.declared_indirection == 1 {
            u64::from(type_byte_size_in(types, &var.ty))
        } else {
            u64::from(POINTER_BYTES)
        };
        return var.dimensions.iter().map(|d| d + 1).product::<u64>() * element;
    }
    u64::from(POINTER_BYTES)
}

pub(crate) fn type_byte_size_in(
    types: &InsertionOrderedMap<String, TypeEntity>,
    ty: &TypeRef,
) -> u32 {
    match ty {
        TypeRef::Scalar(kind) => kind.byte_size(),
        TypeRef::Named(name) => types.get(name.as_str()).map_or(0, |t| t.byte_size),
        TypeRef::FunctionPointer | TypeRef::Opaque => POINTER_BYTES,
        TypeRef::Void => 0,
    }
}
