// This module defines the raw debug-record layer: the flat, ID-sorted array
// handed over by the external DWARF parser. Each record carries a numeric ID,
// a nesting level, an optional sibling ID, and a tag-specific payload (base
// type, modifier, collection, member, function, variable, and so on). The
// parser pushes records through RecordStoreBuilder and seals the store, which
// verifies the one contract the rest of the pipeline depends on: IDs are
// unique and strictly ascending. Lookup is a binary search with an explicit
// boundary pre-check; a miss is an ordinary Option::None, never an error,
// because records routinely reference IDs that were not emitted for the
// binary at hand. Payload index fields (type_index and friends) start out
// unset and are filled in by the linker's fixup passes.

//! Flat debug-record store with ID-ordered binary search.
//!
//! # Key Components
//!
//! - [`RecordId`]: newtype over the parser's numeric record IDs.
//! - [`Payload`]: tag-specific record contents, one variant per record kind.
//! - [`RecordStoreBuilder`]: push-then-seal construction for the parser.
//! - [`RecordStore`]: the sealed, sorted array plus [`RecordStore::lookup`].

use crate::core::{LinkError, LinkResult};

/// Numeric identifier of one debug record, unique within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Declared visibility of a member, function, or superclass edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// Encoding class of a base-type record, as reported by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarEncoding {
    Signed,
    SignedChar,
    Unsigned,
    UnsignedChar,
    Float,
    Boolean,
}

/// Kind of a modifier-type record. Const and volatile carry no semantic
/// weight for reconstruction; pointer and reference add indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKind {
    Pointer,
    Reference,
    Const,
    Volatile,
}

/// Kind of a collection-type record. Classes arrive as structs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CollectionKind {
    #[default]
    Struct,
    Union,
    Enum,
}

/// A struct, union, or enumeration record. The child buckets hold store
/// indexes and are attached by the linker's first pass; until then they are
/// empty.
#[derive(Debug, Clone, Default)]
pub struct CollectionPayload {
    pub kind: CollectionKind,
    pub name: Option<String>,
    pub is_declaration: bool,
    /// Declared size in bytes, when the parser saw one.
    pub byte_size: u32,
    /// Back-reference to the declaration this record defines.
    pub decl_ref: Option<RecordId>,
    pub members: Vec<usize>,
    pub static_members: Vec<usize>,
    pub methods: Vec<usize>,
    pub superclasses: Vec<usize>,
    pub enumerators: Vec<usize>,
}

/// A member variable of a collection. `is_external` marks a static member
/// declared inside the class body; its definition lives in a separate
/// variable record and the linker pushes the definition's address onto
/// `global_addr` here.
#[derive(Debug, Clone, Default)]
pub struct MemberPayload {
    pub name: Option<String>,
    pub type_ref: Option<RecordId>,
    pub type_index: Option<usize>,
    /// Byte offset of the member within its aggregate.
    pub offset: u64,
    pub visibility: Option<Visibility>,
    pub is_external: bool,
    pub global_addr: u64,
}

/// A function record. `filename` is back-assigned from the nearest preceding
/// compile unit; `params` and `local_vars` are attached child indexes;
/// `is_method` is set when a collection claims the record as a member
/// function.
#[derive(Debug, Clone, Default)]
pub struct FunctionPayload {
    pub name: Option<String>,
    pub mangled_name: Option<String>,
    pub filename: Option<String>,
    pub return_type_ref: Option<RecordId>,
    pub return_type_index: Option<usize>,
    pub params: Vec<usize>,
    pub local_vars: Vec<usize>,
    pub is_external: bool,
    pub is_method: bool,
    pub is_declaration: bool,
    /// Back-reference to the declaration or abstract origin this record
    /// defines.
    pub decl_ref: Option<RecordId>,
    pub visibility: Option<Visibility>,
    pub start_pc: u64,
    pub end_pc: u64,
}

/// A formal parameter of a function. `frame_offset` is the parser-reported
/// location relative to the frame base; when the record aliases an abstract
/// origin, the linker copies this call-site-accurate offset onto the origin
/// and pulls the name and type back.
#[derive(Debug, Clone, Default)]
pub struct ParameterPayload {
    pub name: Option<String>,
    pub type_ref: Option<RecordId>,
    pub type_index: Option<usize>,
    pub frame_offset: i64,
    pub decl_ref: Option<RecordId>,
}

/// An array-type record; `subranges` is attached by the linker.
#[derive(Debug, Clone, Default)]
pub struct ArrayPayload {
    pub type_ref: Option<RecordId>,
    pub type_index: Option<usize>,
    pub subranges: Vec<usize>,
}

/// A variable record, at file scope, block scope, or inside a class body.
#[derive(Debug, Clone, Default)]
pub struct VariablePayload {
    pub name: Option<String>,
    pub mangled_name: Option<String>,
    pub type_ref: Option<RecordId>,
    pub type_index: Option<usize>,
    /// Back-reference to the declaration shell this record defines.
    pub decl_ref: Option<RecordId>,
    pub is_external: bool,
    /// The parser saw an address-valued location for this record.
    pub could_be_global: bool,
    pub is_declaration_or_artificial: bool,
    pub is_static_member: bool,
    pub global_addr: u64,
    pub frame_offset: i64,
}

/// An inheritance edge from a collection to its superclass.
#[derive(Debug, Clone, Default)]
pub struct InheritancePayload {
    pub superclass_ref: Option<RecordId>,
    pub superclass_index: Option<usize>,
    pub visibility: Option<Visibility>,
    /// Byte offset of the base-class subobject.
    pub member_offset: u64,
}

/// Tag-specific contents of one record.
#[derive(Debug, Clone)]
pub enum Payload {
    CompileUnit {
        filename: Option<String>,
        comp_dir: Option<String>,
    },
    Base {
        encoding: ScalarEncoding,
        byte_size: u32,
    },
    Modifier {
        kind: ModifierKind,
        target: Option<RecordId>,
        target_index: Option<usize>,
    },
    Collection(CollectionPayload),
    Member(MemberPayload),
    Enumerator {
        name: Option<String>,
        value: i64,
    },
    Function(FunctionPayload),
    FunctionType {
        return_type: Option<RecordId>,
        return_type_index: Option<usize>,
    },
    FormalParameter(ParameterPayload),
    ArrayType(ArrayPayload),
    Subrange {
        upper_bound: u64,
    },
    Typedef {
        name: Option<String>,
        target: Option<RecordId>,
        target_index: Option<usize>,
    },
    Variable(VariablePayload),
    Inheritance(InheritancePayload),
}

/// One parsed debug record: ID, tree position, and payload.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: RecordId,
    /// Nesting depth in the original debug-info tree. Compile units sit at
    /// level 0, their immediate children at level 1.
    pub level: u32,
    pub sibling: Option<RecordId>,
    pub payload: Payload,
}

/// Accumulates records from the parser; [`RecordStoreBuilder::seal`] checks
/// the ordering contract and produces the immutable-ID store.
#[derive(Debug, Default)]
pub struct RecordStoreBuilder {
    records: Vec<Record>,
}

impl RecordStoreBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Validate that record IDs are strictly ascending and hand over the
    /// store. Sorting is the parser's job; a violation here means the
    /// hand-off contract was broken, so it is an error rather than a silent
    /// re-sort.
    pub fn seal(self) -> LinkResult<RecordStore> {
        for index in 1..self.records.len() {
            let prev = self.records[index - 1].id;
            let cur = self.records[index].id;
            if cur == prev {
                return Err(LinkError::DuplicateId { id: cur.0 });
            }
            if cur < prev {
                return Err(LinkError::UnsortedStore { index });
            }
        }
        log::debug!("sealed record store with {} records", self.records.len());
        Ok(RecordStore {
            records: self.records,
        })
    }
}

/// The sealed, ID-sorted record array. Payloads stay mutable for the
/// linker's fixup passes; IDs and ordering never change after sealing.
#[derive(Debug)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    /// Binary-search for the record with exactly `id`. Returns the index of
    /// the match, or `None` when no record carries that ID. Targets outside
    /// the store's ID range are rejected before the search proper.
    pub fn lookup(&self, id: RecordId) -> Option<usize> {
        let first = self.records.first()?.id;
        let last = self.records.last()?.id;
        if id < first || id > last {
            return None;
        }
        self.records.binary_search_by_key(&id, |r| r.id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u64, level: u32, payload: Payload) -> Record {
        Record {
            id: RecordId(id),
            level,
            sibling: None,
            payload,
        }
    }

    fn base(byte_size: u32) -> Payload {
        Payload::Base {
            encoding: ScalarEncoding::Signed,
            byte_size,
        }
    }

    fn store_of(ids: &[u64]) -> RecordStore {
        let mut builder = RecordStoreBuilder::new();
        for &id in ids {
            builder.push(rec(id, 1, base(4)));
        }
        builder.seal().unwrap()
    }

    #[test]
    fn test_lookup_hits_every_present_id() {
        let ids = [3, 7, 8, 100, 101, 4096];
        let store = store_of(&ids);
        for (index, &id) in ids.iter().enumerate() {
            assert_eq!(store.lookup(RecordId(id)), Some(index), "id {id}");
        }
    }

    #[test]
    fn test_lookup_misses_below_min_and_above_max() {
        let store = store_of(&[10, 20, 30]);
        assert_eq!(store.lookup(RecordId(9)), None);
        assert_eq!(store.lookup(RecordId(0)), None);
        assert_eq!(store.lookup(RecordId(31)), None);
        assert_eq!(store.lookup(RecordId(u64::MAX)), None);
    }

    #[test]
    fn test_lookup_misses_between_adjacent_ids() {
        let store = store_of(&[10, 12, 40]);
        assert_eq!(store.lookup(RecordId(11)), None);
        assert_eq!(store.lookup(RecordId(13)), None);
        assert_eq!(store.lookup(RecordId(39)), None);
    }

    #[test]
    fn test_single_record_store_hits_and_misses() {
        let store = store_of(&[42]);
        assert_eq!(store.lookup(RecordId(42)), Some(0));
        assert_eq!(store.lookup(RecordId(41)), None);
        assert_eq!(store.lookup(RecordId(43)), None);
    }

    #[test]
    fn test_empty_store_lookup_misses() {
        let store = store_of(&[]);
        assert_eq!(store.lookup(RecordId(1)), None);
    }

    #[test]
    fn test_seal_rejects_unsorted_stores() {
        let mut builder = RecordStoreBuilder::new();
        builder.push(rec(5, 1, base(4)));
        builder.push(rec(9, 1, base(4)));
        builder.push(rec(7, 1, base(4)));
        match builder.seal() {
            Err(LinkError::UnsortedStore { index }) => assert_eq!(index, 2),
            other => panic!("expected UnsortedStore, got {other:?}"),
        }
    }

    #[test]
    fn test_seal_rejects_duplicate_ids() {
        let mut builder = RecordStoreBuilder::new();
        builder.push(rec(5, 1, base(4)));
        builder.push(rec(5, 1, base(8)));
        match builder.seal() {
            Err(LinkError::DuplicateId { id }) => assert_eq!(id, 5),
            other => panic!("expected DuplicateId, got {other:?}"),
        }
    }
}
