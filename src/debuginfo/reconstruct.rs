// Reconstruction walks a linked record store and produces the model the
// rest of the system queries. The function table is built first, globals are
// swept second, and member functions are resolved against the finished
// table last. Types are materialized on demand: the first variable whose
// type chain reaches a collection builds the entity, and a shell entry is
// inserted before the members are walked so self-referential chains
// terminate. Declaration-only collections are redirected through a
// name-to-definition table built up front, since the definition may live in
// a different compile unit than the variable that references it.
//
// Variable reconstruction follows a fixed order: name filter, modifier
// strip, opaque punt, parameter decay, base classification, string
// detection, multidimensional collapse. The order matters: decay must see
// the array flag before classification can fold it away, and the collapse
// threshold reads the pre-string indirection count.

//! Model reconstruction from linked debug records.
//!
//! # Key Components
//!
//! - [`ModelBuilder`]: drives reconstruction; [`DebugModel::build`] is the
//!   public entry point.
//! - Variable reconstruction with modifier stripping, string detection,
//!   and array handling.
//! - The global-variable sweep with address-based deduplication.
//! - Qualified-name derivation and collision handling for the function
//!   table.

use hashbrown::HashMap;

use super::model::{
    variable_byte_size_in, DebugModel, FunctionEntity, GlobalOrigin, MethodRef, ModelConfig,
    ProgramCounter, ScalarKind, Superclass, TypeEntity, TypeRef, VariableEntity, VariableOrigin,
};
use super::records::{
    CollectionKind, CollectionPayload, FunctionPayload, ModifierKind, Payload, Record, RecordStore,
    VariablePayload,
};
use crate::core::containers::InsertionOrderedMap;
use crate::core::error::{LinkError, LinkResult};

/// Name given to the synthesized return-value variable of every function.
const RETURN_VALUE_NAME: &str = "return";

/// Enumerations are modeled as 4-byte integers.
const ENUM_BYTES: u32 = 4;

/// Marker symbol emitted by glibc into every executable; never a real
/// global.
const STDIN_MARKER_NAME: &str = "_IO_stdin_used";

// Compiler- and runtime-internal names that would otherwise flood the
// model.
const IGNORED_FUNCTION_PREFIXES: &[&str] = &[
    "__static_initialization_and_destruction",
    "._",
    "_S_",
    "_M_",
    "_GLOBAL",
];
const IGNORED_FUNCTION_NAMES: &[&str] = &["_Alloc_hider", "~_Alloc_hider", "_Rep"];
const IGNORED_VARIABLE_NAMES: &[&str] = &["__ioinit"];
const IGNORED_VARIABLE_PREFIXES: &[&str] = &["_vptr.", "_ZTI", "_ZTS"];
const IGNORED_TYPE_PREFIXES: &[&str] = &["_IO"];

fn ignored_function_name(name: &str) -> bool {
    IGNORED_FUNCTION_NAMES.iter().any(|n| *n == name)
        || IGNORED_FUNCTION_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn ignored_variable_name(name: &str) -> bool {
    IGNORED_VARIABLE_NAMES.iter().any(|n| *n == name)
        || IGNORED_VARIABLE_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn ignored_type_name(name: &str) -> bool {
    IGNORED_TYPE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Derive the globally unique display name of a function. Externals are
/// prefixed with a bare dot; file-scoped functions are prefixed with their
/// filename, sanitized so the result stays printable as an identifier.
fn qualified_name(name: &str, is_external: bool, filename: Option<&str>) -> String {
    let class = if is_external {
        "."
    } else {
        filename.unwrap_or(".")
    };
    let mut out = String::with_capacity(class.len() + name.len() + 3);
    for ch in class.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '/' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out.push('.');
    out.push_str(name);
    out.push_str("()");
    out
}

/// Find the function a nested variable belongs to: the nearest preceding
/// function record at a shallower nesting level. Address zero means the
/// function was never emitted, so no owner is reported.
fn owning_function_start(records: &[Record], index: usize) -> Option<ProgramCounter> {
    let level = records[index].level;
    for rec in records[..index].iter().rev() {
        if let Payload::Function(f) = &rec.payload {
            if rec.level < level {
                return if f.start_pc != 0 {
                    Some(ProgramCounter(f.start_pc))
                } else {
                    None
                };
            }
        }
    }
    None
}

/// The filename of the nearest preceding compile unit.
fn filename_for(records: &[Record], index: usize) -> Option<String> {
    for rec in records[..index].iter().rev() {
        if let Payload::CompileUnit { filename, .. } = &rec.payload {
            return filename.clone();
        }
    }
    None
}

fn collection_at(records: &[Record], index: usize) -> LinkResult<&CollectionPayload> {
    match &records[index].payload {
        Payload::Collection(c) => Ok(c),
        _ => Err(LinkError::MalformedRecord {
            id: records[index].id.0,
            reason: "expected a collection record".to_string(),
        }),
    }
}

/// Builds a [`DebugModel`] from a linked record store.
pub(crate) struct ModelBuilder<'a> {
    store: &'a RecordStore,
    config: ModelConfig,
    /// First definition index for every named collection, used to redirect
    /// declaration-only records.
    canonical: HashMap<String, usize>,
    types: InsertionOrderedMap<String, TypeEntity>,
    type_names_by_record: HashMap<super::records::RecordId, String>,
    functions: InsertionOrderedMap<ProgramCounter, FunctionEntity>,
    globals: Vec<VariableEntity>,
    /// First name seen at every global address, for deduplication across
    /// compile units.
    global_addr_names: HashMap<u64, String>,
}

impl<'a> ModelBuilder<'a> {
    pub(crate) fn new(store: &'a RecordStore, config: ModelConfig) -> ModelBuilder<'a> {
        ModelBuilder {
            store,
            config,
            canonical: HashMap::new(),
            types: InsertionOrderedMap::new(),
            type_names_by_record: HashMap::new(),
            functions: InsertionOrderedMap::new(),
            globals: Vec::new(),
            global_addr_names: HashMap::new(),
        }
    }

    pub(crate) fn build(mut self) -> LinkResult<DebugModel> {
        self.register_canonical_names();
        self.build_function_table()?;
        if !self.config.ignore_globals {
            self.collect_globals()?;
        }
        self.resolve_member_functions();
        self.finish()
    }

    fn register_canonical_names(&mut self) {
        let records = self.store.records();
        for (i, rec) in records.iter().enumerate() {
            let Payload::Collection(c) = &rec.payload else {
                continue;
            };
            if c.is_declaration {
                continue;
            }
            let Some(name) = &c.name else { continue };
            self.canonical.entry(name.clone()).or_insert(i);
        }
    }

    fn build_function_table(&mut self) -> LinkResult<()> {
        let records = self.store.records();
        let mut added = 0usize;
        for rec in records.iter() {
            let Payload::Function(f) = &rec.payload else {
                continue;
            };
            let Some(name) = f.name.clone() else { continue };
            if f.start_pc == 0 || f.is_declaration || ignored_function_name(&name) {
                continue;
            }
            let pc = ProgramCounter(f.start_pc);
            if self.functions.contains_key(&pc) {
                // Identical inline copies can repeat an address.
                continue;
            }
            let entity = self.build_function(records, f, name)?;
            self.functions.insert(pc, entity);
            added += 1;
        }
        if added == 0 {
            return Err(LinkError::NoFunctions);
        }
        log::debug!("built function table with {added} entries");
        Ok(())
    }

    fn build_function(
        &mut self,
        records: &'a [Record],
        f: &'a FunctionPayload,
        name: String,
    ) -> LinkResult<FunctionEntity> {
        let mut params = Vec::new();
        for &pi in &f.params {
            let Payload::FormalParameter(p) = &records[pi].payload else {
                return Err(LinkError::MalformedRecord {
                    id: records[pi].id.0,
                    reason: "expected a formal-parameter record".to_string(),
                });
            };
            let Some(param_name) = &p.name else {
                log::debug!("skipping unnamed parameter of {name}");
                continue;
            };
            let origin = VariableOrigin::StackFrame {
                frame_offset: p.frame_offset,
            };
            if let Some(var) = self.reconstruct_variable(p.type_index, param_name, origin, true)? {
                params.push(var);
            }
        }

        let mut local_vars = Vec::new();
        for &vi in &f.local_vars {
            let Payload::Variable(v) = &records[vi].payload else {
                return Err(LinkError::MalformedRecord {
                    id: records[vi].id.0,
                    reason: "expected a variable record".to_string(),
                });
            };
            if v.could_be_global {
                // Function-scoped statics are picked up by the global
                // sweep.
                continue;
            }
            let Some(var_name) = &v.name else { continue };
            let origin = VariableOrigin::StackFrame {
                frame_offset: v.frame_offset,
            };
            if let Some(var) = self.reconstruct_variable(v.type_index, var_name, origin, false)? {
                if self.tracked_local(&var) {
                    local_vars.push(var);
                }
            }
        }

        let return_var = match f.return_type_index {
            Some(ti) => self.reconstruct_variable(
                Some(ti),
                RETURN_VALUE_NAME,
                VariableOrigin::StackFrame { frame_offset: 0 },
                false,
            )?,
            None => None,
        };

        Ok(FunctionEntity {
            qualified_name: qualified_name(&name, f.is_external, f.filename.as_deref()),
            name,
            mangled_name: f.mangled_name.clone(),
            filename: f.filename.clone(),
            start_pc: ProgramCounter(f.start_pc),
            end_pc: ProgramCounter(f.end_pc),
            entry_pc: ProgramCounter(f.start_pc),
            is_external: f.is_external,
            visibility: f.visibility.unwrap_or_default(),
            parent_type: None,
            params,
            local_vars,
            return_var,
        })
    }

    /// Only locals with observable memory are tracked: static arrays and
    /// directly embedded aggregates. Scalars and pointers live in
    /// registers too often to be worth modeling.
    fn tracked_local(&self, var: &VariableEntity) -> bool {
        if var.is_static_array {
            return true;
        }
        if var.declared_indirection != 0 {
            return false;
        }
        if let TypeRef::Named(n) = &var.ty {
            return self
                .types
                .get(n.as_str())
                .map_or(false, |t| t.kind != CollectionKind::Enum);
        }
        false
    }

    fn collect_globals(&mut self) -> LinkResult<()> {
        let records = self.store.records();
        for (i, rec) in records.iter().enumerate() {
            let Payload::Variable(v) = &rec.payload else {
                continue;
            };
            if !v.could_be_global
                || v.global_addr == 0
                || v.is_static_member
                || v.decl_ref.is_some()
                || v.is_declaration_or_artificial
            {
                continue;
            }
            let Some(name) = &v.name else { continue };
            if name == STDIN_MARKER_NAME {
                continue;
            }
            // The same global shows up once per compile unit that includes
            // its header. The first name at an address wins; a different
            // name at the same address is a distinct view (an alias or a
            // union of linkage names) and is kept without re-registering.
            match self.global_addr_names.get(&v.global_addr) {
                Some(first) if first == name => continue,
                Some(_) => {}
                None => {
                    self.global_addr_names.insert(v.global_addr, name.clone());
                }
            }
            self.extract_one_global(records, i, v)?;
        }
        Ok(())
    }

    fn extract_one_global(
        &mut self,
        records: &'a [Record],
        index: usize,
        v: &'a VariablePayload,
    ) -> LinkResult<()> {
        if self.config.ignore_static_vars && !v.is_external {
            return Ok(());
        }
        let Some(name) = &v.name else { return Ok(()) };
        let level = records[index].level;
        let owner_start_pc = if level > 1 {
            owning_function_start(records, index)
        } else {
            None
        };
        let filename = if v.is_external {
            None
        } else {
            filename_for(records, index)
        };
        let origin = VariableOrigin::Global(GlobalOrigin {
            address: v.global_addr,
            is_external: v.is_external,
            filename,
            owner_start_pc,
        });
        if let Some(var) = self.reconstruct_variable(v.type_index, name, origin, false)? {
            self.globals.push(var);
        }
        Ok(())
    }

    /// Rebuild one variable from its declared type chain.
    ///
    /// The chain is walked from the declaration inward: pointers and
    /// references add indirection, const and volatile are transparent,
    /// array layers set the static-array flag and replace the dimension
    /// list, and typedefs are followed. What remains is the base type.
    /// Formal parameters then lose their array-ness, since arrays decay to
    /// pointers at call boundaries. A signed-char base with indirection
    /// marks the variable as a string and folds one level into it.
    /// Multidimensional pointer arrays collapse to opaque pointers; their
    /// element layout is not modeled.
    fn reconstruct_variable(
        &mut self,
        declared_type: Option<usize>,
        name: &str,
        origin: VariableOrigin,
        is_formal_param: bool,
    ) -> LinkResult<Option<VariableEntity>> {
        if ignored_variable_name(name) {
            log::debug!("skipping compiler-internal variable {name}");
            return Ok(None);
        }
        let records = self.store.records();

        let mut ptr_levels: u32 = 0;
        let mut is_static_array = false;
        let mut dimensions: Vec<u64> = Vec::new();
        let mut cursor = declared_type;
        while let Some(i) = cursor {
            match &records[i].payload {
                Payload::Modifier {
                    kind: ModifierKind::Pointer | ModifierKind::Reference,
                    target_index,
                    ..
                } => {
                    ptr_levels += 1;
                    cursor = *target_index;
                }
                Payload::Modifier { target_index, .. } => cursor = *target_index,
                Payload::ArrayType(a) => {
                    is_static_array = true;
                    // Inner array layers replace outer dimensions.
                    dimensions = a
                        .subranges
                        .iter()
                        .filter_map(|&s| match &records[s].payload {
                            Payload::Subrange { upper_bound } => Some(*upper_bound),
                            _ => None,
                        })
                        .collect();
                    ptr_levels += 1;
                    cursor = a.type_index;
                }
                Payload::Typedef { target_index, .. } => cursor = *target_index,
                _ => break,
            }
        }

        // Structures on the ignored-type list are never looked inside;
        // anything reaching one through a pointer becomes an opaque
        // pointer as-is.
        if let Some(base) = cursor {
            if let Payload::Collection(c) = &records[base].payload {
                if c.kind != CollectionKind::Enum && ptr_levels > 0 {
                    if let Some(type_name) = &c.name {
                        if ignored_type_name(type_name) {
                            return Ok(Some(VariableEntity {
                                name: name.to_string(),
                                ty: TypeRef::Opaque,
                                indirection: ptr_levels,
                                declared_indirection: ptr_levels,
                                is_string: false,
                                is_static_array,
                                dimensions,
                                origin,
                            }));
                        }
                    }
                }
            }
        }

        if is_formal_param && is_static_array {
            is_static_array = false;
            dimensions.clear();
        }

        let mut ty = self.type_ref_for(cursor)?;
        let char_base = matches!(ty, TypeRef::Scalar(ScalarKind::Char));
        let mut indirection = ptr_levels;
        let mut declared = ptr_levels;
        let mut is_string = false;
        if char_base && indirection > 0 {
            is_string = true;
            indirection -= 1;
        }
        let collapse_at = if char_base { 2 } else { 1 };
        if is_static_array && ptr_levels > collapse_at {
            indirection = 1;
            declared = 1;
            ty = TypeRef::Opaque;
        }

        Ok(Some(VariableEntity {
            name: name.to_string(),
            ty,
            indirection,
            declared_indirection: declared,
            is_string,
            is_static_array,
            dimensions,
            origin,
        }))
    }

    /// Classify the base of a stripped type chain.
    fn type_ref_for(&mut self, base: Option<usize>) -> LinkResult<TypeRef> {
        let records = self.store.records();
        let Some(i) = base else {
            return Ok(TypeRef::Void);
        };
        match &records[i].payload {
            Payload::Base {
                encoding,
                byte_size,
            } => match ScalarKind::from_encoding(*encoding, *byte_size) {
                Some(kind) => Ok(TypeRef::Scalar(kind)),
                None => {
                    log::debug!(
                        "no scalar kind for {encoding:?} of {byte_size} bytes, treating as void"
                    );
                    Ok(TypeRef::Void)
                }
            },
            Payload::FunctionType { .. } => Ok(TypeRef::FunctionPointer),
            Payload::Collection(c) if c.kind == CollectionKind::Enum => {
                Ok(TypeRef::Named(self.ensure_enum(i)?))
            }
            Payload::Collection(_) => Ok(TypeRef::Named(self.ensure_aggregate(i)?)),
            _ => Ok(TypeRef::Void),
        }
    }

    /// Redirect a declaration-only collection to its definition, when one
    /// was registered.
    fn canonical_index(&self, index: usize) -> usize {
        let records = self.store.records();
        if let Payload::Collection(c) = &records[index].payload {
            if c.is_declaration {
                if let Some(n) = &c.name {
                    if let Some(&real) = self.canonical.get(n.as_str()) {
                        return real;
                    }
                }
            }
        }
        index
    }

    fn ensure_enum(&mut self, index: usize) -> LinkResult<String> {
        let records = self.store.records();
        let original_id = records[index].id;
        let index = self.canonical_index(index);
        let c = collection_at(records, index)?;
        let id = records[index].id;
        let name = match &c.name {
            Some(n) => n.clone(),
            None => format!("unnamed_0x{:x}", id.0),
        };
        self.type_names_by_record
            .entry(original_id)
            .or_insert_with(|| name.clone());
        self.type_names_by_record
            .entry(id)
            .or_insert_with(|| name.clone());
        if self.types.contains_key(name.as_str()) {
            return Ok(name);
        }
        self.types.insert(
            name.clone(),
            TypeEntity {
                name: name.clone(),
                kind: CollectionKind::Enum,
                byte_size: ENUM_BYTES,
                members: Vec::new(),
                static_members: Vec::new(),
                methods: Vec::new(),
                superclasses: Vec::new(),
            },
        );
        Ok(name)
    }

    fn ensure_aggregate(&mut self, index: usize) -> LinkResult<String> {
        let records = self.store.records();
        let original_id = records[index].id;
        let index = self.canonical_index(index);
        let c = collection_at(records, index)?;
        let id = records[index].id;
        let name = match &c.name {
            Some(n) => n.clone(),
            None => format!("unnamed_0x{:x}", id.0),
        };
        self.type_names_by_record
            .entry(original_id)
            .or_insert_with(|| name.clone());
        self.type_names_by_record
            .entry(id)
            .or_insert_with(|| name.clone());
        if self.types.contains_key(name.as_str()) {
            return Ok(name);
        }

        // A shell goes in first so a member chain that leads back here
        // finds the name and stops.
        self.types.insert(
            name.clone(),
            TypeEntity {
                name: name.clone(),
                kind: c.kind,
                byte_size: c.byte_size,
                members: Vec::new(),
                static_members: Vec::new(),
                methods: Vec::new(),
                superclasses: Vec::new(),
            },
        );

        let mut members = Vec::new();
        for &mi in &c.members {
            let Payload::Member(m) = &records[mi].payload else {
                continue;
            };
            let Some(member_name) = &m.name else { continue };
            let origin = VariableOrigin::Member {
                offset: m.offset,
                parent: name.clone(),
            };
            if let Some(var) = self.reconstruct_variable(m.type_index, member_name, origin, false)?
            {
                members.push(var);
            }
        }

        // The aggregate spans up to the end of its last member, rounded up
        // to pointer alignment. Memberless collections keep whatever size
        // the record declared.
        let byte_size = match members.last() {
            Some(last) => {
                let offset = match &last.origin {
                    VariableOrigin::Member { offset, .. } => *offset,
                    _ => 0,
                };
                let span = offset + variable_byte_size_in(&self.types, last);
                (((span + 7) >> 3) << 3) as u32
            }
            None => c.byte_size,
        };

        // Static data members live at fixed addresses like globals, and
        // are spliced into the global list under their linkage name.
        let mut static_members = Vec::new();
        for &si in &c.static_members {
            let (static_name, addr, is_external, type_index) = match &records[si].payload {
                Payload::Variable(v) => (
                    v.mangled_name.clone().or_else(|| v.name.clone()),
                    v.global_addr,
                    v.is_external,
                    v.type_index,
                ),
                Payload::Member(m) => (m.name.clone(), m.global_addr, m.is_external, m.type_index),
                _ => continue,
            };
            if addr == 0 {
                continue;
            }
            let Some(static_name) = static_name else {
                continue;
            };
            let origin = VariableOrigin::Global(GlobalOrigin {
                address: addr,
                is_external,
                filename: None,
                owner_start_pc: None,
            });
            if let Some(var) = self.reconstruct_variable(type_index, &static_name, origin, false)? {
                static_members.push(self.globals.len());
                self.globals.push(var);
            }
        }

        let mut methods = Vec::new();
        for &fi in &c.methods {
            if let Payload::Function(func) = &records[fi].payload {
                if func.start_pc != 0 {
                    methods.push(MethodRef::ByAddress(ProgramCounter(func.start_pc)));
                }
            }
        }

        let mut superclasses = Vec::new();
        for &ii in &c.superclasses {
            let Payload::Inheritance(inh) = &records[ii].payload else {
                continue;
            };
            let Some(ti) = inh.superclass_index else {
                continue;
            };
            if !matches!(records[ti].payload, Payload::Collection(_)) {
                continue;
            }
            let super_name = self.ensure_aggregate(ti)?;
            superclasses.push(Superclass {
                name: super_name,
                visibility: inh.visibility.unwrap_or_default(),
                offset: inh.member_offset,
            });
        }

        if let Some(entity) = self.types.get_mut(name.as_str()) {
            entity.members = members;
            entity.byte_size = byte_size;
            entity.static_members = static_members;
            entity.methods = methods;
            entity.superclasses = superclasses;
        }
        Ok(name)
    }

    /// Verify method addresses against the function table. A hit upgrades
    /// the method reference and back-links the function to its class.
    fn resolve_member_functions(&mut self) {
        let mut parents: Vec<(ProgramCounter, String)> = Vec::new();
        for entity in self.types.values_mut() {
            for method in entity.methods.iter_mut() {
                let MethodRef::ByAddress(pc) = *method else {
                    continue;
                };
                if self.functions.contains_key(&pc) {
                    *method = MethodRef::Resolved(pc);
                    parents.push((pc, entity.name.clone()));
                }
            }
        }
        for (pc, type_name) in parents {
            if let Some(f) = self.functions.get_mut(&pc) {
                f.parent_type = Some(type_name);
            }
        }
    }

    /// Qualified names must be unique. The first holder keeps its name;
    /// later holders are re-derived with a filename prefix, and a name
    /// that still collides drops its function from the table.
    fn disambiguate_function_names(&mut self) {
        let starts: Vec<ProgramCounter> = self.functions.keys().copied().collect();
        let mut seen: HashMap<String, ProgramCounter> = HashMap::new();
        for pc in starts {
            let (qualified, candidate) = {
                let Some(f) = self.functions.get(&pc) else {
                    continue;
                };
                (
                    f.qualified_name.clone(),
                    qualified_name(&f.name, false, f.filename.as_deref()),
                )
            };
            if !seen.contains_key(qualified.as_str()) {
                seen.insert(qualified, pc);
                continue;
            }
            if seen.contains_key(candidate.as_str()) {
                log::warn!("dropping function at {pc}: qualified name {candidate} is taken");
                self.functions.remove(&pc);
                continue;
            }
            if let Some(f) = self.functions.get_mut(&pc) {
                f.qualified_name = candidate.clone();
            }
            seen.insert(candidate, pc);
        }
    }

    fn finish(mut self) -> LinkResult<DebugModel> {
        self.disambiguate_function_names();

        let mut entry_index = HashMap::new();
        for (pc, f) in self.functions.iter() {
            entry_index.insert(f.entry_pc, *pc);
        }

        let mut lowest: Option<u64> = None;
        let mut highest: Option<(u64, u64)> = None;
        for g in &self.globals {
            let VariableOrigin::Global(origin) = &g.origin else {
                continue;
            };
            if origin.address == 0 {
                continue;
            }
            let size = variable_byte_size_in(&self.types, g);
            if lowest.map_or(true, |l| origin.address < l) {
                lowest = Some(origin.address);
            }
            if highest.map_or(true, |(h, _)| origin.address > h) {
                highest = Some((origin.address, size));
            }
        }
        let global_range = match (lowest, highest) {
            (Some(low), Some((high, size))) => Some((low, high + size)),
            _ => None,
        };

        log::debug!(
            "reconstructed {} types, {} functions, {} globals",
            self.types.len(),
            self.functions.len(),
            self.globals.len()
        );

        Ok(DebugModel {
            types: self.types,
            type_names_by_record: self.type_names_by_record,
            functions: self.functions,
            entry_index,
            globals: self.globals,
            global_range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debuginfo::linker::link;
    use crate::debuginfo::records::{
        ArrayPayload, MemberPayload, ParameterPayload, RecordId, RecordStoreBuilder,
        ScalarEncoding, Visibility,
    };

    fn rec(id: u64, level: u32, payload: Payload) -> Record {
        Record {
            id: RecordId(id),
            level,
            sibling: None,
            payload,
        }
    }

    fn linked_store(records: Vec<Record>) -> RecordStore {
        let mut builder = RecordStoreBuilder::new();
        for r in records {
            builder.push(r);
        }
        let mut store = builder.seal().unwrap();
        link(&mut store);
        store
    }

    fn model(records: Vec<Record>) -> DebugModel {
        DebugModel::build(&linked_store(records), ModelConfig::default()).unwrap()
    }

    fn int_base(id: u64) -> Record {
        rec(
            id,
            1,
            Payload::Base {
                encoding: ScalarEncoding::Signed,
                byte_size: 4,
            },
        )
    }

    fn char_base(id: u64) -> Record {
        rec(
            id,
            1,
            Payload::Base {
                encoding: ScalarEncoding::SignedChar,
                byte_size: 1,
            },
        )
    }

    fn double_base(id: u64) -> Record {
        rec(
            id,
            1,
            Payload::Base {
                encoding: ScalarEncoding::Float,
                byte_size: 8,
            },
        )
    }

    fn pointer(id: u64, target: u64) -> Record {
        rec(
            id,
            1,
            Payload::Modifier {
                kind: ModifierKind::Pointer,
                target: Some(RecordId(target)),
                target_index: None,
            },
        )
    }

    fn array(id: u64, target: u64) -> Record {
        rec(
            id,
            1,
            Payload::ArrayType(ArrayPayload {
                type_ref: Some(RecordId(target)),
                ..Default::default()
            }),
        )
    }

    fn subrange(id: u64, upper: u64) -> Record {
        rec(id, 2, Payload::Subrange { upper_bound: upper })
    }

    fn function(id: u64, name: &str, start: u64) -> Record {
        rec(
            id,
            1,
            Payload::Function(FunctionPayload {
                name: Some(name.to_string()),
                start_pc: start,
                end_pc: start + 0x80,
                is_external: true,
                ..Default::default()
            }),
        )
    }

    fn param(id: u64, name: &str, ty: u64, offset: i64) -> Record {
        rec(
            id,
            2,
            Payload::FormalParameter(ParameterPayload {
                name: Some(name.to_string()),
                type_ref: Some(RecordId(ty)),
                frame_offset: offset,
                ..Default::default()
            }),
        )
    }

    fn local(id: u64, name: &str, ty: u64) -> Record {
        rec(
            id,
            2,
            Payload::Variable(VariablePayload {
                name: Some(name.to_string()),
                type_ref: Some(RecordId(ty)),
                frame_offset: -16,
                ..Default::default()
            }),
        )
    }

    fn struct_def(id: u64, name: &str, byte_size: u32) -> Record {
        rec(
            id,
            1,
            Payload::Collection(CollectionPayload {
                kind: CollectionKind::Struct,
                name: Some(name.to_string()),
                byte_size,
                ..Default::default()
            }),
        )
    }

    fn member_at(id: u64, name: &str, ty: u64, offset: u64) -> Record {
        rec(
            id,
            2,
            Payload::Member(MemberPayload {
                name: Some(name.to_string()),
                type_ref: Some(RecordId(ty)),
                offset,
                ..Default::default()
            }),
        )
    }

    fn global_var(id: u64, name: &str, ty: u64, addr: u64) -> Record {
        rec(
            id,
            1,
            Payload::Variable(VariablePayload {
                name: Some(name.to_string()),
                type_ref: Some(RecordId(ty)),
                could_be_global: true,
                is_external: true,
                global_addr: addr,
                ..Default::default()
            }),
        )
    }

    fn compile_unit(id: u64, filename: &str) -> Record {
        rec(
            id,
            0,
            Payload::CompileUnit {
                filename: Some(filename.to_string()),
                comp_dir: None,
            },
        )
    }

    #[test]
    fn test_scalar_parameters_carry_kind_and_frame_offset() {
        let m = model(vec![
            int_base(1),
            double_base(2),
            function(3, "main", 0x1000),
            param(4, "a", 1, 8),
            param(5, "b", 2, 16),
        ]);
        let f = m.function_by_start(ProgramCounter(0x1000)).unwrap();
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].ty, TypeRef::Scalar(ScalarKind::Int));
        assert_eq!(
            f.params[0].origin,
            VariableOrigin::StackFrame { frame_offset: 8 }
        );
        assert_eq!(f.params[1].ty, TypeRef::Scalar(ScalarKind::Double));
        assert!(f.return_var.is_none());
    }

    #[test]
    fn test_parameter_arrays_decay_but_local_arrays_do_not() {
        let m = model(vec![
            int_base(1),
            array(2, 1),
            subrange(3, 9),
            function(4, "main", 0x1000),
            param(5, "arr", 2, 8),
            local(6, "buf", 2),
        ]);
        let f = m.function_by_start(ProgramCounter(0x1000)).unwrap();

        let arr = &f.params[0];
        assert!(!arr.is_static_array);
        assert!(arr.dimensions.is_empty());
        assert_eq!(arr.indirection, 1);
        assert_eq!(arr.declared_indirection, 1);
        assert_eq!(arr.ty, TypeRef::Scalar(ScalarKind::Int));

        let buf = &f.local_vars[0];
        assert!(buf.is_static_array);
        assert_eq!(buf.dimensions, [9]);
        assert_eq!(m.variable_byte_size(buf), 40);
    }

    #[test]
    fn test_signed_char_pointers_are_strings() {
        let m = model(vec![
            char_base(1),
            pointer(2, 1),
            rec(
                3,
                1,
                Payload::Base {
                    encoding: ScalarEncoding::Unsigned,
                    byte_size: 1,
                },
            ),
            pointer(4, 3),
            function(5, "main", 0x1000),
            param(6, "s", 2, 8),
            param(7, "u", 4, 16),
        ]);
        let f = m.function_by_start(ProgramCounter(0x1000)).unwrap();

        let s = &f.params[0];
        assert!(s.is_string);
        assert_eq!(s.indirection, 0);
        assert_eq!(s.declared_indirection, 1);

        let u = &f.params[1];
        assert!(!u.is_string);
        assert_eq!(u.indirection, 1);
    }

    #[test]
    fn test_pointer_arrays_collapse_to_opaque() {
        let m = model(vec![
            int_base(1),
            pointer(2, 1),
            array(3, 2),
            subrange(4, 4),
            function(5, "main", 0x1000),
            local(6, "table", 3),
        ]);
        let f = m.function_by_start(ProgramCounter(0x1000)).unwrap();
        let table = &f.local_vars[0];
        assert_eq!(table.ty, TypeRef::Opaque);
        assert_eq!(table.indirection, 1);
        assert_eq!(table.declared_indirection, 1);
        assert!(table.is_static_array);
        assert_eq!(table.dimensions, [4]);
    }

    #[test]
    fn test_struct_members_and_byte_size_rounding() {
        let m = model(vec![
            int_base(1),
            char_base(2),
            struct_def(3, "Point", 8),
            member_at(4, "x", 1, 0),
            member_at(5, "y", 1, 4),
            struct_def(6, "Odd", 1),
            member_at(7, "c", 2, 0),
            pointer(8, 3),
            pointer(9, 6),
            function(10, "main", 0x1000),
            param(11, "p", 8, 8),
            param(12, "q", 9, 16),
        ]);

        let point = m.type_by_name("Point").unwrap();
        assert_eq!(point.members.len(), 2);
        assert_eq!(point.members[0].name, "x");
        assert_eq!(
            point.members[1].origin,
            VariableOrigin::Member {
                offset: 4,
                parent: "Point".to_string()
            }
        );
        assert_eq!(point.byte_size, 8);

        // One char spans a single byte but the aggregate rounds up.
        let odd = m.type_by_name("Odd").unwrap();
        assert_eq!(odd.byte_size, 8);
    }

    #[test]
    fn test_declarations_resolve_to_the_canonical_definition() {
        let m = model(vec![
            int_base(1),
            rec(
                2,
                1,
                Payload::Collection(CollectionPayload {
                    kind: CollectionKind::Struct,
                    name: Some("S".to_string()),
                    is_declaration: true,
                    ..Default::default()
                }),
            ),
            struct_def(3, "S", 4),
            member_at(4, "v", 1, 0),
            pointer(5, 2),
            function(6, "main", 0x1000),
            param(7, "s", 5, 8),
        ]);
        let s = m.type_by_name("S").unwrap();
        assert_eq!(s.members.len(), 1);
        assert_eq!(s.members[0].name, "v");
        // Both the declaration and the definition map to the entity.
        assert!(m.type_for_record(RecordId(2)).is_some());
        assert!(m.type_for_record(RecordId(3)).is_some());
    }

    #[test]
    fn test_compiler_internal_names_are_filtered() {
        let m = model(vec![
            int_base(1),
            function(2, "_GLOBAL__sub_I_main", 0x500),
            function(3, "main", 0x1000),
            global_var(4, "__ioinit", 1, 0x600000),
            global_var(5, "_ZTS1S", 1, 0x600010),
            global_var(6, "ok", 1, 0x600020),
        ]);
        assert!(m.function_by_start(ProgramCounter(0x500)).is_none());
        assert!(m.function_by_start(ProgramCounter(0x1000)).is_some());
        assert_eq!(m.globals().len(), 1);
        assert_eq!(m.globals()[0].name, "ok");
    }

    #[test]
    fn test_a_store_without_usable_functions_is_an_error() {
        let mut builder = RecordStoreBuilder::new();
        builder.push(rec(
            1,
            1,
            Payload::Function(FunctionPayload {
                name: Some("ghost".to_string()),
                is_declaration: true,
                start_pc: 0x1000,
                end_pc: 0x1040,
                ..Default::default()
            }),
        ));
        let mut store = builder.seal().unwrap();
        link(&mut store);
        let err = DebugModel::build(&store, ModelConfig::default()).unwrap_err();
        assert!(matches!(err, LinkError::NoFunctions));
    }

    #[test]
    fn test_globals_deduplicate_by_address_and_first_name() {
        let m = model(vec![
            int_base(1),
            function(2, "main", 0x1000),
            compile_unit(3, "alpha.c"),
            global_var(4, "shared", 1, 0x600000),
            compile_unit(5, "beta.c"),
            global_var(6, "shared", 1, 0x600000),
            global_var(7, "alias", 1, 0x600000),
        ]);
        let names: Vec<&str> = m.globals().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["shared", "alias"]);
        assert_eq!(m.global_address_range(), Some((0x600000, 0x600004)));
    }

    #[test]
    fn test_static_data_members_are_spliced_into_globals() {
        let m = model(vec![
            int_base(1),
            struct_def(2, "Counter", 4),
            member_at(3, "value", 1, 0),
            rec(
                4,
                2,
                Payload::Variable(VariablePayload {
                    name: Some("total".to_string()),
                    mangled_name: Some("_ZN7Counter5totalE".to_string()),
                    type_ref: Some(RecordId(1)),
                    is_external: true,
                    is_static_member: true,
                    global_addr: 0x601000,
                    ..Default::default()
                }),
            ),
            pointer(5, 2),
            function(6, "main", 0x1000),
            param(7, "c", 5, 8),
        ]);
        assert_eq!(m.globals().len(), 1);
        let spliced = &m.globals()[0];
        assert_eq!(spliced.name, "_ZN7Counter5totalE");
        assert_eq!(
            spliced.origin,
            VariableOrigin::Global(GlobalOrigin {
                address: 0x601000,
                is_external: true,
                filename: None,
                owner_start_pc: None,
            })
        );
        let counter = m.type_by_name("Counter").unwrap();
        assert_eq!(counter.static_members, [0]);
    }

    #[test]
    fn test_function_scoped_statics_record_their_owner() {
        let m = model(vec![
            int_base(1),
            function(2, "main", 0x1000),
            rec(
                3,
                2,
                Payload::Variable(VariablePayload {
                    name: Some("counter".to_string()),
                    type_ref: Some(RecordId(1)),
                    could_be_global: true,
                    global_addr: 0x602000,
                    ..Default::default()
                }),
            ),
        ]);
        let f = m.function_by_start(ProgramCounter(0x1000)).unwrap();
        assert!(f.local_vars.is_empty());
        assert_eq!(m.globals().len(), 1);
        assert_eq!(
            m.globals()[0].origin,
            VariableOrigin::Global(GlobalOrigin {
                address: 0x602000,
                is_external: false,
                filename: None,
                owner_start_pc: Some(ProgramCounter(0x1000)),
            })
        );
    }

    #[test]
    fn test_qualified_names_distinguish_externals_from_file_statics() {
        let m = model(vec![
            compile_unit(1, "foo.c"),
            rec(
                2,
                1,
                Payload::Function(FunctionPayload {
                    name: Some("helper".to_string()),
                    start_pc: 0x1000,
                    end_pc: 0x1040,
                    is_external: false,
                    ..Default::default()
                }),
            ),
            function(3, "main", 0x2000),
            compile_unit(4, "my-file.c"),
            rec(
                5,
                1,
                Payload::Function(FunctionPayload {
                    name: Some("weird".to_string()),
                    start_pc: 0x3000,
                    end_pc: 0x3040,
                    is_external: false,
                    ..Default::default()
                }),
            ),
        ]);
        assert!(m.function_by_qualified_name("foo.c.helper()").is_some());
        assert!(m.function_by_qualified_name("..main()").is_some());
        // The dash is not a legal identifier character and is rewritten.
        assert!(m.function_by_qualified_name("my_file.c.weird()").is_some());
    }

    #[test]
    fn test_colliding_qualified_names_get_a_file_prefix_then_drop() {
        let m = model(vec![
            compile_unit(1, "a.c"),
            function(2, "dup", 0x1000),
            compile_unit(3, "b.c"),
            function(4, "dup", 0x2000),
            function(5, "dup", 0x3000),
        ]);
        assert_eq!(m.functions().count(), 2);
        let first = m.function_by_qualified_name("..dup()").unwrap();
        assert_eq!(first.start_pc, ProgramCounter(0x1000));
        let second = m.function_by_qualified_name("b.c.dup()").unwrap();
        assert_eq!(second.start_pc, ProgramCounter(0x2000));
        assert!(m.function_by_start(ProgramCounter(0x3000)).is_none());
    }

    #[test]
    fn test_member_functions_resolve_against_the_function_table() {
        let m = model(vec![
            int_base(1),
            struct_def(2, "Shape", 8),
            rec(
                3,
                2,
                Payload::Function(FunctionPayload {
                    name: Some("area".to_string()),
                    is_declaration: true,
                    visibility: Some(Visibility::Public),
                    ..Default::default()
                }),
            ),
            pointer(4, 2),
            rec(
                5,
                1,
                Payload::Function(FunctionPayload {
                    decl_ref: Some(RecordId(3)),
                    start_pc: 0x3000,
                    end_pc: 0x3040,
                    ..Default::default()
                }),
            ),
            function(6, "main", 0x1000),
            param(7, "s", 4, 8),
        ]);
        let shape = m.type_by_name("Shape").unwrap();
        assert_eq!(shape.methods, [MethodRef::Resolved(ProgramCounter(0x3000))]);
        let area = m.function_by_start(ProgramCounter(0x3000)).unwrap();
        assert_eq!(area.name, "area");
        assert_eq!(area.parent_type.as_deref(), Some("Shape"));
    }
}
