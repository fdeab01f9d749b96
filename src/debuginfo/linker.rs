// This module turns the parser's flat record array into a navigable graph.
// Five passes run in a fixed order. Pass 1 attaches children: every array,
// collection, and function record scans forward while the nesting level stays
// above its own, bucketing direct children by tag; the scan runs twice per
// parent, once to count and once to fill exactly-sized buckets. Pass 2
// back-assigns filenames onto function records from the nearest preceding
// compile unit. Pass 3 binary-searches every by-ID reference and stores the
// resolved index; misses stay unset and downstream consumers read them as
// void. Pass 4 unifies declaration/definition pairs: definitions pull
// identity fields from their declaration shells and push addresses back onto
// them. Pass 5 names anonymous collections, preferring a typedef that targets
// the record and falling back to a synthetic name derived from the record ID.
// Pass 1 must precede pass 3 so resolution can recurse into children; pass 4
// relies on pass 3 having filled the indexes it copies.

//! Linking passes that connect flat debug records into a record graph.
//!
//! # Key Components
//!
//! - [`link`]: runs the five fixup passes over a sealed [`RecordStore`].
//! - Child attachment, filename propagation, cross-reference resolution,
//!   declaration unification, and anonymous-collection naming, in that
//!   order.

use hashbrown::HashMap;

use super::records::{CollectionKind, Payload, Record, RecordId, RecordStore};

/// Run all five fixup passes over `store`, in order.
pub fn link(store: &mut RecordStore) {
    let records = store.records_mut();
    attach_children(records);
    assign_function_filenames(records);
    resolve_cross_references(records);
    unify_declarations(records);
    name_anonymous_collections(records);
    log::debug!("linked {} records", records.len());
}

fn search(ids: &[RecordId], id: RecordId) -> Option<usize> {
    let first = *ids.first()?;
    let last = *ids.last()?;
    if id < first || id > last {
        return None;
    }
    ids.binary_search(&id).ok()
}

fn record_ids(records: &[Record]) -> Vec<RecordId> {
    records.iter().map(|r| r.id).collect()
}

// Pass 1.

fn attach_children(records: &mut [Record]) {
    for parent in 0..records.len() {
        match &records[parent].payload {
            Payload::ArrayType(_) => attach_array_children(records, parent),
            Payload::Collection(_) => attach_collection_children(records, parent),
            Payload::Function(_) => attach_function_children(records, parent),
            _ => {}
        }
    }
}

/// Iterate the direct children of `parent`: records strictly deeper than the
/// parent, stopping at the first sibling, filtered to level `parent + 1`.
fn direct_children(records: &[Record], parent: usize) -> impl Iterator<Item = usize> + '_ {
    let parent_level = records[parent].level;
    records[parent + 1..]
        .iter()
        .enumerate()
        .take_while(move |(_, r)| r.level > parent_level)
        .filter(move |(_, r)| r.level == parent_level + 1)
        .map(move |(offset, _)| parent + 1 + offset)
}

fn attach_array_children(records: &mut [Record], parent: usize) {
    // Count first, then fill an exactly-sized bucket.
    let mut count = 0usize;
    for child in direct_children(records, parent) {
        if matches!(records[child].payload, Payload::Subrange { .. }) {
            count += 1;
        }
    }
    let mut subranges = Vec::with_capacity(count);
    for child in direct_children(records, parent) {
        if matches!(records[child].payload, Payload::Subrange { .. }) {
            subranges.push(child);
        }
    }
    if let Payload::ArrayType(a) = &mut records[parent].payload {
        a.subranges = subranges;
    }
}

fn attach_collection_children(records: &mut [Record], parent: usize) {
    let is_enum = match &records[parent].payload {
        Payload::Collection(c) => c.kind == CollectionKind::Enum,
        _ => return,
    };

    let mut n_enumerators = 0usize;
    let mut n_members = 0usize;
    let mut n_static = 0usize;
    let mut n_methods = 0usize;
    let mut n_supers = 0usize;
    for child in direct_children(records, parent) {
        match &records[child].payload {
            Payload::Enumerator { .. } if is_enum => n_enumerators += 1,
            Payload::Member(m) if !is_enum => {
                if m.is_external {
                    n_static += 1;
                } else {
                    n_members += 1;
                }
            }
            Payload::Variable(_) if !is_enum => n_static += 1,
            Payload::Function(_) if !is_enum => n_methods += 1,
            Payload::Inheritance(_) if !is_enum => n_supers += 1,
            _ => {}
        }
    }

    let mut enumerators = Vec::with_capacity(n_enumerators);
    let mut members = Vec::with_capacity(n_members);
    let mut static_members = Vec::with_capacity(n_static);
    let mut methods = Vec::with_capacity(n_methods);
    let mut superclasses = Vec::with_capacity(n_supers);
    for child in direct_children(records, parent) {
        match &records[child].payload {
            Payload::Enumerator { .. } if is_enum => enumerators.push(child),
            Payload::Member(m) if !is_enum => {
                if m.is_external {
                    static_members.push(child);
                } else {
                    members.push(child);
                }
            }
            Payload::Variable(_) if !is_enum => static_members.push(child),
            Payload::Function(_) if !is_enum => methods.push(child),
            Payload::Inheritance(_) if !is_enum => superclasses.push(child),
            _ => {}
        }
    }

    for &m in &methods {
        if let Payload::Function(f) = &mut records[m].payload {
            f.is_method = true;
        }
    }
    if let Payload::Collection(c) = &mut records[parent].payload {
        c.enumerators = enumerators;
        c.members = members;
        c.static_members = static_members;
        c.methods = methods;
        c.superclasses = superclasses;
    }
}

fn attach_function_children(records: &mut [Record], parent: usize) {
    let mut n_params = 0usize;
    let mut n_locals = 0usize;
    for child in direct_children(records, parent) {
        match &records[child].payload {
            Payload::FormalParameter(_) => n_params += 1,
            Payload::Variable(_) => n_locals += 1,
            _ => {}
        }
    }
    let mut params = Vec::with_capacity(n_params);
    let mut local_vars = Vec::with_capacity(n_locals);
    for child in direct_children(records, parent) {
        match &records[child].payload {
            Payload::FormalParameter(_) => params.push(child),
            Payload::Variable(_) => local_vars.push(child),
            _ => {}
        }
    }
    if let Payload::Function(f) = &mut records[parent].payload {
        f.params = params;
        f.local_vars = local_vars;
    }
}

// Pass 2.

fn assign_function_filenames(records: &mut [Record]) {
    let mut current: Option<String> = None;
    for rec in records.iter_mut() {
        match &mut rec.payload {
            Payload::CompileUnit { filename, .. } => current = filename.clone(),
            Payload::Function(f) => f.filename = current.clone(),
            _ => {}
        }
    }
}

// Pass 3.

#[derive(Default)]
struct RefStats {
    resolved: usize,
    missed: usize,
}

fn resolve(ids: &[RecordId], target: Option<RecordId>, stats: &mut RefStats) -> Option<usize> {
    let id = target?;
    let index = search(ids, id);
    match index {
        Some(_) => stats.resolved += 1,
        None => stats.missed += 1,
    }
    index
}

fn resolve_cross_references(records: &mut [Record]) {
    let ids = record_ids(records);
    let mut stats = RefStats::default();
    for rec in records.iter_mut() {
        match &mut rec.payload {
            Payload::Modifier {
                target,
                target_index,
                ..
            } => *target_index = resolve(&ids, *target, &mut stats),
            Payload::Member(m) => m.type_index = resolve(&ids, m.type_ref, &mut stats),
            Payload::Function(f) => {
                f.return_type_index = resolve(&ids, f.return_type_ref, &mut stats)
            }
            Payload::FunctionType {
                return_type,
                return_type_index,
            } => *return_type_index = resolve(&ids, *return_type, &mut stats),
            Payload::FormalParameter(p) => p.type_index = resolve(&ids, p.type_ref, &mut stats),
            Payload::ArrayType(a) => a.type_index = resolve(&ids, a.type_ref, &mut stats),
            Payload::Typedef {
                target,
                target_index,
                ..
            } => *target_index = resolve(&ids, *target, &mut stats),
            Payload::Variable(v) => v.type_index = resolve(&ids, v.type_ref, &mut stats),
            Payload::Inheritance(i) => {
                i.superclass_index = resolve(&ids, i.superclass_ref, &mut stats)
            }
            _ => {}
        }
    }
    log::debug!(
        "resolved {} cross-references, {} left unset",
        stats.resolved,
        stats.missed
    );
}

// Pass 4.

fn unify_declarations(records: &mut [Record]) {
    let ids = record_ids(records);
    for i in 0..records.len() {
        match &records[i].payload {
            Payload::Function(f) if f.decl_ref.is_some() => unify_function(records, &ids, i),
            Payload::FormalParameter(p) if p.decl_ref.is_some() => {
                unify_parameter(records, &ids, i)
            }
            Payload::Collection(c) if c.decl_ref.is_some() => unify_collection(records, &ids, i),
            Payload::Variable(v) if v.decl_ref.is_some() => unify_variable(records, &ids, i),
            _ => {}
        }
    }
}

/// A function definition pulls name, mangled name, return type, and
/// visibility from its declaration where it lacks them, and pushes its
/// address range onto the declaration shell. Only records that carry both
/// start and end addresses participate; abstract inline copies without
/// addresses are left alone.
fn unify_function(records: &mut [Record], ids: &[RecordId], i: usize) {
    let (decl_ref, start, end) = match &records[i].payload {
        Payload::Function(f) => (f.decl_ref, f.start_pc, f.end_pc),
        _ => return,
    };
    if start == 0 || end == 0 {
        return;
    }
    let Some(t) = decl_ref.and_then(|id| search(ids, id)) else {
        return;
    };
    if t == i {
        return;
    }
    let (name, mangled, ret_ref, ret_index, visibility) = match &records[t].payload {
        Payload::Function(d) => (
            d.name.clone(),
            d.mangled_name.clone(),
            d.return_type_ref,
            d.return_type_index,
            d.visibility,
        ),
        _ => return,
    };
    if let Payload::Function(f) = &mut records[i].payload {
        if f.name.is_none() {
            f.name = name;
        }
        if f.mangled_name.is_none() {
            f.mangled_name = mangled;
        }
        if f.return_type_ref.is_none() {
            f.return_type_ref = ret_ref;
            f.return_type_index = ret_index;
        }
        if f.visibility.is_none() {
            f.visibility = visibility;
        }
    }
    if let Payload::Function(d) = &mut records[t].payload {
        if d.start_pc == 0 {
            d.start_pc = start;
            d.end_pc = end;
        }
    }
}

/// A concrete parameter pulls its name and type from the abstract origin and
/// pushes its own frame offset back, since only the concrete copy carries
/// the call-site-accurate location.
fn unify_parameter(records: &mut [Record], ids: &[RecordId], i: usize) {
    let (decl_ref, offset) = match &records[i].payload {
        Payload::FormalParameter(p) => (p.decl_ref, p.frame_offset),
        _ => return,
    };
    let Some(t) = decl_ref.and_then(|id| search(ids, id)) else {
        return;
    };
    if t == i {
        return;
    }
    let (name, type_ref, type_index) = match &records[t].payload {
        Payload::FormalParameter(d) => (d.name.clone(), d.type_ref, d.type_index),
        _ => return,
    };
    if let Payload::FormalParameter(p) = &mut records[i].payload {
        if p.name.is_none() {
            p.name = name;
        }
        if p.type_ref.is_none() {
            p.type_ref = type_ref;
            p.type_index = type_index;
        }
    }
    if let Payload::FormalParameter(d) = &mut records[t].payload {
        d.frame_offset = offset;
    }
}

/// A collection definition adopts its declaration's name, so the canonical
/// name table later maps the name to the record that actually carries
/// members.
fn unify_collection(records: &mut [Record], ids: &[RecordId], i: usize) {
    let decl_ref = match &records[i].payload {
        Payload::Collection(c) => c.decl_ref,
        _ => return,
    };
    let Some(t) = decl_ref.and_then(|id| search(ids, id)) else {
        return;
    };
    if t == i {
        return;
    }
    let name = match &records[t].payload {
        Payload::Collection(d) => d.name.clone(),
        _ => return,
    };
    if let Payload::Collection(c) = &mut records[i].payload {
        if c.name.is_none() {
            c.name = name;
        }
    }
}

/// Variable declaration/definition unification. The definition record pulls
/// name and type from the record it references, and when it carries an
/// address, pushes that address onto the in-class or file-scope declaration
/// shell. Whether the shell becomes a static member or a candidate global is
/// decided by the mangled-name heuristic: static members carry mangled
/// names, plain globals do not. Newer compilers instead point the definition
/// at a member record; then the definition itself is the static member.
fn unify_variable(records: &mut [Record], ids: &[RecordId], i: usize) {
    let (decl_ref, addr, carrier_is_shell) = match &records[i].payload {
        Payload::Variable(v) => (v.decl_ref, v.global_addr, v.is_declaration_or_artificial),
        _ => return,
    };
    let Some(t) = decl_ref.and_then(|id| search(ids, id)) else {
        return;
    };
    if t == i {
        return;
    }

    enum TargetKind {
        Variable,
        Member,
    }
    let (kind, name, type_ref, type_index) = match &records[t].payload {
        Payload::Variable(d) => (TargetKind::Variable, d.name.clone(), d.type_ref, d.type_index),
        Payload::Member(m) => (TargetKind::Member, m.name.clone(), m.type_ref, m.type_index),
        _ => return,
    };

    if addr != 0 {
        match kind {
            TargetKind::Variable => {
                if let Payload::Variable(d) = &mut records[t].payload {
                    d.global_addr = addr;
                    d.is_declaration_or_artificial = false;
                    if d.mangled_name.is_some() {
                        d.could_be_global = false;
                        d.is_static_member = true;
                    } else {
                        d.could_be_global = true;
                        d.is_static_member = false;
                    }
                }
            }
            TargetKind::Member => {
                if let Payload::Member(m) = &mut records[t].payload {
                    m.global_addr = addr;
                }
                if let Payload::Variable(v) = &mut records[i].payload {
                    v.could_be_global = true;
                    v.is_static_member = true;
                }
            }
        }
    }

    if !carrier_is_shell {
        if let Payload::Variable(v) = &mut records[i].payload {
            if v.name.is_none() {
                v.name = name;
            }
            if v.type_ref.is_none() {
                v.type_ref = type_ref;
                v.type_index = type_index;
            }
        }
    }
}

// Pass 5.

/// Name every collection that still lacks one. A typedef whose target is the
/// collection donates its name; otherwise the name is synthesized from the
/// record ID, which keeps it stable and reproducible. Already-named
/// collections are never touched, so the pass is idempotent.
fn name_anonymous_collections(records: &mut [Record]) {
    let mut typedef_names: HashMap<RecordId, String> = HashMap::new();
    for rec in records.iter() {
        if let Payload::Typedef {
            name: Some(n),
            target: Some(t),
            ..
        } = &rec.payload
        {
            typedef_names.entry(*t).or_insert_with(|| n.clone());
        }
    }

    let mut named = 0usize;
    for rec in records.iter_mut() {
        let id = rec.id;
        if let Payload::Collection(c) = &mut rec.payload {
            if c.name.is_none() {
                c.name = Some(match typedef_names.get(&id) {
                    Some(n) => n.clone(),
                    None => format!("unnamed_0x{:x}", id.0),
                });
                named += 1;
            }
        }
    }
    if named > 0 {
        log::debug!("named {named} anonymous collections");
    }
}
