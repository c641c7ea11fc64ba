//! `CheckAndFix`: a standalone recovery entry point over an already
//! parsed `DirectoryObject`. It never touches a live server — it's the
//! offline half of consistency checking, exposed by `coffer-cli fsck`.
//! Reorders nothing (insertion order is part of the wire contract) but
//! de-duplicates object-ids and clears dangling dependency links.

use std::collections::HashSet;

use coffer_core::ObjectId;

use crate::object::DirectoryObject;

/// Runs structural repair over `dir`, returning `true` iff any
/// modification was made.
pub fn check_and_fix(dir: &mut DirectoryObject) -> bool {
    let mut modified = false;

    modified |= drop_duplicate_object_ids(dir);
    modified |= clear_dangling_dependencies(dir);
    modified |= enforce_dependency_symmetry(dir);

    modified
}

fn drop_duplicate_object_ids(dir: &mut DirectoryObject) -> bool {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for entry in dir.entries() {
        if !seen.insert(entry.object_id) {
            duplicates.push(entry.object_id);
        }
    }
    for id in &duplicates {
        // Only the first occurrence was kept in `seen`; remove exactly one
        // more copy per duplicate id (there should only ever be one extra).
        let _ = dir.delete_entry(*id);
    }
    !duplicates.is_empty()
}

fn clear_dangling_dependencies(dir: &mut DirectoryObject) -> bool {
    let existing: HashSet<ObjectId> = dir.entries().iter().map(|e| e.object_id).collect();
    let mut modified = false;
    let dangling: Vec<ObjectId> = dir
        .entries()
        .iter()
        .filter(|e| {
            (!e.depends_newer.is_none() && !existing.contains(&e.depends_newer))
                || (!e.depends_older.is_none() && !existing.contains(&e.depends_older))
        })
        .map(|e| e.object_id)
        .collect();
    for id in dangling {
        if let Some(entry) = dir.find_entry_by_id_mut(id) {
            if !entry.depends_newer.is_none() && !existing.contains(&entry.depends_newer) {
                entry.depends_newer = ObjectId::NONE;
                modified = true;
            }
            if !entry.depends_older.is_none() && !existing.contains(&entry.depends_older) {
                entry.depends_older = ObjectId::NONE;
                modified = true;
            }
        }
    }
    modified
}

/// If `A.depends_newer == B.id`, `B.depends_older` must equal `A.id`.
/// Repairs any mismatch by rewriting the
/// `depends_older` side to agree with `depends_newer`, since the newer
/// object's existence is the more authoritative fact (it's what the
/// client just uploaded).
fn enforce_dependency_symmetry(dir: &mut DirectoryObject) -> bool {
    let mut modified = false;
    let forward_links: Vec<(ObjectId, ObjectId)> = dir
        .entries()
        .iter()
        .filter(|e| !e.depends_newer.is_none())
        .map(|e| (e.object_id, e.depends_newer))
        .collect();

    for (older_id, newer_id) in forward_links {
        if let Some(newer_entry) = dir.find_entry_by_id_mut(newer_id) {
            if newer_entry.depends_older != older_id {
                newer_entry.depends_older = older_id;
                modified = true;
            }
        }
    }
    modified
}
