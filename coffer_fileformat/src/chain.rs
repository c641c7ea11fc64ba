//! The per-filename diff-chain state machine. This is a pure description
//! of the states one filename can occupy within one directory and the
//! transitions between them — it owns no I/O and mutates nothing;
//! `coffer_housekeeping` and `coffer_client` drive transitions by calling
//! `ChainState::next` and then performing the directory/object-store work
//! that state implies.

use coffer_core::ObjectId;

/// One filename's position in a diff chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No entry exists for this name in the directory.
    Absent,
    /// Current entry, complete file object.
    CurrentComplete,
    /// Current entry, diff file object.
    CurrentDiff,
    /// Flagged `OldVersion`, complete, referenced by a newer entry.
    OldComplete { newer: ObjectId },
    /// Flagged `OldVersion`, diff, referenced by a newer entry.
    OldDiff { newer: ObjectId },
    /// Flagged `Deleted`.
    Deleted,
}

/// What triggered a transition out of the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Client uploaded a fresh (non-diff) object.
    UploadFresh { new_object: ObjectId },
    /// Client uploaded a diff against the current object.
    UploadDiff { new_object: ObjectId },
    /// Client (or server on its behalf) deleted the name.
    Delete,
    /// Housekeeping pruned this entry via chain-collapse.
    HousekeepingPrune,
}

impl ChainState {
    /// Applies `trigger`, returning the resulting state. This encodes the
    /// legal transitions only — it does not check that the caller actually
    /// holds the account's writer slot, nor does it touch any object
    /// bytes; callers perform the corresponding file-object and
    /// directory-entry mutations themselves (encode/diff, flag updates,
    /// `depends_newer`/`depends_older` rewiring) and then record the new
    /// state.
    pub fn apply(self, trigger: Trigger) -> Self {
        match (self, trigger) {
            // A fresh upload into an empty slot is the new current,
            // complete object.
            (ChainState::Absent, Trigger::UploadFresh { new_object }) => {
                let _ = new_object;
                ChainState::CurrentComplete
            }
            // Any current entry receiving a new upload demotes to
            // OldComplete/OldDiff, pointing at the new current entry.
            (ChainState::CurrentComplete, Trigger::UploadFresh { new_object }) => {
                ChainState::OldComplete { newer: new_object }
            }
            (ChainState::CurrentComplete, Trigger::UploadDiff { new_object }) => {
                ChainState::OldComplete { newer: new_object }
            }
            (ChainState::CurrentDiff, Trigger::UploadFresh { new_object }) => {
                ChainState::OldDiff { newer: new_object }
            }
            (ChainState::CurrentDiff, Trigger::UploadDiff { new_object }) => {
                ChainState::OldDiff { newer: new_object }
            }
            // Uploading a diff as the very first object for a name is
            // nonsensical (there is nothing to diff against) but the state
            // machine still has to land somewhere; callers are expected to
            // reject this at a higher layer (the client always diffs
            // against an existing remote index). We model it as CurrentDiff so the
            // invariant "some state always follows a trigger" holds.
            (ChainState::Absent, Trigger::UploadDiff { .. }) => ChainState::CurrentDiff,
            (ChainState::CurrentComplete, Trigger::Delete) => ChainState::Deleted,
            (ChainState::CurrentDiff, Trigger::Delete) => ChainState::Deleted,
            (ChainState::OldComplete { .. }, Trigger::HousekeepingPrune) => ChainState::Absent,
            (ChainState::OldDiff { .. }, Trigger::HousekeepingPrune) => ChainState::Absent,
            (ChainState::Deleted, Trigger::HousekeepingPrune) => ChainState::Absent,
            // Any other pair is a no-op: the caller asked for a transition
            // that doesn't apply to the current state (e.g. deleting an
            // already-absent name), so the state is unchanged.
            (state, _) => state,
        }
    }

    pub fn is_current(self) -> bool {
        matches!(self, ChainState::CurrentComplete | ChainState::CurrentDiff)
    }

    pub fn is_old_version(self) -> bool {
        matches!(self, ChainState::OldComplete { .. } | ChainState::OldDiff { .. })
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, ChainState::Deleted)
    }
}
