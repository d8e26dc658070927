//! Resolution of corrective solver bone hashes against skeleton names.
//!
//! Solver files reference bones only through case folded name hashes. The
//! candidate names come from a companion skeleton file, so resolution is
//! best effort: hashes without a matching name stay as raw labels.
use log::warn;
use nlfbx_lib::{
    hash::hash_bone_name,
    rbf::{Rbf, Section},
};

/// A bone reference from a solver hash table.
#[derive(Debug, PartialEq, Clone)]
pub enum BoneRef {
    /// The hash matched a bone name from the companion skeleton.
    Named(String),
    /// No candidate name matched. Keeping the raw hash is a valid terminal
    /// state, not an error.
    Unresolved(u32),
}

impl BoneRef {
    /// A printable label: the bone name or the hash in hex.
    pub fn label(&self) -> String {
        match self {
            BoneRef::Named(name) => name.clone(),
            BoneRef::Unresolved(hash) => format!("{hash:08x}"),
        }
    }
}

/// Corrective solver data with its hash tables resolved where possible.
#[derive(Debug, PartialEq, Clone)]
pub struct CorrectiveSolver {
    /// Bones whose rotations drive the solvers, indexed by entry
    /// `bone_index` values.
    pub inputs: Vec<BoneRef>,
    /// Corrective bones written by the solvers, indexed by entry output
    /// indices.
    pub outputs: Vec<BoneRef>,
    pub sections: Vec<Section>,
}

pub fn resolve_solver<S: AsRef<str>>(rbf: &Rbf, bone_names: &[S]) -> CorrectiveSolver {
    CorrectiveSolver {
        inputs: resolve_bone_refs(&rbf.input_hashes, bone_names),
        outputs: resolve_bone_refs(&rbf.output_hashes, bone_names),
        sections: rbf.sections.clone(),
    }
}

/// Match stored hashes against candidate bone names.
pub fn resolve_bone_refs<S: AsRef<str>>(hashes: &[u32], bone_names: &[S]) -> Vec<BoneRef> {
    let refs: Vec<BoneRef> = hashes
        .iter()
        .map(|hash| {
            bone_names
                .iter()
                .find(|name| hash_bone_name(name.as_ref()) == *hash)
                .map(|name| BoneRef::Named(name.as_ref().to_string()))
                .unwrap_or(BoneRef::Unresolved(*hash))
        })
        .collect();

    let unresolved = refs
        .iter()
        .filter(|r| matches!(r, BoneRef::Unresolved(_)))
        .count();
    if unresolved > 0 {
        warn!(
            "{unresolved} of {} bone hashes had no matching name",
            refs.len()
        );
    }
    refs
}
