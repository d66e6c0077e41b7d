use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use super::value::{Provenance, Site};

/// What the rewriter emits in place of the original instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchAction {
    /// Re-emit the original instruction.
    Default,
    /// Prologue conversion of an incoming receiver or parameter.
    EntryUnbox { slot: u16 },
    /// `aload` of a slot holding a value. `local` is the provenance of the
    /// slot contents; if any of it was boxed the slot holds a reference.
    ValueLoad { slot: u16, local: Provenance },
    /// `astore` of a value. The record's own `force_box` means the slot
    /// must keep a reference.
    ValueStore { slot: u16, operand: Provenance },
    /// `getfield` on a value receiver, read through the value class.
    ValueFieldRead { receiver: Provenance },
    /// `anewarray` of a value-capable element class.
    ValueArrayNew { element: String },
    /// `aaload` from an array of values.
    ValueArrayLoad,
    /// `aastore` into an array of values; `None` when the stored operand is
    /// a plain reference.
    ValueArrayStore { operand: Option<Provenance> },
}

/// Representation of the value an instruction leaves on the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionState {
    /// Left in value form; boxed when forced.
    Value,
    /// Left as a reference; unboxed unless forced.
    Object,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
    Box,
    Unbox,
}

impl ConversionState {
    pub fn conversion(self, force_box: bool) -> Option<Conversion> {
        match (self, force_box) {
            (ConversionState::Value, true) => Some(Conversion::Box),
            (ConversionState::Object, false) => Some(Conversion::Unbox),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub action: PatchAction,
    pub state: ConversionState,
    pub class_name: String,
    pub force_box: bool,
}

impl Patch {
    pub fn new(action: PatchAction, state: ConversionState, class_name: &str) -> Self {
        Patch {
            action,
            state,
            class_name: class_name.to_string(),
            force_box: false,
        }
    }

    /// Conversion emitted after the action.
    pub fn conversion(&self) -> Option<Conversion> {
        self.state.conversion(self.force_box)
    }
}

/// Decisions for one method body, keyed by site.
#[derive(Clone, Debug, Default)]
pub struct PatchRegistry {
    patches: BTreeMap<Site, Patch>,
    links: BTreeSet<Provenance>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record of `site`. A `force_box` already set on
    /// the site survives.
    pub fn record(&mut self, site: Site, mut patch: Patch) {
        if let Some(previous) = self.patches.get(&site) {
            patch.force_box |= previous.force_box;
        }
        trace!("{:?}: {:?} {:?} {}", site, patch.action, patch.state, patch.class_name);
        self.patches.insert(site, patch);
    }

    /// A revisit of `site` no longer sees a value: the original instruction
    /// is kept and anything reading its result sees a reference.
    pub fn retire(&mut self, site: Site) {
        if let Some(patch) = self.patches.get_mut(&site) {
            if patch.action != PatchAction::Default || patch.state != ConversionState::None {
                trace!("{:?}: retired", site);
            }
            patch.action = PatchAction::Default;
            patch.state = ConversionState::None;
            patch.force_box = true;
        }
    }

    /// Sites without a record (e.g. a `new`) are ignored.
    pub fn force_box(&mut self, provenance: &Provenance) {
        for site in provenance {
            if let Some(patch) = self.patches.get_mut(site) {
                if !patch.force_box {
                    trace!("{:?}: boxed", site);
                    patch.force_box = true;
                }
            }
        }
    }

    pub fn any_forced(&self, provenance: &Provenance) -> bool {
        provenance
            .iter()
            .any(|site| self.patches.get(site).map_or(false, |p| p.force_box))
    }

    /// Note that the sites of `provenance` reach one consumer together and
    /// must therefore agree on their representation.
    pub fn link(&mut self, provenance: &Provenance) {
        if provenance.len() > 1 {
            self.links.insert(provenance.clone());
        }
    }

    /// Propagate boxing across linked sites until every linked group is
    /// either fully boxed or not boxed at all.
    pub fn settle(&mut self) {
        loop {
            let pending: Vec<Provenance> = self
                .links
                .iter()
                .filter(|group| self.any_forced(group))
                .filter(|group| {
                    group.iter().any(|site| {
                        self.patches.get(site).map_or(false, |p| !p.force_box)
                    })
                })
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }
            for group in &pending {
                self.force_box(group);
            }
        }
    }

    pub fn get(&self, site: Site) -> Option<&Patch> {
        self.patches.get(&site)
    }

    pub fn is_forced(&self, site: Site) -> bool {
        self.patches.get(&site).map_or(false, |p| p.force_box)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Site, &Patch)> {
        self.patches.iter()
    }

    /// Receiver and parameter slots to convert at entry, with the class and
    /// whether the slot was boxed (and so must not be converted).
    pub fn entry_conversions(&self) -> impl Iterator<Item = (u16, &str, bool)> {
        self.patches.iter().filter_map(|(_, patch)| match patch.action {
            PatchAction::EntryUnbox { slot } => {
                Some((slot, patch.class_name.as_str(), patch.force_box))
            }
            _ => None,
        })
    }
}
