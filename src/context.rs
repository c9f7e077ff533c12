//! The context: an arena of context-dependent cells whose writes are
//! journaled and rewound when a decision level is popped.
//!
//! Search-sensitive constraint state (active flags, asserted phases, the set
//! of cases ruled out in the current subtree) lives in cells allocated from
//! this arena. A write at any level below the root records the previous value
//! on a journal; restoring a save-point replays the journal in reverse.
//! Writes at the root level are permanent. Cell allocation itself is never
//! undone, which allows constraints to be registered lazily.

use hashbrown::HashMap;

use crate::backtrack::{Backtrack, DecLvl, Trail};
use crate::collections::RefVec;
use crate::core::PhaseStatus;
use crate::create_ref_type;

create_ref_type!(CdBool);
create_ref_type!(CdF64);
create_ref_type!(CdPhase);
create_ref_type!(CdPhaseList);
create_ref_type!(CdBoolMap);

/// A journal entry: the information needed to undo one cell write.
#[derive(Copy, Clone, Debug)]
enum Undo {
    SetBool { cell: CdBool, prev: bool },
    SetF64 { cell: CdF64, prev: f64 },
    SetPhase { cell: CdPhase, prev: PhaseStatus },
    TruncateList { list: CdPhaseList, len: u32 },
    RestoreMapEntry { map: CdBoolMap, key: u32, prev: Option<bool> },
}

/// Arena of context-dependent cells plus the undo journal that rewinds them.
#[derive(Clone, Default)]
pub struct Context {
    bools: RefVec<CdBool, bool>,
    f64s: RefVec<CdF64, f64>,
    phases: RefVec<CdPhase, PhaseStatus>,
    phase_lists: RefVec<CdPhaseList, Vec<PhaseStatus>>,
    bool_maps: RefVec<CdBoolMap, HashMap<u32, bool>>,
    journal: Trail<Undo>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    // ============ allocation ============

    pub fn alloc_bool(&mut self, init: bool) -> CdBool {
        self.bools.push(init)
    }

    pub fn alloc_f64(&mut self, init: f64) -> CdF64 {
        self.f64s.push(init)
    }

    pub fn alloc_phase(&mut self, init: PhaseStatus) -> CdPhase {
        self.phases.push(init)
    }

    pub fn alloc_phase_list(&mut self) -> CdPhaseList {
        self.phase_lists.push(Vec::new())
    }

    pub fn alloc_bool_map(&mut self) -> CdBoolMap {
        self.bool_maps.push(HashMap::new())
    }

    // ============ scalar cells ============

    pub fn get_bool(&self, cell: CdBool) -> bool {
        self.bools[cell]
    }

    pub fn set_bool(&mut self, cell: CdBool, value: bool) {
        let prev = self.bools[cell];
        self.journal.push(Undo::SetBool { cell, prev });
        self.bools[cell] = value;
    }

    pub fn get_f64(&self, cell: CdF64) -> f64 {
        self.f64s[cell]
    }

    pub fn set_f64(&mut self, cell: CdF64, value: f64) {
        let prev = self.f64s[cell];
        self.journal.push(Undo::SetF64 { cell, prev });
        self.f64s[cell] = value;
    }

    pub fn get_phase(&self, cell: CdPhase) -> PhaseStatus {
        self.phases[cell]
    }

    pub fn set_phase(&mut self, cell: CdPhase, value: PhaseStatus) {
        let prev = self.phases[cell];
        self.journal.push(Undo::SetPhase { cell, prev });
        self.phases[cell] = value;
    }

    // ============ append-only list ============

    pub fn list_push(&mut self, list: CdPhaseList, value: PhaseStatus) {
        let len = self.phase_lists[list].len() as u32;
        self.journal.push(Undo::TruncateList { list, len });
        self.phase_lists[list].push(value);
    }

    pub fn list(&self, list: CdPhaseList) -> &[PhaseStatus] {
        &self.phase_lists[list]
    }

    pub fn list_len(&self, list: CdPhaseList) -> usize {
        self.phase_lists[list].len()
    }

    pub fn list_contains(&self, list: CdPhaseList, value: PhaseStatus) -> bool {
        self.phase_lists[list].contains(&value)
    }

    // ============ bool map ============

    pub fn map_insert(&mut self, map: CdBoolMap, key: u32, value: bool) {
        let prev = self.bool_maps[map].get(&key).copied();
        self.journal.push(Undo::RestoreMapEntry { map, key, prev });
        self.bool_maps[map].insert(key, value);
    }

    pub fn map_get(&self, map: CdBoolMap, key: u32) -> Option<bool> {
        self.bool_maps[map].get(&key).copied()
    }

    pub fn map_len(&self, map: CdBoolMap) -> usize {
        self.bool_maps[map].len()
    }
}

impl Backtrack for Context {
    fn save_state(&mut self) -> DecLvl {
        self.journal.save_state()
    }

    fn num_saved(&self) -> u32 {
        self.journal.num_saved()
    }

    fn restore_last(&mut self) {
        let bools = &mut self.bools;
        let f64s = &mut self.f64s;
        let phases = &mut self.phases;
        let phase_lists = &mut self.phase_lists;
        let bool_maps = &mut self.bool_maps;
        self.journal.restore_last_with(|undo| match undo {
            Undo::SetBool { cell, prev } => bools[cell] = prev,
            Undo::SetF64 { cell, prev } => f64s[cell] = prev,
            Undo::SetPhase { cell, prev } => phases[cell] = prev,
            Undo::TruncateList { list, len } => phase_lists[list].truncate(len as usize),
            Undo::RestoreMapEntry { map, key, prev } => match prev {
                Some(v) => {
                    bool_maps[map].insert(key, v);
                }
                None => {
                    bool_maps[map].remove(&key);
                }
            },
        });
    }
}
