//! Code aging through prologue patching.
//!
//! The collector tracks how long a baseline function has gone unexecuted by rewriting the first
//! [`NO_CODE_AGE_SEQUENCE_LENGTH`] bytes of its code. A young function starts with its normal
//! frame setup. An aged function instead jumps to a code-age stub; the stub's identity (an
//! `(Age, MarkingParity)` pair) is the function's age. Running the stub records the execution
//! and restores the young prologue.
//!
//! The window contents map one-to-one onto [`CodeAgeState`]: [`CodeAgingHelper::encode`] and
//! [`CodeAgingHelper::decode`] are inverse on every state whose stub is in the table.
//!
//! Patching requires `&mut` access to the window. Callers obtain that only at a safe point,
//! where no thread is executing or about to execute the window being rewritten; reads through
//! a shared reference are fine at any time.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::assembler::PatchingAssembler;
use crate::macro_assembler::{
    emit_code_age_sequence, emit_frame_setup_for_code_age_patching, CODE_AGE_STUB_ENTRY_OFFSET,
    NO_CODE_AGE_SEQUENCE_LENGTH,
};

/// The fixed-size prologue window of an ageable function.
pub type CodeAgeSequence = [u8; NO_CODE_AGE_SEQUENCE_LENGTH];

/// How long a function has gone without running.
///
/// The negative ages describe execution state rather than idleness and are always paired with
/// [`MarkingParity::NoParity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i8)]
pub enum Age {
    ToBeExecutedOnce = -3,
    NotExecuted = -2,
    ExecutedOnce = -1,
    NoAge = 0,
    Quadragenarian = 1,
    Quinquagenarian = 2,
    Sexagenarian = 3,
    Septuagenarian = 4,
    Octogenarian = 5,
}

impl Age {
    pub const ALL: [Age; 9] = [
        Age::ToBeExecutedOnce,
        Age::NotExecuted,
        Age::ExecutedOnce,
        Age::NoAge,
        Age::Quadragenarian,
        Age::Quinquagenarian,
        Age::Sexagenarian,
        Age::Septuagenarian,
        Age::Octogenarian,
    ];

    /// First age reached by idling (one marking cycle without execution).
    pub const FIRST_IDLE: Age = Age::Quadragenarian;
    pub const LAST: Age = Age::Octogenarian;
    /// Functions at or past this age are candidates for flushing.
    pub const IS_OLD: Age = Age::Sexagenarian;
    /// Age one step short of [`Age::IS_OLD`].
    pub const PRE_AGED: Age = Age::Quinquagenarian;

    #[inline]
    pub const fn raw(self) -> i8 {
        self as i8
    }

    pub fn from_raw(raw: i8) -> Option<Age> {
        Age::ALL.into_iter().find(|age| age.raw() == raw)
    }

    /// Ages that advance with marking cycles, i.e. the ones stubs exist for with both parities.
    #[inline]
    pub fn is_idle_age(self) -> bool {
        self >= Age::FIRST_IDLE
    }

    /// The age used for aging decisions.
    ///
    /// Code that has never run counts as old immediately; code that has run exactly once
    /// counts as one cycle short of old.
    pub fn effective(self) -> Age {
        match self {
            Age::NotExecuted => Age::IS_OLD,
            Age::ExecutedOnce => Age::PRE_AGED,
            age => age,
        }
    }

    /// The next idle age, or `None` at [`Age::LAST`] and for execution-state ages.
    pub fn next(self) -> Option<Age> {
        if self < Age::NoAge || self == Age::LAST {
            return None;
        }
        Age::from_raw(self.raw() + 1)
    }
}

/// Tie-break tag set by the collector's marking cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkingParity {
    NoParity,
    Odd,
    Even,
}

impl MarkingParity {
    pub fn opposite(self) -> MarkingParity {
        match self {
            MarkingParity::NoParity => MarkingParity::NoParity,
            MarkingParity::Odd => MarkingParity::Even,
            MarkingParity::Even => MarkingParity::Odd,
        }
    }
}

/// What a prologue window currently says about its function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeAgeState {
    Young,
    Aged { age: Age, parity: MarkingParity },
}

impl CodeAgeState {
    /// [`Age::NoAge`] always maps to [`CodeAgeState::Young`], whatever the parity.
    pub fn new(age: Age, parity: MarkingParity) -> Self {
        match age {
            Age::NoAge => CodeAgeState::Young,
            age => CodeAgeState::Aged { age, parity },
        }
    }

    pub fn age_and_parity(self) -> (Age, MarkingParity) {
        match self {
            CodeAgeState::Young => (Age::NoAge, MarkingParity::NoParity),
            CodeAgeState::Aged { age, parity } => (age, parity),
        }
    }
}

/// A generated stub that aged prologues jump to.
///
/// The stub carries its own classification; a prologue only carries its entry address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeAgeStub {
    pub entry: u64,
    pub age: Age,
    pub parity: MarkingParity,
}

#[derive(Clone, Debug)]
pub struct CodeAgingConfig {
    /// Entry address of the first code-age stub.
    pub stub_region_base: u64,
    /// Distance between consecutive stub entries. Must be a multiple of 8.
    pub stub_size: u64,
}

impl Default for CodeAgingConfig {
    fn default() -> Self {
        Self {
            stub_region_base: 0x7f00_0000_0000,
            stub_size: 64,
        }
    }
}

/// Process-wide `(Age, MarkingParity) -> stub` table.
///
/// Fully populated on construction: every idle age with both real parities, and each
/// execution-state age with [`MarkingParity::NoParity`]. Entries are never removed.
#[derive(Clone, Debug)]
pub struct CodeAgeStubTable {
    stubs: Vec<CodeAgeStub>,
    by_key: HashMap<(Age, MarkingParity), usize>,
    by_entry: HashMap<u64, usize>,
}

impl CodeAgeStubTable {
    pub fn new(config: &CodeAgingConfig) -> Self {
        assert_eq!(
            config.stub_size % 8,
            0,
            "code-age stub size {} is not 8-byte aligned",
            config.stub_size
        );

        let mut keys = vec![
            (Age::ToBeExecutedOnce, MarkingParity::NoParity),
            (Age::NotExecuted, MarkingParity::NoParity),
            (Age::ExecutedOnce, MarkingParity::NoParity),
        ];
        for age in Age::ALL.into_iter().filter(|age| age.is_idle_age()) {
            keys.push((age, MarkingParity::Odd));
            keys.push((age, MarkingParity::Even));
        }

        let mut table = Self {
            stubs: Vec::with_capacity(keys.len()),
            by_key: HashMap::with_capacity(keys.len()),
            by_entry: HashMap::with_capacity(keys.len()),
        };
        for (i, (age, parity)) in keys.into_iter().enumerate() {
            let entry = config.stub_region_base + i as u64 * config.stub_size;
            table.stubs.push(CodeAgeStub { entry, age, parity });
            table.by_key.insert((age, parity), i);
            table.by_entry.insert(entry, i);
        }
        table
    }

    pub fn get(&self, age: Age, parity: MarkingParity) -> Option<&CodeAgeStub> {
        self.by_key.get(&(age, parity)).map(|&i| &self.stubs[i])
    }

    pub fn stub_at(&self, entry: u64) -> Option<&CodeAgeStub> {
        self.by_entry.get(&entry).map(|&i| &self.stubs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeAgeStub> {
        self.stubs.iter()
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }
}

/// Canonical code-age sequences plus the stub table.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone, Debug)]
pub struct CodeAgingHelper {
    young_sequence: CodeAgeSequence,
    stubs: CodeAgeStubTable,
}

impl CodeAgingHelper {
    pub fn new(config: &CodeAgingConfig) -> Self {
        // The young sequence is whatever the baseline compiler emits as a prologue, produced by
        // the very same routine.
        let mut young_sequence = [0u8; NO_CODE_AGE_SEQUENCE_LENGTH];
        let mut patcher = PatchingAssembler::new(&mut young_sequence);
        emit_frame_setup_for_code_age_patching(&mut patcher);
        patcher.finish();

        let stubs = CodeAgeStubTable::new(config);
        debug!(stubs = stubs.len(), "initialised code aging");
        Self {
            young_sequence,
            stubs,
        }
    }

    #[inline]
    pub fn young_sequence(&self) -> &CodeAgeSequence {
        &self.young_sequence
    }

    #[inline]
    pub fn stubs(&self) -> &CodeAgeStubTable {
        &self.stubs
    }

    /// Renders `state` as prologue bytes.
    ///
    /// # Panics
    ///
    /// Panics if no stub exists for an aged state; the table is fully populated at startup, so
    /// this only happens for a parity that never pairs with the requested age.
    pub fn encode(&self, state: CodeAgeState) -> CodeAgeSequence {
        match state {
            CodeAgeState::Young => self.young_sequence,
            CodeAgeState::Aged { age, parity } => {
                let stub = self.stub_for(age, parity);
                let mut window = [0u8; NO_CODE_AGE_SEQUENCE_LENGTH];
                let mut patcher = PatchingAssembler::new(&mut window);
                emit_code_age_sequence(&mut patcher, Some(stub.entry));
                patcher.finish();
                window
            }
        }
    }

    /// Reads the state back out of a prologue window.
    ///
    /// # Panics
    ///
    /// Panics if the window is neither young nor points at a known stub.
    pub fn decode(&self, window: &CodeAgeSequence) -> CodeAgeState {
        if self.is_young(window) {
            return CodeAgeState::Young;
        }
        let entry = read_stub_entry(window);
        match self.stubs.stub_at(entry) {
            Some(stub) => CodeAgeState::Aged {
                age: stub.age,
                parity: stub.parity,
            },
            None => panic!("prologue is neither young nor aged: unknown stub entry {entry:#x}"),
        }
    }

    #[inline]
    pub fn is_young(&self, window: &CodeAgeSequence) -> bool {
        *window == self.young_sequence
    }

    pub fn get_code_age_and_parity(&self, window: &CodeAgeSequence) -> (Age, MarkingParity) {
        self.decode(window).age_and_parity()
    }

    /// Rewrites `window` to carry `age` and `parity`. [`Age::NoAge`] restores the young
    /// prologue.
    ///
    /// # Panics
    ///
    /// Panics if `(age, parity)` has no stub.
    pub fn patch_platform_code_age(
        &self,
        window: &mut CodeAgeSequence,
        age: Age,
        parity: MarkingParity,
    ) {
        let state = CodeAgeState::new(age, parity);
        *window = self.encode(state);
        debug!(?age, ?parity, "patched code age");
    }

    // ---- Aging policy --------------------------------------------------------------------------

    /// Effective age of the function owning `window`.
    pub fn get_age(&self, window: &CodeAgeSequence) -> Age {
        self.get_code_age_and_parity(window).0.effective()
    }

    pub fn is_old(&self, window: &CodeAgeSequence) -> bool {
        self.get_age(window) >= Age::IS_OLD
    }

    pub fn make_young(&self, window: &mut CodeAgeSequence) {
        self.patch_platform_code_age(window, Age::NoAge, MarkingParity::NoParity);
    }

    /// Ages the function by one step for the marking cycle tagged `current_parity`.
    ///
    /// A function already aged during this cycle (same parity) or at [`Age::LAST`] is left
    /// alone. So is one that has not run yet ([`Age::NotExecuted`] or
    /// [`Age::ToBeExecutedOnce`]); it keeps that marker until it executes.
    pub fn make_older(&self, window: &mut CodeAgeSequence, current_parity: MarkingParity) {
        assert_ne!(
            current_parity,
            MarkingParity::NoParity,
            "marking cycles always carry a parity"
        );
        let (age, code_parity) = self.get_code_age_and_parity(window);
        if matches!(age, Age::ToBeExecutedOnce | Age::NotExecuted)
            || code_parity == current_parity
        {
            return;
        }
        match age.effective().next() {
            Some(next) => self.patch_platform_code_age(window, next, current_parity),
            None => trace!(?age, "code already at the last age"),
        }
    }

    pub fn mark_code_as_executed(&self, window: &mut CodeAgeSequence) {
        self.patch_platform_code_age(window, Age::ExecutedOnce, MarkingParity::NoParity);
    }

    pub fn mark_to_be_executed_once(&self, window: &mut CodeAgeSequence) {
        self.patch_platform_code_age(window, Age::ToBeExecutedOnce, MarkingParity::NoParity);
    }

    fn stub_for(&self, age: Age, parity: MarkingParity) -> &CodeAgeStub {
        match self.stubs.get(age, parity) {
            Some(stub) => stub,
            None => panic!("no code-age stub for age {age:?} with parity {parity:?}"),
        }
    }
}

impl Default for CodeAgingHelper {
    fn default() -> Self {
        Self::new(&CodeAgingConfig::default())
    }
}

fn read_stub_entry(window: &CodeAgeSequence) -> u64 {
    let mut slot = [0u8; 8];
    slot.copy_from_slice(&window[CODE_AGE_STUB_ENTRY_OFFSET..CODE_AGE_STUB_ENTRY_OFFSET + 8]);
    u64::from_le_bytes(slot)
}

/// The instruction part of an aged prologue, without a stub address.
///
/// Every aged window starts with these bytes; used to check encoded windows for consistency.
#[cfg(test)]
pub(crate) fn old_sequence_template() -> Vec<u8> {
    let mut buf = crate::assembler::CodeBuffer::new();
    emit_code_age_sequence(&mut buf, None);
    buf.into_bytes()
}
