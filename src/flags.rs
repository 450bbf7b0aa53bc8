//! Relay status flags.
//!
//! Consensus documents list flags by name on each router's `s` line. They
//! are mapped once, through [`RelayFlag::from_name`], onto a fixed enum and
//! stored as one boolean column per flag.

use std::fmt;

/// A flag assigned to a relay by the directory authorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayFlag {
    Authority,
    BadExit,
    BadDirectory,
    Exit,
    Fast,
    Guard,
    HSDir,
    Named,
    Stable,
    Running,
    Unnamed,
    Valid,
    V2Dir,
    V3Dir,
}

/// External name, storage column and variant of every known flag.
const FLAG_TABLE: &[(&str, &str, RelayFlag)] = &[
    ("Authority", "is_authority", RelayFlag::Authority),
    ("BadExit", "is_bad_exit", RelayFlag::BadExit),
    ("BadDirectory", "is_bad_directory", RelayFlag::BadDirectory),
    ("Exit", "is_exit", RelayFlag::Exit),
    ("Fast", "is_fast", RelayFlag::Fast),
    ("Guard", "is_guard", RelayFlag::Guard),
    ("HSDir", "is_hsdir", RelayFlag::HSDir),
    ("Named", "is_named", RelayFlag::Named),
    ("Stable", "is_stable", RelayFlag::Stable),
    ("Running", "is_running", RelayFlag::Running),
    ("Unnamed", "is_unnamed", RelayFlag::Unnamed),
    ("Valid", "is_valid", RelayFlag::Valid),
    ("V2Dir", "is_v2dir", RelayFlag::V2Dir),
    ("V3Dir", "is_v3dir", RelayFlag::V3Dir),
];

impl RelayFlag {
    pub const ALL: [RelayFlag; 14] = [
        RelayFlag::Authority,
        RelayFlag::BadExit,
        RelayFlag::BadDirectory,
        RelayFlag::Exit,
        RelayFlag::Fast,
        RelayFlag::Guard,
        RelayFlag::HSDir,
        RelayFlag::Named,
        RelayFlag::Stable,
        RelayFlag::Running,
        RelayFlag::Unnamed,
        RelayFlag::Valid,
        RelayFlag::V2Dir,
        RelayFlag::V3Dir,
    ];

    /// Look up a flag by its document name. Matching ignores ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        FLAG_TABLE
            .iter()
            .find(|(external, _, _)| external.eq_ignore_ascii_case(name))
            .map(|&(_, _, flag)| flag)
    }

    pub fn name(self) -> &'static str {
        FLAG_TABLE[self.position()].0
    }

    /// The `status_entry` column holding this flag.
    pub fn column(self) -> &'static str {
        FLAG_TABLE[self.position()].1
    }

    fn position(self) -> usize {
        self as usize
    }

    fn bit(self) -> u16 {
        1 << self.position()
    }
}

impl fmt::Display for RelayFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A compact set of [`RelayFlag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagSet(u16);

impl FlagSet {
    pub fn insert(&mut self, flag: RelayFlag) {
        self.0 |= flag.bit();
    }

    pub fn contains(self, flag: RelayFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = RelayFlag> {
        RelayFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    /// Build a set from document flag names, skipping unknown names.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut set = Self::default();
        for name in names {
            match RelayFlag::from_name(name) {
                Some(flag) => set.insert(flag),
                None => tracing::debug!(flag = name, "ignoring unknown flag"),
            }
        }
        set
    }
}

impl FromIterator<RelayFlag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = RelayFlag>>(iter: I) -> Self {
        let mut set = Self::default();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}
