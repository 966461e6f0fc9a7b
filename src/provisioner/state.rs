//! Allocation state machine

use std::fmt;

/// Last completed allocation step, recorded on the claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocationState {
    Unallocated,
    /// Project id chosen and directory created
    DirectoryReserved,
    /// Ledgers written, project registered and limited
    QuotaConfigured,
    /// Directory bind mounted onto itself
    Mounted,
    /// Mount recorded in the mount table
    Registered,
}

impl AllocationState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Unallocated" => Some(AllocationState::Unallocated),
            "DirectoryReserved" => Some(AllocationState::DirectoryReserved),
            "QuotaConfigured" => Some(AllocationState::QuotaConfigured),
            "Mounted" => Some(AllocationState::Mounted),
            "Registered" => Some(AllocationState::Registered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationState::Unallocated => "Unallocated",
            AllocationState::DirectoryReserved => "DirectoryReserved",
            AllocationState::QuotaConfigured => "QuotaConfigured",
            AllocationState::Mounted => "Mounted",
            AllocationState::Registered => "Registered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == AllocationState::Registered
    }

    /// Next state, `None` once registered
    pub fn next(&self) -> Option<Self> {
        match self {
            AllocationState::Unallocated => Some(AllocationState::DirectoryReserved),
            AllocationState::DirectoryReserved => Some(AllocationState::QuotaConfigured),
            AllocationState::QuotaConfigured => Some(AllocationState::Mounted),
            AllocationState::Mounted => Some(AllocationState::Registered),
            AllocationState::Registered => None,
        }
    }
}

impl fmt::Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Teardown steps, run in order regardless of earlier failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Unmounted,
    QuotaCleared,
    ProjectRecordRemoved,
    ProjidRecordRemoved,
    MountRecordRemoved,
    /// Back to unallocated: the directory itself is gone
    DirectoryRemoved,
}

impl TeardownStep {
    pub const ALL: [TeardownStep; 6] = [
        TeardownStep::Unmounted,
        TeardownStep::QuotaCleared,
        TeardownStep::ProjectRecordRemoved,
        TeardownStep::ProjidRecordRemoved,
        TeardownStep::MountRecordRemoved,
        TeardownStep::DirectoryRemoved,
    ];
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::Unmounted => write!(f, "unmount"),
            TeardownStep::QuotaCleared => write!(f, "clear quota"),
            TeardownStep::ProjectRecordRemoved => write!(f, "remove project record"),
            TeardownStep::ProjidRecordRemoved => write!(f, "remove projid record"),
            TeardownStep::MountRecordRemoved => write!(f, "remove mount record"),
            TeardownStep::DirectoryRemoved => write!(f, "remove directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_advance_in_order() {
        let mut state = AllocationState::Unallocated;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            state = next;
            seen.push(state);
        }
        assert_eq!(seen.len(), 5);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_parse_display() {
        for state in [
            AllocationState::Unallocated,
            AllocationState::DirectoryReserved,
            AllocationState::QuotaConfigured,
            AllocationState::Mounted,
            AllocationState::Registered,
        ] {
            assert_eq!(AllocationState::parse(&state.to_string()), Some(state));
        }
        assert_eq!(AllocationState::parse("Done"), None);
    }
}
