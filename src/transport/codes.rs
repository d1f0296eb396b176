//! Numeric result codes returned in `pnErrorResult`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimeNetCode {
    Ok,
    ServerBusy,
    InvalidVersion,
    InvalidTransaction,
    InvalidParameter,
    AccessDenied,
    DatabaseCorrupt,
    DatabaseFullOrBroken,
    InvalidUser,
    UnregisteredCpu,
    ObsoleteClient,
    StaleCpuInfo,
    CpuIdentityMismatch,
    CpuConfigurationMismatch,
    NoAssignment,
    InvalidAssignmentKey,
    InvalidAssignmentType,
    InvalidResultType,
    InvalidWorkType,
    WorkNoLongerNeeded,
    Unknown(i64),
}

/// How the agent has to recover its registration before repeating a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reregistration {
    /// The server forgot the machine; a fresh identifier is required.
    NewGuid,
    /// The stored hardware details are stale; re-send them under the same identifier.
    SameGuid,
}

impl PrimeNetCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Ok,
            3 => Self::ServerBusy,
            4 => Self::InvalidVersion,
            5 => Self::InvalidTransaction,
            7 => Self::InvalidParameter,
            9 => Self::AccessDenied,
            11 => Self::DatabaseCorrupt,
            13 => Self::DatabaseFullOrBroken,
            21 => Self::InvalidUser,
            30 => Self::UnregisteredCpu,
            31 => Self::ObsoleteClient,
            32 => Self::StaleCpuInfo,
            33 => Self::CpuIdentityMismatch,
            34 => Self::CpuConfigurationMismatch,
            40 => Self::NoAssignment,
            43 => Self::InvalidAssignmentKey,
            44 => Self::InvalidAssignmentType,
            45 => Self::InvalidResultType,
            46 => Self::InvalidWorkType,
            47 => Self::WorkNoLongerNeeded,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::ServerBusy => 3,
            Self::InvalidVersion => 4,
            Self::InvalidTransaction => 5,
            Self::InvalidParameter => 7,
            Self::AccessDenied => 9,
            Self::DatabaseCorrupt => 11,
            Self::DatabaseFullOrBroken => 13,
            Self::InvalidUser => 21,
            Self::UnregisteredCpu => 30,
            Self::ObsoleteClient => 31,
            Self::StaleCpuInfo => 32,
            Self::CpuIdentityMismatch => 33,
            Self::CpuConfigurationMismatch => 34,
            Self::NoAssignment => 40,
            Self::InvalidAssignmentKey => 43,
            Self::InvalidAssignmentType => 44,
            Self::InvalidResultType => 45,
            Self::InvalidWorkType => 46,
            Self::WorkNoLongerNeeded => 47,
            Self::Unknown(other) => other,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::ServerBusy => "Server busy",
            Self::InvalidVersion => "Invalid version",
            Self::InvalidTransaction => "Invalid transaction",
            Self::InvalidParameter => "Invalid parameter",
            Self::AccessDenied => "Access denied",
            Self::DatabaseCorrupt => "Server database malfunction",
            Self::DatabaseFullOrBroken => "Server database full or broken",
            Self::InvalidUser => "Invalid user",
            Self::UnregisteredCpu => "CPU not registered",
            Self::ObsoleteClient => "Obsolete client, please upgrade",
            Self::StaleCpuInfo => "Stale cpu info",
            Self::CpuIdentityMismatch => "CPU identity mismatch",
            Self::CpuConfigurationMismatch => "CPU configuration mismatch",
            Self::NoAssignment => "No assignment",
            Self::InvalidAssignmentKey => "Invalid assignment key",
            Self::InvalidAssignmentType => "Invalid assignment type",
            Self::InvalidResultType => "Invalid result type",
            Self::InvalidWorkType => "Invalid work type",
            Self::WorkNoLongerNeeded => "Work no longer needed",
            Self::Unknown(_) => "Unknown error code",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Codes worth repeating the identical request for after a backoff.
    pub fn is_transient(self) -> bool {
        self == Self::ServerBusy
    }

    /// Registration repair required before the call may be repeated.
    ///
    /// A configuration mismatch only triggers re-registration for assignment
    /// requests, so callers opt in through `include_config_mismatch`.
    pub fn reregistration(self, include_config_mismatch: bool) -> Option<Reregistration> {
        match self {
            Self::UnregisteredCpu => Some(Reregistration::NewGuid),
            Self::StaleCpuInfo => Some(Reregistration::SameGuid),
            Self::CpuConfigurationMismatch if include_config_mismatch => {
                Some(Reregistration::SameGuid)
            }
            _ => None,
        }
    }

    /// The server no longer tracks the assignment the request referred to.
    pub fn releases_assignment(self) -> bool {
        matches!(
            self,
            Self::InvalidAssignmentKey | Self::WorkNoLongerNeeded | Self::NoAssignment
        )
    }
}

impl fmt::Display for PrimeNetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}
