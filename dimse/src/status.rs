//! DIMSE status codes and their classification.
use std::fmt;

/// The broad category of a DIMSE status code,
/// as given by the ranges in PS3.7 Annex C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Success,
    /// More responses follow.
    Pending,
    /// The operation was terminated by a cancel request.
    Cancel,
    Warning,
    Failure,
    /// The code falls outside every known range.
    Unknown,
}

/// A DIMSE status code, as found in the _Status_ attribute
/// of a response command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0x0000);
    pub const PENDING: Status = Status(0xFF00);
    pub const PENDING_WARNING: Status = Status(0xFF01);
    pub const CANCEL: Status = Status(0xFE00);
    /// Sub-operations complete, one or more failures or warnings.
    pub const SUB_OPERATIONS_WARNING: Status = Status(0xB000);
    /// Cannot understand.
    pub const CANNOT_UNDERSTAND: Status = Status(0xC000);

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn kind(self) -> StatusKind {
        match self.0 {
            0x0000 => StatusKind::Success,
            0xFF00 | 0xFF01 => StatusKind::Pending,
            0xFE00 => StatusKind::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => StatusKind::Warning,
            0xA000..=0xAFFF | 0xC000..=0xCFFF | 0x0122 | 0x0210..=0x0213 => StatusKind::Failure,
            _ => StatusKind::Unknown,
        }
    }

    pub fn is_pending(self) -> bool {
        self.kind() == StatusKind::Pending
    }

    /// Whether this status ends the operation it responds to.
    /// Unknown codes are not considered terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self.kind(),
            StatusKind::Success | StatusKind::Cancel | StatusKind::Warning | StatusKind::Failure
        )
    }

    /// Success or warning.
    pub fn is_ok(self) -> bool {
        matches!(self.kind(), StatusKind::Success | StatusKind::Warning)
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Status(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}H", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Status, StatusKind};
    use rstest::rstest;

    #[rstest]
    #[case(0x0000, StatusKind::Success)]
    #[case(0xFF00, StatusKind::Pending)]
    #[case(0xFF01, StatusKind::Pending)]
    #[case(0xFE00, StatusKind::Cancel)]
    #[case(0x0001, StatusKind::Warning)]
    #[case(0x0107, StatusKind::Warning)]
    #[case(0x0116, StatusKind::Warning)]
    #[case(0xB000, StatusKind::Warning)]
    #[case(0xBFFF, StatusKind::Warning)]
    #[case(0xA700, StatusKind::Failure)]
    #[case(0xA900, StatusKind::Failure)]
    #[case(0xC000, StatusKind::Failure)]
    #[case(0xCFFF, StatusKind::Failure)]
    #[case(0x0122, StatusKind::Failure)]
    #[case(0x0210, StatusKind::Failure)]
    #[case(0x0213, StatusKind::Failure)]
    #[case(0x0002, StatusKind::Unknown)]
    #[case(0x0214, StatusKind::Unknown)]
    #[case(0xD000, StatusKind::Unknown)]
    #[case(0xFFFF, StatusKind::Unknown)]
    fn status_ranges(#[case] code: u16, #[case] kind: StatusKind) {
        assert_eq!(Status(code).kind(), kind);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!Status::PENDING.is_terminal());
        assert!(!Status(0x1234).is_terminal());
        assert!(Status::SUCCESS.is_terminal());
        assert!(Status::CANCEL.is_terminal());
        assert!(Status::CANNOT_UNDERSTAND.is_terminal());
        assert!(Status::SUB_OPERATIONS_WARNING.is_ok());
        assert!(!Status::CANNOT_UNDERSTAND.is_ok());
    }

    #[test]
    fn display_as_hex() {
        assert_eq!(Status(0xFF00).to_string(), "FF00H");
        assert_eq!(Status(0x0001).to_string(), "0001H");
    }
}
