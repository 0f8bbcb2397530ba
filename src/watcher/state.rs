use serde::Serialize;

/// Spooler job state as seen by a watcher.
///
/// `NotFound` is reached when the spooler forgets the job between polls
/// (e.g. purged from history). It ends a watch like the other terminal
/// states but is kept distinct from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    Held,
    Processing,
    Stopped,
    Cancelled,
    Aborted,
    Completed,
    Unknown(i32),
    NotFound,
}

impl JobState {
    /// Map an IPP `job-state` enum value.
    pub fn from_code(code: i32) -> Self {
        match code {
            3 => JobState::Pending,
            4 => JobState::Held,
            5 => JobState::Processing,
            6 => JobState::Stopped,
            7 => JobState::Cancelled,
            8 => JobState::Aborted,
            9 => JobState::Completed,
            other => JobState::Unknown(other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Cancelled | JobState::Aborted | JobState::Completed | JobState::NotFound
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Held => write!(f, "held"),
            JobState::Processing => write!(f, "processing"),
            JobState::Stopped => write!(f, "stopped"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Aborted => write!(f, "aborted"),
            JobState::Completed => write!(f, "completed"),
            JobState::Unknown(code) => write!(f, "unknown({})", code),
            JobState::NotFound => write!(f, "not-found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_states() {
        assert_eq!(JobState::from_code(3), JobState::Pending);
        assert_eq!(JobState::from_code(4), JobState::Held);
        assert_eq!(JobState::from_code(5), JobState::Processing);
        assert_eq!(JobState::from_code(6), JobState::Stopped);
        assert_eq!(JobState::from_code(7), JobState::Cancelled);
        assert_eq!(JobState::from_code(8), JobState::Aborted);
        assert_eq!(JobState::from_code(9), JobState::Completed);
        assert_eq!(JobState::from_code(0), JobState::Unknown(0));
    }

    #[test]
    fn terminal_states() {
        for state in [
            JobState::Cancelled,
            JobState::Aborted,
            JobState::Completed,
            JobState::NotFound,
        ] {
            assert!(state.is_terminal(), "{} should be terminal", state);
        }
        for state in [
            JobState::Pending,
            JobState::Held,
            JobState::Processing,
            JobState::Stopped,
            JobState::Unknown(42),
        ] {
            assert!(!state.is_terminal(), "{} should not be terminal", state);
        }
    }

    #[test]
    fn display_strings() {
        assert_eq!(JobState::Processing.to_string(), "processing");
        assert_eq!(JobState::Unknown(12).to_string(), "unknown(12)");
        assert_eq!(JobState::NotFound.to_string(), "not-found");
    }
}
