use serde::{Deserialize, Serialize};

/// Outcome of one trigger path for one event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    /// Path was not run
    Ready,
    Pass,
    Fail,
    Exception,
}

/// Per-event trigger decisions of one process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResults {
    pub process_name: String,
    pub path_names: Vec<String>,
    pub statuses: Vec<PathStatus>,
}

impl TriggerResults {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            path_names: Vec::new(),
            statuses: Vec::new(),
        }
    }

    pub fn with_path(mut self, name: impl Into<String>, status: PathStatus) -> Self {
        self.path_names.push(name.into());
        self.statuses.push(status);
        self
    }

    /// True if any path passed
    pub fn accept(&self) -> bool {
        self.statuses.iter().any(|s| *s == PathStatus::Pass)
    }

    pub fn index_of(&self, path_name: &str) -> Option<usize> {
        self.path_names.iter().position(|p| p == path_name)
    }

    pub fn status(&self, index: usize) -> Option<PathStatus> {
        self.statuses.get(index).copied()
    }

    /// True if the path at `index` passed
    pub fn accepted(&self, index: usize) -> bool {
        self.status(index) == Some(PathStatus::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_requires_a_passing_path() {
        let results = TriggerResults::new("HLT")
            .with_path("HLT_Photon", PathStatus::Fail)
            .with_path("HLT_Ele", PathStatus::Exception);
        assert!(!results.accept());

        let results = results.with_path("HLT_Mu", PathStatus::Pass);
        assert!(results.accept());
        assert_eq!(results.index_of("HLT_Mu"), Some(2));
        assert!(results.accepted(2));
        assert!(!results.accepted(1));
        assert!(!results.accepted(7));
    }
}
