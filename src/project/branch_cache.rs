use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Default branch per project, computed once and kept until invalidated.
#[derive(Default)]
pub struct DefaultBranchCache {
    branches: Mutex<HashMap<String, String>>,
}

impl DefaultBranchCache {
    pub fn get(&self, project: &str) -> Option<String> {
        self.branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
            .cloned()
    }

    pub fn store(&self, project: &str, branch: &str) {
        self.branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.to_string(), branch.to_string());
    }

    pub fn invalidate(&self, project: &str) {
        self.branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project);
    }
}
