//! Typed error hierarchy for pploy.
//!
//! `PployError` covers the failures the lock table, the process runner and the
//! project resolver report to their callers. The web layer decides how each
//! variant is presented (status code, flash redirect or plain text).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PployError {
    #[error("project {name} not found")]
    ProjectNotFound { name: String },

    #[error("lock is already taken by {holder}")]
    Conflict { holder: String },

    #[error("{user} does not have the lock for {project}")]
    NotHeld { project: String, user: String },

    #[error("{0}")]
    Validation(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("too many running processes (limit {limit}), try again later")]
    Busy { limit: usize },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PployError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PployError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = PployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_names_the_holder() {
        let err = PployError::Conflict {
            holder: "alice".into(),
        };
        assert_eq!(err.to_string(), "lock is already taken by alice");
    }

    #[test]
    fn not_held_carries_project_and_user() {
        let err = PployError::NotHeld {
            project: "site-a".into(),
            user: "bob".into(),
        };
        match &err {
            PployError::NotHeld { project, user } => {
                assert_eq!(project, "site-a");
                assert_eq!(user, "bob");
            }
            _ => panic!("Expected NotHeld"),
        }
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn spawn_failed_keeps_io_source() {
        use std::error::Error as _;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = PployError::Spawn {
            program: ".deploy/bin/deploy".into(),
            source: io_err,
        };
        let source = err.source().expect("source");
        assert!(source.to_string().contains("no such file"));
    }

    #[test]
    fn anyhow_converts_into_other() {
        let err: PployError = anyhow::anyhow!("git exploded").into();
        assert!(matches!(err, PployError::Other(_)));
        assert_eq!(err.to_string(), "git exploded");
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PployError::Busy { limit: 2 });
        assert_std_error(&PployError::Validation("ref is required".into()));
    }
}
