use std::fmt;

use tracing::{debug, error, warn};

use crate::error::Result;

/// Progress of one lifecycle operation, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Validating,
    ReposCreating,
    DbCommitting,
    Done,
    RollingBack,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validating => "validating",
            Self::ReposCreating => "repos_creating",
            Self::DbCommitting => "db_committing",
            Self::Done => "done",
            Self::RollingBack => "rolling_back",
        })
    }
}

pub(crate) fn enter(state: LifecycleState) {
    debug!(%state, "lifecycle state");
}

type Compensation = Box<dyn FnOnce() -> Result<()>>;

/// Completed side effects paired with their inverse. Unless `commit` is
/// called, dropping the saga runs the compensations newest first.
pub(crate) struct Saga {
    steps: Vec<(String, Compensation)>,
    committed: bool,
}

impl Saga {
    pub(crate) fn new() -> Self {
        Self {
            steps: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn record<F>(&mut self, label: impl Into<String>, compensation: F)
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.steps.push((label.into(), Box::new(compensation)));
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
        self.steps.clear();
    }

    fn unwind(&mut self) {
        if self.steps.is_empty() {
            return;
        }
        enter(LifecycleState::RollingBack);
        warn!(steps = self.steps.len(), "Rolling back");

        while let Some((label, compensation)) = self.steps.pop() {
            match compensation() {
                Ok(()) => debug!(step = %label, "Compensated"),
                Err(e) => error!(step = %label, "Compensation failed: {e}"),
            }
        }
    }
}

impl Drop for Saga {
    fn drop(&mut self) {
        if !self.committed {
            self.unwind();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::error::Error;

    fn recording(
        log: &Rc<RefCell<Vec<&'static str>>>,
        label: &'static str,
    ) -> impl FnOnce() -> Result<()> + 'static {
        let log = Rc::clone(log);
        move || {
            log.borrow_mut().push(label);
            Ok(())
        }
    }

    #[test]
    fn test_unwinds_in_reverse_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut saga = Saga::new();
            saga.record("code", recording(&log, "code"));
            saga.record("docs", recording(&log, "docs"));
            saga.record("tickets", recording(&log, "tickets"));
        }
        assert_eq!(*log.borrow(), vec!["tickets", "docs", "code"]);
    }

    #[test]
    fn test_commit_disarms() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut saga = Saga::new();
        saga.record("code", recording(&log, "code"));
        saga.commit();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_failed_compensation_does_not_stop_unwind() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut saga = Saga::new();
            saga.record("code", recording(&log, "code"));
            saga.record("docs", || Err(Error::NotFound("docs".into())));
        }
        assert_eq!(*log.borrow(), vec!["code"]);
    }
}
