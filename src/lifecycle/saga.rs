//! Compensating-transaction helper
//!
//! Multi-step operations against the array and the metadata store register
//! a compensation after each completed step. On failure the compensations
//! run in reverse order; a compensation that itself fails escalates to
//! [`Error::PartialFailure`] carrying the state of both sides for manual
//! reconciliation.
//!
//! [`Error::PartialFailure`]: crate::error::Error::PartialFailure

use crate::error::Error;
use futures::future::BoxFuture;
use tracing::{error, warn};

/// Which side of the transaction a compensation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Array,
    Metadata,
}

type CompensationFn = Box<dyn FnOnce() -> BoxFuture<'static, crate::error::Result<()>> + Send>;

struct Compensation {
    side: Side,
    label: String,
    run: CompensationFn,
}

/// Ordered compensation stack for one lifecycle operation
pub struct Saga {
    operation: String,
    resource: String,
    compensations: Vec<Compensation>,
}

impl Saga {
    pub fn new(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            resource: resource.into(),
            compensations: Vec::new(),
        }
    }

    /// Register the undo for a step that just succeeded
    pub fn push<F>(&mut self, side: Side, label: impl Into<String>, run: F)
    where
        F: FnOnce() -> BoxFuture<'static, crate::error::Result<()>> + Send + 'static,
    {
        self.compensations.push(Compensation {
            side,
            label: label.into(),
            run: Box::new(run),
        });
    }

    /// All steps succeeded; discard the compensations
    pub fn commit(mut self) {
        self.compensations.clear();
    }

    /// Run compensations in reverse order and return the error to surface:
    /// the original cause when every compensation succeeded, or a
    /// [`Error::PartialFailure`] naming what could not be undone.
    pub async fn unwind(mut self, cause: Error) -> Error {
        warn!(
            operation = %self.operation,
            resource = %self.resource,
            "rolling back {} step(s): {}",
            self.compensations.len(),
            cause
        );

        let mut failed: Vec<(Side, String, Error)> = Vec::new();
        while let Some(comp) = self.compensations.pop() {
            if let Err(e) = (comp.run)().await {
                error!(
                    operation = %self.operation,
                    resource = %self.resource,
                    "compensation failed: {}: {}",
                    comp.label,
                    e
                );
                failed.push((comp.side, comp.label, e));
            }
        }

        if failed.is_empty() {
            return cause;
        }

        let side_state = |side: Side| -> String {
            let stuck: Vec<&str> = failed
                .iter()
                .filter(|(s, _, _)| *s == side)
                .map(|(_, label, _)| label.as_str())
                .collect();
            if stuck.is_empty() {
                "rolled back".to_string()
            } else {
                format!("needs reconciliation ({})", stuck.join("; "))
            }
        };

        Error::PartialFailure {
            operation: self.operation,
            resource: self.resource,
            cause: cause.to_string(),
            rollback_failure: failed
                .iter()
                .map(|(_, label, e)| format!("{}: {}", label, e))
                .collect::<Vec<_>>()
                .join("; "),
            array_side: side_state(Side::Array),
            metadata_side: side_state(Side::Metadata),
        }
    }
}
