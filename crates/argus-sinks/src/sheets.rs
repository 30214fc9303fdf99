//! Spreadsheet-sync sink: upsert rows keyed by a configurable column, or
//! append everything when unkeyed.
//!
//! The remote spreadsheet API stays behind [`SheetClient`]; this module
//! only plans and applies row changes.

use crate::SinkError;

/// Planned changes against an existing sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetSyncPlan {
    /// `(existing row index, replacement row)`.
    pub updates: Vec<(usize, Vec<String>)>,
    pub appends: Vec<Vec<String>>,
}

impl SheetSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.appends.is_empty()
    }
}

/// Boundary to the actual spreadsheet backend.
pub trait SheetClient {
    fn read_rows(&self) -> Result<Vec<Vec<String>>, SinkError>;
    fn apply(&mut self, plan: &SheetSyncPlan) -> Result<(), SinkError>;
}

/// Plan an upsert of `incoming` rows against `existing` ones.
///
/// With a key column, an incoming row whose key matches an existing row
/// replaces it; everything else is appended. Without a key column every
/// incoming row is appended.
pub fn plan_sync(
    existing: &[Vec<String>],
    incoming: &[Vec<String>],
    key_column: Option<usize>,
) -> SheetSyncPlan {
    let Some(key_column) = key_column else {
        return SheetSyncPlan {
            updates: Vec::new(),
            appends: incoming.to_vec(),
        };
    };

    let mut plan = SheetSyncPlan::default();
    for row in incoming {
        let key = row.get(key_column);
        let position = key.and_then(|key| {
            existing
                .iter()
                .position(|candidate| candidate.get(key_column) == Some(key))
        });
        match position {
            Some(index) => plan.updates.push((index, row.clone())),
            None => plan.appends.push(row.clone()),
        }
    }
    plan
}

/// Read the sheet, plan the upsert, and apply it.
pub fn sync_rows<C: SheetClient>(
    client: &mut C,
    incoming: &[Vec<String>],
    key_column: Option<usize>,
) -> Result<SheetSyncPlan, SinkError> {
    let existing = client.read_rows()?;
    let plan = plan_sync(&existing, incoming, key_column);
    if !plan.is_empty() {
        client.apply(&plan)?;
    }
    Ok(plan)
}
