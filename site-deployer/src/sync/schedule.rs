//! Operation scheduling.
//!
//! Puts the diff sets into an order that is safe to execute one item at a
//! time, and exposes each as a LIFO queue:
//!
//! * removals: files first, then directories deepest first, so every
//!   directory is empty by the time it is removed;
//! * uploads: directories first, parents before children, then text files,
//!   then binary payloads last.

use std::cmp::Reverse;

use crate::fs::fingerprint::is_binary_path;
use crate::manifest::{write_json_atomic, ArtifactPaths, Target};
use crate::sync::diff::DiffResult;
use crate::utils::errors::Result;

/// A stack of pending operations; [`OperationQueue::pop`] yields them in
/// execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationQueue {
    stack: Vec<Target>,
}

impl OperationQueue {
    /// Build a queue whose pops follow `order`.
    pub fn from_execution_order(mut order: Vec<Target>) -> Self {
        order.reverse();
        Self { stack: order }
    }

    pub fn pop(&mut self) -> Option<Target> {
        self.stack.pop()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Pending operations, next one first.
    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.stack.iter().rev()
    }

    pub fn count_files(&self) -> usize {
        self.stack.iter().filter(|t| !t.is_dir()).count()
    }
}

/// Both work queues of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub removals: OperationQueue,
    pub uploads: OperationQueue,
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.uploads.is_empty()
    }
}

/// Order the diff sets for execution.
pub fn schedule(diff: DiffResult) -> Schedule {
    Schedule {
        removals: OperationQueue::from_execution_order(removal_order(diff.to_remove)),
        uploads: OperationQueue::from_execution_order(upload_order(diff.to_upload)),
    }
}

fn depth(target: &Target) -> usize {
    target.path.matches('/').count()
}

fn removal_order(targets: Vec<Target>) -> Vec<Target> {
    let (mut dirs, files): (Vec<Target>, Vec<Target>) =
        targets.into_iter().partition(Target::is_dir);
    dirs.sort_by_key(|d| Reverse(depth(d)));

    let mut order = files;
    order.extend(dirs);
    order
}

fn upload_order(targets: Vec<Target>) -> Vec<Target> {
    let (mut dirs, files): (Vec<Target>, Vec<Target>) =
        targets.into_iter().partition(Target::is_dir);
    dirs.sort_by_key(|d| d.path.len());

    let (binary, text): (Vec<Target>, Vec<Target>) =
        files.into_iter().partition(|f| is_binary_path(&f.path));

    let mut order = dirs;
    order.extend(text);
    order.extend(binary);
    order
}

/// Write the scheduled order to the two audit logs. Diagnostic only.
pub fn write_audit_logs(schedule: &Schedule, paths: &ArtifactPaths) -> Result<()> {
    let uploads: Vec<&Target> = schedule.uploads.iter().collect();
    let removals: Vec<&Target> = schedule.removals.iter().collect();
    write_json_atomic(&paths.upload_log(), &uploads)?;
    write_json_atomic(&paths.remove_log(), &removals)?;
    Ok(())
}
