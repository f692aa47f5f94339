//! Join: concurrent two-branch drain plus a matching task.
//!
//! `open` opens both children on the calling thread, then hands each child
//! iterator to a dedicated drain thread feeding a bounded channel. A third
//! thread materializes both sides and runs the nested-loop matcher, writing
//! combined rows to an output channel that `next` consumes. Errors from any
//! task funnel into a single slot checked non-blockingly by `next`.
//!
//! Cancellation is cooperative: every blocking send selects against a
//! cancel channel whose sender the consumer holds, so dropping or closing
//! the join iterator unblocks all three tasks; an atomic flag covers the
//! non-blocking loop checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;

use crate::error::{DocsqlError, DocsqlResult};
use crate::expr::SqlExpr;
use crate::plan::context::{EvalCtx, ExecutionCtx};
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage};

const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
    Straight,
    Natural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    NestedLoop,
    SortMerge,
    Hash,
}

#[derive(Debug, Clone)]
pub struct JoinStage {
    pub left: Arc<PlanStage>,
    pub right: Arc<PlanStage>,
    pub kind: JoinKind,
    pub strategy: JoinStrategy,
    pub predicate: Option<SqlExpr>,
}

impl JoinStage {
    pub fn new(
        left: Arc<PlanStage>,
        right: Arc<PlanStage>,
        kind: JoinKind,
        predicate: Option<SqlExpr>,
    ) -> Self {
        Self {
            left,
            right,
            kind,
            strategy: JoinStrategy::NestedLoop,
            predicate,
        }
    }

    pub fn columns(&self) -> Vec<Column> {
        let mut columns = self.left.columns();
        columns.extend(self.right.columns());
        columns
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        if self.strategy != JoinStrategy::NestedLoop {
            return Err(DocsqlError::Unsupported(format!(
                "join strategy {:?} is reserved",
                self.strategy
            )));
        }
        if matches!(self.kind, JoinKind::Straight | JoinKind::Natural) {
            return Err(DocsqlError::Unsupported(format!(
                "join kind {:?} has no execution",
                self.kind
            )));
        }

        // Open both children before any task starts; a failed open leaks
        // nothing and leaves the already-open sibling closed.
        let left_iter = self.left.open(ctx)?;
        let right_iter = match self.right.open(ctx) {
            Ok(iter) => iter,
            Err(e) => {
                let mut left_iter = left_iter;
                left_iter.close()?;
                return Err(e);
            }
        };

        let token = CancelToken::new();
        // Dropping `cancel_tx` is the cancellation broadcast: every
        // `recv(cancel_rx)` arm fires with a disconnect error.
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let error: ErrorSlot = Arc::new(Mutex::new(None));

        let (left_tx, left_rx) = bounded::<Row>(QUEUE_DEPTH);
        let (right_tx, right_rx) = bounded::<Row>(QUEUE_DEPTH);
        let (out_tx, out_rx) = bounded::<Row>(QUEUE_DEPTH);

        tracing::debug!(kind = ?self.kind, "starting join tasks");
        let mut handles = vec![];
        handles.push(spawn_drain(
            "join-left-drain",
            left_iter,
            left_tx,
            token.clone(),
            cancel_rx.clone(),
            Arc::clone(&error),
        )?);
        handles.push(spawn_drain(
            "join-right-drain",
            right_iter,
            right_tx,
            token.clone(),
            cancel_rx.clone(),
            Arc::clone(&error),
        )?);

        let matcher = Matcher {
            kind: self.kind,
            predicate: self.predicate.clone(),
            left_columns: self.left.columns(),
            right_columns: self.right.columns(),
            ctx: ctx.clone(),
            token: token.clone(),
            cancel_rx,
            error: Arc::clone(&error),
        };
        handles.push(spawn_named("join-matcher", move || {
            matcher.run(left_rx, right_rx, out_tx);
        })?);

        Ok(Box::new(JoinIter {
            out_rx,
            error,
            token,
            _cancel_tx: Some(cancel_tx),
            handles,
            done: false,
        }))
    }
}

type ErrorSlot = Arc<Mutex<Option<DocsqlError>>>;

fn set_error(slot: &ErrorSlot, token: &CancelToken, error: DocsqlError) {
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(error);
    }
    token.cancel();
}

/// Shared cancellation flag for the non-blocking checks inside task loops.
#[derive(Clone)]
struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn spawn_named(name: &'static str, f: impl FnOnce() + Send + 'static) -> DocsqlResult<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| DocsqlError::Join(format!("failed to spawn {name}: {e}")))
}

fn spawn_drain(
    name: &'static str,
    mut iter: Box<dyn Iter>,
    tx: Sender<Row>,
    token: CancelToken,
    cancel_rx: Receiver<()>,
    error: ErrorSlot,
) -> DocsqlResult<JoinHandle<()>> {
    spawn_named(name, move || {
        loop {
            if token.is_cancelled() {
                break;
            }
            match iter.next() {
                Ok(Some(row)) => {
                    let aborted = select! {
                        send(tx, row) -> res => res.is_err(),
                        recv(cancel_rx) -> _ => true,
                    };
                    if aborted {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    set_error(&error, &token, e);
                    break;
                }
            }
        }
        if let Err(e) = iter.close() {
            set_error(&error, &token, e);
        }
        // tx drops here, ending the matcher's materialization of this side.
    })
}

struct Matcher {
    kind: JoinKind,
    predicate: Option<SqlExpr>,
    left_columns: Vec<Column>,
    right_columns: Vec<Column>,
    ctx: ExecutionCtx,
    token: CancelToken,
    cancel_rx: Receiver<()>,
    error: ErrorSlot,
}

impl Matcher {
    fn run(self, left_rx: Receiver<Row>, right_rx: Receiver<Row>, out_tx: Sender<Row>) {
        // Fully materialize both sides before matching; the drains progress
        // independently so neither side head-of-line blocks the other.
        let left_rows: Vec<Row> = left_rx.iter().collect();
        let right_rows: Vec<Row> = right_rx.iter().collect();
        if self.token.is_cancelled() {
            return;
        }
        if let Err(e) = self.match_rows(&left_rows, &right_rows, &out_tx) {
            set_error(&self.error, &self.token, e);
        }
        // out_tx drops here; the consumer sees exhaustion.
    }

    fn match_rows(
        &self,
        left_rows: &[Row],
        right_rows: &[Row],
        out_tx: &Sender<Row>,
    ) -> DocsqlResult<()> {
        match self.kind {
            JoinKind::Cross => {
                for left in left_rows {
                    for right in right_rows {
                        if !self.emit(out_tx, Row::concat(left, right)) {
                            return Ok(());
                        }
                    }
                }
            }
            JoinKind::Inner => {
                for left in left_rows {
                    for right in right_rows {
                        let combined = Row::concat(left, right);
                        if self.matches(&combined)? && !self.emit(out_tx, combined) {
                            return Ok(());
                        }
                    }
                }
            }
            JoinKind::Left => {
                let padding = null_row(&self.right_columns);
                for left in left_rows {
                    let mut matched = false;
                    for right in right_rows {
                        let combined = Row::concat(left, right);
                        if self.matches(&combined)? {
                            matched = true;
                            if !self.emit(out_tx, combined) {
                                return Ok(());
                            }
                        }
                    }
                    if !matched && !self.emit(out_tx, Row::concat(left, &padding)) {
                        return Ok(());
                    }
                }
            }
            JoinKind::Right => {
                let padding = null_row(&self.left_columns);
                for right in right_rows {
                    let mut matched = false;
                    for left in left_rows {
                        let combined = Row::concat(left, right);
                        if self.matches(&combined)? {
                            matched = true;
                            if !self.emit(out_tx, combined) {
                                return Ok(());
                            }
                        }
                    }
                    if !matched && !self.emit(out_tx, Row::concat(&padding, right)) {
                        return Ok(());
                    }
                }
            }
            JoinKind::Straight | JoinKind::Natural => {
                return Err(DocsqlError::Internal(format!(
                    "join kind {:?} reached the matcher",
                    self.kind
                )));
            }
        }
        Ok(())
    }

    fn matches(&self, combined: &Row) -> DocsqlResult<bool> {
        match &self.predicate {
            Some(predicate) => {
                let eval = EvalCtx::single(combined.clone(), self.ctx.clone());
                predicate.matches(&eval)
            }
            None => Ok(true),
        }
    }

    /// Returns false when the consumer has gone away.
    fn emit(&self, out_tx: &Sender<Row>, row: Row) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        select! {
            send(out_tx, row) -> res => res.is_ok(),
            recv(self.cancel_rx) -> _ => false,
        }
    }
}

/// Null padding for the static column shape of an unmatched side.
fn null_row(columns: &[Column]) -> Row {
    Row::new(columns.iter().map(Column::null_value).collect())
}

struct JoinIter {
    out_rx: Receiver<Row>,
    error: ErrorSlot,
    token: CancelToken,
    /// Held only so dropping it broadcasts cancellation.
    _cancel_tx: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
    done: bool,
}

impl JoinIter {
    fn take_error(&self) -> Option<DocsqlError> {
        self.error.lock().take()
    }
}

impl Iter for JoinIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        if let Some(e) = self.take_error() {
            self.done = true;
            return Err(e);
        }
        match self.out_rx.recv() {
            Ok(row) => Ok(Some(row)),
            Err(_) => {
                self.done = true;
                match self.take_error() {
                    Some(e) => Err(e),
                    None => Ok(None),
                }
            }
        }
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.done = true;
        self.token.cancel();
        // Dropping the cancel sender unblocks every task at its next
        // blocking point; draining the output channel releases a matcher
        // blocked on a full queue that raced the drop.
        self._cancel_tx = None;
        while self.out_rx.try_recv().is_ok() {}
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                return Err(DocsqlError::Join("join task panicked".to_string()));
            }
        }
        Ok(())
    }
}
