//! Session orchestration
//!
//! Sequences the dialog registry, message store, hypothesis state, archiver
//! and model for each externally-triggered operation. Per user the lifecycle
//! is NO_DIALOG -> ACTIVE -> (FINISHED, transient) -> NO_DIALOG; at most one
//! dialog is active per user at any instant.

use crate::archive::Archiver;
use crate::assistant::DiagnosisModel;
use crate::db::{Database, DbError, Role};
use crate::exchange::pair_exchanges;
use crate::hypothesis::HypothesisTrees;
use crate::llm::LlmError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Expected flow condition: the operation needs an active dialog
    #[error("no active dialog for user")]
    NoActiveDialog,
    /// Expected flow condition: nothing to summarize or archive
    #[error("dialog has no messages")]
    EmptyDialog,
    #[error(transparent)]
    Storage(#[from] DbError),
    #[error("model request failed: {0}")]
    Model(#[from] LlmError),
    /// The detached turn task panicked or was shut down
    #[error("chat turn did not complete: {0}")]
    TurnFailed(#[from] tokio::task::JoinError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Active-dialog check result
#[derive(Debug, Clone, Copy)]
pub struct DialogCheck {
    pub active: bool,
    pub dialog_id: Option<i64>,
}

/// Facade sequencing storage, state and model calls per user
pub struct SessionManager {
    hot: Database,
    archiver: Archiver,
    trees: HypothesisTrees,
    model: Arc<dyn DiagnosisModel>,
    // One lock per user serializes a user's turns without stalling others
    user_locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        hot: Database,
        archiver: Archiver,
        trees: HypothesisTrees,
        model: Arc<dyn DiagnosisModel>,
    ) -> Self {
        Self {
            hot,
            archiver,
            trees,
            model,
            user_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap();
        locks.entry(user_id).or_default().clone()
    }

    /// Start a new dialog, force-finishing any existing active one first.
    ///
    /// The leftover finished dialog is archived best-effort: an archive
    /// failure is logged and left for the boot sweep or the next start, it
    /// does not block opening the new dialog.
    pub async fn start_dialog(&self, user_id: i64) -> SessionResult<i64> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let finished = self.hot.finish_dialog(user_id)?;
        if finished > 0 {
            tracing::info!(user_id, "force-finished previous active dialog");
        }

        if let Err(e) = self.archiver.archive_finished_dialog(user_id) {
            tracing::warn!(user_id, error = %e, "archiving leftover dialog failed, will retry later");
        }

        self.trees.clear(user_id);
        let dialog = self.hot.create_dialog(user_id)?;
        tracing::info!(user_id, dialog_id = dialog.id, "dialog started");
        Ok(dialog.id)
    }

    /// Finish the active dialog without a summary. Idempotent: a user with
    /// no active dialog gets an ack, not an error.
    pub async fn force_end_dialog(&self, user_id: i64) -> SessionResult<()> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let finished = self.hot.finish_dialog(user_id)?;
        self.trees.clear(user_id);
        self.archiver.archive_finished_dialog(user_id)?;

        if finished > 0 {
            tracing::info!(user_id, "dialog force-ended");
        }
        Ok(())
    }

    /// Report whether the user has an active dialog
    pub fn check_dialog(&self, user_id: i64) -> SessionResult<DialogCheck> {
        let dialog = self.hot.get_active_dialog(user_id)?;
        Ok(DialogCheck {
            active: dialog.is_some(),
            dialog_id: dialog.map(|d| d.id),
        })
    }

    /// One message turn: merge the hypothesis tree from the model, then
    /// generate the reply against the post-merge tree, then persist both
    /// sides of the exchange.
    ///
    /// Message appends happen only after both model calls succeed, so a
    /// model failure leaves no partial writes. A malformed hypothesis
    /// payload is not a failure: the tree simply does not advance.
    pub async fn chat(&self, user_id: i64, user_message: &str) -> SessionResult<String> {
        let lock = self.user_lock(user_id);
        let hot = self.hot.clone();
        let trees = self.trees.clone();
        let model = self.model.clone();
        let user_message = user_message.to_string();

        // The turn runs detached from the request future: a caller that
        // abandons the request must not cancel model calls already in
        // flight or drop a completed merge before it is persisted.
        let turn = tokio::spawn(async move {
            let _guard = lock.lock().await;

            let dialog = hot
                .get_active_dialog(user_id)?
                .ok_or(SessionError::NoActiveDialog)?;

            let history = pair_exchanges(&hot.get_messages(dialog.id)?);
            let current_tree = trees.get(user_id);

            let raw = model
                .generate_hypotheses(&history, &user_message, &current_tree)
                .await?;
            let merged_tree = trees.merge_from_model_output(user_id, &raw);

            let reply = model
                .generate_reply(&history, &user_message, &merged_tree)
                .await?;

            hot.append_message(dialog.id, Role::User, &user_message)?;
            hot.append_message(dialog.id, Role::Bot, &reply)?;

            Ok(reply)
        });

        turn.await?
    }

    /// End the dialog with a summary, then migrate it to the archive.
    ///
    /// Rejected before any state change when there is no active dialog or it
    /// has no messages. A summary failure after the finish transition leaves
    /// the dialog finished in the hot store; the boot sweep archives it.
    pub async fn end_dialog(&self, user_id: i64) -> SessionResult<String> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let dialog = self
            .hot
            .get_active_dialog(user_id)?
            .ok_or(SessionError::NoActiveDialog)?;

        let messages = self.hot.get_messages(dialog.id)?;
        if messages.is_empty() {
            return Err(SessionError::EmptyDialog);
        }

        self.hot.finish_dialog(user_id)?;

        let history = pair_exchanges(&messages);
        let summary = self.model.generate_summary(&history).await?;

        self.archiver.archive_finished_dialog(user_id)?;
        self.trees.clear(user_id);

        tracing::info!(user_id, dialog_id = dialog.id, "dialog ended and archived");
        Ok(summary)
    }

    /// Archive every finished dialog left over from a previous run
    pub fn recover_unarchived(&self) -> SessionResult<usize> {
        let archived = self.archiver.archive_all_finished()?;
        if archived > 0 {
            tracing::info!(archived, "recovered unarchived dialogs at startup");
        }
        Ok(archived)
    }
}
