//! Email inbox modality.
//!
//! Emails are keyed by ID and grouped into threads. Receiving an email
//! into an unknown thread creates the thread as a side effect; deleting
//! the last email of a thread removes it.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use envsim_core::{Modality, ModalityError, StateMetadata, UndoAction, UndoError};

const NAME: &str = "email";

fn inbox() -> String {
    "inbox".to_string()
}

fn yes() -> bool {
    true
}

/// One message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Unique ID.
    pub id: String,
    /// Owning thread.
    pub thread_id: String,
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Folder name.
    pub folder: String,
    /// Read flag.
    pub read: bool,
    /// Virtual time of arrival.
    pub received_at: DateTime<Utc>,
}

/// A conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Unique ID.
    pub id: String,
    /// Subject of the first message.
    pub subject: String,
    /// Member emails in arrival order.
    pub email_ids: Vec<String>,
}

/// Inbox state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailState {
    /// Version bookkeeping.
    pub metadata: StateMetadata,
    /// Emails in arrival order.
    pub emails: IndexMap<String, Email>,
    /// Threads in creation order.
    pub threads: IndexMap<String, Thread>,
}

/// Mutations accepted by [`EmailState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum EmailInput {
    /// Deliver a new email. Rejected if the ID is taken.
    Receive {
        /// New email ID.
        email_id: String,
        /// Thread to join; defaults to a new thread named after the email.
        #[serde(default)]
        thread_id: Option<String>,
        /// Sender.
        from: String,
        /// Recipients.
        #[serde(default)]
        to: Vec<String>,
        /// Subject line.
        subject: String,
        /// Body.
        #[serde(default)]
        body: String,
        /// Destination folder.
        #[serde(default = "inbox")]
        folder: String,
    },
    /// Delete one email. No-op if absent.
    Delete {
        /// Target email.
        email_id: String,
    },
    /// Set the read flag on several emails. Unknown IDs are ignored.
    MarkRead {
        /// Target emails.
        email_ids: Vec<String>,
        /// New flag value.
        #[serde(default = "yes")]
        read: bool,
    },
    /// Move one email to another folder. No-op if absent.
    Move {
        /// Target email.
        email_id: String,
        /// Destination folder.
        folder: String,
    },
    /// Delete every email in a folder.
    ClearFolder {
        /// Folder to empty.
        folder: String,
    },
}

/// Undo data for [`EmailInput`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EmailUndo {
    /// The input changed nothing.
    Noop,
    /// Remove a received email, and its thread if the email created it.
    RemoveEmail {
        /// The received email.
        email_id: String,
        /// Its thread.
        thread_id: String,
        /// Whether the thread was created by this email.
        thread_created: bool,
    },
    /// Put back one deleted email and its thread's prior value.
    RestoreEmail {
        /// Former position in the email map.
        index: usize,
        /// The deleted email.
        email: Email,
        /// Former position of the thread.
        thread_index: usize,
        /// The thread before deletion.
        thread: Thread,
    },
    /// Put back read flags.
    RestoreReadFlags {
        /// `(email_id, previous flag)` for every affected email.
        flags: Vec<(String, bool)>,
    },
    /// Put back one email's folder.
    RestoreFolder {
        /// Target email.
        email_id: String,
        /// Folder before the move.
        folder: String,
    },
    /// Put back several deleted emails and their threads' prior values.
    RestoreEmails {
        /// `(former index, email)` in ascending index order.
        emails: Vec<(usize, Email)>,
        /// `(former index, thread)` in ascending index order.
        threads: Vec<(usize, Thread)>,
    },
}

impl UndoAction for EmailUndo {
    const ACTIONS: &'static [&'static str] = &[
        "noop",
        "remove_email",
        "restore_email",
        "restore_read_flags",
        "restore_folder",
        "restore_emails",
    ];
}

impl EmailState {
    /// Empty inbox.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            metadata: StateMetadata::new(created),
            emails: IndexMap::new(),
            threads: IndexMap::new(),
        }
    }

    /// Emails in `folder`, in arrival order.
    pub fn folder(&self, folder: &str) -> impl Iterator<Item = &Email> {
        let folder = folder.to_string();
        self.emails.values().filter(move |e| e.folder == folder)
    }

    /// Number of unread emails.
    pub fn unread_count(&self) -> usize {
        self.emails.values().filter(|e| !e.read).count()
    }

    /// Remove `email_id` from its thread, dropping the thread if empty.
    fn detach(&mut self, thread_id: &str, email_id: &str) {
        if let Some(thread) = self.threads.get_mut(thread_id) {
            thread.email_ids.retain(|id| id != email_id);
            if thread.email_ids.is_empty() {
                self.threads.shift_remove(thread_id);
            }
        }
    }

    /// Put a thread back at its former position, or replace it in place.
    fn reinstate_thread(&mut self, index: usize, thread: Thread) -> Result<(), UndoError> {
        if self.threads.contains_key(&thread.id) {
            self.threads.insert(thread.id.clone(), thread);
        } else {
            if index > self.threads.len() {
                return Err(UndoError::inconsistent(
                    NAME,
                    format!("thread index {index} out of range"),
                ));
            }
            self.threads.shift_insert(index, thread.id.clone(), thread);
        }
        Ok(())
    }

    fn reinstate_email(&mut self, index: usize, email: Email) -> Result<(), UndoError> {
        if self.emails.contains_key(&email.id) {
            return Err(UndoError::inconsistent(
                NAME,
                format!("email '{}' already present", email.id),
            ));
        }
        if index > self.emails.len() {
            return Err(UndoError::inconsistent(
                NAME,
                format!("email index {index} out of range"),
            ));
        }
        self.emails.shift_insert(index, email.id.clone(), email);
        Ok(())
    }

    /// Put threads then emails back at their recorded positions. Either
    /// all of them land or the state is left untouched.
    fn reinstate(
        &mut self,
        threads: Vec<(usize, Thread)>,
        emails: Vec<(usize, Email)>,
    ) -> Result<(), UndoError> {
        let mut staged = self.clone();
        for (index, thread) in threads {
            staged.reinstate_thread(index, thread)?;
        }
        for (index, email) in emails {
            staged.reinstate_email(index, email)?;
        }
        *self = staged;
        Ok(())
    }
}

impl Modality for EmailState {
    const MODALITY_TYPE: &'static str = NAME;
    type Input = EmailInput;
    type Undo = EmailUndo;

    fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut StateMetadata {
        &mut self.metadata
    }

    fn capture_undo(&self, input: &EmailInput) -> Result<EmailUndo, ModalityError> {
        Ok(match input {
            EmailInput::Receive {
                email_id,
                thread_id,
                ..
            } => {
                let thread_id = thread_id.clone().unwrap_or_else(|| email_id.clone());
                EmailUndo::RemoveEmail {
                    email_id: email_id.clone(),
                    thread_created: !self.threads.contains_key(&thread_id),
                    thread_id,
                }
            }
            EmailInput::Delete { email_id } => match self.emails.get_full(email_id) {
                None => EmailUndo::Noop,
                Some((index, _, email)) => {
                    let (thread_index, _, thread) = self
                        .threads
                        .get_full(&email.thread_id)
                        .ok_or_else(|| {
                            ModalityError::rejected(
                                NAME,
                                format!("email '{email_id}' has no thread"),
                            )
                        })?;
                    EmailUndo::RestoreEmail {
                        index,
                        email: email.clone(),
                        thread_index,
                        thread: thread.clone(),
                    }
                }
            },
            EmailInput::MarkRead { email_ids, .. } => {
                let flags: Vec<_> = email_ids
                    .iter()
                    .filter_map(|id| self.emails.get(id).map(|e| (id.clone(), e.read)))
                    .collect();
                if flags.is_empty() {
                    EmailUndo::Noop
                } else {
                    EmailUndo::RestoreReadFlags { flags }
                }
            }
            EmailInput::Move { email_id, .. } => match self.emails.get(email_id) {
                None => EmailUndo::Noop,
                Some(email) => EmailUndo::RestoreFolder {
                    email_id: email_id.clone(),
                    folder: email.folder.clone(),
                },
            },
            EmailInput::ClearFolder { folder } => {
                let emails: Vec<(usize, Email)> = self
                    .emails
                    .values()
                    .enumerate()
                    .filter(|(_, e)| e.folder == *folder)
                    .map(|(i, e)| (i, e.clone()))
                    .collect();
                if emails.is_empty() {
                    EmailUndo::Noop
                } else {
                    let threads = self
                        .threads
                        .values()
                        .enumerate()
                        .filter(|(_, t)| emails.iter().any(|(_, e)| e.thread_id == t.id))
                        .map(|(i, t)| (i, t.clone()))
                        .collect();
                    EmailUndo::RestoreEmails { emails, threads }
                }
            }
        })
    }

    fn apply(&mut self, input: EmailInput, now: DateTime<Utc>) -> Result<(), ModalityError> {
        match input {
            EmailInput::Receive {
                email_id,
                thread_id,
                from,
                to,
                subject,
                body,
                folder,
            } => {
                if self.emails.contains_key(&email_id) {
                    return Err(ModalityError::rejected(
                        NAME,
                        format!("email '{email_id}' already exists"),
                    ));
                }
                let thread_id = thread_id.unwrap_or_else(|| email_id.clone());
                self.threads
                    .entry(thread_id.clone())
                    .or_insert_with(|| Thread {
                        id: thread_id.clone(),
                        subject: subject.clone(),
                        email_ids: Vec::new(),
                    })
                    .email_ids
                    .push(email_id.clone());
                self.emails.insert(
                    email_id.clone(),
                    Email {
                        id: email_id,
                        thread_id,
                        from,
                        to,
                        subject,
                        body,
                        folder,
                        read: false,
                        received_at: now,
                    },
                );
            }
            EmailInput::Delete { email_id } => {
                if let Some(email) = self.emails.shift_remove(&email_id) {
                    self.detach(&email.thread_id, &email_id);
                }
            }
            EmailInput::MarkRead { email_ids, read } => {
                for id in &email_ids {
                    if let Some(email) = self.emails.get_mut(id) {
                        email.read = read;
                    }
                }
            }
            EmailInput::Move { email_id, folder } => {
                if let Some(email) = self.emails.get_mut(&email_id) {
                    email.folder = folder;
                }
            }
            EmailInput::ClearFolder { folder } => {
                let doomed: Vec<(String, String)> = self
                    .emails
                    .values()
                    .filter(|e| e.folder == folder)
                    .map(|e| (e.id.clone(), e.thread_id.clone()))
                    .collect();
                for (email_id, thread_id) in doomed {
                    self.emails.shift_remove(&email_id);
                    self.detach(&thread_id, &email_id);
                }
            }
        }
        Ok(())
    }

    fn revert(&mut self, undo: EmailUndo) -> Result<(), UndoError> {
        match undo {
            EmailUndo::Noop => {}
            EmailUndo::RemoveEmail {
                email_id,
                thread_id,
                thread_created,
            } => {
                if !self.emails.contains_key(&email_id) {
                    return Err(UndoError::inconsistent(
                        NAME,
                        format!("received email '{email_id}' is missing"),
                    ));
                }
                if !thread_created && !self.threads.contains_key(&thread_id) {
                    return Err(UndoError::inconsistent(
                        NAME,
                        format!("thread '{thread_id}' is missing"),
                    ));
                }
                self.emails.shift_remove(&email_id);
                if thread_created {
                    self.threads.shift_remove(&thread_id);
                } else if let Some(thread) = self.threads.get_mut(&thread_id) {
                    if let Some(pos) = thread.email_ids.iter().rposition(|id| *id == email_id) {
                        thread.email_ids.remove(pos);
                    }
                }
            }
            EmailUndo::RestoreEmail {
                index,
                email,
                thread_index,
                thread,
            } => {
                self.reinstate(vec![(thread_index, thread)], vec![(index, email)])?;
            }
            EmailUndo::RestoreReadFlags { flags } => {
                if let Some((id, _)) = flags.iter().find(|(id, _)| !self.emails.contains_key(id)) {
                    return Err(UndoError::inconsistent(
                        NAME,
                        format!("email '{id}' is missing"),
                    ));
                }
                for (id, read) in flags {
                    let email = self.emails.get_mut(&id).ok_or_else(|| {
                        UndoError::inconsistent(NAME, format!("email '{id}' is missing"))
                    })?;
                    email.read = read;
                }
            }
            EmailUndo::RestoreFolder { email_id, folder } => {
                let email = self.emails.get_mut(&email_id).ok_or_else(|| {
                    UndoError::inconsistent(NAME, format!("email '{email_id}' is missing"))
                })?;
                email.folder = folder;
            }
            EmailUndo::RestoreEmails { emails, threads } => self.reinstate(threads, emails)?,
        }
        Ok(())
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (id, email) in &self.emails {
            if *id != email.id {
                problems.push(format!("email keyed '{id}' has id '{}'", email.id));
            }
            match self.threads.get(&email.thread_id) {
                Some(thread) if thread.email_ids.contains(id) => {}
                Some(_) => problems.push(format!(
                    "thread '{}' does not list email '{id}'",
                    email.thread_id
                )),
                None => problems.push(format!(
                    "email '{id}' references missing thread '{}'",
                    email.thread_id
                )),
            }
        }
        for (id, thread) in &self.threads {
            if thread.email_ids.is_empty() {
                problems.push(format!("thread '{id}' is empty"));
            }
            for email_id in &thread.email_ids {
                if !self.emails.contains_key(email_id) {
                    problems.push(format!("thread '{id}' lists missing email '{email_id}'"));
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use envsim_core::ModalityState;
    use envsim_test_utils::t0;
    use serde_json::{json, Value};

    fn receive(id: &str, thread: Option<&str>, folder: &str) -> Value {
        json!({
            "operation": "receive",
            "email_id": id,
            "thread_id": thread,
            "from": "alice@example.com",
            "to": ["me@example.com"],
            "subject": format!("subject {id}"),
            "folder": folder,
        })
    }

    /// Apply `input` and return the record that reverts it.
    fn apply(state: &mut EmailState, input: &Value) -> envsim_core::UndoRecord {
        let record = state.create_undo_data(input).unwrap();
        state.apply_input(input, t0() + TimeDelta::minutes(1)).unwrap();
        record
    }

    fn seeded() -> EmailState {
        let mut state = EmailState::new(t0());
        apply(&mut state, &receive("e1", Some("t1"), "inbox"));
        apply(&mut state, &receive("e2", Some("t1"), "inbox"));
        apply(&mut state, &receive("e3", None, "archive"));
        state
    }

    #[test]
    fn receive_creates_thread_once() {
        let state = seeded();
        assert_eq!(state.threads.len(), 2);
        assert_eq!(state.threads["t1"].email_ids, vec!["e1", "e2"]);
        assert_eq!(state.emails["e3"].thread_id, "e3");
        assert_eq!(state.unread_count(), 3);
        assert!(Modality::validate(&state).is_empty());
    }

    #[test]
    fn receive_undo_removes_created_thread_only() {
        let mut state = seeded();
        let before = state.clone();

        let joined = apply(&mut state, &receive("e4", Some("t1"), "inbox"));
        assert_eq!(joined.data["thread_created"], false);
        ModalityState::apply_undo(&mut state, &joined).unwrap();
        assert_eq!(state, before);

        let fresh = apply(&mut state, &receive("e5", Some("t9"), "inbox"));
        assert_eq!(fresh.data["thread_created"], true);
        ModalityState::apply_undo(&mut state, &fresh).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn duplicate_receive_is_rejected() {
        let mut state = seeded();
        let err = ModalityState::apply_input(&mut state, &receive("e1", None, "inbox"), t0())
            .unwrap_err();
        assert!(matches!(err, ModalityError::Rejected { .. }));
    }

    #[test]
    fn delete_middle_email_restores_order() {
        let mut state = seeded();
        let before = state.clone();
        let record = apply(&mut state, &json!({"operation": "delete", "email_id": "e1"}));
        assert_eq!(record.action, "restore_email");
        assert_eq!(state.threads["t1"].email_ids, vec!["e2"]);

        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
        assert_eq!(state.emails.get_index_of("e1"), Some(0));
    }

    #[test]
    fn delete_last_email_drops_thread_and_undo_restores_it() {
        let mut state = seeded();
        let before = state.clone();
        let record = apply(&mut state, &json!({"operation": "delete", "email_id": "e3"}));
        assert!(!state.threads.contains_key("e3"));
        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn failed_restore_leaves_threads_untouched() {
        let mut state = seeded();
        let original = state.emails["e3"].clone();
        let record = apply(&mut state, &json!({"operation": "delete", "email_id": "e3"}));
        state.emails.insert("e3".into(), original);
        let before = state.clone();

        let err = ModalityState::apply_undo(&mut state, &record).unwrap_err();
        assert!(matches!(err, UndoError::InconsistentState { .. }));
        assert!(!state.threads.contains_key("e3"));
        assert_eq!(state, before);
    }

    #[test]
    fn delete_absent_is_reversible_noop() {
        let mut state = seeded();
        let before = state.clone();
        let record = apply(&mut state, &json!({"operation": "delete", "email_id": "nope"}));
        assert!(record.is_noop());
        assert_eq!(state.metadata.version, before.metadata.version + 1);
        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn mark_read_restores_each_flag() {
        let mut state = seeded();
        apply(&mut state, &json!({"operation": "mark_read", "email_ids": ["e2"]}));
        let before = state.clone();

        let record = apply(
            &mut state,
            &json!({"operation": "mark_read", "email_ids": ["e1", "e2", "ghost"], "read": false}),
        );
        assert_eq!(state.unread_count(), 3);
        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
        assert!(state.emails["e2"].read);
    }

    #[test]
    fn move_and_undo() {
        let mut state = seeded();
        let before = state.clone();
        let record = apply(
            &mut state,
            &json!({"operation": "move", "email_id": "e2", "folder": "archive"}),
        );
        assert_eq!(state.folder("archive").count(), 2);
        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn clear_folder_restores_everything() {
        let mut state = seeded();
        apply(&mut state, &receive("e4", Some("e3"), "inbox"));
        let before = state.clone();

        let record = apply(&mut state, &json!({"operation": "clear_folder", "folder": "inbox"}));
        assert_eq!(state.emails.len(), 1);
        assert_eq!(state.threads.len(), 1);
        assert!(Modality::validate(&state).is_empty());

        ModalityState::apply_undo(&mut state, &record).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn undo_against_missing_email_is_inconsistent() {
        let mut state = seeded();
        let record = apply(
            &mut state,
            &json!({"operation": "move", "email_id": "e2", "folder": "archive"}),
        );
        state.emails.shift_remove("e2");
        assert!(matches!(
            ModalityState::apply_undo(&mut state, &record),
            Err(UndoError::InconsistentState { .. })
        ));
    }
}
