//! Append-only per-recipient mailboxes
//!
//! Each recipient owns one JSON array file per namespace. Any number of
//! writers may append; only the recipient flips read flags, via
//! [`Mailbox::pop_unread`]. Once a message has been popped it is never
//! returned again.

use crate::error::{Result, TeamsError};
use crate::io::json::{read_json_array, write_json_atomic};
use crate::io::lock::{LockOptions, with_lock};
use crate::paths::TeamPaths;
use crate::schema::MailboxMessage;
use std::path::PathBuf;

/// Mailbox store bound to one team directory.
#[derive(Debug, Clone)]
pub struct Mailbox {
    paths: TeamPaths,
    lock_opts: LockOptions,
}

impl Mailbox {
    pub fn new(paths: TeamPaths) -> Self {
        Self {
            paths,
            lock_opts: LockOptions::with_label("mailbox"),
        }
    }

    #[cfg(test)]
    fn with_lock_options(paths: TeamPaths, lock_opts: LockOptions) -> Self {
        Self { paths, lock_opts }
    }

    fn lock_path(&self, inbox_path: &PathBuf) -> PathBuf {
        let mut name = inbox_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".lock");
        inbox_path.with_file_name(name)
    }

    /// Append a message to a recipient's inbox under the per-inbox lock.
    ///
    /// Entries already in the file are carried over verbatim, including ones
    /// this version cannot parse.
    pub fn write(&self, namespace: &str, recipient: &str, message: MailboxMessage) -> Result<()> {
        let inbox_path = self.paths.inbox_path(namespace, recipient);
        let lock_path = self.lock_path(&inbox_path);

        with_lock(&lock_path, &self.lock_opts, || {
            let mut entries = read_json_array(&inbox_path);
            let value = serde_json::to_value(&message).map_err(|e| TeamsError::Json {
                path: inbox_path.clone(),
                source: e,
            })?;
            entries.push(value);
            write_json_atomic(&inbox_path, &entries)
        })
    }

    /// Pop every unread message from a recipient's inbox.
    ///
    /// Under the inbox lock: coerce each element (malformed entries are
    /// silently dropped), flip unread messages to read, rewrite only when
    /// something flipped, and return the popped copies in append order.
    ///
    /// A lock timeout is transient (the next poll retries) and returns an
    /// empty batch instead of an error. All other errors propagate.
    pub fn pop_unread(&self, namespace: &str, recipient: &str) -> Result<Vec<MailboxMessage>> {
        let inbox_path = self.paths.inbox_path(namespace, recipient);
        let lock_path = self.lock_path(&inbox_path);

        let result = with_lock(&lock_path, &self.lock_opts, || {
            let entries = read_json_array(&inbox_path);
            if entries.is_empty() {
                return Ok(Vec::new());
            }

            let mut messages: Vec<MailboxMessage> = entries
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect();

            let mut popped = Vec::new();
            for msg in messages.iter_mut() {
                if !msg.read {
                    msg.read = true;
                    popped.push(msg.clone());
                }
            }

            if !popped.is_empty() {
                write_json_atomic(&inbox_path, &messages)?;
            }
            Ok(popped)
        });

        match result {
            Err(e) if e.is_lock_timeout() => Ok(Vec::new()),
            other => other,
        }
    }
}
