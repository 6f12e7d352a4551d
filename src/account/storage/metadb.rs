//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Imapsift.
//
// Imapsift is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Imapsift is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Imapsift. If not, see <http://www.gnu.org/licenses/>.

use std::convert::TryFrom;
use std::path::Path;
use std::time::Duration;

use rusqlite::OptionalExtension as _;

use super::{db_migrations::apply_migrations, types::*};
use crate::{
    account::model::*,
    support::{error::Error, log_prefix::LogPrefix},
};

/// A connection to the mail store database.
pub struct Connection {
    cxn: rusqlite::Connection,
}

static MIGRATION_V1: &str = include_str!("metadb.v1.sql");

/// A query generated outside the store, together with its parameters.
///
/// The SQL text must only ever be assembled from fixed fragments; every value
/// that came from the client goes into `params`.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Connection {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(log_prefix: &LogPrefix, path: &Path) -> Result<Self, Error> {
        let cxn = rusqlite::Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::init(log_prefix, cxn)
    }

    /// Opens a private, empty, in-memory store.
    pub fn open_in_memory(log_prefix: &LogPrefix) -> Result<Self, Error> {
        Self::init(log_prefix, rusqlite::Connection::open_in_memory()?)
    }

    fn init(
        log_prefix: &LogPrefix,
        mut cxn: rusqlite::Connection,
    ) -> Result<Self, Error> {
        cxn.pragma_update(None, "foreign_keys", true)?;
        cxn.busy_timeout(Duration::from_secs(10))?;
        apply_migrations(log_prefix, &mut cxn, "meta", &[MIGRATION_V1])?;
        Ok(Self { cxn })
    }

    /// Creates a mailbox with the given name.
    ///
    /// On success, returns the ID of the created mailbox.
    pub fn create_mailbox(&mut self, name: &str) -> Result<MailboxId, Error> {
        self.cxn
            .execute("INSERT INTO `mailbox` (`name`) VALUES (?)", (name,))?;
        Ok(MailboxId(self.cxn.last_insert_rowid()))
    }

    /// Finds the ID of the mailbox with the given name, or returns
    /// `Error::NxMailbox` if it does not exist.
    pub fn find_mailbox(&self, name: &str) -> Result<MailboxId, Error> {
        self.cxn
            .query_row(
                "SELECT `id` FROM `mailbox` WHERE `name` = ?",
                (name,),
                from_single,
            )
            .optional()?
            .ok_or(Error::NxMailbox)
    }

    /// Ensures that `id` refers to an extant mailbox.
    pub fn require_mailbox(&self, id: MailboxId) -> Result<(), Error> {
        self.cxn
            .prepare_cached("SELECT 1 FROM `mailbox` WHERE `id` = ?")?
            .query_row((id,), from_single::<i64>)
            .optional()?
            .map(|_| ())
            .ok_or(Error::NxMailbox)
    }

    /// Adds a message and all its derived data to `mailbox_id`.
    ///
    /// Returns the UID allocated to the new message.
    pub fn append_message(
        &mut self,
        mailbox_id: MailboxId,
        message: &NewMessage,
    ) -> Result<Uid, Error> {
        let txn = self.cxn.transaction_with_behavior(
            rusqlite::TransactionBehavior::Immediate,
        )?;

        let size = i64::try_from(message.size).unwrap_or(i64::MAX);
        let status = if message.flags.contains(MessageFlags::SEEN) {
            MessageStatus::Seen
        } else {
            MessageStatus::New
        };
        txn.execute(
            "INSERT INTO `message` (\
               `mailbox_id`, `status`, `seen_flag`, `answered_flag`, \
               `deleted_flag`, `flagged_flag`, `draft_flag`, `recent_flag`, \
               `internal_date`, `size`\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                mailbox_id,
                status,
                message.flags.contains(MessageFlags::SEEN),
                message.flags.contains(MessageFlags::ANSWERED),
                message.flags.contains(MessageFlags::DELETED),
                message.flags.contains(MessageFlags::FLAGGED),
                message.flags.contains(MessageFlags::DRAFT),
                message.flags.contains(MessageFlags::RECENT),
                SqlDateTime(message.internal_date),
                size,
            ),
        )?;
        let uid = u64::try_from(txn.last_insert_rowid())
            .ok()
            .and_then(Uid::of)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(
                0,
                txn.last_insert_rowid(),
            ))?;

        {
            let mut insert_keyword = txn.prepare(
                "INSERT OR IGNORE INTO `keyword` (`uid`, `keyword`) \
                 VALUES (?, ?)",
            )?;
            for keyword in &message.keywords {
                insert_keyword.execute((uid, keyword))?;
            }

            let mut insert_header = txn.prepare(
                "INSERT INTO `header` (`uid`, `name`, `value`) \
                 VALUES (?, ?, ?)",
            )?;
            for &(ref name, ref value) in &message.headers {
                insert_header.execute((uid, name, value))?;
            }

            let mut insert_part = txn.prepare(
                "INSERT INTO `mime_part` \
                 (`uid`, `part_key`, `is_header`, `data`) \
                 VALUES (?, ?, ?, ?)",
            )?;
            for (ix, part) in message.parts.iter().enumerate() {
                insert_part.execute((
                    uid,
                    ix as i64 + 1,
                    part.is_header,
                    &part.data,
                ))?;
            }
        }

        for (table, value) in [
            ("from_field", &message.from),
            ("to_field", &message.to),
            ("cc_field", &message.cc),
        ] {
            if let Some(addr) = value {
                txn.execute(
                    &format!(
                        "INSERT INTO `{}` (`uid`, `addr`) VALUES (?, ?)",
                        table,
                    ),
                    (uid, addr),
                )?;
            }
        }

        if let Some(ref subject) = message.subject {
            txn.execute(
                "INSERT INTO `subject_field` (`uid`, `subject`) \
                 VALUES (?, ?)",
                (uid, subject),
            )?;
        }

        if let Some(date) = message.date {
            txn.execute(
                "INSERT INTO `date_field` (`uid`, `date`) VALUES (?, ?)",
                (uid, SqlDateTime(date)),
            )?;
        }

        txn.commit()?;
        Ok(uid)
    }

    /// Changes the lifecycle status of a message.
    ///
    /// Returns `Error::NxMessage` if there is no such message.
    pub fn set_status(
        &mut self,
        uid: Uid,
        status: MessageStatus,
    ) -> Result<(), Error> {
        let n = self.cxn.execute(
            "UPDATE `message` SET `status` = ? WHERE `uid` = ?",
            (status, uid),
        )?;
        if 0 == n {
            Err(Error::NxMessage)
        } else {
            Ok(())
        }
    }

    /// Fetches the UID, flags, internal date, and size of every visible
    /// message in `mailbox_id`, in ascending UID order.
    pub fn fetch_visible_messages(
        &self,
        mailbox_id: MailboxId,
    ) -> Result<Vec<VisibleMessage>, Error> {
        let [new, seen] = MessageStatus::VISIBLE;
        let messages = self
            .cxn
            .prepare_cached(
                "SELECT `uid`, `seen_flag`, `answered_flag`, `deleted_flag`, \
                        `flagged_flag`, `draft_flag`, `recent_flag`, \
                        `internal_date`, `size` \
                 FROM `message` \
                 WHERE `mailbox_id` = ? AND `status` IN (?, ?) \
                 ORDER BY `uid`",
            )?
            .query_map((mailbox_id, new, seen), from_row::<VisibleMessage>)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Fetches the snapshot row of `uid` if it is a visible message in
    /// `mailbox_id`.
    pub fn fetch_visible_message(
        &self,
        mailbox_id: MailboxId,
        uid: Uid,
    ) -> Result<Option<VisibleMessage>, Error> {
        let [new, seen] = MessageStatus::VISIBLE;
        let message = self
            .cxn
            .query_row(
                "SELECT `uid`, `seen_flag`, `answered_flag`, `deleted_flag`, \
                        `flagged_flag`, `draft_flag`, `recent_flag`, \
                        `internal_date`, `size` \
                 FROM `message` \
                 WHERE `mailbox_id` = ? AND `uid` = ? AND `status` IN (?, ?)",
                (mailbox_id, uid, new, seen),
                from_row::<VisibleMessage>,
            )
            .optional()?;
        Ok(message)
    }

    /// Fetches the keywords of `uid`, in insertion order.
    pub fn fetch_message_keywords(
        &self,
        uid: Uid,
    ) -> Result<Vec<String>, Error> {
        let keywords = self
            .cxn
            .prepare_cached(
                "SELECT `keyword` FROM `keyword` WHERE `uid` = ? \
                 ORDER BY `rowid`",
            )?
            .query_map((uid,), from_single::<String>)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keywords)
    }

    /// Fetches every `(uid, keyword)` pair of messages in `mailbox_id` which
    /// have not yet been deleted.
    pub fn fetch_keywords(
        &self,
        mailbox_id: MailboxId,
    ) -> Result<Vec<(Uid, String)>, Error> {
        let keywords = self
            .cxn
            .prepare_cached(
                "SELECT `k`.`uid`, `k`.`keyword` \
                 FROM `keyword` `k` \
                 JOIN `message` `m` ON `m`.`uid` = `k`.`uid` \
                 WHERE `m`.`mailbox_id` = ? AND `m`.`status` < ? \
                 ORDER BY `k`.`uid`",
            )?
            .query_map(
                (mailbox_id, MessageStatus::Deleted),
                from_row::<(Uid, String)>,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keywords)
    }

    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        self.cxn.execute_batch(sql)?;
        Ok(())
    }

    /// Runs a generated query whose first column is a UID, returning the UIDs
    /// in the order the store produced them.
    pub fn query_uids(&self, query: &StoreQuery) -> Result<Vec<Uid>, Error> {
        let uids = self
            .cxn
            .prepare(&query.sql)?
            .query_map(
                rusqlite::params_from_iter(query.params.iter()),
                from_single::<Uid>,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(uids)
    }

    /// Runs a generated query whose first two columns are a UID and a piece
    /// of text, returning the rows in the order the store produced them.
    pub fn query_uid_text_pairs(
        &self,
        query: &StoreQuery,
    ) -> Result<Vec<(Uid, String)>, Error> {
        let rows = self
            .cxn
            .prepare(&query.sql)?
            .query_map(
                rusqlite::params_from_iter(query.params.iter()),
                from_row::<(Uid, String)>,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
