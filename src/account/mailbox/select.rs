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

use std::collections::BTreeMap;

use log::{debug, error, warn};

use super::defs::*;
use super::index::UidIndex;
use crate::account::model::*;
use crate::account::storage::{Connection, VisibleMessage};
use crate::support::{error::Error, log_prefix::LogPrefix};

/// The default bound on the length of search literals.
pub const DEFAULT_MAX_NEEDLE_LEN: usize = 1024;

impl Mailbox {
    /// Opens the mailbox with the given ID, loading its identifier index and
    /// summary cache.
    pub fn open(
        cxn: &Connection,
        log_prefix: LogPrefix,
        id: MailboxId,
    ) -> Result<Self, Error> {
        cxn.require_mailbox(id)?;

        let mut this = Mailbox {
            log_prefix,
            id,
            index: UidIndex::default(),
            msginfo: BTreeMap::new(),
            display: DisplayMode::default(),
            max_needle_len: DEFAULT_MAX_NEEDLE_LEN,
            search: None,
        };
        this.refresh(cxn)?;
        Ok(this)
    }

    /// Reloads the identifier index and summary cache from the store.
    ///
    /// The current index and cache remain in place until the replacements
    /// have been fully built, and are left untouched if loading fails. Any
    /// search tree is discarded since its sequence numbers are stale.
    pub fn refresh(&mut self, cxn: &Connection) -> Result<(), Error> {
        let messages = cxn.fetch_visible_messages(self.id)?;
        let keywords = cxn.fetch_keywords(self.id)?;

        let mut msginfo = messages
            .into_iter()
            .map(|m| (m.uid, self.summarise(m, Vec::new())))
            .collect::<BTreeMap<_, _>>();

        for (uid, keyword) in keywords {
            // Keywords of messages that are not visible are simply ignored
            if let Some(info) = msginfo.get_mut(&uid) {
                info.keywords.push(keyword);
            }
        }

        let index = UidIndex::new(msginfo.keys().copied());

        self.index = index;
        self.msginfo = msginfo;
        self.search = None;

        debug!(
            "{} Loaded {} messages, max UID {:?}",
            self.log_prefix,
            self.index.len(),
            self.index.max_uid(),
        );
        Ok(())
    }

    /// Adds a newly-delivered UID to the identifier index, renumbering every
    /// message, and loads its summary into the cache.
    ///
    /// A UID the store does not show as visible in this mailbox still joins
    /// the index, but with a warning and no cached summary.
    pub fn insert_uid(
        &mut self,
        cxn: &Connection,
        uid: Uid,
    ) -> Result<(), Error> {
        let info = match cxn.fetch_visible_message(self.id, uid)? {
            Some(message) => {
                let keywords = cxn.fetch_message_keywords(uid)?;
                Some(self.summarise(message, keywords))
            }
            None => {
                warn!(
                    "{} Inserting {} which the store does not show as visible",
                    self.log_prefix, uid
                );
                None
            }
        };

        if let Some(info) = info {
            self.msginfo.insert(uid, info);
        }
        self.index.insert(uid);
        self.search = None;
        Ok(())
    }

    /// Removes `uid` from the snapshot, renumbering every message.
    ///
    /// A UID missing from the summary cache is only worth a warning, but a
    /// UID missing from the identifier index means the index and the store
    /// have diverged and is reported as `Error::IndexOutOfSync`.
    pub fn remove_uid(&mut self, uid: Uid) -> Result<(), Error> {
        if self.msginfo.remove(&uid).is_none() {
            warn!(
                "{} Removing {} which has no cached summary",
                self.log_prefix, uid
            );
        }

        self.search = None;
        self.index.remove(uid).map_err(|_| {
            error!(
                "{} Removing {} which is not in the identifier index",
                self.log_prefix, uid
            );
            Error::IndexOutOfSync(uid)
        })
    }

    fn summarise(
        &self,
        message: VisibleMessage,
        keywords: Vec<String>,
    ) -> MessageInfo {
        MessageInfo {
            uid: message.uid,
            mailbox_id: self.id,
            flags: message.flags,
            keywords,
            internal_date: message.internal_date,
            size: message.size,
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test_prelude::*;
    use super::*;

    #[test]
    fn open_loads_snapshot() {
        let setup = set_up();
        let mb = setup.open();

        assert_eq!(3, mb.exists());
        assert_eq!(
            vec![
                (Uid::u(10), Seqnum::u(1)),
                (Uid::u(11), Seqnum::u(2)),
                (Uid::u(12), Seqnum::u(3)),
            ],
            mb.index().iter().collect::<Vec<_>>()
        );

        let info = mb.message_info(Uid::u(12)).unwrap();
        assert_eq!(setup.mailbox_id, info.mailbox_id);
        assert!(info.flags.contains(MessageFlags::SEEN));
        assert!(info.has_keyword("$work"));
        assert_eq!(2000, info.size);

        let info = mb.message_info(Uid::u(11)).unwrap();
        assert!(info.flags.contains(MessageFlags::RECENT));
        assert!(info.keywords.is_empty());

        assert!(mb.message_info(Uid::u(1)).is_none());
    }

    #[test]
    fn open_nonexistent_mailbox() {
        let setup = set_up();
        assert!(matches!(
            Mailbox::open(
                &setup.cxn,
                LogPrefix::new("test".to_owned()),
                MailboxId(9999)
            ),
            Err(Error::NxMailbox)
        ));
    }

    #[test]
    fn deleted_messages_are_not_visible() {
        let mut setup = set_up();
        setup.cxn.set_status(Uid::u(11), MessageStatus::Deleted).unwrap();

        let mb = setup.open();
        assert_eq!(2, mb.exists());
        assert_eq!(Seqnum::u(2), mb.index().seqnum(Uid::u(12)).unwrap());
        assert!(mb.message_info(Uid::u(11)).is_none());
    }

    #[test]
    fn insert_and_remove_renumber() {
        let mut setup = set_up();
        let mut mb = setup.open();

        let uid = setup.append(NewMessage {
            flags: MessageFlags::FLAGGED,
            keywords: vec!["$label1".to_owned()],
            size: 77,
            ..NewMessage::default()
        });
        mb.insert_uid(&setup.cxn, uid).unwrap();
        assert_eq!(4, mb.exists());
        assert_eq!(Seqnum::u(4), mb.index().seqnum(uid).unwrap());

        let info = mb.message_info(uid).unwrap();
        assert_eq!(setup.mailbox_id, info.mailbox_id);
        assert!(info.flags.contains(MessageFlags::FLAGGED));
        assert!(info.has_keyword("$label1"));
        assert_eq!(77, info.size);

        mb.remove_uid(Uid::u(10)).unwrap();
        assert_eq!(Seqnum::u(1), mb.index().seqnum(Uid::u(11)).unwrap());
        assert!(mb.message_info(Uid::u(10)).is_none());

        assert_matches!(
            Err(Error::IndexOutOfSync(_)),
            mb.remove_uid(Uid::u(10))
        );
    }

    #[test]
    fn remove_uncached_uid_is_only_a_warning() {
        let mut setup = set_up();
        let mut mb = setup.open();

        let uid = setup.append(NewMessage::default());
        setup.cxn.set_status(uid, MessageStatus::Deleted).unwrap();
        mb.insert_uid(&setup.cxn, uid).unwrap();
        assert_eq!(4, mb.exists());
        assert!(mb.message_info(uid).is_none());

        mb.remove_uid(uid).unwrap();
        assert_eq!(3, mb.exists());
    }
}
