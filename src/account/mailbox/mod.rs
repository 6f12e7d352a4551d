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

//! Support for searching a single mailbox.
//!
//! A `Mailbox` is a snapshot of the visible messages of one mailbox in the
//! store: an identifier index mapping UIDs to sequence numbers, and a cache
//! of per-message summaries. Both are loaded when the mailbox is opened and
//! are renumbered wholesale whenever a message is added or removed.
//!
//! `SEARCH`, `SORT` and `THREAD` are evaluated in four stages:
//!
//! - The argument list of the command is parsed into a `SearchTree`, an arena
//!   of typed nodes. Boolean structure (`NOT`, `OR`, parentheses) becomes
//!   group nodes; everything else becomes a leaf.
//!
//! - Each leaf is evaluated into a found set. Message-set leaves are resolved
//!   directly against the identifier index; all others are translated into a
//!   single SQL query against the store (with every literal bound as a
//!   parameter) whose UIDs are then mapped back through the index.
//!
//! - The tree is merged post-order: `AND` intersects, `OR` unions its two
//!   operands and intersects the union into its scope, and `NOT` removes its
//!   operand from its scope. The result of the root is the found set of the
//!   whole search.
//!
//! - For `SORT` and `THREAD`, the store is asked for an ordering of all
//!   visible messages, which is then filtered down to the found set.
//!
//! ## About the layout of this module
//!
//! This module is collectively a single abstraction, i.e., it should be
//! thought of as one large rust file. It is simply split apart because it's
//! unwieldy otherwise.

// Basic struct definitions
mod defs;
mod index;
mod search_tree;
pub use defs::Mailbox;
pub use index::UidIndex;
pub use search_tree::{FoundSet, SearchKey, SearchTree};

// Query translation
mod search_backend;

// Protocol-facing operations
mod search; // build_search_tree, evaluate_search, rendering
mod search_parser;
mod select; // open, refresh, insert_uid, remove_uid
mod sort; // evaluate_sort, THREAD ORDEREDSUBJECT

pub use select::DEFAULT_MAX_NEEDLE_LEN;

#[cfg(test)]
mod test_prelude {
    pub(super) use super::defs::*;

    use chrono::prelude::*;

    use crate::account::model::*;
    use crate::account::storage::Connection;
    use crate::support::log_prefix::LogPrefix;

    pub(super) struct Setup {
        pub cxn: Connection,
        pub mailbox_id: MailboxId,
    }

    impl Setup {
        pub(super) fn open(&self) -> Mailbox {
            Mailbox::open(
                &self.cxn,
                LogPrefix::new("test".to_owned()),
                self.mailbox_id,
            )
            .unwrap()
        }

        pub(super) fn append(&mut self, message: NewMessage) -> Uid {
            self.cxn.append_message(self.mailbox_id, &message).unwrap()
        }
    }

    pub(super) fn datetime(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    pub(super) fn message(
        flags: MessageFlags,
        size: u64,
        subject: &str,
        from: &str,
        date: NaiveDateTime,
        body: &str,
    ) -> NewMessage {
        let header_block = format!(
            "From: {}\r\nSubject: {}\r\nDate: {}\r\n\r\n",
            from,
            subject,
            date.format("%a, %d %b %Y %H:%M:%S +0000"),
        );
        NewMessage {
            flags,
            internal_date: date,
            size,
            headers: vec![
                ("From".to_owned(), from.to_owned()),
                ("Subject".to_owned(), subject.to_owned()),
                ("Date".to_owned(), date.to_string()),
            ],
            parts: vec![
                MessagePart {
                    is_header: true,
                    data: header_block.into_bytes(),
                },
                MessagePart {
                    is_header: false,
                    data: body.as_bytes().to_vec(),
                },
            ],
            from: Some(from.to_owned()),
            subject: Some(subject.to_owned()),
            date: Some(date),
            ..NewMessage::default()
        }
    }

    /// Sets up a store whose `INBOX` contains exactly UIDs 10, 11 and 12:
    ///
    /// - 10: `\Seen`, 100 bytes, subject "A" from alice, 2020-01-02
    /// - 11: `\Recent`, 500 bytes, subject "B" from bob, 2020-01-01
    /// - 12: `\Seen`, 2000 bytes, subject "A" from carol, 2020-01-03,
    ///   keyword `$Work`, cc dave
    ///
    /// UIDs 1 through 9 belong to a different mailbox, so they must never
    /// show up in any result.
    pub(super) fn set_up() -> Setup {
        crate::init_test_log();

        let log_prefix = LogPrefix::new("test".to_owned());
        let mut cxn = Connection::open_in_memory(&log_prefix).unwrap();
        let other = cxn.create_mailbox("Other").unwrap();
        for _ in 0..9 {
            cxn.append_message(
                other,
                &message(
                    MessageFlags::SEEN,
                    5000,
                    "A",
                    "zed@example.com",
                    datetime(2019, 6, 1),
                    "hello world",
                ),
            )
            .unwrap();
        }

        let mailbox_id = cxn.create_mailbox("INBOX").unwrap();
        let mut setup = Setup { cxn, mailbox_id };

        let u10 = setup.append(message(
            MessageFlags::SEEN,
            100,
            "A",
            "alice@example.com",
            datetime(2020, 1, 2),
            "Lorem ipsum dolor sit amet",
        ));
        let u11 = setup.append(message(
            MessageFlags::RECENT,
            500,
            "B",
            "bob@example.com",
            datetime(2020, 1, 1),
            "The quick brown fox",
        ));
        let mut m12 = message(
            MessageFlags::SEEN | MessageFlags::FLAGGED,
            2000,
            "A",
            "carol@example.com",
            datetime(2020, 1, 3),
            "jumps over the lazy dog",
        );
        m12.keywords.push("$Work".to_owned());
        m12.headers
            .push(("Cc".to_owned(), "dave@example.com".to_owned()));
        m12.cc = Some("dave@example.com".to_owned());
        let u12 = setup.append(m12);
        assert_eq!(
            vec![Uid::u(10), Uid::u(11), Uid::u(12)],
            vec![u10, u11, u12]
        );

        setup
    }
}
