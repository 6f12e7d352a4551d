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

use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::str::FromStr;

use bitflags::bitflags;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Uniquely and persistently identifies a message.
///
/// UIDs are allocated by the backing store and are never reused. Within a
/// mailbox they are strictly increasing in delivery order, but they are not
/// contiguous: expunged messages leave holes behind.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU64);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    pub fn of(uid: u64) -> Option<Self> {
        NonZeroU64::new(uid).map(Uid)
    }

    #[cfg(test)]
    pub fn u(uid: u64) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl TryFrom<u64> for Uid {
    type Error = ();

    fn try_from(v: u64) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Uid> for u64 {
    fn from(uid: Uid) -> u64 {
        uid.0.get()
    }
}

/// The position of a message within the current snapshot of a mailbox.
///
/// The sequence number of a message is one plus the number of visible
/// messages with a lower UID. Unlike UIDs, they shift every time a message
/// is added to or removed from the snapshot, so they are only meaningful
/// relative to one particular `UidIndex`.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Seqnum(pub NonZeroU32);

impl Seqnum {
    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }

    pub fn to_index(self) -> usize {
        let u: Result<usize, _> = self.0.get().try_into();
        u.unwrap() - 1
    }

    pub fn from_index(ix: usize) -> Self {
        Seqnum::of((ix + 1).try_into().unwrap()).unwrap()
    }
}

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Seqnum({})", self.0.get())
    }
}

impl fmt::Display for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl From<Seqnum> for u64 {
    fn from(seqnum: Seqnum) -> u64 {
        seqnum.0.get().into()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxId(pub i64);

/// The lifecycle state of a message row in the backing store.
///
/// Only `New` and `Seen` messages are visible to a mailbox snapshot; the
/// others are awaiting removal and must be ignored by every query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageStatus {
    New = 0,
    Seen = 1,
    Deleted = 2,
    Purged = 3,
}

impl MessageStatus {
    /// The statuses a message may have while it is part of a snapshot.
    pub const VISIBLE: [MessageStatus; 2] =
        [MessageStatus::New, MessageStatus::Seen];
}

/// A system flag stored as its own boolean column.
///
/// Unlike the wire protocol, `\Recent` is a column like any other here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemFlag {
    Seen,
    Answered,
    Deleted,
    Flagged,
    Draft,
    Recent,
}

impl SystemFlag {
    pub const ALL: [SystemFlag; 6] = [
        SystemFlag::Seen,
        SystemFlag::Answered,
        SystemFlag::Deleted,
        SystemFlag::Flagged,
        SystemFlag::Draft,
        SystemFlag::Recent,
    ];

    /// The column in the `message` table holding this flag.
    pub fn column(self) -> &'static str {
        match self {
            SystemFlag::Seen => "seen_flag",
            SystemFlag::Answered => "answered_flag",
            SystemFlag::Deleted => "deleted_flag",
            SystemFlag::Flagged => "flagged_flag",
            SystemFlag::Draft => "draft_flag",
            SystemFlag::Recent => "recent_flag",
        }
    }

    pub fn bit(self) -> MessageFlags {
        match self {
            SystemFlag::Seen => MessageFlags::SEEN,
            SystemFlag::Answered => MessageFlags::ANSWERED,
            SystemFlag::Deleted => MessageFlags::DELETED,
            SystemFlag::Flagged => MessageFlags::FLAGGED,
            SystemFlag::Draft => MessageFlags::DRAFT,
            SystemFlag::Recent => MessageFlags::RECENT,
        }
    }
}

bitflags! {
    /// The set of system flags on one message.
    #[derive(Default)]
    pub struct MessageFlags: u8 {
        const SEEN = 1 << 0;
        const ANSWERED = 1 << 1;
        const DELETED = 1 << 2;
        const FLAGGED = 1 << 3;
        const DRAFT = 1 << 4;
        const RECENT = 1 << 5;
    }
}

/// Summary of one message, cached alongside the UID index when a mailbox is
/// opened.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageInfo {
    pub uid: Uid,
    pub mailbox_id: MailboxId,
    pub flags: MessageFlags,
    /// Keywords in the order the store returned them.
    pub keywords: Vec<String>,
    pub internal_date: NaiveDateTime,
    pub size: u64,
}

impl MessageInfo {
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword))
    }
}

/// Whether results are reported as UIDs (for the `UID` command variants) or
/// as sequence numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    Uid,
    Seqnum,
}

impl Default for DisplayMode {
    fn default() -> Self {
        DisplayMode::Seqnum
    }
}

/// Which command a search tree is being built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOrder {
    /// `SEARCH`
    Unordered,
    /// `SORT`; a sort-key chain precedes the search keys.
    Sorted,
    /// `THREAD ORDEREDSUBJECT`
    ThreadOrderedSubject,
    /// `THREAD REFERENCES`
    ThreadReferences,
}

impl FromStr for SearchOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("unordered") || s.eq_ignore_ascii_case("search")
        {
            Ok(SearchOrder::Unordered)
        } else if s.eq_ignore_ascii_case("sort") {
            Ok(SearchOrder::Sorted)
        } else if s.eq_ignore_ascii_case("orderedsubject") {
            Ok(SearchOrder::ThreadOrderedSubject)
        } else if s.eq_ignore_ascii_case("references") {
            Ok(SearchOrder::ThreadReferences)
        } else {
            Err(Error::Syntax(format!("unknown search order {:?}", s)))
        }
    }
}

/// A message to be added to the backing store.
///
/// Parsing the message is not our business; the caller supplies the header
/// values and the derived fields the store keeps for sorting and threading.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub flags: MessageFlags,
    pub keywords: Vec<String>,
    pub internal_date: NaiveDateTime,
    pub size: u64,
    /// `(name, value)` pairs, in header order.
    pub headers: Vec<(String, String)>,
    /// Body parts. Part 1 is conventionally the header block.
    pub parts: Vec<MessagePart>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    /// The base subject, already normalised (`Re:` etc removed).
    pub subject: Option<String>,
    pub date: Option<NaiveDateTime>,
}

impl Default for NewMessage {
    fn default() -> Self {
        NewMessage {
            flags: MessageFlags::empty(),
            keywords: Vec::new(),
            internal_date: epoch_internal_date(),
            size: 0,
            headers: Vec::new(),
            parts: Vec::new(),
            from: None,
            to: None,
            cc: None,
            subject: None,
            date: None,
        }
    }
}

/// The internal date assumed for messages that somehow lack one.
pub fn epoch_internal_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 1))
        .unwrap_or_default()
}

#[derive(Clone, Debug, Default)]
pub struct MessagePart {
    pub is_header: bool,
    pub data: Vec<u8>,
}
