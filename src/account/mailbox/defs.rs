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

use super::index::UidIndex;
use super::search_tree::SearchTree;
use crate::account::model::*;
use crate::support::log_prefix::LogPrefix;

/// A selected mailbox.
///
/// This holds the identifier index and summary cache for one snapshot of the
/// mailbox, plus the search tree of the command currently being evaluated.
/// A `Mailbox` is owned by a single session; nothing in it is shared.
pub struct Mailbox {
    pub(super) log_prefix: LogPrefix,
    pub(super) id: MailboxId,
    pub(super) index: UidIndex,
    pub(super) msginfo: BTreeMap<Uid, MessageInfo>,
    pub(super) display: DisplayMode,
    pub(super) max_needle_len: usize,
    pub(super) search: Option<SearchTree>,
}

impl Mailbox {
    /// Return the ID of the underlying mailbox.
    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Return the log prefix used for messages regarding this mailbox.
    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    /// The number of addressable messages.
    pub fn exists(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &UidIndex {
        &self.index
    }

    /// Return the cached summary of `uid`, if it is in the snapshot.
    pub fn message_info(&self, uid: Uid) -> Option<&MessageInfo> {
        self.msginfo.get(&uid)
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display
    }

    pub fn set_display_mode(&mut self, display: DisplayMode) {
        self.display = display;
    }

    /// Sets the maximum length of literals taken from search keys by
    /// subsequent calls to `build_search_tree`.
    pub fn set_max_needle_len(&mut self, len: usize) {
        self.max_needle_len = len;
    }

    /// Return the tree of the last search built, if any.
    pub fn search_tree(&self) -> Option<&SearchTree> {
        self.search.as_ref()
    }

    /// Discard the current search tree and all its results.
    pub fn clear_search(&mut self) {
        self.search = None;
    }
}
