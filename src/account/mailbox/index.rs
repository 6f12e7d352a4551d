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

use crate::account::model::*;
use crate::support::error::Error;

/// Bidirectional mapping between UIDs and sequence numbers for one mailbox
/// snapshot.
///
/// Sequence numbers are always exactly `1..=len()`, assigned in ascending UID
/// order. Every structural change renumbers the whole index; there is no
/// incremental patching.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UidIndex {
    uid_to_seqnum: BTreeMap<Uid, Seqnum>,
    /// `seqnum_to_uid[s.to_index()]` is the UID of seqnum `s`.
    seqnum_to_uid: Vec<Uid>,
}

impl UidIndex {
    /// Builds an index over `uids`.
    ///
    /// Duplicates are ignored and the UIDs need not be presented in order.
    pub fn new(uids: impl IntoIterator<Item = Uid>) -> Self {
        let mut seqnum_to_uid = uids.into_iter().collect::<Vec<_>>();
        seqnum_to_uid.sort_unstable();
        seqnum_to_uid.dedup();

        let uid_to_seqnum = seqnum_to_uid
            .iter()
            .enumerate()
            .map(|(ix, &uid)| (uid, Seqnum::from_index(ix)))
            .collect();

        Self {
            uid_to_seqnum,
            seqnum_to_uid,
        }
    }

    pub fn len(&self) -> usize {
        self.seqnum_to_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqnum_to_uid.is_empty()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.uid_to_seqnum.contains_key(&uid)
    }

    /// Returns the sequence number of `uid`, or `Error::NxMessage` if it is
    /// not in the index.
    pub fn seqnum(&self, uid: Uid) -> Result<Seqnum, Error> {
        self.uid_to_seqnum.get(&uid).copied().ok_or(Error::NxMessage)
    }

    /// Returns the UID at `seqnum`, or `Error::NxMessage` if it is out of
    /// range.
    pub fn uid(&self, seqnum: Seqnum) -> Result<Uid, Error> {
        self.seqnum_to_uid
            .get(seqnum.to_index())
            .copied()
            .ok_or(Error::NxMessage)
    }

    pub fn min_uid(&self) -> Option<Uid> {
        self.seqnum_to_uid.first().copied()
    }

    pub fn max_uid(&self) -> Option<Uid> {
        self.seqnum_to_uid.last().copied()
    }

    pub fn max_seqnum(&self) -> Option<Seqnum> {
        if self.is_empty() {
            None
        } else {
            Some(Seqnum::from_index(self.len() - 1))
        }
    }

    /// Iterates `(uid, seqnum)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (Uid, Seqnum)> + '_ {
        self.uid_to_seqnum.iter().map(|(&u, &s)| (u, s))
    }

    /// Iterates the pairs whose UID is within `lo..=hi`.
    pub fn uid_range(
        &self,
        lo: Uid,
        hi: Uid,
    ) -> impl Iterator<Item = (Uid, Seqnum)> + '_ {
        self.uid_to_seqnum.range(lo..=hi).map(|(&u, &s)| (u, s))
    }

    /// Iterates the pairs whose seqnum is within `lo..=hi`.
    pub fn seqnum_range(
        &self,
        lo: Seqnum,
        hi: Seqnum,
    ) -> impl Iterator<Item = (Uid, Seqnum)> + '_ {
        let end = hi.0.get().min(self.len() as u32) as usize;
        let start = lo.to_index().min(end);
        self.seqnum_to_uid[start..end]
            .iter()
            .enumerate()
            .map(move |(ix, &uid)| (uid, Seqnum::from_index(start + ix)))
    }

    /// Adds `uid` and renumbers everything.
    pub fn insert(&mut self, uid: Uid) {
        if self.contains(uid) {
            return;
        }

        let uids = self.seqnum_to_uid.iter().copied().chain(Some(uid));
        *self = Self::new(uids.collect::<Vec<_>>());
    }

    /// Removes `uid` and renumbers everything.
    ///
    /// Returns `Error::NxMessage` if `uid` was not in the index, in which case
    /// nothing changes.
    pub fn remove(&mut self, uid: Uid) -> Result<(), Error> {
        if !self.contains(uid) {
            return Err(Error::NxMessage);
        }

        let uids = self
            .seqnum_to_uid
            .iter()
            .copied()
            .filter(|&u| u != uid)
            .collect::<Vec<_>>();
        *self = Self::new(uids);
        Ok(())
    }
}
