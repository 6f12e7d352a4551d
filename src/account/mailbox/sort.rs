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

use std::collections::{HashMap, HashSet};

use log::{debug, info};

use super::defs::*;
use super::search_backend::{
    sort_query, thread_members_query, thread_roots_query,
};
use super::search_tree::*;
use crate::account::model::*;
use crate::account::storage::Connection;
use crate::support::error::Error;

impl Mailbox {
    /// Orders the result of the current search as its command requires,
    /// evaluating the search first if that has not happened yet.
    ///
    /// For a plain `SEARCH` this does nothing beyond the evaluation. Unlike
    /// the individual search keys, a store failure here fails the whole
    /// command.
    pub fn evaluate_sort(&mut self, cxn: &Connection) -> Result<(), Error> {
        self.evaluate_search(cxn)?;

        let mut tree = self.search.take().ok_or(Error::NoSearch)?;
        let result = self.order_tree(cxn, &mut tree);
        self.search = Some(tree);
        result
    }

    /// Returns the ordered result of the current `SORT`, if computed.
    pub fn sorted_result(&self) -> Option<&[Uid]> {
        self.search
            .as_ref()
            .and_then(|t| t.sorted.as_ref())
            .map(|v| &v[..])
    }

    /// Returns the thread groups of the current `THREAD`, if computed.
    pub fn thread_result(&self) -> Option<&[Vec<Uid>]> {
        self.search
            .as_ref()
            .and_then(|t| t.threads.as_ref())
            .map(|v| &v[..])
    }

    fn order_tree(
        &self,
        cxn: &Connection,
        tree: &mut SearchTree,
    ) -> Result<(), Error> {
        let found = tree.result.as_ref().ok_or(Error::NoSearch)?;

        match tree.order {
            SearchOrder::Unordered => (),

            SearchOrder::Sorted => {
                if tree.sorted.is_some() {
                    return Ok(());
                }

                let chain = tree.sort_chain().cloned().unwrap_or_default();
                let uids = cxn.query_uids(&sort_query(self.id, &chain))?;

                // Multi-valued keys can produce the same UID more than once;
                // the first occurrence determines its position.
                let mut seen = HashSet::new();
                let sorted = uids
                    .into_iter()
                    .filter(|&uid| found.contains(uid) && seen.insert(uid))
                    .collect::<Vec<_>>();
                debug!("{} Sorted {} messages", self.log_prefix, sorted.len());
                tree.sorted = Some(sorted);
            }

            SearchOrder::ThreadOrderedSubject => {
                if tree.threads.is_some() {
                    return Ok(());
                }

                let threads = self.thread_by_subject(cxn, found)?;
                debug!(
                    "{} Grouped messages into {} threads",
                    self.log_prefix,
                    threads.len()
                );
                tree.threads = Some(threads);
            }

            SearchOrder::ThreadReferences => {
                if tree.threads.is_none() {
                    info!(
                        "{} THREAD REFERENCES is not supported, \
                         returning no threads",
                        self.log_prefix
                    );
                    tree.threads = Some(Vec::new());
                }
            }
        }

        Ok(())
    }

    /// Groups the found messages by base subject.
    ///
    /// Groups are ordered by the earliest message date in each; members of
    /// a group are in date order.
    fn thread_by_subject(
        &self,
        cxn: &Connection,
        found: &FoundSet,
    ) -> Result<Vec<Vec<Uid>>, Error> {
        let roots = cxn.query_uid_text_pairs(&thread_roots_query(self.id))?;
        let members =
            cxn.query_uid_text_pairs(&thread_members_query(self.id))?;

        let mut groups = HashMap::<String, Vec<Uid>>::new();
        for (uid, subject) in members {
            if found.contains(uid) {
                groups.entry(subject).or_default().push(uid);
            }
        }

        Ok(roots
            .into_iter()
            .filter_map(|(_, subject)| groups.remove(&subject))
            .collect())
    }
}
