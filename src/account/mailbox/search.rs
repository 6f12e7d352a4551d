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
use std::fmt::Write as _;

use log::{debug, warn};

use super::defs::*;
use super::index::UidIndex;
use super::search_backend::translate;
use super::search_parser::SearchParser;
use super::search_tree::*;
use crate::account::model::*;
use crate::account::storage::Connection;
use crate::support::error::Error;

/// A set bound with this value is taken to mean `*`.
const STAR_ALIAS: u64 = 0xFFFF_FFFF;

impl Mailbox {
    /// Parses `keywords[*cursor..]` into a new search tree, replacing any
    /// previous one.
    ///
    /// On success, `*cursor` is advanced past the consumed tokens. On
    /// failure, no tree is retained.
    pub fn build_search_tree<T: AsRef<[u8]>>(
        &mut self,
        keywords: &[T],
        cursor: &mut usize,
        order: SearchOrder,
    ) -> Result<(), Error> {
        self.search = None;

        let (tree, end) = SearchParser::new(
            &self.log_prefix,
            keywords,
            *cursor,
            order,
            self.max_needle_len,
        )
        .parse()?;

        *cursor = end;
        self.search = Some(tree);
        Ok(())
    }

    /// Evaluates every leaf of the current search tree and merges the
    /// results into the found set of the whole search.
    ///
    /// Evaluating a tree that already has a result does nothing.
    pub fn evaluate_search(&mut self, cxn: &Connection) -> Result<(), Error> {
        let mut tree = self.search.take().ok_or(Error::NoSearch)?;

        if tree.result.is_none() {
            self.evaluate_node(cxn, &mut tree, SearchTree::ROOT);

            let universe = self.index.iter().collect::<FoundSet>();
            let result = merge_node(&mut tree, SearchTree::ROOT, universe);
            debug!(
                "{} Search matched {} of {} messages",
                self.log_prefix,
                result.len(),
                self.index.len(),
            );
            tree.result = Some(result);
        }

        self.search = Some(tree);
        Ok(())
    }

    /// Returns the found set of the current search, if it has been
    /// evaluated.
    pub fn search_result(&self) -> Option<&FoundSet> {
        self.search.as_ref().and_then(|t| t.result.as_ref())
    }

    /// Renders the result of the current search as the payload of an
    /// untagged `SEARCH`, `SORT` or `THREAD` response.
    ///
    /// Identifiers are UIDs or sequence numbers according to the display
    /// mode.
    pub fn render_result(&self) -> Result<String, Error> {
        let tree = self.search.as_ref().ok_or(Error::NoSearch)?;
        let found = tree.result.as_ref().ok_or(Error::NoSearch)?;

        let mut out = String::new();
        match tree.order {
            SearchOrder::Unordered => {
                for (uid, seqnum) in found.iter() {
                    self.push_id(&mut out, uid, seqnum);
                }
            }

            SearchOrder::Sorted => {
                let sorted = tree.sorted.as_ref().ok_or(Error::NoSearch)?;
                for &uid in sorted {
                    if let Some(seqnum) = found.get(uid) {
                        self.push_id(&mut out, uid, seqnum);
                    }
                }
            }

            SearchOrder::ThreadOrderedSubject
            | SearchOrder::ThreadReferences => {
                let threads = tree.threads.as_ref().ok_or(Error::NoSearch)?;
                for thread in threads {
                    let members = thread
                        .iter()
                        .filter_map(|&uid| {
                            found.get(uid).map(|s| self.display_id(uid, s))
                        })
                        .collect::<Vec<_>>();

                    if members.len() > 1 {
                        out.push('(');
                    }
                    for id in &members {
                        let _ = write!(out, "({})", id);
                    }
                    if members.len() > 1 {
                        out.push(')');
                    }
                }
            }
        }

        Ok(out)
    }

    fn display_id(&self, uid: Uid, seqnum: Seqnum) -> u64 {
        match self.display {
            DisplayMode::Uid => uid.into(),
            DisplayMode::Seqnum => seqnum.into(),
        }
    }

    fn push_id(&self, out: &mut String, uid: Uid, seqnum: Seqnum) {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{}", self.display_id(uid, seqnum));
    }

    fn evaluate_node(
        &self,
        cxn: &Connection,
        tree: &mut SearchTree,
        id: NodeId,
    ) {
        if NodeState::Unevaluated != tree.node(id).state {
            return;
        }

        let found = if tree.node(id).key.is_group() {
            let children = tree.node(id).children.clone();
            for child in children {
                self.evaluate_node(cxn, tree, child);
            }
            // Groups carry no set of their own; an empty one means nothing
            // has been excluded yet.
            FoundSet::new()
        } else {
            match tree.node(id).key {
                SearchKey::UidSet(ref set) => {
                    resolve_set(&self.index, set, true)
                }
                SearchKey::SeqSet(ref set) => {
                    resolve_set(&self.index, set, false)
                }
                SearchKey::Sort(..) => FoundSet::new(),
                ref key => self.query_leaf(cxn, id, key),
            }
        };

        tree.node_mut(id).state = NodeState::Evaluated(found);
    }

    /// Runs the store query for one leaf.
    ///
    /// A store failure is confined to this leaf, which then matches nothing.
    fn query_leaf(
        &self,
        cxn: &Connection,
        id: NodeId,
        key: &SearchKey,
    ) -> FoundSet {
        let query = match translate(self.id, key) {
            Some(query) => query,
            None => return FoundSet::new(),
        };

        let uids = match cxn.query_uids(&query) {
            Ok(uids) => uids,
            Err(e) => {
                warn!(
                    "{} Search key {} failed, treating as empty: {}",
                    self.log_prefix, id, e
                );
                return FoundSet::new();
            }
        };

        let found = uids
            .into_iter()
            .filter_map(|uid| match self.index.seqnum(uid) {
                Ok(seqnum) => Some((uid, seqnum)),
                Err(_) => {
                    warn!(
                        "{} Store returned {} which is not in the index",
                        self.log_prefix, uid
                    );
                    None
                }
            })
            .collect::<FoundSet>();

        debug!("{} Key {} matched {} rows", self.log_prefix, id, found.len());
        found
    }
}

/// Resolves a message set against the index.
///
/// `*` (and `STAR_ALIAS`) is the highest UID or sequence number. A lone
/// number is raised to the lowest bound, and both ends of a range are raised
/// to the lowest bound with the second one also capped to the highest. The
/// ends of a range may be given in either order.
fn resolve_set(index: &UidIndex, set: &MessageSet, by_uid: bool) -> FoundSet {
    let bounds = if by_uid {
        index.min_uid().zip(index.max_uid()).map(|(lo, hi)| {
            (u64::from(lo), u64::from(hi))
        })
    } else {
        index.max_seqnum().map(|hi| (1, u64::from(hi)))
    };
    let (lo, hi) = match bounds {
        Some(bounds) => bounds,
        None => return FoundSet::new(),
    };

    let value = |bound: SetBound| match bound {
        SetBound::Star => hi,
        SetBound::Num(STAR_ALIAS) => hi,
        SetBound::Num(n) => n,
    };

    let mut found = FoundSet::new();
    for &item in &set.0 {
        let (start, end) = match item {
            SetItem::Single(n) => {
                let n = value(n).max(lo);
                (n, n)
            }
            SetItem::Range(l, r) => {
                let l = value(l).max(lo);
                let r = value(r).max(lo).min(hi);
                (l.min(r), l.max(r))
            }
        };

        if by_uid {
            if let (Some(start), Some(end)) = (Uid::of(start), Uid::of(end)) {
                for (uid, seqnum) in index.uid_range(start, end) {
                    found.insert(uid, seqnum);
                }
            }
        } else {
            let seqnum =
                |n: u64| Seqnum::of(u32::try_from(n).unwrap_or(u32::MAX));
            if let (Some(start), Some(end)) = (seqnum(start), seqnum(end)) {
                for (uid, seqnum) in index.seqnum_range(start, end) {
                    found.insert(uid, seqnum);
                }
            }
        }
    }

    found
}

#[derive(Clone, Copy)]
enum MergeKind {
    And,
    Or,
    Not,
    Sort,
    Leaf,
}

/// Folds node `id` into `scope`, releasing the found set of every node it
/// visits.
///
/// Leaves and `AND` intersect; `OR` intersects the union of its operands;
/// `NOT` removes its operand from the scope.
fn merge_node(tree: &mut SearchTree, id: NodeId, mut scope: FoundSet) -> FoundSet {
    let kind = match tree.node(id).key {
        SearchKey::And => MergeKind::And,
        SearchKey::Or => MergeKind::Or,
        SearchKey::Not => MergeKind::Not,
        SearchKey::Sort(..) => MergeKind::Sort,
        _ => MergeKind::Leaf,
    };
    let children = tree.node(id).children.clone();
    let own = tree.take_found(id);

    match kind {
        MergeKind::And => {
            for child in children {
                scope = merge_node(tree, child, scope);
            }
            scope
        }

        MergeKind::Or => {
            let mut union = FoundSet::new();
            for child in children {
                union.union(merge_node(tree, child, scope.clone()));
            }
            union
        }

        MergeKind::Not => {
            for child in children {
                let excluded = merge_node(tree, child, scope.clone());
                scope.difference(&excluded);
            }
            scope
        }

        MergeKind::Sort => scope,

        MergeKind::Leaf => {
            scope.intersect(&own);
            scope
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test_prelude::*;
    use super::*;

    fn search(mb: &mut Mailbox, cxn: &Connection, keys: &[&str]) -> Vec<u64> {
        let mut cursor = 0;
        mb.build_search_tree(keys, &mut cursor, SearchOrder::Unordered)
            .unwrap();
        assert_eq!(keys.len(), cursor);
        mb.evaluate_search(cxn).unwrap();
        mb.search_result().unwrap().uids().map(u64::from).collect()
    }

    fn index_of(uids: &[u64]) -> UidIndex {
        UidIndex::new(uids.iter().map(|&u| Uid::u(u)))
    }

    fn resolve(index: &UidIndex, set: &str, by_uid: bool) -> Vec<u64> {
        resolve_set(index, &set.parse().unwrap(), by_uid)
            .uids()
            .map(u64::from)
            .collect()
    }

    #[test]
    fn range_resolution() {
        let index = index_of(&[1, 2, 3, 4, 5]);
        for &by_uid in &[true, false] {
            assert_eq!(vec![2, 3, 4], resolve(&index, "2:4", by_uid));
            assert_eq!(vec![5], resolve(&index, "*", by_uid));
            assert_eq!(vec![5], resolve(&index, "6:*", by_uid));
            assert_eq!(vec![2, 3, 4], resolve(&index, "4:2", by_uid));
            assert_eq!(vec![1, 3, 5], resolve(&index, "1,3,5", by_uid));
            assert_eq!(
                vec![4, 5],
                resolve(&index, "4:4294967295", by_uid)
            );
            assert!(resolve(&index, "9", by_uid).is_empty());
        }

        assert!(resolve(&UidIndex::default(), "1:*", true).is_empty());
        assert!(resolve(&UidIndex::default(), "*", false).is_empty());
    }

    #[test]
    fn uid_and_seqnum_ranges_differ() {
        let index = index_of(&[10, 20, 30]);
        assert_eq!(vec![20, 30], resolve(&index, "2:*", false));
        assert_eq!(vec![20], resolve(&index, "15:20", true));
        assert_eq!(vec![10], resolve(&index, "3", true));
        assert_eq!(vec![30], resolve(&index, "*", true));
    }

    #[test]
    fn flag_scenarios() {
        let setup = set_up();
        let mut mb = setup.open();

        assert_eq!(vec![10, 12], search(&mut mb, &setup.cxn, &["seen"]));
        assert_eq!(vec![11], search(&mut mb, &setup.cxn, &["not", "seen"]));
        // The NOT shortcut never creates a group
        let tree = mb.search_tree().unwrap();
        assert_eq!(3, tree.len());
        assert!(!tree.node(NodeId(2)).key.is_group());

        assert_eq!(
            vec![10, 12],
            search(&mut mb, &setup.cxn, &["or", "larger", "1000", "seen"])
        );
        assert_eq!(vec![11], search(&mut mb, &setup.cxn, &["unseen"]));
        assert_eq!(vec![12], search(&mut mb, &setup.cxn, &["flagged"]));
        assert_eq!(vec![11], search(&mut mb, &setup.cxn, &["new"]));
        assert_eq!(vec![10, 12], search(&mut mb, &setup.cxn, &["not", "new"]));
        assert_eq!(vec![10, 12], search(&mut mb, &setup.cxn, &["old"]));
        assert_eq!(vec![11], search(&mut mb, &setup.cxn, &["not", "old"]));
    }

    #[test]
    fn boolean_combinations() {
        let setup = set_up();
        let mut mb = setup.open();

        assert_eq!(
            vec![12],
            search(&mut mb, &setup.cxn, &["seen", "larger", "1000"])
        );
        assert_eq!(
            vec![10],
            search(&mut mb, &setup.cxn, &["seen", "not", "larger", "1000"])
        );
        assert_eq!(
            vec![10, 11],
            search(&mut mb, &setup.cxn, &["not", "(", "seen", "flagged", ")"])
        );
        assert_eq!(
            vec![11, 12],
            search(
                &mut mb,
                &setup.cxn,
                &["or", "from", "bob", "(", "subject", "a", "larger", "1000", ")"]
            )
        );
        assert_eq!(
            vec![11],
            search(
                &mut mb,
                &setup.cxn,
                &["not", "or", "seen", "flagged"]
            )
        );
        // The universe leaf scopes everything after it
        assert_eq!(
            vec![11, 12],
            search(&mut mb, &setup.cxn, &["2:3", "or", "seen", "recent"])
        );
        assert_eq!(
            vec![10, 12],
            search(&mut mb, &setup.cxn, &["uid", "10,12:*", "all"])
        );
        // Out-of-range ends are clipped into the mailbox
        assert_eq!(vec![10], search(&mut mb, &setup.cxn, &["uid", "1:9"]));
    }

    #[test]
    fn store_backed_keys() {
        let setup = set_up();
        let mut mb = setup.open();
        let cxn = &setup.cxn;

        assert_eq!(vec![12], search(&mut mb, cxn, &["keyword", "$work"]));
        assert_eq!(vec![10, 11], search(&mut mb, cxn, &["unkeyword", "$Work"]));
        assert_eq!(vec![10], search(&mut mb, cxn, &["from", "ALICE"]));
        assert_eq!(vec![12], search(&mut mb, cxn, &["cc", "dave"]));
        assert_eq!(vec![12], search(&mut mb, cxn, &["header", "cc", ""]));
        assert!(search(&mut mb, cxn, &["from", "50%"]).is_empty());
        assert_eq!(vec![11], search(&mut mb, cxn, &["body", "quick"]));
        assert!(search(&mut mb, cxn, &["body", "Quick"]).is_empty());
        assert!(search(&mut mb, cxn, &["body", "Subject"]).is_empty());
        assert_eq!(vec![11], search(&mut mb, cxn, &["text", "FOX"]));
        assert_eq!(vec![10], search(&mut mb, cxn, &["text", "alice"]));
        assert_eq!(vec![10], search(&mut mb, cxn, &["smaller", "200"]));
        assert_eq!(
            vec![10, 12],
            search(&mut mb, cxn, &["since", "2-Jan-2020"])
        );
        assert_eq!(vec![11], search(&mut mb, cxn, &["before", "2-Jan-2020"]));
        assert_eq!(vec![12], search(&mut mb, cxn, &["on", "03-jan-2020"]));
        assert_eq!(
            vec![11, 12],
            search(&mut mb, cxn, &["not", "senton", "2-Jan-2020"])
        );
        assert_eq!(
            vec![10, 11],
            search(&mut mb, cxn, &["sentbefore", "3-Jan-2020"])
        );
    }

    #[test]
    fn evaluation_is_idempotent() {
        let setup = set_up();
        let mut mb = setup.open();

        let mut cursor = 0;
        mb.build_search_tree(
            &["or", "seen", "body", "fox"],
            &mut cursor,
            SearchOrder::Unordered,
        )
        .unwrap();
        mb.evaluate_search(&setup.cxn).unwrap();
        let first = mb.search_result().cloned().unwrap();
        mb.evaluate_search(&setup.cxn).unwrap();
        assert_eq!(Some(&first), mb.search_result());
        assert_eq!(3, first.len());

        let tree = mb.search_tree().unwrap();
        for ix in 0..tree.len() {
            assert_eq!(NodeState::Merged, tree.node(NodeId(ix)).state);
        }
    }

    #[test]
    fn failed_leaf_degrades_to_empty() {
        let setup = set_up();
        let mut mb = setup.open();

        let mut cursor = 0;
        mb.build_search_tree(
            &["or", "seen", "body", "fox"],
            &mut cursor,
            SearchOrder::Unordered,
        )
        .unwrap();
        setup
            .cxn
            .execute_batch("DROP TABLE `mime_part`")
            .unwrap();
        mb.evaluate_search(&setup.cxn).unwrap();
        assert_eq!(
            vec![Uid::u(10), Uid::u(12)],
            mb.search_result().unwrap().uids().collect::<Vec<_>>()
        );
    }

    #[test]
    fn render_by_display_mode() {
        let setup = set_up();
        let mut mb = setup.open();

        search(&mut mb, &setup.cxn, &["seen"]);
        assert_eq!("1 3", mb.render_result().unwrap());
        mb.set_display_mode(DisplayMode::Uid);
        assert_eq!("10 12", mb.render_result().unwrap());

        search(&mut mb, &setup.cxn, &["deleted"]);
        assert_eq!("", mb.render_result().unwrap());
    }

    #[test]
    fn errors_without_search() {
        let setup = set_up();
        let mut mb = setup.open();

        assert_matches!(Err(Error::NoSearch), mb.evaluate_search(&setup.cxn));
        assert_matches!(Err(Error::NoSearch), mb.render_result());

        let mut cursor = 0;
        mb.build_search_tree(&["seen"], &mut cursor, SearchOrder::Unordered)
            .unwrap();
        assert_matches!(Err(Error::NoSearch), mb.render_result());
        mb.clear_search();
        assert_matches!(Err(Error::NoSearch), mb.evaluate_search(&setup.cxn));

        let mut cursor = 0;
        assert_matches!(
            Err(Error::Syntax(_)),
            mb.build_search_tree(
                &["bogus"],
                &mut cursor,
                SearchOrder::Unordered
            )
        );
        assert_eq!(0, cursor);
        assert!(mb.search_tree().is_none());
    }

    #[test]
    fn store_rows_outside_the_index_are_skipped() {
        let mut setup = set_up();
        let mut mb = setup.open();

        // Delivered after the snapshot was taken and never inserted
        let late = setup.append(NewMessage::default());
        assert!(!mb.index().contains(late));

        assert_eq!(vec![11], search(&mut mb, &setup.cxn, &["unseen"]));
        assert_eq!(
            vec![10, 11, 12],
            search(&mut mb, &setup.cxn, &["all"])
        );
    }

    #[test]
    fn mutation_discards_results() {
        let mut setup = set_up();
        let mut mb = setup.open();

        assert_eq!(vec![11], search(&mut mb, &setup.cxn, &["unseen"]));
        let uid = setup.append(NewMessage::default());
        mb.insert_uid(&setup.cxn, uid).unwrap();
        assert!(mb.search_result().is_none());
        assert_eq!(
            vec![11, u64::from(uid)],
            search(&mut mb, &setup.cxn, &["unseen"])
        );
    }
}
