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

//! The typed expression tree produced by the search parser.
//!
//! Nodes live in an arena owned by the `SearchTree`; parent links are plain
//! indices into it, so dropping the tree frees every node and every
//! intermediate result at once.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;

use crate::account::model::*;
use crate::support::error::Error;

/// The messages matched by a node: UID to sequence number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FoundSet(BTreeMap<Uid, Seqnum>);

impl FoundSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uid: Uid, seqnum: Seqnum) {
        self.0.insert(uid, seqnum);
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.0.contains_key(&uid)
    }

    pub fn get(&self, uid: Uid) -> Option<Seqnum> {
        self.0.get(&uid).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Uid, Seqnum)> + '_ {
        self.0.iter().map(|(&u, &s)| (u, s))
    }

    pub fn uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.0.keys().copied()
    }

    /// Retains only the entries also in `other`.
    pub fn intersect(&mut self, other: &FoundSet) {
        self.0.retain(|uid, _| other.0.contains_key(uid));
    }

    /// Adds every entry of `other`.
    pub fn union(&mut self, other: FoundSet) {
        self.0.extend(other.0);
    }

    /// Removes every entry that is in `other`.
    pub fn difference(&mut self, other: &FoundSet) {
        self.0.retain(|uid, _| !other.0.contains_key(uid));
    }
}

impl FromIterator<(Uid, Seqnum)> for FoundSet {
    fn from_iter<I: IntoIterator<Item = (Uid, Seqnum)>>(it: I) -> Self {
        FoundSet(it.into_iter().collect())
    }
}

/// One end of a message-set element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetBound {
    Num(u64),
    /// `*`, the highest UID or sequence number.
    Star,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetItem {
    Single(SetBound),
    Range(SetBound, SetBound),
}

/// A parsed message set, such as `2,4:7,9:*`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSet(pub Vec<SetItem>);

impl MessageSet {
    /// `1:*`
    pub fn all() -> Self {
        MessageSet(vec![SetItem::Range(SetBound::Num(1), SetBound::Star)])
    }

    /// Whether `s` is syntactically a message set.
    pub fn is_message_set(s: &str) -> bool {
        lazy_static! {
            static ref RX: Regex = Regex::new(concat!(
                r"^(?:[1-9][0-9]*|\*)(?::(?:[1-9][0-9]*|\*))?",
                r"(?:,(?:[1-9][0-9]*|\*)(?::(?:[1-9][0-9]*|\*))?)*$",
            ))
            .unwrap();
        }

        RX.is_match(s)
    }
}

impl FromStr for MessageSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        fn bound(s: &str) -> Result<SetBound, Error> {
            if "*" == s {
                Ok(SetBound::Star)
            } else {
                s.parse::<u64>()
                    .ok()
                    .filter(|&n| n > 0)
                    .map(SetBound::Num)
                    .ok_or_else(|| {
                        Error::Syntax(format!("bad message set bound {:?}", s))
                    })
            }
        }

        if !MessageSet::is_message_set(s) {
            return Err(Error::Syntax(format!("bad message set {:?}", s)));
        }

        s.split(',')
            .map(|item| match item.split_once(':') {
                None => bound(item).map(SetItem::Single),
                Some((lo, hi)) => Ok(SetItem::Range(bound(lo)?, bound(hi)?)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(MessageSet)
    }
}

/// The comparison made by a date test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateOp {
    Before,
    On,
    Since,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeOp {
    Larger,
    Smaller,
}

/// A test against the message flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagTest {
    /// All of the given flags must have the given values.
    System(Vec<(SystemFlag, bool)>),
    /// The keyword must be present (`true`) or absent (`false`).
    Keyword(String, bool),
}

/// A key that can appear in a `SORT` criteria list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Arrival,
    Size,
    From,
    Subject,
    Cc,
    To,
    Date,
}

impl SortKey {
    /// The auxiliary table that must be joined to sort by this key, if any.
    pub fn table(self) -> Option<&'static str> {
        match self {
            SortKey::Arrival | SortKey::Size => None,
            SortKey::From => Some("from_field"),
            SortKey::Subject => Some("subject_field"),
            SortKey::Cc => Some("cc_field"),
            SortKey::To => Some("to_field"),
            SortKey::Date => Some("date_field"),
        }
    }

    /// The qualified column the store orders by for this key.
    pub fn column(self) -> &'static str {
        match self {
            SortKey::Arrival => "`m`.`internal_date`",
            SortKey::Size => "`m`.`size`",
            SortKey::From => "`from_field`.`addr`",
            SortKey::Subject => "`subject_field`.`subject`",
            SortKey::Cc => "`cc_field`.`addr`",
            SortKey::To => "`to_field`.`addr`",
            SortKey::Date => "`date_field`.`date`",
        }
    }
}

/// An ordered list of sort criteria.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortChain {
    /// `(key, reverse)` in priority order.
    pub order: Vec<(SortKey, bool)>,
}

impl SortChain {
    /// The auxiliary tables to join, each listed once.
    pub fn joins(&self) -> Vec<&'static str> {
        let mut joins = Vec::<&'static str>::new();
        for table in self.order.iter().filter_map(|&(k, _)| k.table()) {
            if !joins.contains(&table) {
                joins.push(table);
            }
        }
        joins
    }
}

/// What a single node tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchKey {
    /// A message set over UIDs, eg `1:*` or `4,7:9`.
    UidSet(MessageSet),
    /// A message set over sequence numbers.
    SeqSet(MessageSet),
    Flag(FlagTest),
    /// Substring match on a header; `field` is lower-case.
    Header {
        field: String,
        needle: String,
    },
    /// Date comparison against the `Date` header.
    HeaderDate(DateOp, NaiveDate),
    InternalDate(DateOp, NaiveDate),
    Size(SizeOp, u64),
    /// Case-sensitive substring match over the body parts.
    Body(String),
    /// Substring match over any header or body part.
    Text(String),
    Sort(SortChain),
    And,
    Or,
    Not,
}

impl SearchKey {
    pub fn is_group(&self) -> bool {
        matches!(*self, SearchKey::And | SearchKey::Or | SearchKey::Not)
    }
}

/// Where a node is in its (monotonic) lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeState {
    Unevaluated,
    Evaluated(FoundSet),
    /// Folded into its parent; the found set has been released.
    Merged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct SearchNode {
    pub key: SearchKey,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub state: NodeState,
}

/// A parsed search, plus the results of evaluating it.
#[derive(Clone, Debug)]
pub struct SearchTree {
    nodes: Vec<SearchNode>,
    pub order: SearchOrder,
    /// The final found set, once the tree has been evaluated and merged.
    pub result: Option<FoundSet>,
    /// The ordered result of `SORT`, once computed.
    pub sorted: Option<Vec<Uid>>,
    /// The grouped result of `THREAD`, once computed.
    pub threads: Option<Vec<Vec<Uid>>>,
}

impl SearchTree {
    /// The root node, an implicit AND over the top-level keys.
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(order: SearchOrder) -> Self {
        SearchTree {
            nodes: vec![SearchNode {
                key: SearchKey::And,
                parent: None,
                children: Vec::new(),
                state: NodeState::Unevaluated,
            }],
            order,
            result: None,
            sorted: None,
            threads: None,
        }
    }

    /// Appends a new node with the given key as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, key: SearchKey) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SearchNode {
            key,
            parent: Some(parent),
            children: Vec::new(),
            state: NodeState::Unevaluated,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &SearchNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SearchNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the sort chain attached to the root, if any.
    pub fn sort_chain(&self) -> Option<&SortChain> {
        self.node(Self::ROOT).children.iter().find_map(|&c| {
            match self.node(c).key {
                SearchKey::Sort(ref chain) => Some(chain),
                _ => None,
            }
        })
    }

    /// Takes the found set out of an evaluated node, moving it to `Merged`.
    ///
    /// A node that was never evaluated (or already merged) yields an empty
    /// set.
    pub fn take_found(&mut self, id: NodeId) -> FoundSet {
        match std::mem::replace(&mut self.node_mut(id).state, NodeState::Merged)
        {
            NodeState::Evaluated(found) => found,
            NodeState::Unevaluated | NodeState::Merged => FoundSet::new(),
        }
    }
}
