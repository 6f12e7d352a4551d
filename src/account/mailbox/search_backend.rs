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

//! Translation of search tree leaves into store queries.
//!
//! Every query selects `m`.`uid` from the `message` table, restricted to one
//! mailbox and to the visible statuses. The SQL text is assembled only from
//! the fixed fragments below and the closed set of column and table names in
//! the model; every value that came from the client is a bound parameter.

use std::convert::TryFrom;
use std::fmt::Write as _;

use super::search_tree::*;
use crate::account::model::*;
use crate::account::storage::{date_param, SqlValue, StoreQuery};

/// Builds the query for a store-backed leaf.
///
/// Returns `None` for keys that are not evaluated by the store (message
/// sets, groups and sort criteria).
pub(super) fn translate(
    mailbox_id: MailboxId,
    key: &SearchKey,
) -> Option<StoreQuery> {
    let mut q = QueryBuilder::new(mailbox_id);

    match *key {
        SearchKey::UidSet(..)
        | SearchKey::SeqSet(..)
        | SearchKey::Sort(..)
        | SearchKey::And
        | SearchKey::Or
        | SearchKey::Not => return None,

        SearchKey::Flag(FlagTest::System(ref tests)) => {
            for &(flag, value) in tests {
                q.cond(&format!("`m`.`{}` = ?", flag.column()));
                q.param(SqlValue::Integer(value as i64));
            }
        }

        SearchKey::Flag(FlagTest::Keyword(ref keyword, present)) => {
            q.cond(&format!(
                "{}EXISTS (SELECT 1 FROM `keyword` `k` \
                 WHERE `k`.`uid` = `m`.`uid` \
                 AND `k`.`keyword` = ? COLLATE NOCASE)",
                if present { "" } else { "NOT " },
            ));
            q.param(SqlValue::Text(keyword.clone()));
        }

        SearchKey::Header {
            ref field,
            ref needle,
        } => {
            q.cond(
                "EXISTS (SELECT 1 FROM `header` `h` \
                 WHERE `h`.`uid` = `m`.`uid` \
                 AND `h`.`name` LIKE ? ESCAPE '\\' \
                 AND `h`.`value` LIKE ? ESCAPE '\\')",
            );
            q.param(SqlValue::Text(escape_like(field)));
            q.param(SqlValue::Text(contains_pattern(needle)));
        }

        SearchKey::HeaderDate(op, date) => {
            q.cond(&format!(
                "EXISTS (SELECT 1 FROM `date_field` `d` \
                 WHERE `d`.`uid` = `m`.`uid` \
                 AND date(`d`.`date`) {} date(?))",
                date_operator(op),
            ));
            q.param(date_param(date));
        }

        SearchKey::InternalDate(op, date) => {
            q.cond(&format!(
                "date(`m`.`internal_date`) {} date(?)",
                date_operator(op),
            ));
            q.param(date_param(date));
        }

        SearchKey::Size(op, size) => {
            q.cond(match op {
                SizeOp::Larger => "`m`.`size` > ?",
                SizeOp::Smaller => "`m`.`size` < ?",
            });
            q.param(SqlValue::Integer(
                i64::try_from(size).unwrap_or(i64::MAX),
            ));
        }

        SearchKey::Body(ref needle) => {
            // Binary comparison, hence case-sensitive. Part 1 is the header
            // block and is not part of the body.
            q.cond(
                "EXISTS (SELECT 1 FROM `mime_part` `p` \
                 WHERE `p`.`uid` = `m`.`uid` \
                 AND (`p`.`part_key` > 1 OR `p`.`is_header` = 0) \
                 AND instr(`p`.`data`, ?) > 0)",
            );
            q.param(SqlValue::Blob(needle.as_bytes().to_vec()));
        }

        SearchKey::Text(ref needle) => {
            q.cond(
                "(EXISTS (SELECT 1 FROM `header` `h` \
                  WHERE `h`.`uid` = `m`.`uid` \
                  AND `h`.`value` LIKE ? ESCAPE '\\') \
                 OR EXISTS (SELECT 1 FROM `mime_part` `p` \
                  WHERE `p`.`uid` = `m`.`uid` \
                  AND CAST(`p`.`data` AS TEXT) LIKE ? ESCAPE '\\'))",
            );
            let pattern = contains_pattern(needle);
            q.param(SqlValue::Text(pattern.clone()));
            q.param(SqlValue::Text(pattern));
        }
    }

    Some(q.build("", "`m`.`uid`"))
}

/// Builds the query that orders every visible message by `chain`.
///
/// A message may appear more than once if it has several values for a
/// multi-valued key (eg several `To` addresses).
pub(super) fn sort_query(mailbox_id: MailboxId, chain: &SortChain) -> StoreQuery {
    let mut joins = String::new();
    for table in chain.joins() {
        let _ = write!(
            joins,
            "LEFT JOIN `{0}` ON `{0}`.`uid` = `m`.`uid` ",
            table,
        );
    }

    let mut order = String::new();
    for &(key, reverse) in &chain.order {
        let _ = write!(
            order,
            "{}{}, ",
            key.column(),
            if reverse { " DESC" } else { "" },
        );
    }
    order.push_str("`m`.`uid`");

    QueryBuilder::new(mailbox_id).build(&joins, &order)
}

const THREAD_JOINS: &str = "LEFT JOIN `subject_field` `s` ON `s`.`uid` = `m`.`uid` \
     LEFT JOIN `date_field` `d` ON `d`.`uid` = `m`.`uid` ";

/// Builds the query producing `(min uid, subject)` per distinct base
/// subject, ordered by the earliest sent date in each group.
///
/// Messages without a `Date` header fall back to their internal date, and
/// messages without a subject are grouped under the empty subject.
pub(super) fn thread_roots_query(mailbox_id: MailboxId) -> StoreQuery {
    let QueryBuilder { conds, params } = QueryBuilder::new(mailbox_id);

    StoreQuery {
        sql: format!(
            "SELECT MIN(`m`.`uid`), COALESCE(`s`.`subject`, '') \
             FROM `message` `m` {} WHERE {} \
             GROUP BY COALESCE(`s`.`subject`, '') \
             ORDER BY MIN(COALESCE(`d`.`date`, `m`.`internal_date`)), \
             MIN(`m`.`uid`)",
            THREAD_JOINS,
            conds.join(" AND "),
        ),
        params,
    }
}

/// Builds the query producing `(uid, subject)` for every visible message,
/// ordered by subject and then sent date.
pub(super) fn thread_members_query(mailbox_id: MailboxId) -> StoreQuery {
    let QueryBuilder { conds, params } = QueryBuilder::new(mailbox_id);

    StoreQuery {
        sql: format!(
            "SELECT `m`.`uid`, COALESCE(`s`.`subject`, '') \
             FROM `message` `m` {} WHERE {} \
             ORDER BY COALESCE(`s`.`subject`, ''), \
             COALESCE(`d`.`date`, `m`.`internal_date`), `m`.`uid`",
            THREAD_JOINS,
            conds.join(" AND "),
        ),
        params,
    }
}

struct QueryBuilder {
    conds: Vec<String>,
    params: Vec<SqlValue>,
}

impl QueryBuilder {
    fn new(mailbox_id: MailboxId) -> Self {
        let [new, seen] = MessageStatus::VISIBLE;
        QueryBuilder {
            conds: vec![
                "`m`.`mailbox_id` = ?".to_owned(),
                "`m`.`status` IN (?, ?)".to_owned(),
            ],
            params: vec![
                SqlValue::Integer(mailbox_id.0),
                SqlValue::Integer(new as i64),
                SqlValue::Integer(seen as i64),
            ],
        }
    }

    fn cond(&mut self, cond: &str) {
        self.conds.push(cond.to_owned());
    }

    fn param(&mut self, param: SqlValue) {
        self.params.push(param);
    }

    fn build(self, joins: &str, order: &str) -> StoreQuery {
        StoreQuery {
            sql: format!(
                "SELECT `m`.`uid` FROM `message` `m` {}WHERE {} ORDER BY {}",
                joins,
                self.conds.join(" AND "),
                order,
            ),
            params: self.params,
        }
    }
}

fn date_operator(op: DateOp) -> &'static str {
    match op {
        DateOp::Before => "<",
        DateOp::On => "=",
        DateOp::Since => ">=",
    }
}

fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn contains_pattern(needle: &str) -> String {
    format!("%{}%", escape_like(needle))
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;

    use super::*;

    #[test]
    fn like_escaping() {
        assert_eq!("plain", escape_like("plain"));
        assert_eq!("100\\%\\_a\\\\b", escape_like("100%_a\\b"));
        assert_eq!("%50\\%%", contains_pattern("50%"));
    }

    #[test]
    fn non_store_keys_are_not_translated() {
        assert!(translate(MailboxId(1), &SearchKey::And).is_none());
        assert!(translate(
            MailboxId(1),
            &SearchKey::UidSet(MessageSet::all())
        )
        .is_none());
    }

    #[test]
    fn literals_are_always_parameters() {
        let hostile = "x' OR 1=1; --".to_owned();
        for key in &[
            SearchKey::Header {
                field: hostile.clone(),
                needle: hostile.clone(),
            },
            SearchKey::Body(hostile.clone()),
            SearchKey::Text(hostile.clone()),
            SearchKey::Flag(FlagTest::Keyword(hostile.clone(), false)),
        ] {
            let query = translate(MailboxId(42), key).unwrap();
            assert!(!query.sql.contains("OR 1=1"), "{}", query.sql);
            assert_eq!(
                query.sql.matches('?').count(),
                query.params.len(),
                "{}",
                query.sql
            );
            assert_eq!(SqlValue::Integer(42), query.params[0]);
        }
    }

    #[test]
    fn flag_and_date_translation() {
        let query = translate(
            MailboxId(1),
            &SearchKey::Flag(FlagTest::System(vec![
                (SystemFlag::Seen, false),
                (SystemFlag::Recent, true),
            ])),
        )
        .unwrap();
        assert!(query.sql.contains("`m`.`seen_flag` = ?"));
        assert!(query.sql.contains("`m`.`recent_flag` = ?"));
        assert_eq!(
            &[SqlValue::Integer(0), SqlValue::Integer(1)][..],
            &query.params[3..]
        );

        let query = translate(
            MailboxId(1),
            &SearchKey::InternalDate(
                DateOp::Since,
                NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
            ),
        )
        .unwrap();
        assert!(query.sql.contains("date(`m`.`internal_date`) >= date(?)"));
        assert_eq!(SqlValue::Text("2020-01-02".to_owned()), query.params[3]);
    }

    #[test]
    fn sort_query_joins_each_table_once() {
        let query = sort_query(
            MailboxId(1),
            &SortChain {
                order: vec![
                    (SortKey::From, false),
                    (SortKey::Size, true),
                    (SortKey::From, true),
                ],
            },
        );
        assert_eq!(1, query.sql.matches("LEFT JOIN `from_field`").count());
        assert!(query.sql.ends_with(
            "ORDER BY `from_field`.`addr`, `m`.`size` DESC, \
             `from_field`.`addr` DESC, `m`.`uid`"
        ));
        assert_eq!(3, query.params.len());
    }
}
