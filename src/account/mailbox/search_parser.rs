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

//! Parser from the argument list of `SEARCH`, `SORT` and `THREAD` to a
//! `SearchTree`.
//!
//! The outer protocol layer has already split the command line into tokens
//! (atoms, quoted strings and literals, with parentheses as tokens of their
//! own). Tokens are raw bytes since literals in a declared charset need not
//! be UTF-8. Keywords are matched case-insensitively.

use std::str;

use chrono::prelude::*;
use encoding_rs::Encoding;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use super::search_tree::*;
use crate::account::model::*;
use crate::support::{charset, error::Error, log_prefix::LogPrefix};

pub(super) struct SearchParser<'a> {
    log_prefix: &'a LogPrefix,
    tokens: Vec<&'a [u8]>,
    cursor: usize,
    tree: SearchTree,
    /// The groups currently open. The last one receives new nodes; the root
    /// is always at the bottom.
    stack: Vec<NodeId>,
    charset: &'static Encoding,
    max_needle_len: usize,
}

impl<'a> SearchParser<'a> {
    pub(super) fn new<T: AsRef<[u8]>>(
        log_prefix: &'a LogPrefix,
        tokens: &'a [T],
        cursor: usize,
        order: SearchOrder,
        max_needle_len: usize,
    ) -> Self {
        SearchParser {
            log_prefix,
            tokens: tokens.iter().map(|t| AsRef::<[u8]>::as_ref(t)).collect(),
            cursor,
            tree: SearchTree::new(order),
            stack: vec![SearchTree::ROOT],
            charset: charset::DEFAULT_CHARSET,
            max_needle_len,
        }
    }

    /// Parses everything from the cursor to the end of the token list.
    ///
    /// On success, returns the tree and the new cursor position (which is
    /// always the end of the tokens).
    pub(super) fn parse(mut self) -> Result<(SearchTree, usize), Error> {
        // The universe: either an explicit leading message set or all
        // messages.
        let initial = match self.peek().and_then(|t| str::from_utf8(t).ok()) {
            Some(t) if MessageSet::is_message_set(t) => {
                self.cursor += 1;
                t.parse()?
            }
            _ => MessageSet::all(),
        };
        self.append(SearchKey::SeqSet(initial));

        match self.tree.order {
            SearchOrder::Unordered => (),
            SearchOrder::Sorted => self.parse_sort_chain()?,
            SearchOrder::ThreadOrderedSubject
            | SearchOrder::ThreadReferences => {
                let label = self.next("thread charset")?;
                self.charset = self.thread_charset(label)?;
            }
        }

        while self.peek().is_some() {
            self.parse_item()?;
        }

        if self.stack.len() > 1 {
            return Err(Error::Syntax("missing ')'".to_owned()));
        }

        debug!(
            "{} Built {:?} search tree with {} nodes",
            self.log_prefix,
            self.tree.order,
            self.tree.len(),
        );
        Ok((self.tree, self.cursor))
    }

    fn peek(&self) -> Option<&'a [u8]> {
        self.tokens.get(self.cursor).copied()
    }

    fn next(&mut self, what: &str) -> Result<&'a [u8], Error> {
        let token = self
            .peek()
            .ok_or_else(|| Error::Syntax(format!("missing {}", what)))?;
        self.cursor += 1;
        Ok(token)
    }

    fn next_str(&mut self, what: &str) -> Result<&'a str, Error> {
        let token = self.next(what)?;
        str::from_utf8(token)
            .map_err(|_| Error::Syntax(format!("{} is not valid UTF-8", what)))
    }

    fn current(&self) -> NodeId {
        self.stack.last().copied().unwrap_or(SearchTree::ROOT)
    }

    fn append(&mut self, key: SearchKey) -> NodeId {
        let parent = self.current();
        self.tree.append(parent, key)
    }

    fn open_group(&mut self, key: SearchKey) {
        let id = self.append(key);
        self.stack.push(id);
    }

    fn close_group(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Parses one element of a key list: either a `CHARSET` declaration or a
    /// search key.
    fn parse_item(&mut self) -> Result<(), Error> {
        match self.peek() {
            Some(t) if t.eq_ignore_ascii_case(b"charset") => {
                self.cursor += 1;
                let label = self.next("charset name")?;
                self.charset = charset::lookup(label).ok_or_else(|| {
                    Error::BadCharset(String::from_utf8_lossy(label).into_owned())
                })?;
                debug!(
                    "{} Using charset {} for searching",
                    self.log_prefix,
                    self.charset.name()
                );
                Ok(())
            }
            _ => self.parse_key(),
        }
    }

    /// Parses exactly one search key, which may be a group.
    fn parse_key(&mut self) -> Result<(), Error> {
        let token = self.next("search key")?;
        let kw = str::from_utf8(token)
            .map_err(|_| Error::Syntax("non-UTF-8 search key".to_owned()))?
            .to_ascii_lowercase();

        match &kw[..] {
            "all" => {
                self.append(SearchKey::UidSet(MessageSet::all()));
            }

            "uid" => {
                let set = self.next_str("UID set")?.parse()?;
                self.append(SearchKey::UidSet(set));
            }

            "answered" | "deleted" | "flagged" | "recent" | "seen" | "draft"
            | "new" | "old" => {
                self.append(SearchKey::Flag(flag_test(&kw, false)));
            }

            "unanswered" => self.flag(SystemFlag::Answered, false),
            "undeleted" => self.flag(SystemFlag::Deleted, false),
            "unflagged" => self.flag(SystemFlag::Flagged, false),
            "unseen" => self.flag(SystemFlag::Seen, false),
            "undraft" => self.flag(SystemFlag::Draft, false),

            "keyword" | "unkeyword" => {
                let keyword = self.next_str("keyword")?.to_owned();
                self.append(SearchKey::Flag(FlagTest::Keyword(
                    keyword,
                    "keyword" == kw,
                )));
            }

            "not" => {
                let negated_flag = self
                    .peek()
                    .and_then(|t| str::from_utf8(t).ok())
                    .map(str::to_ascii_lowercase)
                    .filter(|t| is_simple_flag(t));

                if let Some(flag) = negated_flag {
                    self.cursor += 1;
                    self.append(SearchKey::Flag(flag_test(&flag, true)));
                } else {
                    self.open_group(SearchKey::Not);
                    self.parse_key()?;
                    self.close_group();
                }
            }

            "or" => {
                self.open_group(SearchKey::Or);
                self.parse_key()?;
                self.parse_key()?;
                self.close_group();
            }

            "(" => {
                self.open_group(SearchKey::And);
                loop {
                    match self.peek() {
                        None => {
                            return Err(Error::Syntax("missing ')'".to_owned()))
                        }
                        Some(b")") => {
                            self.cursor += 1;
                            break;
                        }
                        Some(_) => self.parse_item()?,
                    }
                }
                self.close_group();
            }

            ")" => return Err(Error::Syntax("unbalanced ')'".to_owned())),

            "bcc" | "cc" | "from" | "to" | "subject" => {
                let needle = self.needle()?;
                self.append(SearchKey::Header {
                    field: kw.clone(),
                    needle,
                });
            }

            "header" => {
                let field = self.next_str("header name")?.to_ascii_lowercase();
                let needle = self.needle()?;
                self.append(SearchKey::Header { field, needle });
            }

            "sentbefore" => self.header_date(DateOp::Before)?,
            "senton" => self.header_date(DateOp::On)?,
            "sentsince" => self.header_date(DateOp::Since)?,

            "before" => self.internal_date(DateOp::Before)?,
            "on" => self.internal_date(DateOp::On)?,
            "since" => self.internal_date(DateOp::Since)?,

            "body" => {
                let needle = self.needle()?;
                self.append(SearchKey::Body(needle));
            }

            "text" => {
                let needle = self.needle()?;
                self.append(SearchKey::Text(needle));
            }

            "larger" => self.size(SizeOp::Larger)?,
            "smaller" => self.size(SizeOp::Smaller)?,

            "charset" => {
                return Err(Error::Syntax(
                    "CHARSET cannot be used as a search key".to_owned(),
                ))
            }

            _ if MessageSet::is_message_set(&kw) => {
                self.append(SearchKey::SeqSet(kw.parse()?));
            }

            _ => {
                debug!("{} Unknown search key {:?}", self.log_prefix, kw);
                return Err(Error::Syntax(format!(
                    "unknown search key {:?}",
                    kw
                )));
            }
        }

        Ok(())
    }

    fn flag(&mut self, flag: SystemFlag, value: bool) {
        self.append(SearchKey::Flag(FlagTest::System(vec![(flag, value)])));
    }

    fn needle(&mut self) -> Result<String, Error> {
        let raw = self.next("search string")?;
        Ok(charset::decode_needle(
            self.log_prefix,
            self.charset,
            raw,
            self.max_needle_len,
        ))
    }

    fn date(&mut self) -> Result<NaiveDate, Error> {
        let raw = self.next_str("date")?;
        parse_imap_date(raw)
            .ok_or_else(|| Error::Syntax(format!("bad date {:?}", raw)))
    }

    fn header_date(&mut self, op: DateOp) -> Result<(), Error> {
        let date = self.date()?;
        self.append(SearchKey::HeaderDate(op, date));
        Ok(())
    }

    fn internal_date(&mut self, op: DateOp) -> Result<(), Error> {
        let date = self.date()?;
        self.append(SearchKey::InternalDate(op, date));
        Ok(())
    }

    fn size(&mut self, op: SizeOp) -> Result<(), Error> {
        let raw = self.next_str("size")?;
        let size = raw
            .parse::<u64>()
            .map_err(|_| Error::Syntax(format!("bad size {:?}", raw)))?;
        self.append(SearchKey::Size(op, size));
        Ok(())
    }

    /// Parses the sort criteria of `SORT`, up to and including the charset
    /// that terminates them.
    fn parse_sort_chain(&mut self) -> Result<(), Error> {
        let mut chain = SortChain::default();

        loop {
            let token = self.next("charset after sort criteria")?;
            if b"(" == token || b")" == token {
                continue;
            }

            let (reverse, token) = if token.eq_ignore_ascii_case(b"reverse") {
                (true, self.next("sort key after REVERSE")?)
            } else {
                (false, token)
            };

            if let Some(key) = sort_key(token) {
                chain.order.push((key, reverse));
                continue;
            }

            if reverse {
                return Err(Error::Syntax(
                    "REVERSE must be followed by a sort key".to_owned(),
                ));
            }

            match sort_charset(token) {
                Some(encoding) => {
                    self.charset = encoding;
                    break;
                }
                None => {
                    return Err(Error::Syntax(format!(
                        "unknown sort key {:?}",
                        String::from_utf8_lossy(token)
                    )))
                }
            }
        }

        if chain.order.is_empty() {
            return Err(Error::Syntax("empty sort criteria".to_owned()));
        }

        debug!("{} Sort criteria: {:?}", self.log_prefix, chain.order);
        self.append(SearchKey::Sort(chain));
        Ok(())
    }

    fn thread_charset(&self, label: &[u8]) -> Result<&'static Encoding, Error> {
        sort_charset(label).ok_or_else(|| {
            Error::BadCharset(String::from_utf8_lossy(label).into_owned())
        })
    }
}

/// Looks up a charset token ending a sort chain or introducing a thread
/// command. Only these three are recognised in that position.
fn sort_charset(label: &[u8]) -> Option<&'static Encoding> {
    const SORT_CHARSETS: [&[u8]; 3] = [b"utf-8", b"us-ascii", b"iso-8859-1"];

    if SORT_CHARSETS.iter().any(|c| c.eq_ignore_ascii_case(label)) {
        charset::lookup(label)
    } else {
        None
    }
}

/// Whether `kw` (lower-case) is a flag which `NOT` negates directly.
fn is_simple_flag(kw: &str) -> bool {
    matches!(
        kw,
        "answered"
            | "deleted"
            | "flagged"
            | "recent"
            | "seen"
            | "draft"
            | "new"
            | "old"
    )
}

/// Builds the test for one of the flag keywords accepted by
/// `is_simple_flag()`, optionally negated.
///
/// The negations of `NEW` and `OLD` are not the boolean complements of the
/// positive forms: `NOT NEW` requires `\Seen` and no `\Recent`, while
/// `NOT OLD` is just `\Recent`.
fn flag_test(kw: &str, negated: bool) -> FlagTest {
    use SystemFlag::*;

    let tests = match (kw, negated) {
        ("new", false) => vec![(Seen, false), (Recent, true)],
        ("new", true) => vec![(Seen, true), (Recent, false)],
        ("old", false) => vec![(Recent, false)],
        ("old", true) => vec![(Recent, true)],
        ("answered", n) => vec![(Answered, !n)],
        ("deleted", n) => vec![(Deleted, !n)],
        ("flagged", n) => vec![(Flagged, !n)],
        ("recent", n) => vec![(Recent, !n)],
        ("seen", n) => vec![(Seen, !n)],
        (_, n) => vec![(Draft, !n)],
    };

    FlagTest::System(tests)
}

fn sort_key(token: &[u8]) -> Option<SortKey> {
    let key = str::from_utf8(token).ok()?.to_ascii_lowercase();
    match &key[..] {
        "arrival" => Some(SortKey::Arrival),
        "size" => Some(SortKey::Size),
        "from" => Some(SortKey::From),
        "subject" => Some(SortKey::Subject),
        "cc" => Some(SortKey::Cc),
        "to" => Some(SortKey::To),
        "date" => Some(SortKey::Date),
        _ => None,
    }
}

/// Parses an IMAP `date` (`d-Mon-yyyy` or `dd-Mon-yyyy`).
fn parse_imap_date(s: &str) -> Option<NaiveDate> {
    lazy_static! {
        static ref RX: Regex =
            Regex::new(r"^[0-9]{1,2}-[A-Za-z]{3}-[0-9]{4}$").unwrap();
    }

    if !RX.is_match(s) {
        return None;
    }

    NaiveDate::parse_from_str(s, "%d-%b-%Y").ok()
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(tokens: &[&str], order: SearchOrder) -> Result<SearchTree, Error> {
        let log_prefix = LogPrefix::new("test".to_owned());
        SearchParser::new(&log_prefix, tokens, 0, order, 1024)
            .parse()
            .map(|(tree, _)| tree)
    }

    fn keys(tree: &SearchTree, parent: NodeId) -> Vec<SearchKey> {
        tree.node(parent)
            .children
            .iter()
            .map(|&c| tree.node(c).key.clone())
            .collect()
    }

    fn flags(tests: &[(SystemFlag, bool)]) -> SearchKey {
        SearchKey::Flag(FlagTest::System(tests.to_vec()))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn implicit_and_explicit_universe() {
        let tree = parse(&["seen"], SearchOrder::Unordered).unwrap();
        assert_eq!(
            vec![
                SearchKey::SeqSet(MessageSet::all()),
                flags(&[(SystemFlag::Seen, true)]),
            ],
            keys(&tree, SearchTree::ROOT)
        );

        let tree = parse(&["2:4", "SEEN"], SearchOrder::Unordered).unwrap();
        assert_eq!(
            SearchKey::SeqSet("2:4".parse().unwrap()),
            keys(&tree, SearchTree::ROOT)[0]
        );

        let tree = parse(&[], SearchOrder::Unordered).unwrap();
        assert_eq!(2, tree.len());
    }

    #[test]
    fn cursor_is_honoured() {
        let log_prefix = LogPrefix::new("test".to_owned());
        let tokens = ["UID", "SEARCH", "deleted"];
        let (tree, end) =
            SearchParser::new(&log_prefix, &tokens, 2, SearchOrder::Unordered, 1)
                .parse()
                .unwrap();
        assert_eq!(3, end);
        assert_eq!(
            flags(&[(SystemFlag::Deleted, true)]),
            keys(&tree, SearchTree::ROOT)[1]
        );
    }

    #[test]
    fn flag_negation_shortcut() {
        let tree = parse(
            &[
                "not", "seen", "NOT", "New", "not", "old", "new", "old",
                "unanswered",
            ],
            SearchOrder::Unordered,
        )
        .unwrap();

        use SystemFlag::*;
        assert_eq!(
            vec![
                SearchKey::SeqSet(MessageSet::all()),
                flags(&[(Seen, false)]),
                flags(&[(Seen, true), (Recent, false)]),
                flags(&[(Recent, true)]),
                flags(&[(Seen, false), (Recent, true)]),
                flags(&[(Recent, false)]),
                flags(&[(Answered, false)]),
            ],
            keys(&tree, SearchTree::ROOT)
        );
        // No NOT group was created
        assert_eq!(8, tree.len());
    }

    #[test]
    fn boolean_groups_nest() {
        let tree = parse(
            &[
                "or", "larger", "1000", "(", "seen", "not", "body", "x", ")",
                "keyword", "$Work",
            ],
            SearchOrder::Unordered,
        )
        .unwrap();

        let root = keys(&tree, SearchTree::ROOT);
        assert_eq!(SearchKey::Or, root[1]);
        assert_eq!(
            SearchKey::Flag(FlagTest::Keyword("$Work".to_owned(), true)),
            root[2]
        );

        let or = tree.node(SearchTree::ROOT).children[1];
        assert_eq!(
            vec![SearchKey::Size(SizeOp::Larger, 1000), SearchKey::And],
            keys(&tree, or)
        );

        let and = tree.node(or).children[1];
        assert_eq!(
            vec![flags(&[(SystemFlag::Seen, true)]), SearchKey::Not],
            keys(&tree, and)
        );

        let not = tree.node(and).children[1];
        assert_eq!(vec![SearchKey::Body("x".to_owned())], keys(&tree, not));
        assert_eq!(Some(and), tree.node(not).parent);
    }

    #[test]
    fn header_and_date_keys() {
        let tree = parse(
            &[
                "FROM", "alice", "header", "X-Spam", "yes", "sentsince",
                "1-Feb-2020", "before", "29-feb-2020", "TEXT", "fox",
            ],
            SearchOrder::Unordered,
        )
        .unwrap();

        assert_eq!(
            vec![
                SearchKey::SeqSet(MessageSet::all()),
                SearchKey::Header {
                    field: "from".to_owned(),
                    needle: "alice".to_owned(),
                },
                SearchKey::Header {
                    field: "x-spam".to_owned(),
                    needle: "yes".to_owned(),
                },
                SearchKey::HeaderDate(DateOp::Since, date(2020, 2, 1)),
                SearchKey::InternalDate(DateOp::Before, date(2020, 2, 29)),
                SearchKey::Text("fox".to_owned()),
            ],
            keys(&tree, SearchTree::ROOT)
        );
    }

    #[test]
    fn charset_transcodes_needles() {
        let log_prefix = LogPrefix::new("test".to_owned());
        let tokens: [&[u8]; 4] =
            [b"CHARSET", b"ISO-8859-1", b"SUBJECT", b"caf\xe9"];
        let (tree, _) = SearchParser::new(
            &log_prefix,
            &tokens,
            0,
            SearchOrder::Unordered,
            1024,
        )
        .parse()
        .unwrap();

        assert_eq!(
            SearchKey::Header {
                field: "subject".to_owned(),
                needle: "caf\u{e9}".to_owned(),
            },
            keys(&tree, SearchTree::ROOT)[1]
        );

        assert_matches!(
            Err(Error::BadCharset(_)),
            parse(&["charset", "klingon", "body", "x"], SearchOrder::Unordered)
        );
    }

    #[test]
    fn needles_are_bounded() {
        let log_prefix = LogPrefix::new("test".to_owned());
        let tokens = ["body", "abcdefgh"];
        let (tree, _) =
            SearchParser::new(&log_prefix, &tokens, 0, SearchOrder::Unordered, 4)
                .parse()
                .unwrap();
        assert_eq!(
            SearchKey::Body("abcd".to_owned()),
            keys(&tree, SearchTree::ROOT)[1]
        );
    }

    #[test]
    fn sort_chain() {
        let tree = parse(
            &["(", "REVERSE", "date", "subject", ")", "utf-8", "undeleted"],
            SearchOrder::Sorted,
        )
        .unwrap();

        assert_eq!(
            Some(&SortChain {
                order: vec![(SortKey::Date, true), (SortKey::Subject, false)],
            }),
            tree.sort_chain()
        );
        assert_eq!(
            flags(&[(SystemFlag::Deleted, false)]),
            keys(&tree, SearchTree::ROOT)[2]
        );

        assert_matches!(
            Err(Error::Syntax(_)),
            parse(&["date", "latin1", "all"], SearchOrder::Sorted)
        );
        assert!(parse(&["date", "ISO-8859-1", "all"], SearchOrder::Sorted)
            .is_ok());
    }

    #[test]
    fn thread_consumes_charset() {
        let tree = parse(&["US-ASCII", "all"], SearchOrder::ThreadOrderedSubject)
            .unwrap();
        assert_eq!(
            vec![
                SearchKey::SeqSet(MessageSet::all()),
                SearchKey::UidSet(MessageSet::all()),
            ],
            keys(&tree, SearchTree::ROOT)
        );

        assert_matches!(
            Err(Error::Syntax(_)),
            parse(&[], SearchOrder::ThreadReferences)
        );
        assert_matches!(
            Err(Error::BadCharset(_)),
            parse(&["seen"], SearchOrder::ThreadOrderedSubject)
        );
        // Other encodings are only accepted after CHARSET
        assert_matches!(
            Err(Error::BadCharset(_)),
            parse(&["latin1", "all"], SearchOrder::ThreadOrderedSubject)
        );
        assert!(
            parse(&["iso-8859-1", "all"], SearchOrder::ThreadOrderedSubject)
                .is_ok()
        );
    }

    #[test]
    fn syntax_errors() {
        for bad in &[
            &["bogus"][..],
            &["uid"],
            &["uid", "0"],
            &["uid", "1:x"],
            &["larger", "big"],
            &["larger"],
            &["on", "2020-01-01"],
            &["since", "31-Feb-2020"],
            &["sentbefore", "1-Foo-2020"],
            &["header", "subject"],
            &["(", "seen"],
            &["seen", ")"],
            &["not"],
            &["or", "seen"],
            &["not", "charset", "utf-8"],
            &["keyword"],
        ] {
            assert_matches!(
                Err(Error::Syntax(_)),
                parse(bad, SearchOrder::Unordered)
            );
        }

        for bad in &[
            &[][..],
            &["utf-8"],
            &["reverse", "utf-8"],
            &["arrival", "seen"],
            &["arrival"],
        ] {
            assert_matches!(Err(Error::Syntax(_)), parse(bad, SearchOrder::Sorted));
        }
    }

    #[test]
    fn imap_dates() {
        assert_eq!(Some(date(2020, 2, 1)), parse_imap_date("1-Feb-2020"));
        assert_eq!(Some(date(1999, 12, 31)), parse_imap_date("31-DEC-1999"));
        assert_eq!(None, parse_imap_date("1-Feb-20"));
        assert_eq!(None, parse_imap_date(" 1-Feb-2020"));
    }
}
