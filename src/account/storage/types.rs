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

//! Bindings for our model types to `rusqlite`.

use std::convert::TryFrom;

use chrono::prelude::*;
use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef,
};

use crate::account::model::*;

/// A dynamically-typed parameter for a generated query.
pub type SqlValue = Value;

/// The textual format of every timestamp column.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// The format produced by SQLite's `date()` function.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

macro_rules! transparent_to_sql {
    ($t:ident) => {
        impl ToSql for $t {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }
    };
}

macro_rules! transparent_from_sql {
    ($t:ident) => {
        impl FromSql for $t {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                FromSql::column_result(value).map(Self)
            }
        }
    };
}

transparent_to_sql!(MailboxId);
transparent_from_sql!(MailboxId);

impl ToSql for Uid {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let raw = i64::try_from(self.0.get())
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::Owned(Value::Integer(raw)))
    }
}

impl FromSql for Uid {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let inner = i64::column_result(value)?;
        u64::try_from(inner)
            .ok()
            .and_then(Uid::of)
            .ok_or(FromSqlError::OutOfRange(inner))
    }
}

impl ToSql for MessageStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Integer(*self as i64)))
    }
}

/// Wrapper for `NaiveDateTime` stored in `DATETIME_FORMAT`.
///
/// Text is used instead of a UNIX timestamp so that the store's `date()`
/// function can be applied to the column directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SqlDateTime(pub NaiveDateTime);

impl ToSql for SqlDateTime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Text(
            self.0.format(DATETIME_FORMAT).to_string(),
        )))
    }
}

impl FromSql for SqlDateTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
            .map(Self)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

pub fn date_param(date: NaiveDate) -> Value {
    Value::Text(date.format(DATE_FORMAT).to_string())
}

pub fn from_row<T: FromRow>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    T::from_row(row)
}

pub fn from_single<T: FromSql>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    row.get(0)
}

pub trait FromRow: Sized {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! from_row_tuple {
    ($($ix:tt: $t:ident),*) => {
        impl<$($t: FromSql,)*> FromRow
        for ($($t,)*) {
            fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                Ok(($(row.get($ix)?,)*))
            }
        }
    }
}

from_row_tuple!(0: A);
from_row_tuple!(0: A, 1: B);
from_row_tuple!(0: A, 1: B, 2: C);

/// One row of the initial mailbox snapshot.
#[derive(Clone, Debug)]
pub struct VisibleMessage {
    pub uid: Uid,
    pub flags: MessageFlags,
    pub internal_date: NaiveDateTime,
    pub size: u64,
}

impl FromRow for VisibleMessage {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mut flags = MessageFlags::empty();
        for flag in SystemFlag::ALL.iter().copied() {
            if row.get::<_, bool>(flag.column())? {
                flags |= flag.bit();
            }
        }

        let size: i64 = row.get("size")?;
        Ok(Self {
            uid: row.get("uid")?,
            flags,
            internal_date: row.get::<_, SqlDateTime>("internal_date")?.0,
            size: u64::try_from(size).unwrap_or(0),
        })
    }
}
