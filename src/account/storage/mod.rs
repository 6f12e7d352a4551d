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

//! The backing store.
//!
//! The store is a plain SQLite database. It knows nothing about search trees;
//! it only runs the queries it is handed (with all literals bound as
//! parameters) and the handful of fixed queries needed to open a mailbox.
//!
//! The concept of a database transaction does not escape this module.

mod db_migrations;
mod metadb;
mod types;

pub use metadb::{Connection, StoreQuery};
pub use types::{date_param, SqlValue, VisibleMessage};
