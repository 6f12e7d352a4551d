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

use std::io;

use thiserror::Error;

use crate::account::model::Uid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Syntax error in search key: {0}")]
    Syntax(String),
    #[error("Unknown charset: {0}")]
    BadCharset(String),
    #[error("Nonexistent message")]
    NxMessage,
    #[error("Nonexistent mailbox")]
    NxMailbox,
    #[error("UID {0} is not in the identifier index")]
    IndexOutOfSync(Uid),
    #[error("No search has been built for this mailbox")]
    NoSearch,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
