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

//! Constants from `sysexits.h`
//!
//! The command-line front-end reports failures with these so that scripts
//! driving it can tell a bad query from a broken installation.
#![allow(dead_code)]

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_OK: Sysexit = Sysexit(0);
pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }
}

impl From<&crate::support::error::Error> for Sysexit {
    fn from(e: &crate::support::error::Error) -> Self {
        use crate::support::error::Error;

        match *e {
            Error::Syntax(..) | Error::BadCharset(..) => EX_DATAERR,
            Error::NxMailbox => EX_NOINPUT,
            Error::Io(..) => EX_IOERR,
            Error::Toml(..) => EX_CONFIG,
            Error::NxMessage
            | Error::IndexOutOfSync(..)
            | Error::NoSearch
            | Error::Sqlite(..) => EX_SOFTWARE,
        }
    }
}
