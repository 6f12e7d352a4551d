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

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Error;
use crate::account::model::DisplayMode;

/// The system-wide configuration for Imapsift.
///
/// This is stored in a file named `imapsift.toml`, which is typically found
/// in `/usr/local/etc/imapsift` or `/etc/imapsift`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SystemConfig {
    /// The path to the SQLite database holding the mail store.
    ///
    /// Relative paths are resolved against the directory containing the
    /// configuration file.
    pub database: PathBuf,

    /// Tuning for search evaluation.
    #[serde(default)]
    pub search: SearchConfig,

    /// Fallback logging configuration, used when there is no
    /// `logging.toml` beside this file.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// If true, results are reported as UIDs instead of sequence numbers
    /// unless the caller says otherwise.
    pub uid_display: bool,

    /// The maximum length, in bytes, of a literal taken from a search key.
    ///
    /// Longer literals are truncated (at a character boundary) rather than
    /// rejected.
    pub max_needle_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            uid_display: false,
            max_needle_len: 1024,
        }
    }
}

impl SearchConfig {
    pub fn display_mode(&self) -> DisplayMode {
        if self.uid_display {
            DisplayMode::Uid
        } else {
            DisplayMode::Seqnum
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl SystemConfig {
    /// Loads the configuration at `path`, resolving `database` relative to
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        let mut config: SystemConfig = toml::from_str(&text)?;
        if config.database.is_relative() {
            if let Some(parent) = path.parent() {
                config.database = parent.join(&config.database);
            }
        }

        Ok(config)
    }
}
