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

use std::path::{Path, PathBuf};

use log::error;
use structopt::StructOpt;

use crate::account::mailbox::Mailbox;
use crate::account::model::{DisplayMode, SearchOrder};
use crate::account::storage::Connection;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    Search(SearchSubcommand),
}

/// Evaluate a SEARCH, SORT or THREAD command against one mailbox.
///
/// The keys are given one per argument, exactly as an IMAP client would send
/// them after the command name, with parentheses as arguments of their own.
/// For example:
///
/// imapsift search --order sort -- '(' reverse date ')' utf-8 unseen
///
/// The result is printed as the untagged response the server would send.
#[derive(StructOpt)]
struct SearchSubcommand {
    /// The configuration file
    /// [default: /etc/imapsift/imapsift.toml or
    /// /usr/local/etc/imapsift/imapsift.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// The mailbox to search.
    #[structopt(short, long, default_value = "INBOX")]
    mailbox: String,

    /// Report UIDs instead of sequence numbers.
    #[structopt(long)]
    uid: bool,

    /// One of unordered, sort, orderedsubject, references.
    #[structopt(long, default_value = "unordered")]
    order: SearchOrder,

    /// The search keys.
    keys: Vec<String>,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        Command::Search(cmd) => search(cmd),
    }
}

fn search(cmd: SearchSubcommand) {
    let config_path = cmd.config.clone().unwrap_or_else(|| {
        if Path::new("/etc/imapsift/imapsift.toml").is_file() {
            "/etc/imapsift/imapsift.toml".to_owned().into()
        } else if Path::new("/usr/local/etc/imapsift/imapsift.toml").is_file()
        {
            "/usr/local/etc/imapsift/imapsift.toml".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/imapsift nor /usr/local/etc/imapsift contains\n\
                 imapsift.toml; use --config=/path/to/imapsift.toml if your\n\
                 installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let config = match SystemConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error in config file at '{}': {}",
                config_path.display(),
                e
            );
            EX_CONFIG.exit()
        }
    };

    init_logging(&config_path, &config);

    let log_prefix = LogPrefix::new("search".to_owned());
    log_prefix.set_mailbox(Some(cmd.mailbox.clone()));

    match run(&cmd, &config, &log_prefix) {
        Ok(response) => println!("{}", response),
        Err(e) => {
            error!("{} {}", log_prefix, e);
            eprintln!("{}", e);
            Sysexit::from(&e).exit()
        }
    }
}

fn init_logging(config_path: &Path, config: &SystemConfig) {
    let log_config_file = config_path
        .parent()
        .map(|dir| dir.join("logging.toml"))
        .filter(|f| f.is_file());

    match log_config_file {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        _ if Ok(true) == nix::unistd::isatty(2) => {
            crate::init_simple_log(config.logging.level_filter())
        }

        Some(log_config_file) => {
            if let Err(e) = log4rs::init_file(
                &log_config_file,
                log4rs::config::Deserializers::new(),
            ) {
                eprintln!(
                    "Failed to initialise logging from '{}': {}",
                    log_config_file.display(),
                    e
                );
                EX_CONFIG.exit();
            }
        }

        None => crate::init_simple_log(config.logging.level_filter()),
    }
}

fn run(
    cmd: &SearchSubcommand,
    config: &SystemConfig,
    log_prefix: &LogPrefix,
) -> Result<String, Error> {
    let cxn = Connection::open(log_prefix, &config.database)?;
    let mailbox_id = cxn.find_mailbox(&cmd.mailbox)?;

    let mut mailbox = Mailbox::open(&cxn, log_prefix.clone(), mailbox_id)?;
    mailbox.set_max_needle_len(config.search.max_needle_len);
    mailbox.set_display_mode(if cmd.uid {
        DisplayMode::Uid
    } else {
        config.search.display_mode()
    });

    let mut cursor = 0;
    mailbox.build_search_tree(&cmd.keys[..], &mut cursor, cmd.order)?;
    mailbox.evaluate_sort(&cxn)?;

    Ok(response_line(cmd.order, &mailbox.render_result()?))
}

fn response_line(order: SearchOrder, payload: &str) -> String {
    let name = match order {
        SearchOrder::Unordered => "SEARCH",
        SearchOrder::Sorted => "SORT",
        SearchOrder::ThreadOrderedSubject | SearchOrder::ThreadReferences => {
            "THREAD"
        }
    };

    if payload.is_empty() {
        format!("* {}", name)
    } else {
        format!("* {} {}", name, payload)
    }
}
