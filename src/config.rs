// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Runtime configuration: how many `P`s to run and whether to print a
//! scheduler summary on shutdown. Mirrors the original runtime's
//! `COMAXPROCS` environment variable (`scheduler_init` reads it through
//! `getenv`), extended with a `CO_SCHED_LOG` toggle for the shutdown
//! summary this crate adds as ambient tooling.

use std::env;
use std::num::ParseIntError;

use consts::{DEFAULT_PARALLELISM, ENV_MAXPROCS, ENV_SCHED_LOG};

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of `P`s (and thus worker `M` threads) to run.
    pub parallelism: usize,
    /// Whether to print a coroutine/steal-count summary to stderr on
    /// `Runtime` shutdown.
    pub log_on_shutdown: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            parallelism: DEFAULT_PARALLELISM,
            log_on_shutdown: false,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ConfigError {
    InvalidMaxProcs(ParseIntError),
    ZeroMaxProcs,
}

impl Config {
    /// Reads `COMAXPROCS` and `CO_SCHED_LOG` from the environment,
    /// falling back to defaults when unset. Parse failures are reported
    /// back to the caller as a `Result`, which `::init` turns into a
    /// `fatal!` — configuration is read once at startup, so there is no
    /// use in this crate's public API for a recoverable error here.
    pub(crate) fn from_env() -> Result<Config, ConfigError> {
        let mut cfg = Config::default();

        if let Ok(val) = env::var(ENV_MAXPROCS) {
            let n: usize = val.trim().parse().map_err(ConfigError::InvalidMaxProcs)?;
            if n == 0 {
                return Err(ConfigError::ZeroMaxProcs);
            }
            cfg.parallelism = n;
        }

        // Any non-empty value turns the shutdown summary on — there's no
        // "off" spelling, matching the original's plain `getenv() != NULL`
        // check.
        if let Ok(val) = env::var(ENV_SCHED_LOG) {
            cfg.log_on_shutdown = !val.is_empty();
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_original_comaxprocs_default() {
        let cfg = Config::default();
        assert_eq!(cfg.parallelism, DEFAULT_PARALLELISM);
        assert!(!cfg.log_on_shutdown);
    }
}
