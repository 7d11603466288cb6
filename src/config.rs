// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use std::env;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use toml;

pub const DEFAULT_CONF_NAME: &str = "tokenpss.conf";

pub const DEFAULT_MAX_IDLE_SESSIONS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Clear token state with a forced terminal command on cancel, when
    /// false cancelled sessions are always destroyed
    pub explicit_cancel: bool,
    pub max_idle_sessions: usize,
    /// Use the raw mechanism and hash locally when the token does not
    /// offer the hashing variant of a mechanism
    pub local_digest_fallback: bool,
    pub min_key_bits: Option<usize>,
    pub max_key_bits: Option<usize>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            explicit_cancel: true,
            max_idle_sessions: DEFAULT_MAX_IDLE_SESSIONS,
            local_digest_fallback: true,
            min_key_bits: None,
            max_key_bits: None,
        }
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn find_conf() -> Result<String> {
        /* First check for our own env var,
         * this has the highest precedence */
        if let Ok(var) = env::var("TOKENPSS_CONF") {
            return Ok(var);
        }
        let datafile = match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => format!("{}/tokenpss/{}", xdg, DEFAULT_CONF_NAME),
            Err(_) => match env::var("HOME") {
                Ok(home) => {
                    format!("{}/.config/tokenpss/{}", home, DEFAULT_CONF_NAME)
                }
                Err(_) => {
                    return Err(Error::provider(
                        "no configuration directory".to_string(),
                    ))
                }
            },
        };
        if Path::new(&datafile).is_file() {
            Ok(datafile)
        } else {
            Err(Error::provider(format!("{} not found", datafile)))
        }
    }

    pub fn from_file(filename: &str) -> Result<Config> {
        let config_str = fs::read_to_string(filename)?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Config> {
        let conf: Config = toml::from_str(config_str)?;
        Ok(conf)
    }

    /// Applies TOKENPSS_EXPLICIT_CANCEL and TOKENPSS_MAX_IDLE_SESSIONS,
    /// unparsable values are ignored
    pub fn load_env_vars_overrides(&mut self) {
        if let Ok(val) = env::var("TOKENPSS_EXPLICIT_CANCEL") {
            match parse_bool(&val) {
                Some(b) => self.explicit_cancel = b,
                None => warn!("Ignoring TOKENPSS_EXPLICIT_CANCEL={}", val),
            }
        }
        if let Ok(val) = env::var("TOKENPSS_MAX_IDLE_SESSIONS") {
            match val.parse::<usize>() {
                Ok(n) => self.max_idle_sessions = n,
                Err(_) => warn!("Ignoring TOKENPSS_MAX_IDLE_SESSIONS={}", val),
            }
        }
    }

    /// Configuration file if one is found, defaults otherwise, then the
    /// environment overrides
    pub fn default_config() -> Result<Config> {
        let mut conf = match Self::find_conf() {
            Ok(filename) => Self::from_file(&filename)?,
            Err(_) => Config::default(),
        };
        conf.load_env_vars_overrides();
        Ok(conf)
    }
}

static GLOBAL_CONFIG: Lazy<std::result::Result<Config, String>> =
    Lazy::new(|| Config::default_config().map_err(|e| e.to_string()));

/// The process wide configuration, loaded once
pub fn global() -> Result<Config> {
    match &*GLOBAL_CONFIG {
        Ok(conf) => Ok(conf.clone()),
        Err(msg) => Err(Error::provider(msg.clone())),
    }
}
