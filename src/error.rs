// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::error;
use std::fmt;

use crate::token::TokenRv;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    origin: Option<Box<dyn error::Error + Send + Sync>>,
    errmsg: Option<String>,
    rv: Option<TokenRv>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /* No key bound, wrong key algorithm or class, or a key size the
     * mechanism or the current parameters can't work with */
    KeyError,
    /* Missing, invalid or mismatched PSS parameters */
    ParameterError,
    /* Call made in a state that does not allow it */
    StateError,
    /* Unrecoverable token failure, see rv and origin */
    ProviderError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::KeyError => write!(f, "key error"),
            ErrorKind::ParameterError => write!(f, "parameter error"),
            ErrorKind::StateError => write!(f, "state error"),
            ErrorKind::ProviderError => write!(f, "provider error"),
        }
    }
}

impl Error {
    fn with_msg(kind: ErrorKind, errmsg: String) -> Error {
        Error {
            kind: kind,
            origin: None,
            errmsg: Some(errmsg),
            rv: None,
        }
    }

    pub fn key(errmsg: String) -> Error {
        Error::with_msg(ErrorKind::KeyError, errmsg)
    }

    pub fn parameter(errmsg: String) -> Error {
        Error::with_msg(ErrorKind::ParameterError, errmsg)
    }

    pub fn state(errmsg: String) -> Error {
        Error::with_msg(ErrorKind::StateError, errmsg)
    }

    pub fn provider(errmsg: String) -> Error {
        Error::with_msg(ErrorKind::ProviderError, errmsg)
    }

    pub fn token_rv(rv: TokenRv) -> Error {
        Error {
            kind: ErrorKind::ProviderError,
            origin: None,
            errmsg: None,
            rv: Some(rv),
        }
    }

    pub fn token_rv_with_errmsg(rv: TokenRv, errmsg: String) -> Error {
        Error {
            kind: ErrorKind::ProviderError,
            origin: None,
            errmsg: Some(errmsg),
            rv: Some(rv),
        }
    }

    pub fn provider_from_error<E>(errmsg: String, error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::ProviderError,
            origin: Some(error.into()),
            errmsg: Some(errmsg),
            rv: None,
        }
    }

    pub fn parameter_from_error<E>(errmsg: String, error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::ParameterError,
            origin: Some(error.into()),
            errmsg: Some(errmsg),
            rv: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The token result code behind a provider failure, if any
    pub fn rv(&self) -> Option<TokenRv> {
        self.rv
    }

    pub fn is_key_error(&self) -> bool {
        self.kind == ErrorKind::KeyError
    }

    pub fn is_parameter_error(&self) -> bool {
        self.kind == ErrorKind::ParameterError
    }

    pub fn is_state_error(&self) -> bool {
        self.kind == ErrorKind::StateError
    }

    pub fn is_provider_error(&self) -> bool {
        self.kind == ErrorKind::ProviderError
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.errmsg {
            write!(f, ": {}", msg)?;
        }
        if let Some(rv) = self.rv {
            write!(f, " [{}]", rv)?;
        }
        if let Some(ref origin) = self.origin {
            write!(f, " ({})", origin)?;
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.origin {
            Some(ref e) => Some(e.as_ref()),
            None => None,
        }
    }
}

impl From<TokenRv> for Error {
    fn from(rv: TokenRv) -> Error {
        Error::token_rv(rv)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::provider_from_error("I/O failure".to_string(), error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Error {
        Error::provider_from_error("malformed configuration".to_string(), error)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Error {
        Error::provider_from_error("integer conversion".to_string(), error)
    }
}

impl From<asn1::ParseError> for Error {
    fn from(error: asn1::ParseError) -> Error {
        Error::parameter(format!("malformed DER parameters: {}", error))
    }
}

impl From<asn1::WriteError> for Error {
    fn from(_: asn1::WriteError) -> Error {
        Error::provider("failed to DER encode parameters".to_string())
    }
}

#[macro_export]
macro_rules! key_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::key(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! param_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::parameter(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! state_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::state(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! provider_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::provider(format!($($arg)*)))
    };
}
