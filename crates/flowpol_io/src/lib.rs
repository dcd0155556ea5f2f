//! This module provides parsing of the textual formats: policy expressions and device
//! capability files.
mod default;

use std::path::Path;

use log::debug;
use nom::{
    error::{Error, ErrorKind, ParseError},
    {Finish, IResult},
};
use thiserror::Error;

use flowpol_compile::DeviceCapability;
use flowpol_core::error::{CompositionError, ConfigError};
use flowpol_policy::Policy;

pub use default::{ast, DefaultCapLoader, DefaultPolicyLoader};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot parse ({kind:?}) at `{context}`")]
    Parse { kind: ErrorKind, context: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error("cannot read `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl From<Error<&str>> for LoadError {
    fn from(e: Error<&str>) -> Self {
        let context: String = e.input.trim_start().chars().take(32).collect();
        LoadError::Parse {
            kind: e.code,
            context,
        }
    }
}

/// Read a whole text file.
pub fn read_file(path: impl AsRef<Path>) -> Result<String, LoadError> {
    let path = path.as_ref();
    debug!("reading {}", path.display());
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// [CapabilityLoader] parses a device capability file into the device name and what its table
/// can hold.
pub trait CapabilityLoader {
    // Required method
    fn _load<'x, Err: ParseError<&'x str>>(
        &self,
        content: &'x str,
    ) -> IResult<(), (String, DeviceCapability), Err>;

    // Provided method
    fn load<'x>(&self, content: &'x str) -> Result<(String, DeviceCapability), LoadError> {
        let (_, caps) = self._load::<Error<&'x str>>(content).finish()?;
        Ok(caps)
    }
}

/// [PolicyLoader] parses a policy expression. Parsing only checks the syntax; field names,
/// literals and action sequences are validated while the [Policy] is built.
pub trait PolicyLoader {
    // Required method
    fn _load<'x, Err: ParseError<&'x str>>(
        &self,
        content: &'x str,
    ) -> IResult<(), ast::PolicyExpr<'x>, Err>;

    // Provided method
    fn load(&self, content: &str) -> Result<Policy, LoadError> {
        let (_, expr) = self._load::<Error<&str>>(content).finish()?;
        expr.build()
    }
}

/// Basics for io
pub mod basic {
    /// Basic helper functions for parsing
    pub mod parser {
        use nom::bytes::complete::take_while1;
        use nom::character::complete::{digit1, multispace0};
        use nom::combinator::map_opt;
        use nom::error::ParseError;
        use nom::sequence::delimited;
        use nom::IResult;

        fn is_ident(chr: char) -> bool {
            chr.is_ascii_alphanumeric() || chr == '_' || chr == '-' || chr == '.'
        }

        fn is_literal(chr: char) -> bool {
            is_ident(chr) || chr == ':' || chr == '/'
        }

        /// r"[a-zA-Z0-9_\-\.]+"
        pub fn parse_ident<'a, E: ParseError<&'a str>>(
            input: &'a str,
        ) -> IResult<&'a str, &'a str, E> {
            take_while1(is_ident)(input)
        }

        /// A field literal: addresses, prefixes, MACs and integers, r"[a-zA-Z0-9_\-\.:/]+"
        pub fn parse_literal<'a, E: ParseError<&'a str>>(
            input: &'a str,
        ) -> IResult<&'a str, &'a str, E> {
            take_while1(is_literal)(input)
        }

        /// r"[0-9]+"
        pub fn parse_digits<'a, E: ParseError<&'a str>>(
            input: &'a str,
        ) -> IResult<&'a str, &'a str, E> {
            digit1(input)
        }

        /// r"[0-9]+" that fits in a u32
        pub fn parse_u32<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, u32, E> {
            map_opt(digit1, |s: &str| s.parse::<u32>().ok())(input)
        }

        /// r"[0-9]+" that fits in a usize
        pub fn parse_usize<'a, E: ParseError<&'a str>>(
            input: &'a str,
        ) -> IResult<&'a str, usize, E> {
            map_opt(digit1, |s: &str| s.parse::<usize>().ok())(input)
        }

        /// Surround a parser with optional whitespace.
        pub fn ws<'a, O, E: ParseError<&'a str>, F>(
            inner: F,
        ) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
        where
            F: FnMut(&'a str) -> IResult<&'a str, O, E>,
        {
            delimited(multispace0, inner, multispace0)
        }
    }
}

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        read_file, CapabilityLoader, DefaultCapLoader, DefaultPolicyLoader, LoadError,
        PolicyLoader,
    };
}
