#![allow(unused_parens)]
//! Parsing utilities for SIP message components

use bytes::Bytes;
use internal::IResult;
use nom::bytes::complete::{escaped, is_not};
use nom::character::complete::char;
use nom::sequence::delimited;

pub(crate) fn parse_quoted(i: &str) -> IResult<&str, &str> {
    delimited(char('"'), escaped(is_not("\""), '\\', char('"')), char('"'))(i)
}

pub(crate) fn whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

#[rustfmt::skip]
pub(crate) fn token(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '`' | '\'' | '~' | '+')
}

/// Parse a type out of a `src` buffer. `src` is kept around so parsed
/// fragments can be turned into zero-copy [`BytesStr`](bytesstr::BytesStr)
/// slices instead of being allocated.
pub trait Parse: Sized {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_;
}

/// Legacy parsing context, kept around for headers that parse a nested
/// value (e.g. a name-addr inside `From`/`To`) and still expect a context
/// object rather than a bare buffer.
#[derive(Copy, Clone)]
pub struct ParseCtx<'p> {
    pub src: &'p Bytes,
}

impl<'p> ParseCtx<'p> {
    pub fn new(src: &'p Bytes) -> Self {
        ParseCtx { src }
    }

    pub(crate) fn default<B>(src: &'p B) -> Self
    where
        B: AsRef<Bytes> + 'p,
    {
        Self { src: src.as_ref() }
    }
}
