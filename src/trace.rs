//! Trace flags selecting which parts of an exchange get logged.

use std::fmt;

/// One part of a request/response exchange that can be traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceFlag {
    RequestHeaders,
    RequestBody,
    RequestBodySummary,
    ResponseHeaders,
    ResponseBody,
    ResponseBodySummary,
}

impl TraceFlag {
    /// Every flag, in declaration order.
    pub const ALL: [TraceFlag; 6] = [
        TraceFlag::RequestHeaders,
        TraceFlag::RequestBody,
        TraceFlag::RequestBodySummary,
        TraceFlag::ResponseHeaders,
        TraceFlag::ResponseBody,
        TraceFlag::ResponseBodySummary,
    ];

    /// The configuration name of this flag.
    pub fn name(self) -> &'static str {
        match self {
            TraceFlag::RequestHeaders => "RequestHeaders",
            TraceFlag::RequestBody => "RequestBody",
            TraceFlag::RequestBodySummary => "RequestBodySummary",
            TraceFlag::ResponseHeaders => "ResponseHeaders",
            TraceFlag::ResponseBody => "ResponseBody",
            TraceFlag::ResponseBodySummary => "ResponseBodySummary",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for TraceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration names that expand to several flags.
const ALIASES: &[(&str, &[TraceFlag])] = &[
    (
        "Request",
        &[TraceFlag::RequestHeaders, TraceFlag::RequestBodySummary],
    ),
    (
        "Response",
        &[TraceFlag::ResponseHeaders, TraceFlag::ResponseBodySummary],
    ),
];

/// A set of [`TraceFlag`]s.
///
/// # Examples
///
/// ```
/// use gridcall::trace::{TraceFlag, TraceFlags};
///
/// let flags = TraceFlags::parse("Request, ResponseBody");
/// assert!(flags.contains(TraceFlag::RequestHeaders));
/// assert!(flags.contains(TraceFlag::RequestBodySummary));
/// assert!(flags.contains(TraceFlag::ResponseBody));
/// assert!(!flags.contains(TraceFlag::ResponseHeaders));
///
/// assert!(TraceFlags::parse("").is_empty());
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// No tracing.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every flag.
    pub fn all() -> Self {
        TraceFlag::ALL.into_iter().collect()
    }

    /// Parses a comma and/or whitespace separated list of flag and alias names.
    ///
    /// Names match case-insensitively. Unknown names are skipped with a warning.
    pub fn parse(value: &str) -> Self {
        let mut flags = Self::empty();
        for token in value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            if let Some(flag) = TraceFlag::ALL
                .into_iter()
                .find(|flag| flag.name().eq_ignore_ascii_case(token))
            {
                flags.insert(flag);
            } else if let Some((_, expanded)) = ALIASES
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(token))
            {
                flags.extend(expanded.iter().copied());
            } else {
                tracing::warn!(token = token, "Ignoring unknown trace flag");
            }
        }
        flags
    }

    /// Adds a flag.
    pub fn insert(&mut self, flag: TraceFlag) {
        self.0 |= flag.bit();
    }

    /// Returns `true` if the flag is set.
    pub fn contains(&self, flag: TraceFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Returns `true` if no flag is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates the set flags.
    pub fn iter(&self) -> impl Iterator<Item = TraceFlag> + '_ {
        TraceFlag::ALL
            .into_iter()
            .filter(move |flag| self.contains(*flag))
    }

    pub(crate) fn any_request(&self) -> bool {
        self.contains(TraceFlag::RequestHeaders)
            || self.contains(TraceFlag::RequestBody)
            || self.contains(TraceFlag::RequestBodySummary)
    }

    pub(crate) fn any_response(&self) -> bool {
        self.contains(TraceFlag::ResponseHeaders)
            || self.contains(TraceFlag::ResponseBody)
            || self.contains(TraceFlag::ResponseBodySummary)
    }
}

impl Extend<TraceFlag> for TraceFlags {
    fn extend<I: IntoIterator<Item = TraceFlag>>(&mut self, iter: I) {
        for flag in iter {
            self.insert(flag);
        }
    }
}

impl FromIterator<TraceFlag> for TraceFlags {
    fn from_iter<I: IntoIterator<Item = TraceFlag>>(iter: I) -> Self {
        let mut flags = Self::empty();
        flags.extend(iter);
        flags
    }
}

impl fmt::Debug for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
