//! Date based release versions.
//!
//! Releases are tagged `vYYMMDD.N`: the release date plus a counter that
//! increments for every further release on the same day. A build resolves
//! the tag it descends from into `YYMMDD.N`, or `YYMMDD.N-post<K>` when it is
//! `K` commits past that tag.

use crate::error::{ReleaseError, ReleaseResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Prefix every version tag carries.
pub const TAG_PREFIX: char = 'v';

/// Separator between a tagged version and its commit distance.
pub const POST_SEPARATOR: &str = "-post";

fn bare_pattern() -> &'static regex_lite::Regex {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"^([0-9]{2})([0-9]{2})([0-9]{2})\.(0|[1-9][0-9]*)$")
            .expect("version regex is valid")
    })
}

/// A release tag `vYYMMDD.N`.
///
/// Ordering follows `(date, counter)`, which is the order releases were issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionTag {
    date: NaiveDate,
    counter: u32,
}

impl VersionTag {
    /// Create a tag for the given release date and same-day counter.
    ///
    /// Only dates in 2000..=2099 are representable by the six digit format.
    pub fn new(date: NaiveDate, counter: u32) -> ReleaseResult<Self> {
        if !(2000..=2099).contains(&date.year()) {
            return Err(ReleaseError::InvalidTag(format!(
                "release date {date} is outside the YYMMDD range"
            )));
        }
        Ok(Self { date, counter })
    }

    /// The release date.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// The same-day release counter.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The tag text without its `v` prefix, e.g. `240115.1`.
    pub fn bare(&self) -> String {
        format!("{}.{}", self.date.format("%y%m%d"), self.counter)
    }

    /// Parse the `YYMMDD.N` form without the tag prefix.
    pub fn parse_bare(s: &str) -> ReleaseResult<Self> {
        let caps = bare_pattern()
            .captures(s)
            .ok_or_else(|| ReleaseError::InvalidTag(s.to_string()))?;
        // The pattern guarantees two digit groups, so these cannot overflow.
        let field = |i: usize| caps[i].parse::<u32>().unwrap_or_default();
        let date = NaiveDate::from_ymd_opt(2000 + field(1) as i32, field(2), field(3))
            .ok_or_else(|| ReleaseError::InvalidTag(format!("{s}: not a calendar date")))?;
        let counter = caps[4]
            .parse::<u32>()
            .map_err(|_| ReleaseError::InvalidTag(format!("{s}: release counter overflows")))?;
        Self::new(date, counter)
    }
}

impl FromStr for VersionTag {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s
            .strip_prefix(TAG_PREFIX)
            .ok_or_else(|| ReleaseError::InvalidTag(s.to_string()))?;
        Self::parse_bare(bare).map_err(|_| ReleaseError::InvalidTag(s.to_string()))
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TAG_PREFIX}{}", self.bare())
    }
}

impl TryFrom<String> for VersionTag {
    type Error = ReleaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionTag> for String {
    fn from(tag: VersionTag) -> Self {
        tag.to_string()
    }
}

/// The version a build resolves to: a tag plus the number of commits past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResolvedVersion {
    tag: VersionTag,
    post: u32,
}

impl ResolvedVersion {
    /// A version `post` commits past `tag`.
    pub fn new(tag: VersionTag, post: u32) -> Self {
        Self { tag, post }
    }

    /// The tag this version descends from.
    pub fn tag(&self) -> VersionTag {
        self.tag
    }

    /// Number of commits after the tag.
    pub fn post(&self) -> u32 {
        self.post
    }

    /// True when the build sits exactly on its tag.
    pub fn is_release(&self) -> bool {
        self.post == 0
    }

    /// PEP 440 normal form, as package indexes store it (`240115.1.post3`).
    pub fn pep440(&self) -> String {
        if self.is_release() {
            self.tag.bare()
        } else {
            format!("{}.post{}", self.tag.bare(), self.post)
        }
    }
}

impl From<VersionTag> for ResolvedVersion {
    fn from(tag: VersionTag) -> Self {
        Self::new(tag, 0)
    }
}

impl fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_release() {
            write!(f, "{}", self.tag.bare())
        } else {
            write!(f, "{}{POST_SEPARATOR}{}", self.tag.bare(), self.post)
        }
    }
}

impl FromStr for ResolvedVersion {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReleaseError::InvalidVersion(s.to_string());
        match s.split_once(POST_SEPARATOR) {
            None => VersionTag::parse_bare(s).map(Self::from).map_err(|_| invalid()),
            Some((bare, post)) => {
                let tag = VersionTag::parse_bare(bare).map_err(|_| invalid())?;
                // -post0 is never emitted, and leading zeros would not round-trip.
                if post.is_empty() || post.starts_with('0') || !post.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(invalid());
                }
                let post = post.parse::<u32>().map_err(|_| invalid())?;
                Ok(Self::new(tag, post))
            }
        }
    }
}

impl TryFrom<String> for ResolvedVersion {
    type Error = ReleaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResolvedVersion> for String {
    fn from(version: ResolvedVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> VersionTag {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_tag() {
        let t = tag("v240115.1");
        assert_eq!(t.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(t.counter(), 1);
        assert_eq!(t.to_string(), "v240115.1");
        assert_eq!(t.bare(), "240115.1");
    }

    #[test]
    fn test_parse_tag_zero_counter() {
        assert_eq!(tag("v991231.0").bare(), "991231.0");
    }

    #[test]
    fn test_parse_tag_large_counter() {
        assert_eq!(tag("v240115.12").counter(), 12);
    }

    #[test]
    fn test_reject_missing_prefix() {
        assert!("240115.1".parse::<VersionTag>().is_err());
    }

    #[test]
    fn test_reject_malformed_tags() {
        for bad in [
            "v24011.1",
            "v2401155.1",
            "v240115",
            "v240115.",
            "v240115.01",
            "v240115.1a",
            "v1.2.3",
            "release-240115.1",
            "v240115.1-post3",
        ] {
            assert!(bad.parse::<VersionTag>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_reject_impossible_dates() {
        assert!("v241315.1".parse::<VersionTag>().is_err());
        assert!("v240230.1".parse::<VersionTag>().is_err());
        assert!("v240100.1".parse::<VersionTag>().is_err());
    }

    #[test]
    fn test_leap_day() {
        assert!("v240229.1".parse::<VersionTag>().is_ok());
        assert!("v230229.1".parse::<VersionTag>().is_err());
    }

    #[test]
    fn test_counter_overflow() {
        assert!("v240115.99999999999".parse::<VersionTag>().is_err());
    }

    #[test]
    fn test_tag_order_is_chronological() {
        assert!(tag("v240115.1") < tag("v240115.2"));
        assert!(tag("v240115.9") < tag("v240115.10"));
        assert!(tag("v231231.5") < tag("v240101.0"));
        assert!(tag("v240131.3") < tag("v240201.1"));
    }

    #[test]
    fn test_new_rejects_out_of_range_year() {
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert!(VersionTag::new(date, 0).is_err());
    }

    #[test]
    fn test_resolved_release_equals_bare_tag() {
        let v = ResolvedVersion::from(tag("v240115.2"));
        assert!(v.is_release());
        assert_eq!(v.to_string(), "240115.2");
        assert_eq!(v.pep440(), "240115.2");
    }

    #[test]
    fn test_resolved_post_release() {
        let v = ResolvedVersion::new(tag("v240115.1"), 3);
        assert!(!v.is_release());
        assert_eq!(v.to_string(), "240115.1-post3");
        assert_eq!(v.pep440(), "240115.1.post3");
    }

    #[test]
    fn test_parse_resolved() {
        let v: ResolvedVersion = "240115.1-post3".parse().unwrap();
        assert_eq!(v.tag(), tag("v240115.1"));
        assert_eq!(v.post(), 3);

        let v: ResolvedVersion = "240115.1".parse().unwrap();
        assert_eq!(v.post(), 0);
    }

    #[test]
    fn test_parse_resolved_rejects_bad_suffix() {
        for bad in [
            "240115.1-post0",
            "240115.1-post",
            "240115.1-post03",
            "240115.1-postx",
            "v240115.1",
            "240115.1.post3",
        ] {
            assert!(bad.parse::<ResolvedVersion>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let v = ResolvedVersion::new(tag("v240115.1"), 7);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"240115.1-post7\"");
        let back: ResolvedVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);

        assert!(serde_json::from_str::<VersionTag>("\"v240115.x\"").is_err());
    }
}
