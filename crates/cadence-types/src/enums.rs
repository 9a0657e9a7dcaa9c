//! Enumeration types for the storage core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a stored enum discriminant is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending stored value.
    pub value: String,
}

/// The kind of a [`UserVote`](crate::UserVote) row.
///
/// `Vote` rows come from bot-list votes and are short lived. `Regular`
/// rows are premium grants issued by an operator for a fixed number of
/// days. Both unlock premium features while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    /// A bot-list vote.
    Vote,
    /// A manually granted premium period.
    Regular,
}

impl VoteKind {
    /// The value stored in the `kind` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vote => "vote",
            Self::Regular => "regular",
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vote" => Ok(Self::Vote),
            "regular" => Ok(Self::Regular),
            other => Err(UnknownVariant {
                kind: "vote kind",
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_kind_parses_column_values() {
        assert_eq!("vote".parse::<VoteKind>().ok(), Some(VoteKind::Vote));
        assert_eq!("regular".parse::<VoteKind>().ok(), Some(VoteKind::Regular));
        assert!("premium".parse::<VoteKind>().is_err());
    }

    #[test]
    fn vote_kind_serde_matches_column_values() {
        let json = serde_json::to_string(&VoteKind::Regular).unwrap_or_default();
        assert_eq!(json, "\"regular\"");
    }
}
