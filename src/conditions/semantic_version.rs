use std::{cmp::Ordering, str::FromStr};

use semver::Prerelease;

/// A possibly partial semantic version such as `2`, `2.1`, `2.1.3-beta.1`, or `2.1.3+build.5`.
///
/// Comparison with [`SemanticVersion::compare_to_target`] only looks at as many numeric parts as
/// the target specifies, so `2.1.9` equals a target of `2.1`. Build metadata is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticVersion {
    parts: Vec<u64>,
    pre_release: Option<Prerelease>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SemanticVersionParseError {
    #[error("version is empty")]
    Empty,
    #[error("version contains whitespace")]
    Whitespace,
    #[error("version has more than three numeric parts")]
    TooManyParts,
    #[error("invalid numeric part {0:?}")]
    InvalidPart(String),
    #[error("invalid pre-release or build suffix")]
    InvalidSuffix,
}

impl FromStr for SemanticVersion {
    type Err = SemanticVersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SemanticVersionParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(SemanticVersionParseError::Whitespace);
        }

        let version = match s.split_once('+') {
            Some((_, "")) => return Err(SemanticVersionParseError::InvalidSuffix),
            Some((version, _build)) => version,
            None => s,
        };

        let (core, pre_release) = match version.split_once('-') {
            Some((_, "")) => return Err(SemanticVersionParseError::InvalidSuffix),
            Some((core, pre)) => (
                core,
                Some(Prerelease::new(pre).map_err(|_| SemanticVersionParseError::InvalidSuffix)?),
            ),
            None => (version, None),
        };

        let parts = core
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(SemanticVersionParseError::InvalidPart(part.to_owned()));
                }
                part.parse::<u64>()
                    .map_err(|_| SemanticVersionParseError::InvalidPart(part.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if parts.len() > 3 {
            return Err(SemanticVersionParseError::TooManyParts);
        }

        Ok(SemanticVersion { parts, pre_release })
    }
}

impl SemanticVersion {
    pub fn is_pre_release(&self) -> bool {
        self.pre_release.is_some()
    }

    /// Compare `self` (the user's version) against `target` at the target's precision.
    pub fn compare_to_target(&self, target: &SemanticVersion) -> Ordering {
        for (i, target_part) in target.parts.iter().enumerate() {
            let Some(part) = self.parts.get(i) else {
                // User version is less precise than the target.
                return Ordering::Less;
            };
            match part.cmp(target_part) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        // Pre-release tags only take part once the target pins a patch version.
        if target.parts.len() < 3 {
            return Ordering::Equal;
        }

        match (&self.pre_release, &target.pre_release) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(pre), Some(target_pre)) => pre.cmp(target_pre),
        }
    }
}
