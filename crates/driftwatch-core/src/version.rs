use std::cmp::Ordering;
use std::fmt;

use crate::error::CompareError;

/// Dotted-numeric release version, e.g. `1.2.3.4`.
///
/// Ordering is numeric per component, never lexical: `1.10` sorts above
/// `1.9`, and a shorter version sorts below the same version extended with
/// more components (`1.2` < `1.2.0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseVersion {
    parts: Vec<u64>,
    raw: String,
}

impl ReleaseVersion {
    pub fn parse(raw: &str) -> Result<Self, CompareError> {
        if raw.is_empty() {
            return Err(CompareError::InvalidInput("empty version".to_string()));
        }
        let parts = raw
            .split('.')
            .map(|p| {
                p.parse::<u64>().map_err(|_| {
                    CompareError::InvalidInput(format!("non-numeric version segment in '{raw}'"))
                })
            })
            .collect::<Result<Vec<u64>, CompareError>>()?;
        Ok(Self {
            parts,
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The stable-release floor: everything after the first two components
    /// zeroed, e.g. `1.2.3.5` → `1.2.0.0`.
    pub fn floor(&self) -> String {
        let major = self.parts.first().copied().unwrap_or(0);
        let minor = self.parts.get(1).copied().unwrap_or(0);
        format!("{major}.{minor}.0.0")
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A release tag name of the form `model_1.2.3.4`: the last
/// underscore-delimited segment is the version, the remainder the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTag {
    pub model: String,
    pub version: ReleaseVersion,
}

impl ReleaseTag {
    pub fn parse(name: &str) -> Result<Self, CompareError> {
        let (model, version) = name.rsplit_once('_').ok_or_else(|| {
            CompareError::InvalidInput(format!("release tag '{name}' has no version segment"))
        })?;
        if model.is_empty() {
            return Err(CompareError::InvalidInput(format!(
                "release tag '{name}' has no model segment"
            )));
        }
        Ok(Self {
            model: model.to_string(),
            version: ReleaseVersion::parse(version)?,
        })
    }

    pub fn name(&self) -> String {
        format!("{}_{}", self.model, self.version)
    }
}

/// Version segment of a tag ref, e.g. `refs/tags/model_1.2.3.4` → `1.2.3.4`.
pub fn tag_ref_version(ref_name: &str) -> Option<&str> {
    let short = ref_name.strip_prefix("refs/tags/").unwrap_or(ref_name);
    short.rsplit('_').next().filter(|v| !v.is_empty())
}
