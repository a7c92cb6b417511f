//! Model version identifiers.
//!
//! A version identifier has the form `V<major>[_<minor>[_<patch>]]`, e.g.
//! `V1`, `V1_2`, `V2_0_3`. Missing components are zero. The identifier text
//! is kept verbatim so it can be used to build resource file names, while
//! comparisons only look at the numeric triple.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^V(\d+)(?:_(\d+))?(?:_(\d+))?$").expect("identifier pattern"));

static EMBEDDED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9])(V\d+(?:_\d+){0,2})(?:$|[^0-9])").expect("embedded pattern")
});

static TRAILING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(\d+)_(\d+)(?:_(\d+))?$").expect("trailing pattern"));

/// A schema version: `(major, minor, patch)` plus the identifier it came from.
///
/// Equality, ordering and hashing use only the numeric triple, so `V1` and
/// `V1_0_0` are the same version.
///
/// # Example
///
/// ```
/// use graph_migrate::ModelVersion;
///
/// let v = ModelVersion::parse("V1_2").unwrap();
/// assert_eq!((v.major(), v.minor(), v.patch()), (1, 2, 0));
/// assert_eq!(v.identifier(), "V1_2");
/// assert!(v < ModelVersion::new(1, 10, 0));
/// assert!(ModelVersion::parse("1.2").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ModelVersion {
    major: u32,
    minor: u32,
    patch: u32,
    identifier: String,
}

/// Error returned by [`ModelVersion::from_str`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version identifier {0:?}, expected V<major>[_<minor>[_<patch>]]")]
pub struct ParseVersionError(pub String);

impl ModelVersion {
    /// Build a version with the canonical identifier `V<major>_<minor>_<patch>`.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            identifier: format!("V{major}_{minor}_{patch}"),
        }
    }

    /// Parse `V<major>[_<minor>[_<patch>]]`. Returns `None` on mismatch or overflow.
    pub fn parse(identifier: &str) -> Option<Self> {
        let caps = IDENTIFIER.captures(identifier)?;
        let part = |i: usize| -> Option<u32> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };
        Some(Self {
            major: part(1)?,
            minor: part(2)?,
            patch: part(3)?,
            identifier: identifier.to_string(),
        })
    }

    /// Extract a version from a file name.
    ///
    /// Looks for an embedded `V<digits>[_<digits>[_<digits>]]` token first
    /// (`Notes_V1_2_0.toml`), then for a trailing `_<major>_<minor>[_<patch>]`
    /// suffix (`Notes_1_2.toml`). Everything after the first `.` of the file
    /// name is ignored.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.split('.').next().unwrap_or(name);

        if let Some(caps) = EMBEDDED.captures(stem) {
            if let Some(v) = caps.get(1).and_then(|m| Self::parse(m.as_str())) {
                return Some(v);
            }
        }

        let caps = TRAILING.captures(stem)?;
        let identifier = match caps.get(3) {
            Some(patch) => format!("V{}_{}_{}", &caps[1], &caps[2], patch.as_str()),
            None => format!("V{}_{}", &caps[1], &caps[2]),
        };
        Self::parse(&identifier)
    }

    /// Major component.
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Minor component.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Patch component.
    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// The identifier this version was parsed from (or built with).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }

    /// Versions strictly after `from` up to and including `to`.
    ///
    /// Equivalent to [`ModelVersion::sequence_with`] when the last minor of
    /// every major is unknown, which skips the same-major placeholder.
    pub fn sequence(from: &ModelVersion, to: &ModelVersion) -> Vec<ModelVersion> {
        Self::sequence_with(from, to, |_| None)
    }

    /// Versions strictly after `from` up to and including `to`.
    ///
    /// - `from >= to`: empty.
    /// - Same major: each minor `from.minor + 1 .. to.minor` at patch 0,
    ///   then `to` itself.
    /// - Different majors: the last minor of `from.major` (as reported by
    ///   `last_minor`, only when it is past `from.minor`), each intermediate
    ///   major at minor 0, the minors `0 .. to.minor` of `to.major`, then `to`.
    ///
    /// The result is strictly increasing and always ends with `to`.
    pub fn sequence_with<F>(from: &ModelVersion, to: &ModelVersion, last_minor: F) -> Vec<ModelVersion>
    where
        F: Fn(u32) -> Option<u32>,
    {
        if from >= to {
            return Vec::new();
        }

        let mut out = Vec::new();
        if from.major == to.major {
            for minor in from.minor.saturating_add(1)..to.minor {
                out.push(Self::new(to.major, minor, 0));
            }
            out.push(to.clone());
            return out;
        }

        if let Some(last) = last_minor(from.major) {
            if last > from.minor {
                out.push(Self::new(from.major, last, 0));
            }
        }
        for major in from.major + 1..to.major {
            out.push(Self::new(major, 0, 0));
        }
        for minor in 0..to.minor {
            out.push(Self::new(to.major, minor, 0));
        }
        out.push(to.clone());
        out
    }
}

impl PartialEq for ModelVersion {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for ModelVersion {}

impl PartialOrd for ModelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl Hash for ModelVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.triple().hash(state);
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

impl FromStr for ModelVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParseVersionError(s.to_string()))
    }
}

impl Serialize for ModelVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.identifier)
    }
}

impl<'de> Deserialize<'de> for ModelVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(id: &str) -> ModelVersion {
        ModelVersion::parse(id).unwrap()
    }

    fn ids(versions: &[ModelVersion]) -> Vec<&str> {
        versions.iter().map(ModelVersion::identifier).collect()
    }

    #[test]
    fn parse_forms() {
        assert_eq!(v("V3").triple(), (3, 0, 0));
        assert_eq!(v("V3_4").triple(), (3, 4, 0));
        assert_eq!(v("V3_4_5").triple(), (3, 4, 5));
    }

    #[test]
    fn parse_rejects() {
        for bad in ["", "V", "v1", "1_0", "V1_", "V1__2", "V1_2_3_4", "V1.2", "xV1", "V99999999999"] {
            assert!(ModelVersion::parse(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn short_and_long_forms_are_equal() {
        assert_eq!(v("V1"), v("V1_0_0"));
        assert_eq!(v("V1").identifier(), "V1");
        assert_eq!(ModelVersion::new(1, 0, 0).identifier(), "V1_0_0");
    }

    #[test]
    fn from_path_embedded() {
        let p = Path::new("/models/Notes_V1_2_0.toml");
        assert_eq!(ModelVersion::from_path(p).unwrap().identifier(), "V1_2_0");

        let mapping = Path::new("Mapping_V1_0_0_to_V1_1_0.toml");
        assert_eq!(ModelVersion::from_path(mapping).unwrap().identifier(), "V1_0_0");
    }

    #[test]
    fn from_path_trailing() {
        let p = Path::new("Notes_1_2.toml");
        assert_eq!(ModelVersion::from_path(p).unwrap().identifier(), "V1_2");
        let p = Path::new("Notes_2_0_1.model.toml");
        assert_eq!(ModelVersion::from_path(p).unwrap().triple(), (2, 0, 1));
    }

    #[test]
    fn from_path_absent() {
        assert!(ModelVersion::from_path(Path::new("Notes.toml")).is_none());
        assert!(ModelVersion::from_path(Path::new("Vendor_notes.toml")).is_none());
        assert!(ModelVersion::from_path(Path::new("/")).is_none());
    }

    #[test]
    fn sequence_same_major() {
        let seq = ModelVersion::sequence(&v("V1_0_0"), &v("V1_3_0"));
        assert_eq!(ids(&seq), ["V1_1_0", "V1_2_0", "V1_3_0"]);
    }

    #[test]
    fn sequence_patch_only() {
        let seq = ModelVersion::sequence(&v("V1_2_0"), &v("V1_2_4"));
        assert_eq!(ids(&seq), ["V1_2_4"]);

        let top = ModelVersion::new(1, u32::MAX, 0);
        let bump = ModelVersion::new(1, u32::MAX, 1);
        assert_eq!(ModelVersion::sequence(&top, &bump), vec![bump.clone()]);
        assert_eq!(
            ModelVersion::sequence(&v("V1_4294967295_0"), &v("V1_4294967295_1")),
            vec![bump]
        );
    }

    #[test]
    fn sequence_empty_when_not_ascending() {
        assert!(ModelVersion::sequence(&v("V2"), &v("V1")).is_empty());
        assert!(ModelVersion::sequence(&v("V2"), &v("V2_0_0")).is_empty());
    }

    #[test]
    fn sequence_cross_major_without_last_minor() {
        let seq = ModelVersion::sequence(&v("V1_2_0"), &v("V3_1_0"));
        assert_eq!(ids(&seq), ["V2_0_0", "V3_0_0", "V3_1_0"]);
    }

    #[test]
    fn sequence_cross_major_with_last_minor() {
        let seq = ModelVersion::sequence_with(&v("V1_2_0"), &v("V2_0_0"), |major| {
            (major == 1).then_some(4)
        });
        assert_eq!(ids(&seq), ["V1_4_0", "V2_0_0"]);

        // A last minor at or before `from` adds nothing.
        let seq = ModelVersion::sequence_with(&v("V1_4_0"), &v("V2_0_0"), |_| Some(4));
        assert_eq!(ids(&seq), ["V2_0_0"]);
    }

    #[test]
    fn serde_as_identifier() {
        let json = serde_json::to_string(&v("V1_2")).unwrap();
        assert_eq!(json, "\"V1_2\"");
        let back: ModelVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back.identifier(), "V1_2");
        assert!(serde_json::from_str::<ModelVersion>("\"1.2\"").is_err());
    }

    fn identifier() -> impl Strategy<Value = String> {
        (0u32..1000, proptest::option::of(0u32..1000), proptest::option::of(0u32..1000)).prop_map(
            |(major, minor, patch)| match (minor, patch) {
                (Some(minor), Some(patch)) => format!("V{major}_{minor}_{patch}"),
                (Some(minor), None) => format!("V{major}_{minor}"),
                _ => format!("V{major}"),
            },
        )
    }

    proptest! {
        #[test]
        fn identifier_round_trip(id in identifier()) {
            let parsed = ModelVersion::parse(&id).unwrap();
            prop_assert_eq!(parsed.identifier(), id.as_str());
            prop_assert_eq!(parsed.to_string(), id);
        }

        #[test]
        fn ordering_matches_tuples(a in (0u32..20, 0u32..20, 0u32..20), b in (0u32..20, 0u32..20, 0u32..20)) {
            let va = ModelVersion::new(a.0, a.1, a.2);
            let vb = ModelVersion::new(b.0, b.1, b.2);
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
            prop_assert_eq!(va == vb, a == b);
        }

        #[test]
        fn sequence_is_increasing_and_ends_at_target(
            a in (0u32..5, 0u32..5, 0u32..3),
            b in (0u32..5, 0u32..5, 0u32..3),
        ) {
            let from = ModelVersion::new(a.0, a.1, a.2);
            let to = ModelVersion::new(b.0, b.1, b.2);
            let seq = ModelVersion::sequence(&from, &to);
            prop_assert_eq!(seq.is_empty(), from >= to);
            if let Some(last) = seq.last() {
                prop_assert_eq!(last, &to);
                prop_assert!(seq[0] > from);
                prop_assert!(seq.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
