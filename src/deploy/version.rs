//! Template version gate.
//!
//! Every rendered template records the version of the tool that produced it.
//! Deploying with an older tool over a newer stack would silently drop
//! whatever the newer template added, so the gate refuses it unless the user
//! explicitly allows downgrades.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::cloud::StackApi;
use crate::error::{ComponentType, DowngradeError, Result, VersionError};

use super::target::DeploymentTarget;

/// Template version embedded by this build of the tool.
pub const TEMPLATE_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// A `MAJOR.MINOR.PATCH[-PRERELEASE]` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Numeric release components.
    pub release: [u64; 3],
    /// Pre-release suffix, without the leading dash.
    pub pre: Option<String>,
}

impl Version {
    /// Parses a version, accepting an optional `v` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid version.
    pub fn parse(raw: &str) -> std::result::Result<Self, VersionError> {
        let invalid = |message: &str| VersionError::Invalid {
            value: raw.to_string(),
            message: message.to_string(),
        };

        let trimmed = raw.trim();
        let normalized = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if normalized.is_empty() {
            return Err(invalid("version value is empty"));
        }

        let (core, pre) = match normalized.split_once('-') {
            Some((_, "")) => return Err(invalid("pre-release is empty")),
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (normalized, None),
        };
        // Build metadata does not take part in ordering.
        let core = core.split('+').next().unwrap_or(core);

        let mut release = [0u64; 3];
        let mut count = 0;
        for segment in core.split('.') {
            if count == release.len() {
                return Err(invalid("expected MAJOR.MINOR.PATCH"));
            }
            if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("must be dot-separated numeric segments"));
            }
            release[count] = segment
                .parse()
                .map_err(|_| invalid("numeric segment out of range"))?;
            count += 1;
        }
        if count != release.len() {
            return Err(invalid("expected MAJOR.MINOR.PATCH"));
        }

        Ok(Self { release, pre })
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.release;
        write!(f, "v{major}.{minor}.{patch}")?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compares dot-separated pre-release identifiers; numeric ones numerically.
fn compare_prerelease(lhs: &str, rhs: &str) -> Ordering {
    let mut left = lhs.split('.');
    let mut right = rhs.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let ord = match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => a.cmp(b),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Checks whether `candidate` may replace `deployed`.
///
/// Passes when nothing is deployed yet, when downgrades are allowed, or when
/// the deployed version is not newer than the candidate.
///
/// # Errors
///
/// Returns a [`DowngradeError`] when the deployed version is newer, or a
/// [`VersionError`] when either version cannot be parsed.
pub fn check_version(
    deployed: Option<&str>,
    candidate: &str,
    allow_downgrade: bool,
    component_name: &str,
    component_type: ComponentType,
) -> Result<()> {
    let Some(deployed) = deployed else {
        return Ok(());
    };
    if allow_downgrade {
        return Ok(());
    }

    if Version::parse(deployed)? > Version::parse(candidate)? {
        return Err(DowngradeError {
            component_name: component_name.to_string(),
            component_type,
            deployed_version: deployed.to_string(),
            candidate_version: candidate.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Looks up deployed template versions and gates deploys on them.
#[derive(Debug)]
pub struct VersionGatekeeper<'a, A: ?Sized> {
    api: &'a A,
}

impl<'a, A: StackApi + ?Sized> VersionGatekeeper<'a, A> {
    /// Creates a gatekeeper over the given stack API.
    #[must_use]
    pub const fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Version recorded on the stack, or `None` for a stack that does not
    /// exist or predates version metadata.
    ///
    /// # Errors
    ///
    /// Returns transport errors from the lookup, wrapped with the stack name.
    pub async fn deployed_version(&self, stack: &str) -> Result<Option<String>> {
        match self.api.template_version(stack).await {
            Ok(version) if version.is_empty() => Ok(None),
            Ok(version) => Ok(Some(version)),
            Err(e) if e.is_stack_not_found() => Ok(None),
            Err(e) => Err(e.context(format!("get template version of stack {stack}"))),
        }
    }

    /// Fails if deploying `candidate` would downgrade the target's stack.
    ///
    /// # Errors
    ///
    /// Returns a downgrade error, a version parse error, or a lookup error.
    pub async fn check(
        &self,
        target: &DeploymentTarget,
        stack: &str,
        candidate: &str,
        allow_downgrade: bool,
    ) -> Result<()> {
        let deployed = self.deployed_version(stack).await?;
        debug!(
            "Version gate for {target}: deployed={deployed:?} candidate={candidate} allow_downgrade={allow_downgrade}"
        );
        check_version(
            deployed.as_deref(),
            candidate,
            allow_downgrade,
            &target.name,
            target.kind,
        )
    }
}
