//! Kubernetes server versions.

use std::{cmp::Ordering, fmt, str::FromStr};

use k8s_openapi::apimachinery::pkg::version::Info;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid server version `{0}`")]
pub struct VersionError(String);

/// Semantic version of a Kubernetes API server.
///
/// Ordered by semver precedence: `major.minor.patch` numerically, then a
/// pre-release (`-gke.5`) sorts below the same version without one. Build
/// metadata (`+k3s1`) is kept for display and ignored when comparing.
#[derive(Debug, Clone)]
pub struct ServerVersion {
	pub major: u64,
	pub minor: u64,
	pub patch: u64,
	pre_release: String,
	build: String,
}

impl ServerVersion {
	pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
		Self {
			major,
			minor,
			patch,
			pre_release: String::new(),
			build: String::new(),
		}
	}

	/// Pre-release identifiers, empty for a release.
	pub fn pre_release(&self) -> &str {
		&self.pre_release
	}

	/// Extract the version from a `/version` response.
	///
	/// `gitVersion` is preferred. Servers that report a non-semver `gitVersion`
	/// fall back to `major`/`minor`, which may carry a trailing `+`.
	pub fn from_info(info: &Info) -> Result<Self, VersionError> {
		if let Ok(version) = info.git_version.parse() {
			return Ok(version);
		}

		let major = info
			.major
			.trim_end_matches('+')
			.parse()
			.map_err(|_| VersionError(info.major.clone()))?;
		let minor = info
			.minor
			.trim_end_matches('+')
			.parse()
			.map_err(|_| VersionError(info.minor.clone()))?;
		Ok(Self::new(major, minor, 0))
	}
}

/// Compare pre-release strings by semver rules: identifiers left to right,
/// numeric ones numerically and below alphanumeric ones, a shorter list first.
fn cmp_pre_release(a: &str, b: &str) -> Ordering {
	match (a.is_empty(), b.is_empty()) {
		(true, true) => return Ordering::Equal,
		(true, false) => return Ordering::Greater,
		(false, true) => return Ordering::Less,
		(false, false) => {}
	}

	let mut left = a.split('.');
	let mut right = b.split('.');
	loop {
		let (l, r) = match (left.next(), right.next()) {
			(None, None) => return Ordering::Equal,
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(l), Some(r)) => (l, r),
		};
		let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
			(Ok(l), Ok(r)) => l.cmp(&r),
			(Ok(_), Err(_)) => Ordering::Less,
			(Err(_), Ok(_)) => Ordering::Greater,
			(Err(_), Err(_)) => l.cmp(r),
		};
		if ord != Ordering::Equal {
			return ord;
		}
	}
}

impl FromStr for ServerVersion {
	type Err = VersionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let err = || VersionError(s.to_string());
		let trimmed = s.trim().trim_start_matches('v');

		let (rest, build) = trimmed.split_once('+').unwrap_or((trimmed, ""));
		let (core, pre_release) = rest.split_once('-').unwrap_or((rest, ""));

		let mut parts = core.split('.');
		let mut next = |required: bool| -> Result<u64, VersionError> {
			match parts.next() {
				Some(p) => p.parse().map_err(|_| err()),
				None if required => Err(err()),
				None => Ok(0),
			}
		};
		let major = next(true)?;
		let minor = next(true)?;
		let patch = next(false)?;
		if parts.next().is_some() {
			return Err(err());
		}

		Ok(Self {
			major,
			minor,
			patch,
			pre_release: pre_release.to_string(),
			build: build.to_string(),
		})
	}
}

impl PartialEq for ServerVersion {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for ServerVersion {}

impl PartialOrd for ServerVersion {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for ServerVersion {
	fn cmp(&self, other: &Self) -> Ordering {
		(self.major, self.minor, self.patch)
			.cmp(&(other.major, other.minor, other.patch))
			.then_with(|| cmp_pre_release(&self.pre_release, &other.pre_release))
	}
}

impl fmt::Display for ServerVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
		if !self.pre_release.is_empty() {
			write!(f, "-{}", self.pre_release)?;
		}
		if !self.build.is_empty() {
			write!(f, "+{}", self.build)?;
		}
		Ok(())
	}
}
