//! `[[check]]` evaluation (spec §6, SPEC_FULL §A.6).
//!
//! spec.md lists the `[[check]]` config section but §4's rules never say
//! what consumes it. Two kinds are wired up here: `is_frankenrouter`
//! tightens (or replaces) the fixed peer-detection heuristic of
//! [`crate::frdp::first_line_declares_peer`] with an operator-configurable
//! pattern, and `name_regexp` extracts a version token from a declared
//! name and flags it against `limit_min`/`limit_max`. Neither kind ever
//! blocks a connection on its own — spec §4.5 treats a version mismatch as
//! "log loudly, continue", and the same philosophy applies here.

use std::cmp::Ordering;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::CheckConfigEntry;

/// One compiled `[[check]]` entry.
#[derive(Debug, Clone)]
pub struct Check {
    /// The parsed rule.
    pub kind: CheckKind,
    /// Free-text note carried through from config, for diagnostics.
    pub comment: Option<String>,
}

/// The two check kinds spec §6 names.
#[derive(Debug, Clone)]
pub enum CheckKind {
    /// Matches when the subject looks like a frankenrouter peer.
    IsFrankenrouter,
    /// Extracts a version token via `regexp`'s first capture group (or the
    /// whole match if it has none) and compares it against an optional
    /// dotted-numeric range.
    NameRegexp {
        /// Compiled pattern.
        regex: Regex,
        /// Inclusive lower bound on the extracted version, if any.
        limit_min: Option<Version>,
        /// Inclusive upper bound on the extracted version, if any.
        limit_max: Option<Version>,
    },
}

/// A dotted-numeric version, e.g. `10.184` or `1.2.3`, compared
/// component-wise (missing trailing components read as zero).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(Vec<u64>);

impl Version {
    /// Parse a dotted-numeric version string.
    pub fn parse(s: &str) -> Result<Version> {
        let parts: Result<Vec<u64>, _> = s.trim().split('.').map(|p| p.parse::<u64>()).collect();
        Ok(Version(parts.with_context(|| format!("invalid version string '{s}'"))?))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Version) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Version) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

/// The outcome of running [`CheckList::evaluate`] against one subject
/// string (a `name=` value or an IDENT router field).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// True if at least one `is_frankenrouter` check matched.
    pub matched_frankenrouter: bool,
    /// Human-readable messages for every `name_regexp` check whose
    /// extracted version fell outside its configured range. Never used to
    /// reject the connection — only to log loudly (spec §4.5).
    pub version_violations: Vec<String>,
}

/// An ordered list of compiled `[[check]]` entries.
#[derive(Debug, Clone, Default)]
pub struct CheckList {
    checks: Vec<Check>,
}

impl CheckList {
    /// Compile every entry, failing fast on a bad regex or unparseable
    /// version bound (spec §7: configuration errors fail at startup).
    pub fn load(entries: &[CheckConfigEntry]) -> Result<CheckList> {
        let mut checks = Vec::with_capacity(entries.len());
        for entry in entries {
            let kind = match entry.kind.as_str() {
                "is_frankenrouter" => CheckKind::IsFrankenrouter,
                "name_regexp" => {
                    let pattern = entry
                        .regexp
                        .as_deref()
                        .context("name_regexp check requires a 'regexp' value")?;
                    let regex = Regex::new(pattern)
                        .with_context(|| format!("invalid regexp '{pattern}'"))?;
                    let limit_min = entry.limit_min.as_deref().map(Version::parse).transpose()?;
                    let limit_max = entry.limit_max.as_deref().map(Version::parse).transpose()?;
                    CheckKind::NameRegexp {
                        regex,
                        limit_min,
                        limit_max,
                    }
                }
                other => anyhow::bail!("unknown check type '{other}'"),
            };
            checks.push(Check {
                kind,
                comment: entry.comment.clone(),
            });
        }
        Ok(CheckList { checks })
    }

    /// Whether any checks are configured at all.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check against one subject string (spec's "first line" or
    /// IDENT router field).
    pub fn evaluate(&self, subject: &str) -> CheckReport {
        let mut report = CheckReport::default();
        for check in &self.checks {
            match &check.kind {
                CheckKind::IsFrankenrouter => {
                    if subject.to_ascii_lowercase().contains("frankenrouter") {
                        report.matched_frankenrouter = true;
                    }
                }
                CheckKind::NameRegexp {
                    regex,
                    limit_min,
                    limit_max,
                } => {
                    let Some(captured) = regex.captures(subject) else {
                        continue;
                    };
                    let token = captured
                        .get(1)
                        .or_else(|| captured.get(0))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    let Ok(version) = Version::parse(token) else {
                        continue;
                    };
                    if let Some(min) = limit_min {
                        if &version < min {
                            report.version_violations.push(format!(
                                "{} below minimum {:?} ({})",
                                token,
                                min.0,
                                check.comment.as_deref().unwrap_or("name_regexp check")
                            ));
                        }
                    }
                    if let Some(max) = limit_max {
                        if &version > max {
                            report.version_violations.push(format!(
                                "{} above maximum {:?} ({})",
                                token,
                                max.0,
                                check.comment.as_deref().unwrap_or("name_regexp check")
                            ));
                        }
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str, regexp: Option<&str>, min: Option<&str>, max: Option<&str>) -> CheckConfigEntry {
        CheckConfigEntry {
            kind: kind.to_string(),
            regexp: regexp.map(String::from),
            limit_min: min.map(String::from),
            limit_max: max.map(String::from),
            comment: None,
        }
    }

    #[test]
    fn version_compares_component_wise() {
        assert!(Version::parse("10.184").unwrap() > Version::parse("10.9").unwrap());
        assert!(Version::parse("1.2").unwrap() < Version::parse("1.2.1").unwrap());
        assert_eq!(Version::parse("1.0").unwrap(), Version::parse("1.0").unwrap());
    }

    #[test]
    fn is_frankenrouter_matches_case_insensitively() {
        let checks = CheckList::load(&[entry("is_frankenrouter", None, None, None)]).unwrap();
        let report = checks.evaluate("1:FRANKEN.PY frankenrouter");
        assert!(report.matched_frankenrouter);
        assert!(checks.evaluate("1:EFB").matched_frankenrouter == false);
    }

    #[test]
    fn name_regexp_flags_out_of_range_version() {
        let checks = CheckList::load(&[entry(
            "name_regexp",
            Some(r"frankenrouter/(\d+\.\d+)"),
            Some("2.0"),
            Some("3.0"),
        )])
        .unwrap();
        let low = checks.evaluate("1:frankenrouter/1.5");
        assert_eq!(low.version_violations.len(), 1);

        let ok = checks.evaluate("1:frankenrouter/2.5");
        assert!(ok.version_violations.is_empty());

        let high = checks.evaluate("1:frankenrouter/9.9");
        assert_eq!(high.version_violations.len(), 1);
    }

    #[test]
    fn unknown_check_type_fails_to_load() {
        assert!(CheckList::load(&[entry("bogus", None, None, None)]).is_err());
    }

    #[test]
    fn name_regexp_without_pattern_fails_to_load() {
        assert!(CheckList::load(&[entry("name_regexp", None, None, None)]).is_err());
    }
}
