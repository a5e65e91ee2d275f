//! Access control: IP/CIDR + password matching to an access level
//! (spec §4.6).

use std::net::IpAddr;

use anyhow::{bail, Context, Result};
use ipnetwork::IpNetwork;

/// The access level assigned to a newly-accepted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    /// Connection is rejected before any welcome is sent.
    Blocked,
    /// Full welcome; client writes other than `demand=`/FRDP are dropped.
    Observer,
    /// Full read/write access.
    Full,
}

impl AccessLevel {
    fn parse(s: &str) -> Result<AccessLevel> {
        match s {
            "blocked" => Ok(AccessLevel::Blocked),
            "observer" => Ok(AccessLevel::Observer),
            "full" => Ok(AccessLevel::Full),
            other => bail!("unknown access level '{other}'"),
        }
    }
}

/// One ordered access-control rule (spec §4.6, `[[access]]` config section).
#[derive(Debug, Clone)]
pub struct AccessRule {
    /// Human-readable label shown in the operator status display.
    pub display_name: String,
    /// `"ANY"` or a list of parsed CIDRs this rule matches against.
    match_ipv4: MatchIpv4,
    /// If set, the connecting session must have sent this password via FRDP
    /// `AUTH` before its welcome begins.
    pub match_password: Option<String>,
    /// The level assigned on a match.
    pub level: AccessLevel,
}

#[derive(Debug, Clone)]
enum MatchIpv4 {
    Any,
    Networks(Vec<IpNetwork>),
}

impl AccessRule {
    /// Build a rule from raw config values, failing fast on a bad CIDR or
    /// level string (spec §7: configuration errors fail at startup).
    pub fn new(
        display_name: impl Into<String>,
        match_ipv4: &[String],
        match_password: Option<String>,
        level: &str,
    ) -> Result<AccessRule> {
        let match_ipv4 = if match_ipv4.iter().any(|s| s == "ANY") {
            MatchIpv4::Any
        } else {
            let mut nets = Vec::with_capacity(match_ipv4.len());
            for cidr in match_ipv4 {
                let net: IpNetwork = cidr
                    .parse()
                    .with_context(|| format!("invalid CIDR '{cidr}'"))?;
                nets.push(net);
            }
            MatchIpv4::Networks(nets)
        };
        Ok(AccessRule {
            display_name: display_name.into(),
            match_ipv4,
            match_password,
            level: AccessLevel::parse(level)?,
        })
    }

    fn ip_matches(&self, ip: IpAddr) -> bool {
        match &self.match_ipv4 {
            MatchIpv4::Any => true,
            MatchIpv4::Networks(nets) => nets.iter().any(|n| n.contains(ip)),
        }
    }
}

/// Ordered list of access rules; first match wins; no match → blocked
/// (spec §4.6).
///
/// `blocklist` is a separate, always-checked-first deny list maintained at
/// runtime via `POST /api/blocklist/add|remove` (spec §6); it sits in front
/// of the config-file rules rather than being spliced into them, so an
/// operator-added block always wins regardless of rule order.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    rules: Vec<AccessRule>,
    blocklist: Vec<(String, IpNetwork)>,
}

impl AccessControl {
    /// Build from an ordered rule list.
    pub fn new(rules: Vec<AccessRule>) -> AccessControl {
        AccessControl {
            rules,
            blocklist: Vec::new(),
        }
    }

    /// Evaluate the rule list for a connecting session.
    ///
    /// `password` is `Some` only if the session sent a FRDP `AUTH` line
    /// before its welcome began (spec §4.6: password match requires this).
    pub fn classify(&self, ip: IpAddr, password: Option<&str>) -> AccessLevel {
        if self.blocklist.iter().any(|(_, net)| net.contains(ip)) {
            return AccessLevel::Blocked;
        }
        for rule in &self.rules {
            if !rule.ip_matches(ip) {
                continue;
            }
            match &rule.match_password {
                Some(expected) => {
                    if password == Some(expected.as_str()) {
                        return rule.level;
                    }
                    // IP matched but password required and absent/wrong:
                    // this rule doesn't match, keep scanning (a later,
                    // less specific rule might still grant access).
                }
                None => return rule.level,
            }
        }
        AccessLevel::Blocked
    }

    /// Add a CIDR to the runtime blocklist (`POST /api/blocklist/add`).
    pub fn add_block(&mut self, cidr: &str) -> Result<()> {
        let net: IpNetwork = cidr.parse().with_context(|| format!("invalid CIDR '{cidr}'"))?;
        if !self.blocklist.iter().any(|(existing, _)| existing == cidr) {
            self.blocklist.push((cidr.to_string(), net));
        }
        Ok(())
    }

    /// Remove a CIDR from the runtime blocklist (`POST /api/blocklist/remove`).
    pub fn remove_block(&mut self, cidr: &str) {
        self.blocklist.retain(|(existing, _)| existing != cidr);
    }

    /// Current runtime blocklist (`GET /api/blocklist`).
    pub fn blocklist(&self) -> impl Iterator<Item = &str> {
        self.blocklist.iter().map(|(cidr, _)| cidr.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn localhost_with_password_matches() {
        let rule = AccessRule::new(
            "local",
            &["127.0.0.1/32".to_string()],
            Some("s3cret".to_string()),
            "full",
        )
        .unwrap();
        let ac = AccessControl::new(vec![rule]);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        assert_eq!(ac.classify(ip, None), AccessLevel::Blocked);
        assert_eq!(ac.classify(ip, Some("s3cret")), AccessLevel::Full);
        assert_eq!(ac.classify(ip, Some("wrong")), AccessLevel::Blocked);
    }

    #[test]
    fn any_with_no_password_grants_observer() {
        let rule = AccessRule::new("anyone", &["ANY".to_string()], None, "observer").unwrap();
        let ac = AccessControl::new(vec![rule]);
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(ac.classify(ip, None), AccessLevel::Observer);
    }

    #[test]
    fn no_match_blocks() {
        let rule = AccessRule::new("local", &["10.0.0.0/8".to_string()], None, "full").unwrap();
        let ac = AccessControl::new(vec![rule]);
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(ac.classify(ip, None), AccessLevel::Blocked);
    }

    #[test]
    fn invalid_cidr_fails_to_build() {
        assert!(AccessRule::new("bad", &["not-a-cidr".to_string()], None, "full").is_err());
    }

    #[test]
    fn runtime_blocklist_wins_over_config_rules() {
        let rule = AccessRule::new("anyone", &["ANY".to_string()], None, "full").unwrap();
        let mut ac = AccessControl::new(vec![rule]);
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(ac.classify(ip, None), AccessLevel::Full);
        ac.add_block("8.8.8.0/24").unwrap();
        assert_eq!(ac.classify(ip, None), AccessLevel::Blocked);
        ac.remove_block("8.8.8.0/24");
        assert_eq!(ac.classify(ip, None), AccessLevel::Full);
    }
}
