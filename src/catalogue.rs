//! Variable catalogue: static keyword → network mode lookup (spec §3, §4.1).
//!
//! Loaded once at startup from a flat file (one `KEYWORD MODE` pair per
//! line, `#`-prefixed comments and blank lines ignored) and never mutated
//! again — readers see a plain `Arc<Catalogue>` snapshot.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

/// Network mode of a variable, as declared by the catalogue.
///
/// See spec §3 for the semantics of each mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkMode {
    /// Republished periodically even when unchanged.
    Continuous,
    /// Published only on change; cacheable and replayed on welcome.
    Econ,
    /// Published only on change; a pulse, never cached, never replayed.
    Delta,
    /// Composite edge+level: cached/forwarded like ECON, never replayed as pure-start.
    BigMom,
    /// Sent once in the welcome burst. `also_econ` tracks whether this
    /// keyword is *also* ECON (cacheable/replayable) or pure-START.
    Start {
        /// Whether this START keyword is also cacheable as ECON.
        also_econ: bool,
    },
    /// Published only while at least one client has asked for it.
    Demand,
}

impl NetworkMode {
    /// A keyword is "pure-DELTA" iff its mode is exactly `Delta`.
    pub fn is_pure_delta(self) -> bool {
        matches!(self, NetworkMode::Delta)
    }

    /// A keyword is "pure-START" iff its mode is `Start` with `also_econ: false`.
    pub fn is_pure_start(self) -> bool {
        matches!(self, NetworkMode::Start { also_econ: false })
    }

    /// Whether a value under this mode may sit in the cache at all.
    ///
    /// BIGMOM/MCPMOM are treated as DELTA for caching purposes even though
    /// they forward like ECON (spec §3).
    pub fn is_cacheable(self) -> bool {
        !matches!(self, NetworkMode::Delta | NetworkMode::BigMom)
    }

    /// Whether a cached value for this mode should be replayed in a welcome
    /// burst's general cache walk (step 8). BigMom/MCPMOM behave like ECON
    /// here even though they are edge+level composites.
    pub fn is_replayable(self) -> bool {
        match self {
            NetworkMode::Delta => false,
            NetworkMode::Start { also_econ } => also_econ,
            _ => true,
        }
    }

    fn parse(s: &str) -> Option<NetworkMode> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONTINUOUS" => Some(NetworkMode::Continuous),
            "ECON" => Some(NetworkMode::Econ),
            "DELTA" => Some(NetworkMode::Delta),
            "BIGMOM" | "MCPMOM" => Some(NetworkMode::BigMom),
            "START" => Some(NetworkMode::Start { also_econ: false }),
            "START+ECON" | "ECON+START" => Some(NetworkMode::Start { also_econ: true }),
            "DEMAND" => Some(NetworkMode::Demand),
            _ => None,
        }
    }
}

/// Read-only, load-once variable catalogue.
///
/// `order` preserves the file's declared order so welcome replay and `bang`
/// reproduce what the upstream would have produced (spec §4.1 ordering
/// invariant — some clients are order-sensitive).
#[derive(Debug, Default)]
pub struct Catalogue {
    modes: HashMap<String, NetworkMode>,
    order: Vec<String>,
}

impl Catalogue {
    /// Load a catalogue file. Unknown/unparseable mode tokens make the whole
    /// load fail at startup (spec §7: configuration errors fail fast).
    pub fn load(path: &Path) -> Result<Catalogue> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading variable catalogue {}", path.display()))?;
        let mut catalogue = Catalogue::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let keyword = parts
                .next()
                .with_context(|| format!("{}:{}: missing keyword", path.display(), lineno + 1))?;
            let mode_tok = parts
                .next()
                .with_context(|| format!("{}:{}: missing mode for {keyword}", path.display(), lineno + 1))?;
            let mode = NetworkMode::parse(mode_tok)
                .with_context(|| format!("{}:{}: unknown mode '{}'", path.display(), lineno + 1, mode_tok.trim()))?;
            catalogue.insert(keyword, mode);
        }
        Ok(catalogue)
    }

    fn insert(&mut self, keyword: &str, mode: NetworkMode) {
        if !self.modes.contains_key(keyword) {
            self.order.push(keyword.to_string());
        }
        self.modes.insert(keyword.to_string(), mode);
    }

    /// Look up a keyword's declared mode. Unknown keywords default to ECON
    /// for forwarding purposes (spec §4.1).
    pub fn mode_of(&self, keyword: &str) -> NetworkMode {
        self.modes
            .get(keyword)
            .copied()
            .unwrap_or(NetworkMode::Econ)
    }

    /// Whether the keyword appears in the loaded catalogue at all.
    pub fn is_known(&self, keyword: &str) -> bool {
        self.modes.contains_key(keyword)
    }

    /// Catalogue's declared order, used to drive welcome-burst and `bang`
    /// replay ordering.
    pub fn order(&self) -> &[String] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalogue(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_modes_and_preserves_order() {
        let f = write_catalogue(
            "Qi198 DELTA\n# a comment\nQs121 ECON\nversion START\nlayout START+ECON\n",
        );
        let cat = Catalogue::load(f.path()).unwrap();
        assert_eq!(cat.order(), &["Qi198", "Qs121", "version", "layout"]);
        assert!(cat.mode_of("Qi198").is_pure_delta());
        assert!(cat.mode_of("version").is_pure_start());
        assert!(!cat.mode_of("layout").is_pure_start());
        assert!(cat.mode_of("layout").is_replayable());
    }

    #[test]
    fn unknown_mode_fails_load() {
        let f = write_catalogue("Foo NOTAMODE\n");
        assert!(Catalogue::load(f.path()).is_err());
    }

    #[test]
    fn unknown_keyword_defaults_to_econ() {
        let f = write_catalogue("Known ECON\n");
        let cat = Catalogue::load(f.path()).unwrap();
        assert_eq!(cat.mode_of("Mystery"), NetworkMode::Econ);
        assert!(!cat.is_known("Mystery"));
    }
}
