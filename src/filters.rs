//! Data-driven keyword tables consulted by the forwarding rules.
//!
//! Special-cased keyword sets live here as plain data, never as `match`
//! arms sprinkled through [`crate::rules`].

/// Keywords suppressed when the elevation filter is enabled.
pub const ELEVATION_KEYWORDS: &[&str] = &["Qi198", "ElevationInjection"];

/// Keywords suppressed when the traffic/TCAS filter is enabled.
pub const TRAFFIC_KEYWORDS: &[&str] = &["TcasTraffic", "TrafficPosition", "TrafficInfo"];

/// Flight-control axis keywords suppressed when the flight-control lock is
/// enabled (default on per spec §6 `filter_flight_controls`).
pub const FLIGHT_CONTROL_KEYWORDS: &[&str] = &["Rudder", "Aileron", "Elevator"];

/// Keywords excluded from a client whose `nolong` flag is set, absent an
/// operator-provided override (spec §9 open question — fixed-set default,
/// overridable).
pub const DEFAULT_NOLONG_KEYWORDS: &[&str] = &["Qs121"];

/// Keywords whose upstream-side update only feeds the cache and is never
/// forwarded as an individual message; they're replayed solely during a
/// client's welcome (spec §4.2 rule 3, first bullet).
pub const WELCOME_ONLY_KEYWORDS: &[&str] = &["id", "version", "layout", "metar"];

/// Runtime-toggleable filter flags (spec §4.2, §4.7, §6 `/api/filter/...`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterFlags {
    /// Suppress elevation-injection keywords.
    pub elevation: bool,
    /// Suppress traffic/TCAS keywords.
    pub traffic: bool,
    /// Suppress flight-control axis keywords. Defaults to on (spec §6).
    pub flight_controls: bool,
}

impl FilterFlags {
    /// Construct flags with the config defaults (`flight_controls` on).
    pub fn with_defaults(elevation: bool, traffic: bool, flight_controls: bool) -> FilterFlags {
        FilterFlags {
            elevation,
            traffic,
            flight_controls,
        }
    }

    /// Whether `keyword` is currently suppressed by any active filter.
    pub fn filters_out(&self, keyword: &str) -> bool {
        (self.elevation && ELEVATION_KEYWORDS.contains(&keyword))
            || (self.traffic && TRAFFIC_KEYWORDS.contains(&keyword))
            || (self.flight_controls && FLIGHT_CONTROL_KEYWORDS.contains(&keyword))
    }
}

/// A per-client override of the `nolong`-excluded keyword set. `None` means
/// "use the fixed default".
#[derive(Debug, Clone, Default)]
pub struct NolongOverride(pub Option<Vec<String>>);

impl NolongOverride {
    /// Whether `keyword` is excluded for a client with `nolong` set, given
    /// this client's override (or the fixed default if none).
    pub fn excludes(&self, keyword: &str) -> bool {
        match &self.0 {
            Some(set) => set.iter().any(|k| k == keyword),
            None => DEFAULT_NOLONG_KEYWORDS.contains(&keyword),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_toggle_gates_its_keywords_only() {
        let mut flags = FilterFlags::default();
        flags.elevation = true;
        assert!(flags.filters_out("Qi198"));
        assert!(!flags.filters_out("TcasTraffic"));
    }

    #[test]
    fn toggling_twice_returns_to_initial_state() {
        let mut flags = FilterFlags::default();
        let initial = flags.elevation;
        flags.elevation = !flags.elevation;
        flags.elevation = !flags.elevation;
        assert_eq!(flags.elevation, initial);
    }

    #[test]
    fn nolong_default_excludes_fixed_set() {
        let ov = NolongOverride::default();
        assert!(ov.excludes("Qs121"));
        assert!(!ov.excludes("Qi1"));
    }
}
