//! Fault scenarios for the fleet tracker.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Healthy feed, shuffled records, GPS noise
    SteadyFleet,

    /// SIM-002: A share of every batch is malformed
    MalformedStorm,

    /// SIM-003: Feed down for longer than the grace period, then back
    FeedOutage,

    /// SIM-004: Feed keeps republishing one snapshot
    StaleFeed,

    /// SIM-005: Updates arrive faster than a tween completes
    RapidUpdates,

    /// SIM-006: Buses leave service mid-run
    Dropout,

    /// SIM-007: Buses switch routes mid-run
    RouteChange,

    /// SIM-008: Full async runtime under the virtual clock
    LiveLoop,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyFleet,
            ScenarioId::MalformedStorm,
            ScenarioId::FeedOutage,
            ScenarioId::StaleFeed,
            ScenarioId::RapidUpdates,
            ScenarioId::Dropout,
            ScenarioId::RouteChange,
            ScenarioId::LiveLoop,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFleet => "steady_fleet",
            ScenarioId::MalformedStorm => "malformed_storm",
            ScenarioId::FeedOutage => "feed_outage",
            ScenarioId::StaleFeed => "stale_feed",
            ScenarioId::RapidUpdates => "rapid_updates",
            ScenarioId::Dropout => "dropout",
            ScenarioId::RouteChange => "route_change",
            ScenarioId::LiveLoop => "live_loop",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFleet => "Shuffled healthy feed with 3m GPS noise, every bus tracked",
            ScenarioId::MalformedStorm => "30% of records corrupted, only valid records reach the registry",
            ScenarioId::FeedOutage => "Fetch errors past the grace period, fleet evicted then rebuilt",
            ScenarioId::StaleFeed => "Frozen snapshot is skipped and ages out like an outage",
            ScenarioId::RapidUpdates => "Fixes every 500ms against 1.5s tweens, motion stays continuous",
            ScenarioId::Dropout => "A third of the fleet retires, evicted one grace period later",
            ScenarioId::RouteChange => "Route switches are applied in place without re-creation",
            ScenarioId::LiveLoop => "FleetTracker::run_for interleaving feed and frame cadences",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_fleet" | "steadyfleet" | "sim-001" => Ok(ScenarioId::SteadyFleet),
            "malformed_storm" | "malformedstorm" | "sim-002" => Ok(ScenarioId::MalformedStorm),
            "feed_outage" | "feedoutage" | "sim-003" => Ok(ScenarioId::FeedOutage),
            "stale_feed" | "stalefeed" | "sim-004" => Ok(ScenarioId::StaleFeed),
            "rapid_updates" | "rapidupdates" | "sim-005" => Ok(ScenarioId::RapidUpdates),
            "dropout" | "sim-006" => Ok(ScenarioId::Dropout),
            "route_change" | "routechange" | "sim-007" => Ok(ScenarioId::RouteChange),
            "live_loop" | "liveloop" | "sim-008" => Ok(ScenarioId::LiveLoop),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert_eq!(id.to_string(), id.name());
        }
        assert_eq!("SIM-003".parse::<ScenarioId>(), Ok(ScenarioId::FeedOutage));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
