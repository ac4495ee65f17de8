use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::config::Config;
use crate::evp::EvpRequest;

/// Sentinel value for `remaining_secs`: the green phase is being held
/// open for an emergency vehicle and will not expire on the wall clock.
/// Distinct from 0.0, which means the phase timer has run out.
pub const EVP_HOLD: f64 = -1.0;

/// Wait a traditional fixed-cycle signal would impose, used as the
/// baseline for the efficiency metric in cycle records.
pub const TRADITIONAL_BASELINE_WAIT_SECS: f64 = 90.0;

/// One of the two mutually exclusive lane groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupId {
    A,
    B,
}

impl GroupId {
    pub fn opposite(self) -> GroupId {
        match self {
            GroupId::A => GroupId::B,
            GroupId::B => GroupId::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalColor {
    Green,
    Yellow,
    Red,
}

impl SignalColor {
    /// Single-letter code used on the actuator wire.
    pub fn code(self) -> &'static str {
        match self {
            SignalColor::Green => "G",
            SignalColor::Yellow => "Y",
            SignalColor::Red => "R",
        }
    }
}

/// One timed step of the fixed 6-step signal cycle. The two all-red
/// steps are distinct variants so the successor function is total and
/// the machine can tell which green it is heading toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GreenA,
    YellowA,
    AllRedToB,
    GreenB,
    YellowB,
    AllRedToA,
}

impl Phase {
    /// Natural successor in the 6-step cycle.
    pub fn next(self) -> Phase {
        match self {
            Phase::GreenA => Phase::YellowA,
            Phase::YellowA => Phase::AllRedToB,
            Phase::AllRedToB => Phase::GreenB,
            Phase::GreenB => Phase::YellowB,
            Phase::YellowB => Phase::AllRedToA,
            Phase::AllRedToA => Phase::GreenA,
        }
    }

    /// The group holding a green, if any.
    pub fn green_group(self) -> Option<GroupId> {
        match self {
            Phase::GreenA => Some(GroupId::A),
            Phase::GreenB => Some(GroupId::B),
            _ => None,
        }
    }

    /// The group a green or yellow phase belongs to.
    pub fn owning_group(self) -> Option<GroupId> {
        match self {
            Phase::GreenA | Phase::YellowA => Some(GroupId::A),
            Phase::GreenB | Phase::YellowB => Some(GroupId::B),
            Phase::AllRedToB | Phase::AllRedToA => None,
        }
    }

    /// Protected phases always run their full fixed duration.
    pub fn is_protected(self) -> bool {
        matches!(
            self,
            Phase::YellowA | Phase::YellowB | Phase::AllRedToB | Phase::AllRedToA
        )
    }

    pub fn is_green(self) -> bool {
        self.green_group().is_some()
    }

    /// The green phase for a group.
    pub fn green_for(group: GroupId) -> Phase {
        match group {
            GroupId::A => Phase::GreenA,
            GroupId::B => Phase::GreenB,
        }
    }

    /// Lamp assignment for both groups during this phase.
    pub fn lights(self) -> [(GroupId, SignalColor); 2] {
        match self {
            Phase::GreenA => [(GroupId::A, SignalColor::Green), (GroupId::B, SignalColor::Red)],
            Phase::YellowA => [(GroupId::A, SignalColor::Yellow), (GroupId::B, SignalColor::Red)],
            Phase::GreenB => [(GroupId::A, SignalColor::Red), (GroupId::B, SignalColor::Green)],
            Phase::YellowB => [(GroupId::A, SignalColor::Red), (GroupId::B, SignalColor::Yellow)],
            Phase::AllRedToB | Phase::AllRedToA => {
                [(GroupId::A, SignalColor::Red), (GroupId::B, SignalColor::Red)]
            }
        }
    }
}

/// Computed green durations, seconds, one per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTimings {
    pub group_a: u32,
    pub group_b: u32,
}

impl SignalTimings {
    pub fn get(&self, group: GroupId) -> u32 {
        match group {
            GroupId::A => self.group_a,
            GroupId::B => self.group_b,
        }
    }

    pub fn set(&mut self, group: GroupId, secs: u32) {
        match group {
            GroupId::A => self.group_a = secs,
            GroupId::B => self.group_b = secs,
        }
    }
}

/// Smoothed vehicle totals per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupCounts {
    pub group_a: u32,
    pub group_b: u32,
}

impl GroupCounts {
    pub fn get(&self, group: GroupId) -> u32 {
        match group {
            GroupId::A => self.group_a,
            GroupId::B => self.group_b,
        }
    }

    pub fn total(&self) -> u32 {
        self.group_a.saturating_add(self.group_b)
    }
}

/// Immutable lane topology resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct Topology {
    pub label_a: String,
    pub label_b: String,
    pub code_a: String,
    pub code_b: String,
    pub lanes_a: Vec<String>,
    pub lanes_b: Vec<String>,
}

impl Topology {
    pub fn from_config(config: &Config) -> Topology {
        Topology {
            label_a: config.group_a.label.clone(),
            label_b: config.group_b.label.clone(),
            code_a: config.group_a.code.clone(),
            code_b: config.group_b.code.clone(),
            lanes_a: config.group_a.lanes.clone(),
            lanes_b: config.group_b.lanes.clone(),
        }
    }

    pub fn label(&self, group: GroupId) -> &str {
        match group {
            GroupId::A => &self.label_a,
            GroupId::B => &self.label_b,
        }
    }

    pub fn code(&self, group: GroupId) -> &str {
        match group {
            GroupId::A => &self.code_a,
            GroupId::B => &self.code_b,
        }
    }

    pub fn lanes(&self, group: GroupId) -> &[String] {
        match group {
            GroupId::A => &self.lanes_a,
            GroupId::B => &self.lanes_b,
        }
    }

    pub fn all_lanes(&self) -> impl Iterator<Item = &String> {
        self.lanes_a.iter().chain(self.lanes_b.iter())
    }

    pub fn group_of(&self, lane: &str) -> Option<GroupId> {
        if self.lanes_a.iter().any(|l| l == lane) {
            Some(GroupId::A)
        } else if self.lanes_b.iter().any(|l| l == lane) {
            Some(GroupId::B)
        } else {
            None
        }
    }

    /// Display name of a phase, e.g. "NorthSouth_Green" or "All_Red".
    pub fn phase_name(&self, phase: Phase) -> String {
        match phase {
            Phase::GreenA => format!("{}_Green", self.label_a),
            Phase::YellowA => format!("{}_Yellow", self.label_a),
            Phase::GreenB => format!("{}_Green", self.label_b),
            Phase::YellowB => format!("{}_Yellow", self.label_b),
            Phase::AllRedToB | Phase::AllRedToA => "All_Red".to_string(),
        }
    }
}

/// Live timing of the phase currently running.
#[derive(Debug, Clone)]
pub struct PhaseRuntimeState {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub planned_secs: f64,
    /// Seconds left, or [`EVP_HOLD`] while held open for preemption.
    pub remaining_secs: f64,
}

/// The single source of truth shared between the control task, the
/// perception ingest, and the API readers. Always accessed through
/// [`SharedState`]; the lock is never held across I/O.
pub struct IntersectionState {
    pub topology: Topology,
    pub counts: HashMap<String, u32>,
    pub phase: PhaseRuntimeState,
    pub timings: SignalTimings,
    pub evp: Option<EvpRequest>,
    pub cycles_completed: u64,
}

pub type SharedState = Arc<RwLock<IntersectionState>>;

impl IntersectionState {
    pub fn new(topology: Topology, min_green_secs: u32) -> IntersectionState {
        let counts = topology
            .all_lanes()
            .map(|lane| (lane.clone(), 0))
            .collect();
        IntersectionState {
            topology,
            counts,
            phase: PhaseRuntimeState {
                phase: Phase::GreenA,
                started_at: Utc::now(),
                planned_secs: min_green_secs as f64,
                remaining_secs: min_green_secs as f64,
            },
            timings: SignalTimings {
                group_a: min_green_secs,
                group_b: min_green_secs,
            },
            evp: None,
            cycles_completed: 0,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Sum smoothed lane counts into per-group totals. Absent lanes
    /// count as zero; sums saturate rather than wrap.
    pub fn group_counts(&self) -> GroupCounts {
        let sum = |group: GroupId| {
            self.topology.lanes(group).iter().fold(0u32, |acc, lane| {
                acc.saturating_add(self.counts.get(lane).copied().unwrap_or(0))
            })
        };
        GroupCounts {
            group_a: sum(GroupId::A),
            group_b: sum(GroupId::B),
        }
    }

    /// Owned snapshot for external consumers; built entirely under the
    /// lock so readers never observe a torn multi-field state.
    pub fn snapshot(&self, now: DateTime<Utc>) -> StateSnapshot {
        let group_counts = self.group_counts();
        let phase = self.phase.phase;

        // Lanes in the active green/yellow group show the phase
        // countdown (or the hold sentinel); everything else shows 0.
        let mut remaining_times = HashMap::new();
        for lane in self.topology.all_lanes() {
            let lane_group = self.topology.group_of(lane);
            let remaining = match phase.owning_group() {
                Some(group) if lane_group == Some(group) => self.phase.remaining_secs,
                _ => 0.0,
            };
            remaining_times.insert(lane.clone(), remaining);
        }

        let avg_wait =
            (self.timings.group_a as f64 + self.timings.group_b as f64) / 2.0;
        let efficiency_improvement = ((TRADITIONAL_BASELINE_WAIT_SECS - avg_wait)
            / TRADITIONAL_BASELINE_WAIT_SECS)
            * 100.0;

        StateSnapshot {
            current_phase: self.topology.phase_name(phase),
            phase_remaining_secs: self.phase.remaining_secs,
            lane_counts: self.counts.clone(),
            group_counts: HashMap::from([
                (self.topology.label_a.clone(), group_counts.group_a),
                (self.topology.label_b.clone(), group_counts.group_b),
            ]),
            signal_timings: HashMap::from([
                (self.topology.label_a.clone(), self.timings.group_a),
                (self.topology.label_b.clone(), self.timings.group_b),
            ]),
            remaining_times,
            total_vehicles: group_counts.total(),
            evp: self.evp.as_ref().map(|req| EvpSnapshot {
                id: req.id.to_string(),
                lane: req.lane.clone(),
                eta_remaining_secs: req.eta_remaining_secs(now),
                expected_arrival: req.expected_arrival.to_rfc3339(),
            }),
            cycles_completed: self.cycles_completed,
            efficiency_improvement,
            timestamp: now.to_rfc3339(),
        }
    }
}

/// Point-in-time view of the intersection pushed to WebSocket clients
/// and returned from `/api/status`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StateSnapshot {
    /// Phase display name, e.g. "NorthSouth_Green" or "All_Red"
    pub current_phase: String,
    /// Seconds left in the current phase; -1 means held open for EVP
    pub phase_remaining_secs: f64,
    /// Smoothed vehicle count per lane
    pub lane_counts: HashMap<String, u32>,
    /// Vehicle totals per lane group, keyed by group label
    pub group_counts: HashMap<String, u32>,
    /// Computed green durations per group, keyed by group label
    pub signal_timings: HashMap<String, u32>,
    /// Remaining seconds per lane (-1 = EVP hold, 0 = red/expired)
    pub remaining_times: HashMap<String, f64>,
    /// Total vehicles currently counted across both groups
    pub total_vehicles: u32,
    /// Active emergency preemption request, if any
    pub evp: Option<EvpSnapshot>,
    /// Completed signal cycles since startup
    pub cycles_completed: u64,
    /// Percent improvement over the fixed-cycle baseline
    pub efficiency_improvement: f64,
    /// RFC3339 timestamp this snapshot was taken
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EvpSnapshot {
    pub id: String,
    pub lane: String,
    pub eta_remaining_secs: f64,
    pub expected_arrival: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_topology;

    #[test]
    fn phase_cycle_visits_all_six_steps_in_order() {
        let expected = [
            Phase::GreenA,
            Phase::YellowA,
            Phase::AllRedToB,
            Phase::GreenB,
            Phase::YellowB,
            Phase::AllRedToA,
        ];
        let mut phase = Phase::GreenA;
        for step in expected {
            assert_eq!(phase, step);
            phase = phase.next();
        }
        assert_eq!(phase, Phase::GreenA);
    }

    #[test]
    fn no_green_follows_the_other_green_without_yellow_and_all_red() {
        // Walk every phase: between any two greens there must be a
        // yellow and an all-red in the successor chain.
        for start in [
            Phase::GreenA,
            Phase::YellowA,
            Phase::AllRedToB,
            Phase::GreenB,
            Phase::YellowB,
            Phase::AllRedToA,
        ] {
            if let Some(group) = start.green_group() {
                let mut phase = start.next();
                let mut saw_yellow = false;
                let mut saw_all_red = false;
                while phase.green_group().is_none() {
                    match phase {
                        Phase::YellowA | Phase::YellowB => saw_yellow = true,
                        Phase::AllRedToB | Phase::AllRedToA => saw_all_red = true,
                        _ => {}
                    }
                    phase = phase.next();
                }
                assert_eq!(phase.green_group(), Some(group.opposite()));
                assert!(saw_yellow && saw_all_red);
            }
        }
    }

    #[test]
    fn lights_never_show_two_greens() {
        for phase in [
            Phase::GreenA,
            Phase::YellowA,
            Phase::AllRedToB,
            Phase::GreenB,
            Phase::YellowB,
            Phase::AllRedToA,
        ] {
            let greens = phase
                .lights()
                .iter()
                .filter(|(_, color)| *color == SignalColor::Green)
                .count();
            assert!(greens <= 1, "{phase:?} shows {greens} greens");
        }
    }

    #[test]
    fn group_counts_sum_lanes_and_default_missing_to_zero() {
        let mut state = IntersectionState::new(test_topology(), 10);
        state.counts.insert("North".to_string(), 4);
        state.counts.insert("South".to_string(), 2);
        state.counts.remove("East");
        state.counts.insert("West".to_string(), 1);

        let counts = state.group_counts();
        assert_eq!(counts.group_a, 6);
        assert_eq!(counts.group_b, 1);
        assert_eq!(counts.total(), 7);
    }

    #[test]
    fn group_counts_saturate_instead_of_overflowing() {
        let mut state = IntersectionState::new(test_topology(), 10);
        state.counts.insert("North".to_string(), u32::MAX);
        state.counts.insert("South".to_string(), u32::MAX);
        state.counts.insert("East".to_string(), 3);

        let counts = state.group_counts();
        assert_eq!(counts.group_a, u32::MAX);
        assert_eq!(counts.group_b, 3);
        assert_eq!(counts.total(), u32::MAX);
    }

    #[test]
    fn snapshot_reports_remaining_only_for_active_group() {
        let mut state = IntersectionState::new(test_topology(), 10);
        state.phase.phase = Phase::GreenB;
        state.phase.remaining_secs = 12.5;

        let snap = state.snapshot(Utc::now());
        assert_eq!(snap.remaining_times["East"], 12.5);
        assert_eq!(snap.remaining_times["West"], 12.5);
        assert_eq!(snap.remaining_times["North"], 0.0);
        assert_eq!(snap.remaining_times["South"], 0.0);
        assert_eq!(snap.current_phase, "EastWest_Green");
    }

    #[test]
    fn snapshot_carries_hold_sentinel() {
        let mut state = IntersectionState::new(test_topology(), 10);
        state.phase.phase = Phase::GreenA;
        state.phase.remaining_secs = EVP_HOLD;

        let snap = state.snapshot(Utc::now());
        assert_eq!(snap.phase_remaining_secs, EVP_HOLD);
        assert_eq!(snap.remaining_times["North"], EVP_HOLD);
    }
}
