use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::config::{EvpConfig, TimingConfig};
use crate::state::{GroupCounts, GroupId, Phase, SignalTimings, Topology};

/// Floor for the minimum clearing time granted to a preempted green,
/// regardless of how short the queue is.
const MIN_CLEARING_FLOOR_SECS: u32 = 20;

/// An active emergency vehicle preemption request. Created by the API
/// `start` operation, removed by `clear`; it never expires on its own.
/// An arrival time in the past reads as "arriving now" until the
/// external clear lands.
#[derive(Debug, Clone)]
pub struct EvpRequest {
    pub id: Uuid,
    pub lane: String,
    pub started_at: DateTime<Utc>,
    pub eta_seconds: u32,
    pub expected_arrival: DateTime<Utc>,
}

impl EvpRequest {
    pub fn new(lane: String, eta_seconds: u32, now: DateTime<Utc>) -> EvpRequest {
        EvpRequest {
            id: Uuid::new_v4(),
            lane,
            started_at: now,
            eta_seconds,
            expected_arrival: now + Duration::seconds(eta_seconds as i64),
        }
    }

    /// Seconds until the expected arrival, floored at zero.
    pub fn eta_remaining_secs(&self, now: DateTime<Utc>) -> f64 {
        let remaining = (self.expected_arrival - now).num_milliseconds() as f64 / 1000.0;
        remaining.max(0.0)
    }
}

/// Everything the planner sees on one control tick.
pub struct PlanContext<'a> {
    pub base: SignalTimings,
    pub evp: Option<&'a EvpRequest>,
    pub phase: Phase,
    /// Seconds the current phase still has on its normal countdown.
    pub phase_remaining_secs: f64,
    pub counts: GroupCounts,
    pub topology: &'a Topology,
    pub timing: &'a TimingConfig,
    pub evp_config: &'a EvpConfig,
    pub now: DateTime<Utc>,
}

/// Planner output, applied by the phase state machine on the same tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDecision {
    pub timings: SignalTimings,
    /// The running phase must give way: end a wrong-group green at the
    /// next poll and head for the preempted group via its safety tail.
    pub must_transition_now: bool,
    /// Green phase to enter after the next completed all-red, when it
    /// differs from the natural successor.
    pub skip_to: Option<Phase>,
    /// Keep the active green open (hold sentinel) instead of expiring.
    pub hold_green: bool,
}

impl PlanDecision {
    fn passthrough(base: SignalTimings) -> PlanDecision {
        PlanDecision {
            timings: base,
            must_transition_now: false,
            skip_to: None,
            hold_green: false,
        }
    }
}

/// Decide, for one tick, how preemption reshapes the cycle. Pure and
/// idempotent: the state machine re-invokes it at every phase boundary
/// and every short poll inside a green, so ETA drift and late or early
/// clears are honored within one polling interval.
pub fn plan(ctx: &PlanContext) -> PlanDecision {
    let Some(request) = ctx.evp else {
        return PlanDecision::passthrough(ctx.base);
    };

    let Some(evp_group) = ctx.topology.group_of(&request.lane) else {
        // Corrupt request state: fail safe to normal cycling.
        warn!(lane = %request.lane, "EVP request references unknown lane, ignoring");
        return PlanDecision::passthrough(ctx.base);
    };

    let eta_remaining = request.eta_remaining_secs(ctx.now);
    let threshold = ctx.evp_config.mandatory_green_threshold_secs as f64;
    let extended = extended_green_secs(ctx, evp_group, eta_remaining);

    let mut timings = ctx.base;
    timings.set(evp_group, extended);

    match ctx.phase.green_group() {
        // The preempted group already holds the green: extend it, pin
        // the opposing group to minimum for its next turn, and hold the
        // phase open once the vehicle is inside the mandatory window.
        Some(group) if group == evp_group => {
            timings.set(evp_group.opposite(), ctx.timing.min_green_secs);
            PlanDecision {
                timings,
                must_transition_now: false,
                skip_to: None,
                hold_green: eta_remaining <= threshold,
            }
        }
        // The wrong group is green. If its natural remainder plus the
        // safety tail still fits before the mandatory window opens, let
        // it finish; otherwise it must give way now.
        Some(_) => {
            let safety_tail =
                (ctx.timing.yellow_secs + ctx.timing.all_red_secs) as f64;
            let slack_ok =
                ctx.phase_remaining_secs + safety_tail <= eta_remaining - threshold;
            PlanDecision {
                timings,
                must_transition_now: !slack_ok,
                skip_to: (!slack_ok).then(|| Phase::green_for(evp_group)),
                hold_green: false,
            }
        }
        // Yellow or all-red underway: the protected phase runs out in
        // full, then the machine heads straight for the preempted green.
        None => PlanDecision {
            timings,
            must_transition_now: true,
            skip_to: Some(Phase::green_for(evp_group)),
            hold_green: false,
        },
    }
}

/// Green duration granted to the preempted group: enough to cover the
/// arrival plus buffer, never less than the clearing time its queue
/// needs, never less than it would have gotten anyway. Deliberately not
/// clamped to MAX_GREEN.
fn extended_green_secs(ctx: &PlanContext, evp_group: GroupId, eta_remaining: f64) -> u32 {
    let arrival_cover = (eta_remaining + ctx.evp_config.green_buffer_secs as f64).ceil() as u32;
    let clearing = MIN_CLEARING_FLOOR_SECS.max(ctx.counts.get(evp_group).saturating_mul(2));
    arrival_cover.max(clearing).max(ctx.base.get(evp_group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_topology;

    struct Fixture {
        topology: Topology,
        timing: TimingConfig,
        evp_config: EvpConfig,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                topology: test_topology(),
                timing: TimingConfig {
                    min_green_secs: 10,
                    max_green_secs: 40,
                    yellow_secs: 4,
                    all_red_secs: 2,
                },
                evp_config: EvpConfig::default(),
                now: Utc::now(),
            }
        }

        fn request(&self, lane: &str, eta_secs: u32) -> EvpRequest {
            EvpRequest::new(lane.to_string(), eta_secs, self.now)
        }

        fn ctx<'a>(
            &'a self,
            evp: Option<&'a EvpRequest>,
            phase: Phase,
            remaining: f64,
            counts: GroupCounts,
        ) -> PlanContext<'a> {
            PlanContext {
                base: SignalTimings {
                    group_a: 20,
                    group_b: 15,
                },
                evp,
                phase,
                phase_remaining_secs: remaining,
                counts,
                topology: &self.topology,
                timing: &self.timing,
                evp_config: &self.evp_config,
                now: self.now,
            }
        }
    }

    fn counts(a: u32, b: u32) -> GroupCounts {
        GroupCounts {
            group_a: a,
            group_b: b,
        }
    }

    #[test]
    fn inactive_request_passes_base_timings_through() {
        let fx = Fixture::new();
        let decision = plan(&fx.ctx(None, Phase::GreenA, 12.0, counts(5, 3)));
        assert_eq!(decision.timings.group_a, 20);
        assert_eq!(decision.timings.group_b, 15);
        assert!(!decision.must_transition_now);
        assert!(!decision.hold_green);
        assert!(decision.skip_to.is_none());
    }

    #[test]
    fn unknown_lane_is_treated_as_inactive() {
        let fx = Fixture::new();
        let request = fx.request("Diagonal", 30);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 12.0, counts(5, 3)));
        assert_eq!(decision.timings.group_a, 20);
        assert!(!decision.must_transition_now);
    }

    #[test]
    fn own_group_green_outside_window_extends_without_hold() {
        let fx = Fixture::new();
        // North belongs to group A; eta 60s is well outside the 10s window
        let request = fx.request("North", 60);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 12.0, counts(5, 3)));

        // extension = max(60+5, max(20, 5*2), 20) = 65
        assert_eq!(decision.timings.group_a, 65);
        // opposing group pinned to minimum for its next turn
        assert_eq!(decision.timings.group_b, 10);
        assert!(!decision.hold_green);
        assert!(!decision.must_transition_now);
    }

    #[test]
    fn own_group_green_inside_window_holds() {
        let fx = Fixture::new();
        let request = fx.request("South", 10);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 3.0, counts(2, 8)));
        assert!(decision.hold_green);
        assert!(!decision.must_transition_now);
        // clearing floor dominates a short eta: max(10+5, 20, 20) = 20
        assert_eq!(decision.timings.group_a, 20);
    }

    #[test]
    fn wrong_group_green_with_enough_slack_finishes_naturally() {
        let fx = Fixture::new();
        // EVP for group B while A is green with 5s left; 5 + 6 <= 60 - 10
        let request = fx.request("East", 60);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 5.0, counts(5, 3)));
        assert!(!decision.must_transition_now);
        assert!(decision.skip_to.is_none());
        // upcoming green for B is extended: max(60+5, 20, 15) = 65
        assert_eq!(decision.timings.group_b, 65);
        // the active group's timing is untouched
        assert_eq!(decision.timings.group_a, 20);
    }

    #[test]
    fn wrong_group_green_without_slack_forces_transition() {
        // eta 8s while the other group is green with 20s remaining,
        // yellow+all-red = 6. 20+6 > 8-10, so the green must give way;
        // the skip target is the EVP green.
        let fx = Fixture::new();
        let request = fx.request("East", 8);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 20.0, counts(3, 1)));
        assert!(decision.must_transition_now);
        assert_eq!(decision.skip_to, Some(Phase::GreenB));
        // extended to at least eta + buffer
        assert!(decision.timings.group_b >= 8 + 5);
    }

    #[test]
    fn transitional_phase_skips_to_evp_green() {
        let fx = Fixture::new();
        let request = fx.request("North", 15);
        for phase in [Phase::YellowB, Phase::AllRedToA, Phase::AllRedToB] {
            let decision = plan(&fx.ctx(Some(&request), phase, 1.5, counts(4, 4)));
            assert!(decision.must_transition_now, "{phase:?}");
            assert_eq!(decision.skip_to, Some(Phase::GreenA), "{phase:?}");
        }
    }

    #[test]
    fn past_arrival_keeps_holding_until_cleared() {
        let fx = Fixture::new();
        let mut request = fx.request("North", 10);
        // Arrival already in the past; remaining clamps to zero, which
        // is inside the mandatory window, so the hold stands.
        request.expected_arrival = fx.now - Duration::seconds(30);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 2.0, counts(1, 1)));
        assert_eq!(request.eta_remaining_secs(fx.now), 0.0);
        assert!(decision.hold_green);
    }

    #[test]
    fn extension_may_exceed_max_green() {
        let fx = Fixture::new();
        let request = fx.request("North", 120);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 10.0, counts(2, 2)));
        assert_eq!(decision.timings.group_a, 125);
        assert!(decision.timings.group_a > fx.timing.max_green_secs);
    }

    #[test]
    fn clearing_time_saturates_on_enormous_queues() {
        let fx = Fixture::new();
        let request = fx.request("North", 12);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 10.0, counts(u32::MAX, 2)));
        assert_eq!(decision.timings.group_a, u32::MAX);
    }

    #[test]
    fn clearing_time_scales_with_queue_length() {
        let fx = Fixture::new();
        let request = fx.request("North", 12);
        let decision = plan(&fx.ctx(Some(&request), Phase::GreenA, 10.0, counts(30, 2)));
        // max(12+5, max(20, 60), 20) = 60
        assert_eq!(decision.timings.group_a, 60);
    }

    #[test]
    fn reactivation_after_clear_matches_first_activation() {
        let fx = Fixture::new();
        let first = fx.request("East", 45);
        let ctx_first = fx.ctx(Some(&first), Phase::GreenA, 5.0, counts(3, 3));
        let first_decision = plan(&ctx_first);

        // Cleared: planner sees nothing
        let cleared = plan(&fx.ctx(None, Phase::GreenA, 5.0, counts(3, 3)));
        assert!(!cleared.must_transition_now && cleared.skip_to.is_none());

        // Fresh activation with identical parameters decides identically
        let second = fx.request("East", 45);
        let second_decision =
            plan(&fx.ctx(Some(&second), Phase::GreenA, 5.0, counts(3, 3)));
        assert_eq!(first_decision, second_decision);
    }
}
