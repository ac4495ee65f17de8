use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::actuator::ActuatorPort;
use crate::config::{EvpConfig, TimingConfig};
use crate::evp::{self, EvpRequest, PlanContext};
use crate::publisher::{CycleRecord, StatePublisher};
use crate::state::{
    GroupCounts, GroupId, Phase, SharedState, SignalTimings, Topology, EVP_HOLD,
};
use crate::timing;

/// How often phase waits re-check EVP state, elapsed time and shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How often a snapshot is pushed to live consumers during a wait.
const PUBLISH_INTERVAL: Duration = Duration::from_millis(500);

/// Why a phase wait ended.
enum PhaseEnd {
    /// The planned duration ran out.
    Expired,
    /// The planner demanded the green give way to preemption.
    Preempted,
    /// Process shutdown was requested.
    Shutdown,
}

/// The control loop: sequences the six-step phase cycle, applies the
/// timing calculator and preemption planner every tick, commands the
/// actuator, and keeps [`SharedState`] and the publisher current.
///
/// Yellow and all-red phases always run to completion; preemption can
/// only end a green early or change which green comes after an all-red.
pub struct Controller {
    shared: SharedState,
    topology: Topology,
    timing: TimingConfig,
    evp_config: EvpConfig,
    actuator: ActuatorPort,
    publisher: StatePublisher,
    shutdown: watch::Receiver<bool>,
}

impl Controller {
    pub fn new(
        shared: SharedState,
        topology: Topology,
        timing: TimingConfig,
        evp_config: EvpConfig,
        actuator: ActuatorPort,
        publisher: StatePublisher,
        shutdown: watch::Receiver<bool>,
    ) -> Controller {
        Controller {
            shared,
            topology,
            timing,
            evp_config,
            actuator,
            publisher,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            min_green = self.timing.min_green_secs,
            max_green = self.timing.max_green_secs,
            yellow = self.timing.yellow_secs,
            all_red = self.timing.all_red_secs,
            "Phase scheduler started"
        );

        let mut phase = Phase::GreenA;
        // Greens completed since the last cycle record was written.
        let mut greens_completed: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let end = match phase.green_group() {
                Some(group) => self.run_green(phase, group).await,
                None => self.run_protected(phase).await,
            };

            match end {
                PhaseEnd::Shutdown => break,
                PhaseEnd::Expired | PhaseEnd::Preempted => {
                    if phase.is_green() {
                        greens_completed += 1;
                    }
                }
            }

            let next = self.next_phase(phase).await;
            if next == Phase::GreenA && greens_completed > 0 {
                self.record_cycle().await;
                greens_completed = 0;
            }
            phase = next;
        }

        info!("Phase scheduler stopping, commanding all-red");
        self.actuator.shutdown(&self.topology).await;
    }

    /// Take one consistent reading of everything the planner needs.
    async fn observe(&self) -> (GroupCounts, Option<EvpRequest>) {
        let state = self.shared.read().await;
        (state.group_counts(), state.evp.clone())
    }

    /// Compute base timings and the planner decision for one tick.
    fn decide(
        &self,
        counts: GroupCounts,
        evp: Option<&EvpRequest>,
        phase: Phase,
        remaining: f64,
    ) -> evp::PlanDecision {
        evp::plan(&PlanContext {
            base: timing::compute(&counts, &self.timing),
            evp,
            phase,
            phase_remaining_secs: remaining.max(0.0),
            counts,
            topology: &self.topology,
            timing: &self.timing,
            evp_config: &self.evp_config,
            now: Utc::now(),
        })
    }

    /// Write the entry state for a phase and command the lamps.
    async fn enter_phase(&mut self, phase: Phase, planned: f64, timings: SignalTimings) {
        let snapshot = {
            let mut state = self.shared.write().await;
            state.phase.phase = phase;
            state.phase.started_at = Utc::now();
            state.phase.planned_secs = planned;
            state.phase.remaining_secs = planned;
            state.timings = timings;
            state.snapshot(Utc::now())
        };
        debug!(phase = %self.topology.phase_name(phase), planned, "Entering phase");
        self.actuator.apply_phase(&self.topology, phase).await;
        self.publisher.push(snapshot);
    }

    /// Update the live countdown and push a snapshot if one is due.
    /// `planned` is rewritten too so extensions stay visible.
    async fn tick_runtime(
        &self,
        planned: f64,
        remaining: f64,
        timings: SignalTimings,
        last_push: &mut Instant,
    ) {
        let snapshot = {
            let mut state = self.shared.write().await;
            state.phase.planned_secs = planned;
            state.phase.remaining_secs = remaining;
            state.timings = timings;
            if last_push.elapsed() >= PUBLISH_INTERVAL {
                Some(state.snapshot(Utc::now()))
            } else {
                None
            }
        };
        if let Some(snapshot) = snapshot {
            self.publisher.push(snapshot);
            *last_push = Instant::now();
        }
    }

    /// Run a green phase as a bounded polling wait. The planner is
    /// re-evaluated every poll so holds, releases, extensions and forced
    /// transitions land within one interval.
    async fn run_green(&mut self, phase: Phase, group: GroupId) -> PhaseEnd {
        let (counts, evp) = self.observe().await;
        let decision = self.decide(counts, evp.as_ref(), phase, f64::MAX);
        let mut planned = decision.timings.get(group) as f64;
        self.enter_phase(phase, planned, decision.timings).await;

        let started = Instant::now();
        let mut last_push = Instant::now();

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            if *self.shutdown.borrow() {
                return PhaseEnd::Shutdown;
            }

            let elapsed = started.elapsed().as_secs_f64();
            let (counts, evp) = self.observe().await;
            let decision = self.decide(counts, evp.as_ref(), phase, planned - elapsed);

            let evp_owns_green = evp
                .as_ref()
                .and_then(|req| self.topology.group_of(&req.lane))
                == Some(group);

            if evp_owns_green {
                // Preemption may only ever lengthen the active green.
                planned = planned.max(decision.timings.get(group) as f64);
            }

            if decision.hold_green && evp_owns_green {
                self.tick_runtime(planned, EVP_HOLD, decision.timings, &mut last_push)
                    .await;
                continue;
            }

            if decision.must_transition_now && !evp_owns_green {
                debug!(
                    phase = %self.topology.phase_name(phase),
                    elapsed,
                    "Green preempted, giving way via safety tail"
                );
                return PhaseEnd::Preempted;
            }

            let remaining = planned - elapsed;
            if remaining <= 0.0 {
                return PhaseEnd::Expired;
            }
            self.tick_runtime(planned, remaining, decision.timings, &mut last_push)
                .await;
        }
    }

    /// Run a yellow or all-red phase for its full fixed duration. EVP
    /// state never shortens these; only shutdown interrupts.
    async fn run_protected(&mut self, phase: Phase) -> PhaseEnd {
        let planned = match phase {
            Phase::YellowA | Phase::YellowB => self.timing.yellow_secs as f64,
            _ => self.timing.all_red_secs as f64,
        };

        let timings = {
            let state = self.shared.read().await;
            state.timings
        };
        self.enter_phase(phase, planned, timings).await;

        let started = Instant::now();
        let mut last_push = Instant::now();

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            if *self.shutdown.borrow() {
                return PhaseEnd::Shutdown;
            }
            let remaining = planned - started.elapsed().as_secs_f64();
            if remaining <= 0.0 {
                return PhaseEnd::Expired;
            }
            self.tick_runtime(planned, remaining, timings, &mut last_push)
                .await;
        }
    }

    /// Choose the successor phase. After a completed all-red the planner
    /// may redirect to the preempted group's green instead of the
    /// natural one; everywhere else the six-step order is fixed.
    async fn next_phase(&self, phase: Phase) -> Phase {
        let natural = phase.next();
        if !matches!(phase, Phase::AllRedToA | Phase::AllRedToB) {
            return natural;
        }

        let (counts, evp) = self.observe().await;
        let decision = self.decide(counts, evp.as_ref(), phase, 0.0);
        match decision.skip_to {
            Some(skip) if skip != natural => {
                debug!(
                    from = %self.topology.phase_name(phase),
                    to = %self.topology.phase_name(skip),
                    "Preemption redirects the next green"
                );
                skip
            }
            _ => natural,
        }
    }

    /// Append a cycle record and bump the counter.
    async fn record_cycle(&self) {
        let record = {
            let mut state = self.shared.write().await;
            state.cycles_completed += 1;
            let counts = state.group_counts();
            let avg_wait =
                (state.timings.group_a as f64 + state.timings.group_b as f64) / 2.0;
            let baseline = crate::state::TRADITIONAL_BASELINE_WAIT_SECS;
            CycleRecord {
                completed_at: Utc::now().to_rfc3339(),
                lane_counts: state.counts.clone(),
                group_a_count: counts.group_a,
                group_b_count: counts.group_b,
                green_a_secs: state.timings.group_a,
                green_b_secs: state.timings.group_b,
                phase_at_completion: state.topology.phase_name(state.phase.phase),
                evp_active: state.evp.is_some(),
                total_vehicles: counts.total(),
                efficiency_improvement: ((baseline - avg_wait) / baseline) * 100.0,
            }
        };
        info!(
            cycle = %record.phase_at_completion,
            vehicles = record.total_vehicles,
            green_a = record.green_a_secs,
            green_b = record.green_b_secs,
            "Completed signal cycle"
        );
        self.publisher.log_cycle(&record).await;
    }
}
