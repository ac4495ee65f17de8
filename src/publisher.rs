use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::error;

use crate::state::StateSnapshot;

/// Sender half of the snapshot push channel; WebSocket handlers
/// subscribe to it. Capacity is small on purpose: clients only ever
/// care about the latest state.
pub type SnapshotSender = broadcast::Sender<StateSnapshot>;

/// One row of the append-only cycle log, written once per completed
/// signal cycle.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub completed_at: String,
    pub lane_counts: HashMap<String, u32>,
    pub group_a_count: u32,
    pub group_b_count: u32,
    pub green_a_secs: u32,
    pub green_b_secs: u32,
    pub phase_at_completion: String,
    pub evp_active: bool,
    pub total_vehicles: u32,
    pub efficiency_improvement: f64,
}

/// Pushes state snapshots to live consumers and appends cycle records
/// to sqlite. The control loop is its only producer.
pub struct StatePublisher {
    tx: SnapshotSender,
    pool: Option<SqlitePool>,
}

impl StatePublisher {
    pub fn new(pool: Option<SqlitePool>) -> StatePublisher {
        let (tx, _) = broadcast::channel(16);
        StatePublisher { tx, pool }
    }

    pub fn sender(&self) -> SnapshotSender {
        self.tx.clone()
    }

    /// Broadcast a snapshot. Send errors only mean no one is listening.
    pub fn push(&self, snapshot: StateSnapshot) {
        let _ = self.tx.send(snapshot);
    }

    /// Append one cycle record. Failures are logged and absorbed; the
    /// scheduler never stops over a logging problem.
    pub async fn log_cycle(&self, record: &CycleRecord) {
        let Some(pool) = &self.pool else {
            return;
        };

        let lane_counts_json = match serde_json::to_string(&record.lane_counts) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize lane counts for cycle log");
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO cycle_log (
                completed_at, lane_counts, group_a_count, group_b_count,
                green_a_secs, green_b_secs, phase_at_completion,
                evp_active, total_vehicles, efficiency_improvement
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.completed_at)
        .bind(&lane_counts_json)
        .bind(record.group_a_count)
        .bind(record.group_b_count)
        .bind(record.green_a_secs)
        .bind(record.green_b_secs)
        .bind(&record.phase_at_completion)
        .bind(record.evp_active)
        .bind(record.total_vehicles)
        .bind(record.efficiency_improvement)
        .execute(pool)
        .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to append cycle record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CycleRecord {
        CycleRecord {
            completed_at: "2026-01-01T00:00:00Z".to_string(),
            lane_counts: HashMap::from([
                ("North".to_string(), 5),
                ("East".to_string(), 2),
            ]),
            group_a_count: 5,
            group_b_count: 2,
            green_a_secs: 10,
            green_b_secs: 10,
            phase_at_completion: "All_Red".to_string(),
            evp_active: false,
            total_vehicles: 7,
            efficiency_improvement: 88.9,
        }
    }

    #[tokio::test]
    async fn push_reaches_subscribers() {
        let publisher = StatePublisher::new(None);
        let mut rx = publisher.sender().subscribe();

        let snapshot = StateSnapshot {
            current_phase: "All_Red".to_string(),
            phase_remaining_secs: 2.0,
            lane_counts: HashMap::new(),
            group_counts: HashMap::new(),
            signal_timings: HashMap::new(),
            remaining_times: HashMap::new(),
            total_vehicles: 0,
            evp: None,
            cycles_completed: 3,
            efficiency_improvement: 0.0,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };
        publisher.push(snapshot);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.cycles_completed, 3);
        assert_eq!(received.current_phase, "All_Red");
    }

    #[tokio::test]
    async fn log_cycle_without_pool_is_a_no_op() {
        let publisher = StatePublisher::new(None);
        publisher.log_cycle(&record()).await;
    }

    #[tokio::test]
    async fn log_cycle_appends_a_row() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::MIGRATOR.run(&pool).await.unwrap();

        let publisher = StatePublisher::new(Some(pool.clone()));
        publisher.log_cycle(&record()).await;
        publisher.log_cycle(&record()).await;

        let (count, vehicles): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(total_vehicles), 0) FROM cycle_log")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 2);
        assert_eq!(vehicles, 14);
    }
}
