//! Snowflake ID generation: 41-bit millisecond timestamp, 5-bit datacenter,
//! 5-bit worker, 12-bit sequence, assembled into a signed 64-bit integer.
//!
//! The worker ID is bootstrapped once at boot from the coordination store
//! so it stays stable across restarts on the same host.

use crate::coord::CoordBackend;
use parking_lot::Mutex;
use thiserror::Error;

/// Custom epoch (ms). IDs are offsets from this instant.
const EPOCH_MS: i64 = 1_417_937_700_000;

const WORKER_ID_BITS: u32 = 5;
const DATACENTER_ID_BITS: u32 = 5;
const SEQUENCE_BITS: u32 = 12;

const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
const MAX_DATACENTER_ID: i64 = (1 << DATACENTER_ID_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_ID_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

/// Coordination-store key holding the shared worker-ID counter.
const WORKER_ID_COUNTER_KEY: &str = "workId";

#[derive(Debug, Error)]
pub enum IdError {
    #[error("worker id {0} out of range")]
    WorkerIdOutOfRange(i64),

    #[error("datacenter id {0} out of range")]
    DatacenterIdOutOfRange(i64),

    #[error("clock moved backwards")]
    ClockMovedBackwards,
}

struct GeneratorState {
    last_timestamp: i64,
    sequence: i64,
}

/// Monotonic 64-bit ID generator. Safe for concurrent use.
pub struct IdGenerator {
    worker_id: i64,
    datacenter_id: i64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    pub fn new(worker_id: i64, datacenter_id: i64) -> Result<Self, IdError> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(IdError::WorkerIdOutOfRange(worker_id));
        }
        if !(0..=MAX_DATACENTER_ID).contains(&datacenter_id) {
            return Err(IdError::DatacenterIdOutOfRange(datacenter_id));
        }
        Ok(Self {
            worker_id,
            datacenter_id,
            state: Mutex::new(GeneratorState {
                last_timestamp: 0,
                sequence: 0,
            }),
        })
    }

    /// Next unique ID, spinning into the following millisecond when the
    /// per-millisecond sequence overflows.
    pub fn next_id(&self) -> Result<i64, IdError> {
        self.next_id_with(now_millis)
    }

    fn next_id_with(&self, clock: impl Fn() -> i64) -> Result<i64, IdError> {
        let mut state = self.state.lock();
        let mut timestamp = clock();

        if timestamp < state.last_timestamp {
            return Err(IdError::ClockMovedBackwards);
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while timestamp <= state.last_timestamp {
                    timestamp = clock();
                }
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = timestamp;
        Ok(((timestamp - EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_ID_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Resolve this node's worker ID from the coordination store.
///
/// The node's IP maps to a worker ID; absent mappings atomically increment
/// the shared counter and persist the result, so the same host keeps its
/// worker ID across restarts. The mapping is written without a TTL; IP
/// reuse across physical nodes collides (deployments make worker IDs
/// unique out of band).
pub async fn bootstrap_worker_id(
    coord: &dyn CoordBackend,
    node_ip: &str,
) -> Result<i64, crate::coord::CoordError> {
    if let Some(existing) = coord.get(node_ip).await? {
        if let Ok(id) = existing.parse::<i64>() {
            return Ok(id % (MAX_WORKER_ID + 1));
        }
    }
    let assigned = coord.incr(WORKER_ID_COUNTER_KEY).await?;
    coord.set(node_ip, &assigned.to_string(), None).await?;
    Ok(assigned % (MAX_WORKER_ID + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_increasing() {
        let gen = IdGenerator::new(1, 1).unwrap();
        let mut last = 0;
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = gen.next_id().unwrap();
            assert!(id > last);
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn rejects_out_of_range_components() {
        assert!(matches!(
            IdGenerator::new(32, 0),
            Err(IdError::WorkerIdOutOfRange(32))
        ));
        assert!(matches!(
            IdGenerator::new(0, 64),
            Err(IdError::DatacenterIdOutOfRange(64))
        ));
    }

    #[test]
    fn clock_regression_is_an_error() {
        let gen = IdGenerator::new(1, 1).unwrap();
        gen.next_id_with(|| 1_500_000_000_000).unwrap();
        assert!(matches!(
            gen.next_id_with(|| 1_499_999_999_999),
            Err(IdError::ClockMovedBackwards)
        ));
    }

    #[test]
    fn sequence_increments_within_one_millisecond() {
        let gen = IdGenerator::new(1, 1).unwrap();
        let a = gen.next_id_with(|| 1_500_000_000_000).unwrap();
        let b = gen.next_id_with(|| 1_500_000_000_000).unwrap();
        assert_eq!(b - a, 1);
    }

    #[test]
    fn worker_and_datacenter_land_in_their_fields() {
        let gen = IdGenerator::new(3, 5).unwrap();
        let id = gen.next_id_with(|| 1_500_000_000_000).unwrap();
        assert_eq!((id >> WORKER_ID_SHIFT) & MAX_WORKER_ID, 3);
        assert_eq!((id >> DATACENTER_ID_SHIFT) & MAX_DATACENTER_ID, 5);
    }

    #[tokio::test]
    async fn worker_id_bootstrap_is_stable_per_ip() {
        let coord = crate::coord::MemoryCoord::new();
        let first = bootstrap_worker_id(&coord, "10.0.0.1").await.unwrap();
        let again = bootstrap_worker_id(&coord, "10.0.0.1").await.unwrap();
        assert_eq!(first, again);

        let other = bootstrap_worker_id(&coord, "10.0.0.2").await.unwrap();
        assert_ne!(first, other);
    }
}
