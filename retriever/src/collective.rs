//! Collective sum reduction across the workers that build one database.
//!
//! Each worker writes only the rows of its own shard and leaves the others
//! at zero, so summing the buffers element-wise reconstructs the full
//! database. The reduction is also the single synchronization barrier of a
//! sharded build.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectiveError {
    #[error("member {rank} left the group")]
    MemberLeft { rank: usize },

    #[error("timed out after {waited:?} with {arrived} of {world_size} members arrived")]
    Timeout {
        waited: Duration,
        arrived: usize,
        world_size: usize,
    },

    #[error("buffer length mismatch: got {got}, want {want}")]
    LengthMismatch { got: usize, want: usize },

    #[error("member {rank} aborted: {reason}")]
    Aborted { rank: usize, reason: String },
}

/// Collective is the distributed context handed to the prototype builder.
///
/// Implementations must be safe for concurrent use (Send + Sync).
pub trait Collective: Send + Sync {
    /// Index of this worker in `[0, world_size)`.
    fn rank(&self) -> usize;

    /// Number of workers taking part in the build.
    fn world_size(&self) -> usize;

    /// Sum `buf` element-wise across all workers. Every worker receives the
    /// total in its own `buf`. Blocks until all workers have arrived.
    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<(), CollectiveError>;

    /// Tell the other workers this one will not reach the next reduction,
    /// so they fail instead of waiting for it.
    fn abort(&self, _reason: &str) {}
}

/// SingleProcess is the trivial one-worker context. Reductions are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f32]) -> Result<(), CollectiveError> {
        Ok(())
    }
}

struct GroupState {
    generation: u64,
    arrived: usize,
    acc: Vec<f32>,
    result: Arc<Vec<f32>>,
    broken: Option<CollectiveError>,
}

struct GroupShared {
    world_size: usize,
    timeout: Option<Duration>,
    state: Mutex<GroupState>,
    done: Condvar,
}

impl GroupShared {
    fn fail(&self, st: &mut GroupState, err: CollectiveError) -> CollectiveError {
        if st.broken.is_none() {
            if st.arrived > 0 {
                warn!("collective group broken with {} members waiting: {err}", st.arrived);
            } else {
                debug!("collective group closed: {err}");
            }
            st.broken = Some(err.clone());
        }
        self.done.notify_all();
        err
    }
}

/// LocalGroup connects workers running as threads of one process.
///
/// Use it to run a sharded build in-process or to simulate several workers
/// in tests.
pub struct LocalGroup;

impl LocalGroup {
    /// Creates the members of a group of `world_size` workers, ordered by
    /// rank. Reductions wait without a deadline.
    ///
    /// # Panics
    ///
    /// Panics if `world_size` is 0.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(world_size: usize) -> Vec<LocalMember> {
        Self::build(world_size, None)
    }

    /// Like [`LocalGroup::new`], but a reduction that is still missing
    /// members after `timeout` fails for everyone and breaks the group.
    pub fn with_timeout(world_size: usize, timeout: Duration) -> Vec<LocalMember> {
        Self::build(world_size, Some(timeout))
    }

    fn build(world_size: usize, timeout: Option<Duration>) -> Vec<LocalMember> {
        assert!(world_size > 0, "collective: world_size must be positive");
        let shared = Arc::new(GroupShared {
            world_size,
            timeout,
            state: Mutex::new(GroupState {
                generation: 0,
                arrived: 0,
                acc: Vec::new(),
                result: Arc::new(Vec::new()),
                broken: None,
            }),
            done: Condvar::new(),
        });
        (0..world_size)
            .map(|rank| LocalMember {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }
}

/// One worker's handle on a [`LocalGroup`].
///
/// Dropping a member breaks the group: peers waiting in (or later entering)
/// a reduction fail with [`CollectiveError::MemberLeft`].
pub struct LocalMember {
    rank: usize,
    shared: Arc<GroupShared>,
}

impl Collective for LocalMember {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<(), CollectiveError> {
        let shared = &self.shared;
        let mut st = shared.state.lock();
        if let Some(err) = &st.broken {
            return Err(err.clone());
        }

        if st.arrived == 0 {
            st.acc.clear();
            st.acc.extend_from_slice(buf);
        } else {
            if st.acc.len() != buf.len() {
                let want = st.acc.len();
                return Err(shared.fail(
                    &mut st,
                    CollectiveError::LengthMismatch {
                        got: buf.len(),
                        want,
                    },
                ));
            }
            for (a, &b) in st.acc.iter_mut().zip(buf.iter()) {
                *a += b;
            }
        }
        st.arrived += 1;
        debug!(
            "rank {} arrived at reduction {} ({}/{})",
            self.rank, st.generation, st.arrived, shared.world_size
        );

        if st.arrived == shared.world_size {
            let total = std::mem::take(&mut st.acc);
            st.result = Arc::new(total);
            st.arrived = 0;
            st.generation += 1;
            buf.copy_from_slice(&st.result);
            shared.done.notify_all();
            return Ok(());
        }

        let generation = st.generation;
        let started = Instant::now();
        loop {
            if st.generation != generation {
                buf.copy_from_slice(&st.result);
                return Ok(());
            }
            if let Some(err) = &st.broken {
                return Err(err.clone());
            }
            match shared.timeout {
                Some(timeout) => {
                    let timed_out = shared
                        .done
                        .wait_until(&mut st, started + timeout)
                        .timed_out();
                    if timed_out && st.generation == generation && st.broken.is_none() {
                        let arrived = st.arrived;
                        return Err(shared.fail(
                            &mut st,
                            CollectiveError::Timeout {
                                waited: timeout,
                                arrived,
                                world_size: shared.world_size,
                            },
                        ));
                    }
                }
                None => shared.done.wait(&mut st),
            }
        }
    }

    fn abort(&self, reason: &str) {
        let mut st = self.shared.state.lock();
        self.shared.fail(
            &mut st,
            CollectiveError::Aborted {
                rank: self.rank,
                reason: reason.to_string(),
            },
        );
    }
}

impl Drop for LocalMember {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        self.shared
            .fail(&mut st, CollectiveError::MemberLeft { rank: self.rank });
    }
}
