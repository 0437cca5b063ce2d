#![forbid(unsafe_code)]

//! Cross-lane wait-for graph.
//!
//! Every lane blocked in a synchronous call has exactly one outgoing edge
//! (the lane it waits on), so the graph is a set of chains with at most
//! [`LANE_COUNT`] nodes. Registering an edge walks the chain from the target;
//! reaching the caller means the wait would never finish.

use std::sync::{Mutex, PoisonError};

use crate::lane::{LANE_COUNT, Lane};

#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    edges: Mutex<[Option<Lane>; LANE_COUNT]>,
}

impl WaitGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `caller -> target`. Returns `None` when the edge closes a cycle.
    ///
    /// Check and insert happen under one lock, so of two lanes racing to wait
    /// on each other exactly one observes the other's edge.
    pub(crate) fn register(&self, caller: Lane, target: Lane) -> Option<WaitEdge<'_>> {
        let mut edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cursor = Some(target);
        let mut steps = 0;
        while let Some(lane) = cursor {
            if lane == caller {
                return None;
            }
            steps += 1;
            if steps > LANE_COUNT {
                break;
            }
            cursor = edges[lane.index()];
        }
        edges[caller.index()] = Some(target);
        Some(WaitEdge {
            graph: self,
            caller,
        })
    }

    pub(crate) fn waiting_on(&self, lane: Lane) -> Option<Lane> {
        self.edges.lock().unwrap_or_else(PoisonError::into_inner)[lane.index()]
    }
}

/// Clears its edge when the blocking call returns.
pub(crate) struct WaitEdge<'a> {
    graph: &'a WaitGraph,
    caller: Lane,
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        let mut edges = self
            .graph
            .edges
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        edges[self.caller.index()] = None;
    }
}
