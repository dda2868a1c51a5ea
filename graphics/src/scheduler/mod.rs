//! Submission of recorded frames to a backend.
//!
//! A [`Submission`] pairs a recorded [`RenderGraph`] with the [`Fence`] that
//! reports its completion. Backends take ownership of submissions and call
//! [`Submission::complete`] once the GPU has finished, which is the single
//! point where frame resources are released.

mod sync;

pub use sync::{Fence, FenceStatus};

use crate::graph::RenderGraph;

/// Recorded work handed to a backend.
pub struct Submission {
    id: u64,
    graph: RenderGraph,
    fence: Fence,
}

impl Submission {
    pub(crate) fn new(id: u64, graph: RenderGraph, fence: Fence) -> Self {
        Self { id, graph, fence }
    }

    /// Monotonic submission number on the device.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The recorded work.
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    /// The fence signaled on completion.
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Mark the work as finished on the GPU.
    ///
    /// Signals the fence, presents the surface texture if one was scheduled
    /// and runs completion handlers in registration order. Resources the
    /// graph retained are dropped afterwards.
    pub fn complete(self) {
        self.fence.signal();
        self.graph.finish();
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("id", &self.id)
            .field("graph", &self.graph.label())
            .field("fence", &self.fence.status())
            .finish()
    }
}
