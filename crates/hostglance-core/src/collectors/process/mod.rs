//! Process collectors (C3): three backends behind one enum, dispatching
//! statically so the per-tick cost is a single `match`, not a vtable.

mod kernel;
mod netlink;
mod scanner;

pub use kernel::{Kernel, KernelNetlinkTransport};
pub use netlink::{Netlink, ProcessEventSource};
pub use scanner::Procfs;

use crate::churn::ChurnCounter;
use crate::fs::FileSystem;
use crate::model::Processes;

/// Parameters shared by every backend: top-K cap and enrichment depth.
#[derive(Debug, Clone, Copy)]
pub struct CollectParams {
    pub max_procs: usize,
    pub enrich_top_n: usize,
}

impl Default for CollectParams {
    fn default() -> Self {
        Self { max_procs: 200, enrich_top_n: 32 }
    }
}

/// The active process-collector backend, selected once at startup.
pub enum ProcessCollector {
    Procfs(Procfs),
    Netlink(Box<Netlink>),
    Kernel(Kernel),
}

impl ProcessCollector {
    pub fn procfs() -> Self {
        ProcessCollector::Procfs(Procfs::new())
    }

    pub fn netlink(source: Box<dyn ProcessEventSource>) -> Self {
        ProcessCollector::Netlink(Box::new(Netlink::new(source)))
    }

    pub fn kernel(transport: Box<dyn KernelNetlinkTransport>) -> Self {
        ProcessCollector::Kernel(Kernel::new(transport))
    }

    /// Returns `false` if this backend could not initialize (e.g. the
    /// event socket requires a capability the process does not have).
    pub fn init(&mut self) -> bool {
        match self {
            ProcessCollector::Procfs(c) => c.init(),
            ProcessCollector::Netlink(c) => c.init(),
            ProcessCollector::Kernel(c) => c.init(),
        }
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, params: &CollectParams, churn: &ChurnCounter) -> Processes {
        match self {
            ProcessCollector::Procfs(c) => c.sample(fs, params, churn),
            ProcessCollector::Netlink(c) => c.sample(fs, params, churn),
            ProcessCollector::Kernel(c) => c.sample(fs, params, churn),
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            ProcessCollector::Procfs(c) => c.shutdown(),
            ProcessCollector::Netlink(c) => c.shutdown(),
            ProcessCollector::Kernel(c) => c.shutdown(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProcessCollector::Procfs(c) => c.name(),
            ProcessCollector::Netlink(c) => c.name(),
            ProcessCollector::Kernel(c) => c.name(),
        }
    }
}
