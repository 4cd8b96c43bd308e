//! Health probes.
//!
//! A probe performs one external health check and reports a [`ProbeReading`].
//! The detector stamps readings into [`remedy_types::Signal`]s; probes never
//! see the clock or the loop state.
//!
//! Built-in probes:
//! - [`HttpProbe`]: reachability of an HTTP endpoint
//! - [`TcpProbe`]: connectivity of a storage socket
//! - [`LatencyProbe`]: round-trip time of an HTTP endpoint
//! - [`SecurityHeadersProbe`]: required response headers
//! - [`FnProbe`]: closure-backed probe for embedding and tests

mod custom;
mod http;
mod tcp;

pub use custom::{FnProbe, ProbeFactory};
pub use http::{HttpProbe, LatencyProbe, SecurityHeadersProbe};
pub use tcp::TcpProbe;

use std::sync::Arc;

use async_trait::async_trait;
use remedy_types::{ProbeId, ProbeKind};

use crate::error::ProbeResult;

/// Outcome of a probe that executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReading {
    /// Whether the target is healthy.
    pub ok: bool,

    /// Human-readable status detail.
    pub detail: String,
}

impl ProbeReading {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Trait for health probes.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable identifier of this probe.
    fn id(&self) -> &ProbeId;

    /// What this probe measures.
    fn kind(&self) -> ProbeKind;

    /// Run the check once.
    async fn probe(&self) -> ProbeResult<ProbeReading>;
}

/// Ordered collection of probes run by one detector pass.
#[derive(Clone, Default)]
pub struct ProbeSet {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    /// Add a probe to the set.
    pub fn add_probe(&mut self, probe: Arc<dyn Probe>) {
        self.probes.push(probe);
    }

    /// Builder-style [`ProbeSet::add_probe`].
    pub fn with_probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probes.push(Arc::new(probe));
        self
    }

    pub fn probes(&self) -> &[Arc<dyn Probe>] {
        &self.probes
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

impl std::fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.probes.iter().map(|p| p.id().as_str()))
            .finish()
    }
}

impl FromIterator<Arc<dyn Probe>> for ProbeSet {
    fn from_iter<T: IntoIterator<Item = Arc<dyn Probe>>>(iter: T) -> Self {
        Self {
            probes: iter.into_iter().collect(),
        }
    }
}
