//! Closure-backed probes.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use remedy_types::{ProbeId, ProbeKind};

use super::{Probe, ProbeReading};
use crate::error::ProbeResult;

type BoxedCheck = Arc<dyn Fn() -> BoxFuture<'static, ProbeResult<ProbeReading>> + Send + Sync>;

/// Probe whose check is an async closure.
#[derive(Clone)]
pub struct FnProbe {
    id: ProbeId,
    kind: ProbeKind,
    check: BoxedCheck,
}

impl std::fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProbe")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl Probe for FnProbe {
    fn id(&self) -> &ProbeId {
        &self.id
    }

    fn kind(&self) -> ProbeKind {
        self.kind
    }

    async fn probe(&self) -> ProbeResult<ProbeReading> {
        (self.check)().await
    }
}

/// Factory for closure-backed probes.
pub struct ProbeFactory;

impl ProbeFactory {
    /// Create a probe from an async closure.
    pub fn from_fn<F, Fut>(id: impl Into<String>, kind: ProbeKind, check: F) -> FnProbe
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProbeResult<ProbeReading>> + Send + 'static,
    {
        FnProbe {
            id: ProbeId::new(id),
            kind,
            check: Arc::new(move || check().boxed()),
        }
    }
}
