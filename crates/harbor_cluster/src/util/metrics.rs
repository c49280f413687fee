use crate::api::v1beta1::harborcluster::{ClusterPhase, HarborCluster};
use crate::util::errors::Error;
use kube::ResourceExt;
use prometheus::{
    histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry,
};
use tokio::time::Instant;
use tracing::warn;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    /// 1 for the current phase of each cluster, 0 for the others
    pub cluster_phase: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "harbor_cluster_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )?;
        let failures = IntCounterVec::new(
            opts!("harbor_cluster_reconciliation_errors_total", "reconciliation errors",),
            &["instance", "error"],
        )?;
        let reconciliations =
            IntCounter::new("harbor_cluster_reconciliations_total", "reconciliations")?;
        let cluster_phase = IntGaugeVec::new(
            opts!("harbor_cluster_phase", "current phase of each HarborCluster"),
            &["instance", "phase"],
        )?;
        Ok(Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            cluster_phase,
        })
    }

    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.cluster_phase.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, harbor_cluster: &HarborCluster, e: &Error) {
        warn!(
            cluster = %harbor_cluster.name_any(),
            error = %e.metric_label(),
            "reconcile failure"
        );
        self.failures
            .with_label_values(&[harbor_cluster.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn set_phase(&self, instance: &str, phase: ClusterPhase) {
        for candidate in [
            ClusterPhase::Unknown,
            ClusterPhase::Creating,
            ClusterPhase::Provisioning,
            ClusterPhase::Healthy,
            ClusterPhase::Unhealthy,
        ] {
            self.cluster_phase
                .with_label_values(&[instance, candidate.to_string().as_str()])
                .set(i64::from(candidate == phase));
        }
    }

    pub fn count_and_measure(&self, controller: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: controller.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}
