//! Main scanning engine implementation
//!
//! Targets flow through a bounded queue to a fixed pool of workers; outcomes
//! flow through a second queue to a single aggregator that feeds the sinks.
//! Shutdown is ordered: the producer closes the target queue, the engine waits
//! for every worker, the last result sender goes away with the last worker,
//! and the aggregator drains what is left before the engine returns.

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::output::ResultSink;
use crate::scanner::{ProbeOutcome, Prober, ScanSummary, Target};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type TargetQueue = Arc<Mutex<mpsc::Receiver<Target>>>;

/// Worker pool driving one prober over a stream of targets
pub struct ScanEngine<P> {
    config: ScanConfig,
    prober: Arc<P>,
    cancel: CancellationToken,
}

impl<P> ScanEngine<P>
where
    P: Prober + 'static,
{
    /// Create a new scan engine with the given configuration
    pub fn new(config: ScanConfig, prober: P) -> crate::Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            prober: Arc::new(prober),
            cancel: CancellationToken::new(),
        })
    }

    /// Stop enqueuing targets once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Probe every target and hand reportable outcomes to `sinks`
    pub async fn run<I>(
        &self,
        targets: I,
        sinks: Vec<Box<dyn ResultSink>>,
    ) -> crate::Result<ScanSummary>
    where
        I: IntoIterator<Item = Target>,
        I::IntoIter: Send + 'static,
    {
        let start_time = Instant::now();
        let (target_tx, target_rx) = mpsc::channel::<Target>(self.config.queue_capacity);
        let (result_tx, result_rx) = mpsc::channel::<ProbeOutcome>(self.config.result_capacity);
        let queue: TargetQueue = Arc::new(Mutex::new(target_rx));

        // Sinks do blocking writes, so the aggregator lives on the blocking pool
        let aggregator = tokio::task::spawn_blocking(move || aggregate(result_rx, sinks));

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    queue.clone(),
                    result_tx.clone(),
                    self.prober.clone(),
                    self.config.verbose,
                ))
            })
            .collect();
        drop(result_tx);
        // Once every worker is gone the receiver drops and `produce` stops
        drop(queue);

        let producer = tokio::spawn(produce(targets.into_iter(), target_tx, self.cancel.clone()));

        let queued = producer
            .await
            .map_err(|e| ScanError::TaskFailed(format!("target producer: {}", e)))?;
        log::debug!("Target queue closed after {} targets", queued);

        let mut first_failure = None;
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                log::error!("Worker task failed: {}", e);
                first_failure.get_or_insert_with(|| format!("worker: {}", e));
            }
        }

        let summary = aggregator
            .await
            .map_err(|e| ScanError::TaskFailed(format!("aggregator: {}", e)))?;

        if let Some(reason) = first_failure {
            return Err(ScanError::TaskFailed(reason));
        }

        log::info!(
            "Scan completed in {:.2}s - {} hosts, {} vulnerable, {} backdoored",
            start_time.elapsed().as_secs_f64(),
            summary.scanned,
            summary.vulnerable,
            summary.backdoored
        );

        Ok(summary)
    }
}

/// Feed the target queue; dropping the sender on return closes it
async fn produce<I>(targets: I, queue: mpsc::Sender<Target>, cancel: CancellationToken) -> usize
where
    I: Iterator<Item = Target>,
{
    let mut queued = 0;
    for target in targets {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("Scan cancelled, no further targets will be queued");
                break;
            }
            sent = queue.send(target) => {
                if sent.is_err() {
                    log::warn!("No workers left, {} targets were queued", queued);
                    break;
                }
                queued += 1;
            }
        }
    }
    queued
}

async fn worker<P: Prober>(
    id: usize,
    queue: TargetQueue,
    results: mpsc::Sender<ProbeOutcome>,
    prober: Arc<P>,
    verbose: bool,
) {
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(target) = next else {
            break;
        };

        if verbose {
            log::info!("Scanning target: {}", target.address);
        }

        let outcome = prober.probe(&target).await;
        if results.send(outcome).await.is_err() {
            log::error!("Worker {} lost the result queue", id);
            break;
        }
    }
}

fn aggregate(
    mut results: mpsc::Receiver<ProbeOutcome>,
    mut sinks: Vec<Box<dyn ResultSink>>,
) -> ScanSummary {
    let mut summary = ScanSummary::new();

    while let Some(outcome) = results.blocking_recv() {
        summary.record(&outcome);
        if !outcome.is_reportable() {
            continue;
        }
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.record(&outcome) {
                log::error!("{}", e);
            }
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.finish() {
            log::error!("{}", e);
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{Classification, Status};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};

    struct EchoProber;

    #[async_trait]
    impl Prober for EchoProber {
        async fn probe(&self, target: &Target) -> ProbeOutcome {
            let mut c = Classification::new();
            if let IpAddr::V4(v4) = target.address {
                if v4.octets()[3] % 2 == 0 {
                    c.escalate(Status::Vulnerable, "even");
                }
            }
            ProbeOutcome::new(target.clone(), c, None)
        }
    }

    fn targets(n: u8) -> Vec<Target> {
        (0..n)
            .map(|i| Target::host(IpAddr::V4(Ipv4Addr::new(10, 0, 0, i))))
            .collect()
    }

    #[tokio::test]
    async fn test_every_target_is_accounted_for() {
        let engine = ScanEngine::new(ScanConfig::default().with_workers(3), EchoProber).unwrap();
        let summary = engine.run(targets(50), Vec::new()).await.unwrap();

        assert_eq!(summary.scanned, 50);
        assert_eq!(summary.vulnerable, 25);
        assert_eq!(summary.reported, 25);
    }

    #[tokio::test]
    async fn test_empty_target_stream_terminates() {
        let engine = ScanEngine::new(ScanConfig::default().with_workers(8), EchoProber).unwrap();
        let summary = engine.run(Vec::<Target>::new(), Vec::new()).await.unwrap();
        assert_eq!(summary, ScanSummary::default());
    }

    struct PanickingProber;

    #[async_trait]
    impl Prober for PanickingProber {
        async fn probe(&self, target: &Target) -> ProbeOutcome {
            panic!("prober failed on {}", target.address);
        }
    }

    #[tokio::test]
    async fn test_run_returns_when_every_worker_dies() {
        let config = ScanConfig::default()
            .with_workers(2)
            .with_queue_capacity(2);
        let engine = ScanEngine::new(config, PanickingProber).unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            engine.run(targets(16), Vec::new()),
        )
        .await
        .expect("run must return once the worker pool is gone");
        assert!(matches!(result, Err(ScanError::TaskFailed(_))));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = ScanEngine::new(ScanConfig::default().with_workers(0), EchoProber);
        assert!(matches!(result, Err(ScanError::ConfigError(_))));
    }
}
