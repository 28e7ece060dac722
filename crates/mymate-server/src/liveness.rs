//! Background probing of every registered channel.
//!
//! Each tick enqueues a ping on every channel in the registry. A channel
//! whose probe cannot be enqueued (writer gone, or queue backed up) gets a
//! strike; a successful probe clears its strikes. A channel that collects
//! more than `threshold` consecutive strikes is closed and unregistered.
//! The strike table belongs to the monitor task alone.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::channel::ChannelId;
use crate::registry::{ConnectionRegistry, Visit};

/// Counts for one probing round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub probed: usize,
    pub failed: usize,
    pub evicted: usize,
}

pub struct LivenessMonitor {
    registry: ConnectionRegistry,
    interval: Duration,
    threshold: u32,
    strikes: HashMap<ChannelId, u32>,
}

impl LivenessMonitor {
    pub fn new(registry: ConnectionRegistry, interval: Duration, threshold: u32) -> Self {
        Self {
            registry,
            interval,
            threshold,
            strikes: HashMap::new(),
        }
    }

    /// Consecutive failed probes recorded for a channel.
    pub fn strikes(&self, id: ChannelId) -> u32 {
        self.strikes.get(&id).copied().unwrap_or(0)
    }

    /// Probe every registered channel once.
    pub async fn tick(&mut self) -> TickReport {
        let threshold = self.threshold;
        let strikes = &mut self.strikes;
        let mut report = TickReport::default();

        let traversal = self
            .registry
            .for_each_channel(|channel, owner| {
                report.probed += 1;
                match channel.probe() {
                    Ok(()) => {
                        strikes.remove(&channel.id());
                        Visit::Keep
                    }
                    Err(e) => {
                        report.failed += 1;
                        let count = strikes.entry(channel.id()).or_insert(0);
                        *count += 1;
                        debug!(
                            channel = %channel.id(),
                            user = %owner,
                            strikes = *count,
                            error = %e,
                            "Liveness probe failed"
                        );
                        if *count > threshold {
                            strikes.remove(&channel.id());
                            Visit::Remove
                        } else {
                            Visit::Keep
                        }
                    }
                }
            })
            .await;
        report.evicted = traversal.removed;

        // Forget channels that left the registry through another path.
        if !self.strikes.is_empty() {
            let live = self.registry.channel_ids().await;
            self.strikes.retain(|id, _| live.contains(id));
        }

        if report.failed > 0 || report.evicted > 0 {
            info!(
                probed = report.probed,
                failed = report.failed,
                evicted = report.evicted,
                "Liveness tick"
            );
        } else {
            debug!(probed = report.probed, "Liveness tick");
        }

        report
    }

    /// Probe forever at the configured interval.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing is connected yet.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold = self.threshold,
            "Starting liveness monitor"
        );
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, Frame};
    use mymate_shared::UserId;

    fn monitor(registry: &ConnectionRegistry) -> LivenessMonitor {
        LivenessMonitor::new(registry.clone(), Duration::from_secs(10), 10)
    }

    #[tokio::test]
    async fn test_healthy_channel_is_pinged() {
        let registry = ConnectionRegistry::new();
        let (channel, mut rx) = Channel::open(4);
        registry.register(channel.clone(), UserId::new()).await;

        let report = monitor(&registry).tick().await;
        assert_eq!(report, TickReport { probed: 1, failed: 0, evicted: 0 });
        assert_eq!(rx.recv().await, Some(Frame::Ping));
    }

    #[tokio::test]
    async fn test_evicted_after_eleven_failures() {
        let registry = ConnectionRegistry::new();
        let (channel, rx) = Channel::open(4);
        drop(rx);
        registry.register(channel.clone(), UserId::new()).await;
        let mut monitor = monitor(&registry);

        for round in 1..=10 {
            let report = monitor.tick().await;
            assert_eq!(report.evicted, 0, "round {round}");
            assert_eq!(monitor.strikes(channel.id()), round);
        }
        assert!(registry.contains(channel.id()).await);

        let report = monitor.tick().await;
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(channel.id()).await);
        assert_eq!(monitor.strikes(channel.id()), 0);
    }

    #[tokio::test]
    async fn test_nine_failures_then_success_resets() {
        let registry = ConnectionRegistry::new();
        let (channel, mut rx) = Channel::open(1);
        registry.register(channel.clone(), UserId::new()).await;
        let mut monitor = monitor(&registry);

        // First probe fills the single-slot queue; the next nine bounce.
        assert_eq!(monitor.tick().await.failed, 0);
        for _ in 0..9 {
            assert_eq!(monitor.tick().await.failed, 1);
        }
        assert_eq!(monitor.strikes(channel.id()), 9);

        // Writer drains the queue: the channel recovers.
        assert_eq!(rx.recv().await, Some(Frame::Ping));
        let report = monitor.tick().await;
        assert_eq!(report.failed, 0);
        assert_eq!(monitor.strikes(channel.id()), 0);
        assert!(registry.contains(channel.id()).await);
    }

    #[tokio::test]
    async fn test_one_dead_channel_does_not_stop_probing() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for i in 0..5 {
            let (channel, rx) = Channel::open(4);
            if i == 0 {
                drop(rx);
            } else {
                receivers.push(rx);
            }
            registry.register(channel, UserId::new()).await;
        }

        let report = monitor(&registry).tick().await;
        assert_eq!(report.probed, 5);
        assert_eq!(report.failed, 1);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().ok(), Some(Frame::Ping));
        }
    }

    #[tokio::test]
    async fn test_strikes_pruned_when_channel_leaves() {
        let registry = ConnectionRegistry::new();
        let (channel, rx) = Channel::open(4);
        drop(rx);
        registry.register(channel.clone(), UserId::new()).await;
        let mut monitor = monitor(&registry);

        monitor.tick().await;
        assert_eq!(monitor.strikes(channel.id()), 1);

        registry.unregister(&channel).await;
        monitor.tick().await;
        assert_eq!(monitor.strikes(channel.id()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_evicts_dead_channel() {
        let registry = ConnectionRegistry::new();
        let (channel, rx) = Channel::open(4);
        drop(rx);
        registry.register(channel.clone(), UserId::new()).await;

        let handle = monitor(&registry).spawn();
        tokio::time::sleep(Duration::from_secs(10 * 12)).await;

        assert!(!registry.contains(channel.id()).await);
        handle.abort();
    }
}
