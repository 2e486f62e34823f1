// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Autoscaling control loop.
//!
//! On a timer, cluster saturation (`Σ activeContainers / Σ
//! maxContainers`) is compared against the scale-up/scale-down
//! thresholds. Recommendations are events on a broadcast channel;
//! executing them is an external collaborator's job. A cooldown bounds
//! how often the same direction can be recommended; two same-direction
//! recommendations are never emitted closer than the cooldown.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arena_proto::dto::{ScaleDirection, ScaleRecommendation};
use tokio::sync::broadcast;
use tracing::info;

/// Autoscaler tunables.
#[derive(Debug, Clone, Copy)]
pub struct AutoscalerConfig {
    /// Saturation above which scale-up is recommended.
    pub scale_up_threshold: f64,
    /// Saturation below which scale-down is recommended.
    pub scale_down_threshold: f64,
    /// Minimum spacing between same-direction recommendations.
    pub cooldown: Duration,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default)]
struct CooldownState {
    last_up: Option<Instant>,
    last_down: Option<Instant>,
    latest: Option<ScaleRecommendation>,
}

/// Emits scale recommendations as events.
#[derive(Debug)]
pub struct Autoscaler {
    config: AutoscalerConfig,
    state: Mutex<CooldownState>,
    events: broadcast::Sender<ScaleRecommendation>,
}

impl Autoscaler {
    /// Creates an autoscaler; subscribers attach via [`Self::subscribe`].
    #[must_use]
    pub fn new(config: AutoscalerConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            state: Mutex::new(CooldownState::default()),
            events,
        }
    }

    /// Subscribes to the recommendation event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScaleRecommendation> {
        self.events.subscribe()
    }

    /// The most recent recommendation, if any.
    #[must_use]
    pub fn latest(&self) -> Option<ScaleRecommendation> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .latest
    }

    /// Evaluates one sample; emits and returns a recommendation when one
    /// is due.
    pub fn evaluate(&self, saturation: f64, now: Instant) -> Option<ScaleRecommendation> {
        let direction = if saturation > self.config.scale_up_threshold {
            ScaleDirection::Up
        } else if saturation < self.config.scale_down_threshold {
            ScaleDirection::Down
        } else {
            return None;
        };

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let last = match direction {
            ScaleDirection::Up => &mut state.last_up,
            ScaleDirection::Down => &mut state.last_down,
        };
        if let Some(previous) = *last {
            if now.saturating_duration_since(previous) < self.config.cooldown {
                return None;
            }
        }
        *last = Some(now);

        let recommendation = ScaleRecommendation {
            direction,
            saturation,
            at_unix_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        };
        state.latest = Some(recommendation);
        drop(state);
        info!(?direction, saturation, "scale recommendation");
        // A send only fails with zero subscribers, which is fine.
        let _ = self.events.send(recommendation);
        Some(recommendation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler(cooldown_secs: u64) -> Autoscaler {
        Autoscaler::new(AutoscalerConfig {
            cooldown: Duration::from_secs(cooldown_secs),
            ..AutoscalerConfig::default()
        })
    }

    #[test]
    fn thresholds_pick_the_direction() {
        let scaler = scaler(0);
        let now = Instant::now();
        assert_eq!(
            scaler.evaluate(0.9, now).map(|r| r.direction),
            Some(ScaleDirection::Up)
        );
        assert_eq!(
            scaler.evaluate(0.1, now).map(|r| r.direction),
            Some(ScaleDirection::Down)
        );
        assert_eq!(scaler.evaluate(0.5, now), None, "in-band saturation");
    }

    #[test]
    fn cooldown_suppresses_same_direction_repeats() {
        let scaler = scaler(300);
        let t0 = Instant::now();
        assert!(scaler.evaluate(0.9, t0).is_some(), "first up fires");
        assert!(
            scaler.evaluate(0.95, t0 + Duration::from_secs(100)).is_none(),
            "second up inside the cooldown is suppressed"
        );
        assert!(
            scaler.evaluate(0.95, t0 + Duration::from_secs(301)).is_some(),
            "up fires again after the cooldown"
        );
    }

    #[test]
    fn cooldown_is_per_direction() {
        let scaler = scaler(300);
        let t0 = Instant::now();
        assert!(scaler.evaluate(0.9, t0).is_some(), "up fires");
        assert!(
            scaler.evaluate(0.1, t0 + Duration::from_secs(10)).is_some(),
            "down is not blocked by the up cooldown"
        );
    }

    #[tokio::test]
    async fn recommendations_are_broadcast() {
        let scaler = scaler(0);
        let mut events = scaler.subscribe();
        scaler.evaluate(0.9, Instant::now()).expect("fires");
        let received = events.try_recv().expect("event delivered");
        assert_eq!(received.direction, ScaleDirection::Up);
    }
}
