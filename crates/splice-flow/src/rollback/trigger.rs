//! Automatic rollback triggers and the monitor that evaluates them.
//!
//! A trigger is a typed condition over live signals plus fire bookkeeping.
//! The monitor evaluates the enabled automatic triggers on a periodic
//! interval and reports fires over a channel. Each fire names the plan it
//! belongs to; the service layer consumes fires and executes that plan with
//! `triggered_by = "automatic"`. Manual triggers are operator-invoked and
//! exempt from the cooldown and max-fire limits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use splice_core::{PlanId, TriggerId};

use super::plan::RollbackPlan;

/// How a trigger is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fired by the monitor when the condition holds.
    Automatic,
    /// Fired explicitly by an operator.
    Manual,
}

/// How urgent a fired trigger is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSeverity {
    /// Informational, rollback can wait.
    Low,
    /// Degradation worth acting on.
    Medium,
    /// Serious degradation.
    High,
    /// Outage-level degradation.
    Critical,
}

/// The condition a trigger watches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Error rate (0.0 to 1.0) above a threshold.
    ErrorRateAbove {
        /// Fractional error-rate threshold.
        threshold: f64,
    },
    /// Response time grown past a ratio of the pre-integration baseline.
    ResponseTimeRatioAbove {
        /// Ratio of current to baseline response time.
        ratio: f64,
    },
}

impl TriggerCondition {
    /// Whether the condition holds for the given signals.
    #[must_use]
    pub fn is_met(&self, signals: &TriggerSignals) -> bool {
        match *self {
            Self::ErrorRateAbove { threshold } => signals.error_rate > threshold,
            Self::ResponseTimeRatioAbove { ratio } => {
                signals.baseline_response_time_ms > 0.0
                    && signals.response_time_ms / signals.baseline_response_time_ms > ratio
            }
        }
    }

    /// Short description for logs and fire reasons.
    #[must_use]
    pub fn describe(&self) -> String {
        match *self {
            Self::ErrorRateAbove { threshold } => {
                format!("error rate above {:.1}%", threshold * 100.0)
            }
            Self::ResponseTimeRatioAbove { ratio } => {
                format!("response time above {ratio:.2}x baseline")
            }
        }
    }
}

/// Live signals trigger conditions are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSignals {
    /// Fraction of requests failing, 0.0 to 1.0.
    pub error_rate: f64,
    /// Current average response time.
    pub response_time_ms: f64,
    /// Pre-integration baseline response time.
    pub baseline_response_time_ms: f64,
}

/// A rollback trigger with fire bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackTrigger {
    /// Trigger identifier.
    pub id: TriggerId,
    /// Automatic or manual.
    pub trigger_type: TriggerType,
    /// The watched condition.
    pub condition: TriggerCondition,
    /// Urgency when fired.
    pub severity: TriggerSeverity,
    /// Disabled triggers never fire automatically.
    pub enabled: bool,
    /// Minimum spacing between automatic fires.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Maximum number of automatic fires over the trigger's lifetime.
    pub max_triggers: u32,
    /// How many times this trigger has fired.
    #[serde(default)]
    pub fire_count: u32,
    /// When it last fired.
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl RollbackTrigger {
    /// Default spacing between automatic fires.
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);
    /// Default lifetime fire limit.
    pub const DEFAULT_MAX_TRIGGERS: u32 = 3;

    /// Creates an enabled automatic trigger with default limits.
    #[must_use]
    pub fn automatic(condition: TriggerCondition, severity: TriggerSeverity) -> Self {
        Self {
            id: TriggerId::generate(),
            trigger_type: TriggerType::Automatic,
            condition,
            severity,
            enabled: true,
            cooldown: Self::DEFAULT_COOLDOWN,
            max_triggers: Self::DEFAULT_MAX_TRIGGERS,
            fire_count: 0,
            last_fired_at: None,
        }
    }

    /// Creates a manual trigger. Operator-invoked, exempt from limits.
    #[must_use]
    pub fn manual(condition: TriggerCondition, severity: TriggerSeverity) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            ..Self::automatic(condition, severity)
        }
    }

    /// Overrides the cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Overrides the lifetime fire limit.
    #[must_use]
    pub const fn with_max_triggers(mut self, max_triggers: u32) -> Self {
        self.max_triggers = max_triggers;
        self
    }

    /// Whether this trigger should fire automatically right now.
    ///
    /// True iff the trigger is enabled and automatic, the condition holds,
    /// the lifetime limit is not exhausted, and the cooldown has elapsed
    /// since the last fire.
    #[must_use]
    pub fn should_fire(&self, signals: &TriggerSignals, now: DateTime<Utc>) -> bool {
        if !self.enabled || self.trigger_type != TriggerType::Automatic {
            return false;
        }
        if !self.condition.is_met(signals) {
            return false;
        }
        if self.fire_count >= self.max_triggers {
            return false;
        }
        match self.last_fired_at {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed >= chrono::Duration::from_std(self.cooldown).unwrap_or_default()
            }
        }
    }

    /// Records a fire at the given instant.
    pub fn record_fire(&mut self, now: DateTime<Utc>) {
        self.fire_count += 1;
        self.last_fired_at = Some(now);
    }
}

/// A fired trigger, reported to the service layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerFired {
    /// Which trigger fired.
    pub trigger_id: TriggerId,
    /// The plan to execute in response.
    pub plan_id: PlanId,
    /// Its configured severity.
    pub severity: TriggerSeverity,
    /// Human-readable reason derived from the condition.
    pub reason: String,
    /// When the fire was recorded.
    pub fired_at: DateTime<Utc>,
}

/// Source of live signals for trigger evaluation.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Samples the current signals.
    async fn sample(&self) -> TriggerSignals;
}

/// Fixed signals, for tests and for wiring before a real source exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSignals(pub TriggerSignals);

#[async_trait]
impl SignalSource for StaticSignals {
    async fn sample(&self) -> TriggerSignals {
        self.0
    }
}

/// Evaluates one plan's automatic triggers on a periodic interval.
///
/// Retired (dropped) when the feature is fully rolled out or rolled back.
#[derive(Debug)]
pub struct TriggerMonitor {
    plan_id: PlanId,
    triggers: Vec<RollbackTrigger>,
    interval: Duration,
}

impl TriggerMonitor {
    /// Default evaluation interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    /// Creates a monitor over the given triggers, firing for one plan.
    #[must_use]
    pub fn new(plan_id: PlanId, triggers: Vec<RollbackTrigger>) -> Self {
        Self {
            plan_id,
            triggers,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    /// Creates a monitor over a plan's own triggers.
    #[must_use]
    pub fn for_plan(plan: &RollbackPlan) -> Self {
        Self::new(plan.id, plan.triggers.clone())
    }

    /// Overrides the evaluation interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The monitored triggers with current bookkeeping.
    #[must_use]
    pub fn triggers(&self) -> &[RollbackTrigger] {
        &self.triggers
    }

    /// Evaluates every trigger once against the given signals.
    ///
    /// Fires are recorded on the triggers and returned in trigger order.
    pub fn evaluate(&mut self, signals: &TriggerSignals, now: DateTime<Utc>) -> Vec<TriggerFired> {
        let mut fired = Vec::new();
        for trigger in &mut self.triggers {
            if trigger.should_fire(signals, now) {
                trigger.record_fire(now);
                metrics::counter!("splice_triggers_fired_total").increment(1);
                tracing::warn!(
                    trigger_id = %trigger.id,
                    severity = ?trigger.severity,
                    "rollback trigger fired"
                );
                fired.push(TriggerFired {
                    trigger_id: trigger.id,
                    plan_id: self.plan_id,
                    severity: trigger.severity,
                    reason: trigger.condition.describe(),
                    fired_at: now,
                });
            }
        }
        fired
    }

    /// Runs the evaluation loop until the fire channel closes.
    ///
    /// Each tick samples the signal source and sends any fires to the
    /// channel. Returns when the receiver is dropped.
    pub async fn run(mut self, source: Arc<dyn SignalSource>, fires: mpsc::Sender<TriggerFired>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let signals = source.sample().await;
            for fire in self.evaluate(&signals, Utc::now()) {
                if fires.send(fire).await.is_err() {
                    return;
                }
            }
        }
    }
}
