//! Backoff Policies
//!
//! A policy maps a failed attempt to "retry after N" or "do not retry". It is
//! pure: it never sleeps and never counts attempts, that is the executor's job.
//!
//! Request flavors are expressed as rule sets instead of request subclasses:
//!
//! ```ignore
//! let policy = RequestPolicy::standard(&settings)
//!     .with_staging(&settings)
//!     .with_app_stopped(&settings);
//! ```

use std::time::Duration;

use super::error::RequestError;
use crate::config::RequestSettings;

/// Outcome of consulting a [`BackoffPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

pub trait BackoffPolicy: Send + Sync {
    /// Decide what to do after attempt number `attempt` (1-based) failed
    fn decide(&self, error: &RequestError, attempt: u32) -> RetryDecision;

    /// Build the error surfaced once the wait budget is used up
    fn exhausted(&self, last: RequestError, attempts: u32) -> RequestError {
        RequestError::RetriesExhausted {
            message: format!("Request failed after {} attempts: {}", attempts, last),
            attempts,
            source: Box::new(last),
        }
    }
}

impl<F> BackoffPolicy for F
where
    F: Fn(&RequestError, u32) -> RetryDecision + Send + Sync,
{
    fn decide(&self, error: &RequestError, attempt: u32) -> RetryDecision {
        self(error, attempt)
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub initial: Duration,
    /// Multiplier applied for each further failure
    pub multiplier: f64,
    /// Upper bound for a single delay
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

/// Calculate backoff delay for a given attempt (1-based)
pub fn calculate_backoff(attempt: u32, config: &ExponentialBackoff) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let delay_ms = (config.initial.as_millis() as f64 * config.multiplier.powi(exponent))
        .min(config.max.as_millis() as f64);

    Duration::from_millis(delay_ms as u64)
}

/// How long a rule waits before the next attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Interval {
    Fixed(Duration),
    Exponential(ExponentialBackoff),
}

impl Interval {
    fn delay(&self, attempt: u32) -> Duration {
        match self {
            Interval::Fixed(d) => *d,
            Interval::Exponential(config) => calculate_backoff(attempt, config),
        }
    }
}

/// Server conditions a rule may react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientCondition {
    /// HTTP 503
    ServiceUnavailable,
    /// Staging has not finished yet
    StagingNotFinished,
    /// Read against an app that is (still) stopped
    AppInStoppedState,
}

impl TransientCondition {
    pub fn matches(&self, error: &RequestError) -> bool {
        matches!(
            (self, error),
            (TransientCondition::ServiceUnavailable, RequestError::ServiceUnavailable(_))
                | (TransientCondition::StagingNotFinished, RequestError::StagingNotFinished(_))
                | (TransientCondition::AppInStoppedState, RequestError::AppInStoppedState(_))
        )
    }
}

#[derive(Debug, Clone)]
pub struct RetryRule {
    pub condition: TransientCondition,
    pub interval: Interval,
    /// Message used when retries for this condition run out
    pub exhausted_message: Option<String>,
}

/// Composable rule set; the first matching rule decides.
///
/// A policy with no rules never retries.
#[derive(Debug, Clone, Default)]
pub struct RequestPolicy {
    rules: Vec<RetryRule>,
}

impl RequestPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry 503 responses at the configured interval
    pub fn standard(settings: &RequestSettings) -> Self {
        Self::none().with_rule(RetryRule {
            condition: TransientCondition::ServiceUnavailable,
            interval: Interval::Fixed(settings.service_unavailable_interval()),
            exhausted_message: Some(
                "Cloud Foundry is not available. Retries exhausted while the service returned 503"
                    .to_string(),
            ),
        })
    }

    /// Also wait while the application is still staging
    pub fn with_staging(self, settings: &RequestSettings) -> Self {
        self.with_rule(RetryRule {
            condition: TransientCondition::StagingNotFinished,
            interval: Interval::Fixed(settings.staging_interval()),
            exhausted_message: Some("Timed out waiting for application staging".to_string()),
        })
    }

    /// Also wait while the application is reported as stopped
    pub fn with_app_stopped(self, settings: &RequestSettings) -> Self {
        self.with_rule(RetryRule {
            condition: TransientCondition::AppInStoppedState,
            interval: Interval::Fixed(settings.app_stopped_interval()),
            exhausted_message: Some(
                "Timed out waiting for application to leave the stopped state".to_string(),
            ),
        })
    }

    pub fn with_rule(mut self, rule: RetryRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    fn rule_for(&self, error: &RequestError) -> Option<&RetryRule> {
        self.rules.iter().find(|rule| rule.condition.matches(error))
    }
}

impl BackoffPolicy for RequestPolicy {
    fn decide(&self, error: &RequestError, attempt: u32) -> RetryDecision {
        match self.rule_for(error) {
            Some(rule) => RetryDecision::RetryAfter(rule.interval.delay(attempt)),
            None => RetryDecision::NoRetry,
        }
    }

    fn exhausted(&self, last: RequestError, attempts: u32) -> RequestError {
        let message = self
            .rule_for(&last)
            .and_then(|rule| rule.exhausted_message.clone())
            .unwrap_or_else(|| format!("Request failed after {} attempts", attempts));

        RequestError::RetriesExhausted {
            message: format!("{}: {}", message, last),
            attempts,
            source: Box::new(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RequestSettings {
        RequestSettings::default()
    }

    #[test]
    fn test_calculate_backoff() {
        let config = ExponentialBackoff::default();

        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(4));
        // Caps at max (30s)
        assert_eq!(calculate_backoff(7, &config), Duration::from_secs(30));
    }

    #[test]
    fn test_calculate_backoff_custom_config() {
        let config = ExponentialBackoff {
            initial: Duration::from_millis(500),
            multiplier: 3.0,
            max: Duration::from_secs(60),
        };

        assert_eq!(calculate_backoff(1, &config), Duration::from_millis(500));
        assert_eq!(calculate_backoff(2, &config), Duration::from_millis(1500));
        assert_eq!(calculate_backoff(3, &config), Duration::from_millis(4500));
    }

    #[test]
    fn test_none_never_retries() {
        let policy = RequestPolicy::none();
        let err = RequestError::ServiceUnavailable("down".to_string());
        assert_eq!(policy.decide(&err, 1), RetryDecision::NoRetry);
    }

    #[test]
    fn test_standard_retries_only_503() {
        let policy = RequestPolicy::standard(&settings());

        let unavailable = RequestError::ServiceUnavailable("down".to_string());
        assert_eq!(
            policy.decide(&unavailable, 1),
            RetryDecision::RetryAfter(Duration::from_millis(2000))
        );

        let staging = RequestError::StagingNotFinished("staging".to_string());
        assert_eq!(policy.decide(&staging, 1), RetryDecision::NoRetry);

        let missing = RequestError::NotFound("app".to_string());
        assert_eq!(policy.decide(&missing, 1), RetryDecision::NoRetry);

        let other = RequestError::Failed("boom".to_string());
        assert_eq!(policy.decide(&other, 1), RetryDecision::NoRetry);
    }

    #[test]
    fn test_flavors_compose() {
        let policy = RequestPolicy::standard(&settings())
            .with_staging(&settings())
            .with_app_stopped(&settings());

        let staging = RequestError::StagingNotFinished("staging".to_string());
        assert_eq!(
            policy.decide(&staging, 3),
            RetryDecision::RetryAfter(Duration::from_millis(2000))
        );

        let stopped = RequestError::AppInStoppedState("stopped".to_string());
        assert_eq!(
            policy.decide(&stopped, 1),
            RetryDecision::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(policy.rules().len(), 3);
    }

    #[test]
    fn test_exponential_rule() {
        let policy = RequestPolicy::none().with_rule(RetryRule {
            condition: TransientCondition::ServiceUnavailable,
            interval: Interval::Exponential(ExponentialBackoff::default()),
            exhausted_message: None,
        });
        let err = RequestError::ServiceUnavailable("down".to_string());
        assert_eq!(
            policy.decide(&err, 3),
            RetryDecision::RetryAfter(Duration::from_secs(4))
        );
    }

    #[test]
    fn test_exhausted_message_per_rule() {
        let policy = RequestPolicy::standard(&settings()).with_staging(&settings());

        let err = policy.exhausted(RequestError::StagingNotFinished("x".to_string()), 4);
        match err {
            RequestError::RetriesExhausted {
                message,
                attempts,
                source,
            } => {
                assert!(message.starts_with("Timed out waiting for application staging"));
                assert_eq!(attempts, 4);
                assert!(matches!(*source, RequestError::StagingNotFinished(_)));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_closure_policy() {
        let policy = |error: &RequestError, attempt: u32| {
            if error.is_transient() && attempt < 3 {
                RetryDecision::RetryAfter(Duration::from_millis(10))
            } else {
                RetryDecision::NoRetry
            }
        };
        let err = RequestError::AppInStoppedState("x".to_string());
        assert_eq!(
            policy.decide(&err, 1),
            RetryDecision::RetryAfter(Duration::from_millis(10))
        );
        assert_eq!(policy.decide(&err, 3), RetryDecision::NoRetry);
        assert!(matches!(
            policy.exhausted(err, 3),
            RequestError::RetriesExhausted { attempts: 3, .. }
        ));
    }
}
