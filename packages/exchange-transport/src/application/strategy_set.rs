//! Strategy Sets
//!
//! Immutable bundles of the strategies one exchange integration supplies.
//! Builders check the bundle once; the managers never re-validate on the hot
//! path.

use std::fmt;
use std::sync::Arc;

use crate::application::ports::{
    Authenticator, ConnectionStrategy, ExceptionClassifier, MessageParser, RateLimiter,
    RequestPreparer, RetryPolicy, SubscriptionStrategy,
};
use crate::domain::connection::{ConnectionContext, ReconnectionPolicy};
use crate::domain::error::StrategyError;
use crate::domain::message::OutboundMessage;

// =============================================================================
// Streaming
// =============================================================================

/// Strategies driving a streaming connection.
#[derive(Clone)]
pub struct StreamingStrategySet {
    /// Connect, authenticate, reconnect decisions.
    pub connection: Arc<dyn ConnectionStrategy>,
    /// Subscribe/unsubscribe frame builder.
    pub subscription: Arc<dyn SubscriptionStrategy>,
    /// Inbound frame parser.
    pub parser: Arc<dyn MessageParser>,
}

impl StreamingStrategySet {
    /// Start building a set.
    #[must_use]
    pub fn builder() -> StreamingStrategySetBuilder {
        StreamingStrategySetBuilder::default()
    }

    /// Resolve the reconnection policy and keep-alive frame for `context`,
    /// checking they can work together.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Incompatible`] for an invalid policy, or a
    /// keep-alive frame with a zero ping interval or timeout.
    pub fn resolve(
        &self,
        context: &ConnectionContext,
    ) -> Result<(ReconnectionPolicy, Option<OutboundMessage>), StrategyError> {
        let policy = self.connection.reconnection_policy(context);
        policy.validate()?;

        let heartbeat = self.connection.heartbeat_payload(context);
        if heartbeat.is_some() && (context.ping_interval.is_zero() || context.ping_timeout.is_zero())
        {
            return Err(StrategyError::Incompatible(
                "heartbeat payload requires a non-zero ping interval and timeout".to_string(),
            ));
        }
        Ok((policy, heartbeat))
    }
}

impl fmt::Debug for StreamingStrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingStrategySet").finish_non_exhaustive()
    }
}

/// Builder for [`StreamingStrategySet`].
#[derive(Default)]
pub struct StreamingStrategySetBuilder {
    connection: Option<Arc<dyn ConnectionStrategy>>,
    subscription: Option<Arc<dyn SubscriptionStrategy>>,
    parser: Option<Arc<dyn MessageParser>>,
}

impl StreamingStrategySetBuilder {
    /// Set the connection strategy.
    #[must_use]
    pub fn connection(mut self, strategy: Arc<dyn ConnectionStrategy>) -> Self {
        self.connection = Some(strategy);
        self
    }

    /// Set the subscription strategy.
    #[must_use]
    pub fn subscription(mut self, strategy: Arc<dyn SubscriptionStrategy>) -> Self {
        self.subscription = Some(strategy);
        self
    }

    /// Set the message parser.
    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn MessageParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Finish the set.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Missing`] naming the first absent strategy.
    pub fn build(self) -> Result<StreamingStrategySet, StrategyError> {
        Ok(StreamingStrategySet {
            connection: self
                .connection
                .ok_or(StrategyError::Missing("connection"))?,
            subscription: self
                .subscription
                .ok_or(StrategyError::Missing("subscription"))?,
            parser: self.parser.ok_or(StrategyError::Missing("parser"))?,
        })
    }
}

// =============================================================================
// Request/Response
// =============================================================================

/// Strategies driving request execution.
#[derive(Clone)]
pub struct RequestStrategySet {
    /// Request builder.
    pub preparer: Arc<dyn RequestPreparer>,
    /// Request signer, absent for public-only integrations.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Admission control.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Retry decisions.
    pub retry_policy: Arc<dyn RetryPolicy>,
    /// Failure classification.
    pub classifier: Arc<dyn ExceptionClassifier>,
}

impl RequestStrategySet {
    /// Start building a set.
    #[must_use]
    pub fn builder() -> RequestStrategySetBuilder {
        RequestStrategySetBuilder::default()
    }
}

impl fmt::Debug for RequestStrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestStrategySet")
            .field("authenticated", &self.authenticator.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestStrategySet`].
#[derive(Default)]
pub struct RequestStrategySetBuilder {
    preparer: Option<Arc<dyn RequestPreparer>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    classifier: Option<Arc<dyn ExceptionClassifier>>,
}

impl RequestStrategySetBuilder {
    /// Set the request preparer.
    #[must_use]
    pub fn preparer(mut self, preparer: Arc<dyn RequestPreparer>) -> Self {
        self.preparer = Some(preparer);
        self
    }

    /// Set the authenticator.
    #[must_use]
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Set the rate limiter.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set the exception classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn ExceptionClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Finish the set.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Missing`] for an absent required strategy, or
    /// [`StrategyError::Incompatible`] when the retry policy allows zero
    /// attempts or more than the preparer's performance targets permit.
    pub fn build(self) -> Result<RequestStrategySet, StrategyError> {
        let preparer = self.preparer.ok_or(StrategyError::Missing("preparer"))?;
        let rate_limiter = self
            .rate_limiter
            .ok_or(StrategyError::Missing("rate_limiter"))?;
        let retry_policy = self
            .retry_policy
            .ok_or(StrategyError::Missing("retry_policy"))?;
        let classifier = self.classifier.ok_or(StrategyError::Missing("classifier"))?;

        let attempts = retry_policy.max_attempts();
        let ceiling = preparer.performance_targets().max_retry_attempts;
        if attempts == 0 {
            return Err(StrategyError::Incompatible(
                "retry policy allows no attempts".to_string(),
            ));
        }
        if attempts > ceiling {
            return Err(StrategyError::Incompatible(format!(
                "retry policy allows {attempts} attempts, performance targets cap at {ceiling}"
            )));
        }

        Ok(RequestStrategySet {
            preparer,
            authenticator: self.authenticator,
            rate_limiter,
            retry_policy,
            classifier,
        })
    }
}
