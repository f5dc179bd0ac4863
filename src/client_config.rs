use crate::{
    decision::UserProfileService,
    decision_listener::NoopDecisionListener,
    error_handler::{ErrorHandler, NoopErrorHandler},
    Client, DecisionListener,
};

/// Configuration for [`Client`].
pub struct ClientConfig<'a> {
    pub(crate) decision_listener: Box<dyn DecisionListener + Send + Sync + 'a>,
    pub(crate) user_profile_service: Option<Box<dyn UserProfileService + Send + Sync>>,
    pub(crate) error_handler: Box<dyn ErrorHandler + Send + Sync>,
}

impl<'a> Default for ClientConfig<'a> {
    fn default() -> Self {
        ClientConfig::new()
    }
}

impl<'a> ClientConfig<'a> {
    /// Create a default configuration: no listener, no profile service, errors swallowed.
    pub fn new() -> Self {
        ClientConfig {
            decision_listener: Box::new(NoopDecisionListener),
            user_profile_service: None,
            error_handler: Box::new(NoopErrorHandler),
        }
    }

    /// Set decision listener to pass decisions to your analytics pipeline.
    ///
    /// ```
    /// # use experiment_engine::{ClientConfig, DecisionNotification};
    /// let mut config = ClientConfig::new();
    /// config.decision_listener(|notification: DecisionNotification| {
    ///   println!("{:?}", notification);
    /// });
    /// ```
    pub fn decision_listener(
        &mut self,
        decision_listener: impl DecisionListener + Send + Sync + 'a,
    ) -> &mut Self {
        self.decision_listener = Box::new(decision_listener);
        self
    }

    /// Make experiment decisions sticky by persisting them in `service`.
    pub fn user_profile_service(
        &mut self,
        service: impl UserProfileService + Send + Sync + 'static,
    ) -> &mut Self {
        self.user_profile_service = Some(Box::new(service));
        self
    }

    /// Choose what happens to invalid input and datafile inconsistencies after they are logged.
    ///
    /// ```
    /// # use experiment_engine::{ClientConfig, RaiseErrorHandler};
    /// let mut config = ClientConfig::new();
    /// config.error_handler(RaiseErrorHandler);
    /// ```
    pub fn error_handler(&mut self, handler: impl ErrorHandler + Send + Sync + 'static) -> &mut Self {
        self.error_handler = Box::new(handler);
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use experiment_engine::{ClientConfig, Client};
    /// let client: Client = ClientConfig::new().to_client();
    /// ```
    pub fn to_client(self) -> Client<'a> {
        Client::new(self)
    }
}
