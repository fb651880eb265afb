/// Supplies the session token sent with `connect` and `subscribe`.
///
/// Queried every time one of those operations is sent, so a token that
/// changes (login, logout) is picked up on the next reconnect or subscribe.
pub trait SessionTokenProvider: Send + Sync + 'static {
    fn current_session_token(&self) -> Option<String>;
}

impl<F> SessionTokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn current_session_token(&self) -> Option<String> {
        self()
    }
}

/// A token fixed at construction, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionToken(Option<String>);

impl StaticSessionToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

impl SessionTokenProvider for StaticSessionToken {
    fn current_session_token(&self) -> Option<String> {
        self.0.clone()
    }
}
