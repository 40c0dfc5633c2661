use std::fmt;

use tracing::info;

use crate::error::TrackError;
use crate::push::PushChannelClient;

/// Bearer token of an authenticated staff session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(***)")
    }
}

/// Owner of the push connection's lifecycle. Views receive the shared
/// [`PushChannelClient`] from here and only subscribe/unsubscribe.
pub struct Session {
    channel: PushChannelClient,
    credential: Option<SessionCredential>,
}

impl Session {
    pub fn new(channel: PushChannelClient) -> Self {
        Self {
            channel,
            credential: None,
        }
    }

    pub async fn login(&mut self, credential: SessionCredential) -> Result<(), TrackError> {
        self.channel.connect(&credential).await?;
        self.credential = Some(credential);
        info!("session started");
        Ok(())
    }

    pub async fn logout(&mut self) {
        self.channel.disconnect().await;
        if self.credential.take().is_some() {
            info!("session ended");
        }
    }

    pub fn credential(&self) -> Option<&SessionCredential> {
        self.credential.as_ref()
    }

    pub fn channel(&self) -> &PushChannelClient {
        &self.channel
    }
}
