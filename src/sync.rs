//! One check of one channel: signature, content, verification.
//!
//! The `Last-Modified` stamp of the signature file is the only version
//! signal. A changed stamp is committed as soon as the signature is on
//! disk, before the content is even requested, so a broken bulletin is
//! retried at most once per published version. A bulletin that fails
//! verification is purged together with its signature and the stamp is
//! cleared, so the next cycle starts from scratch.

use crate::alert::{Alert, parse_bulletin};
use crate::cache::{AlertCache, CacheError};
use crate::fetch::{FetchError, Fetcher, Transport};
use crate::state::{Channel, StateError, StateStore};
use crate::verify::{SignatureVerifier, VerifyError};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("No alert server configured")]
    NoServer,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("Signature check failed for channel {0}")]
    Unverified(Channel),
    #[error("Cannot read cached alert for channel {channel}: {source}")]
    ReadCache {
        channel: Channel,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new, verified bulletin.
    NewAlert(Alert),
    /// The server still publishes the version we already handled.
    UpToDate,
    /// Nothing to show this cycle, for whatever reason.
    NoUpdate,
}

pub struct Synchronizer<'a, T: Transport> {
    state: &'a dyn StateStore,
    fetcher: &'a Fetcher<T>,
    verifier: &'a dyn SignatureVerifier,
    cache: &'a AlertCache,
    server: String,
}

impl<'a, T: Transport> Synchronizer<'a, T> {
    pub fn new(
        state: &'a dyn StateStore,
        fetcher: &'a Fetcher<T>,
        verifier: &'a dyn SignatureVerifier,
        cache: &'a AlertCache,
        server: &str,
    ) -> Self {
        Synchronizer {
            state,
            fetcher,
            verifier,
            cache,
            server: server.trim().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, file_name: &str) -> String {
        format!("{}/{}", self.server, file_name)
    }

    /// Run one cycle, reporting every failure as "no update".
    pub fn check(&self, channel: &Channel) -> SyncOutcome {
        match self.try_check(channel) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Check of channel {} failed: {}", channel, e);
                SyncOutcome::NoUpdate
            }
        }
    }

    pub fn try_check(&self, channel: &Channel) -> Result<SyncOutcome, SyncError> {
        if self.server.is_empty() {
            return Err(SyncError::NoServer);
        }

        let signature_url = self.url(&channel.signature_file_name());
        debug!("Checking signature {}", signature_url);
        let signature = self.fetcher.fetch(&signature_url)?;
        let published = signature
            .last_modified
            .ok_or_else(|| FetchError::MissingLastModified(signature_url.clone()))?;

        if self.state.last_seen(channel)? == Some(published) {
            info!("Channel {} is up to date ({})", channel, published);
            return Ok(SyncOutcome::UpToDate);
        }

        debug!("Channel {} changed, now published {}", channel, published);
        self.cache.write_signature(channel, &signature.body)?;
        self.state.set_last_seen(channel, published)?;

        let content_url = self.url(&channel.file_name());
        debug!("Fetching content {}", content_url);
        let content = self.fetcher.fetch(&content_url)?;
        self.cache.write_content(channel, &content.body)?;

        let signer = self.verify_cached(channel)?;

        let Some(bulletin) = parse_bulletin(&content.body) else {
            info!("Bulletin for channel {} has no title, nothing to show", channel);
            return Ok(SyncOutcome::NoUpdate);
        };

        info!("New alert on channel {}: {}", channel, bulletin.title);
        Ok(SyncOutcome::NewAlert(Alert {
            channel: channel.clone(),
            title: bulletin.title,
            body: bulletin.body,
            released: Some(published),
            signer,
        }))
    }

    /// Re-verify and return the cached bulletin of `channel`.
    ///
    /// `Ok(None)` when nothing verified is cached. A cached pair that no
    /// longer verifies is purged like a freshly downloaded one.
    pub fn show_last(&self, channel: &Channel) -> Result<Option<Alert>, SyncError> {
        if !self.cache.has_pair(channel) {
            debug!("No cached alert for channel {}", channel);
            return Ok(None);
        }

        let signer = match self.verify_cached(channel) {
            Ok(signer) => signer,
            Err(SyncError::Unverified(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let content = self
            .cache
            .read_content(channel)
            .map_err(|source| SyncError::ReadCache {
                channel: channel.clone(),
                source,
            })?;
        let Some(bulletin) = parse_bulletin(&content) else {
            return Ok(None);
        };

        Ok(Some(Alert {
            channel: channel.clone(),
            title: bulletin.title,
            body: bulletin.body,
            released: self.state.last_seen(channel)?,
            signer,
        }))
    }

    /// Verify the cached pair; purge it and clear the stamp unless it is
    /// valid. Returns the signer line on success.
    fn verify_cached(&self, channel: &Channel) -> Result<Option<String>, SyncError> {
        let result = self.verifier.verify(
            &self.cache.content_path(channel),
            &self.cache.signature_path(channel),
        );

        match result {
            Ok(verification) if verification.valid => {
                Ok(verification.signer().map(str::to_string))
            }
            Ok(_) => {
                self.purge(channel)?;
                Err(SyncError::Unverified(channel.clone()))
            }
            Err(e) => {
                self.purge(channel)?;
                Err(e.into())
            }
        }
    }

    fn purge(&self, channel: &Channel) -> Result<(), SyncError> {
        warn!("Discarding cached alert for channel {}", channel);
        let purged = self.cache.purge(channel);
        self.state.clear_last_seen(channel)?;
        purged?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
