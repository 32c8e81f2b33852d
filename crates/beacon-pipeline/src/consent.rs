use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use tracing::{info, warn};

use beacon_core::consent::{ConsentDecision, ConsentState};
use beacon_core::errors::StoreError;
use beacon_core::storage::KeyValueStore;

pub const STATUS_KEY: &str = "consentStatus";
pub const DATE_KEY: &str = "consentDate";

/// How long a grant stays valid.
const VALIDITY_MONTHS: u32 = 12;

/// Persisted analytics consent.
///
/// Only the decision and its timestamp are stored; expiry is recomputed on
/// every read so a long-running process notices it without a restart.
#[derive(Clone)]
pub struct ConsentStore {
    store: Arc<dyn KeyValueStore>,
}

impl ConsentStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn status(&self) -> ConsentState {
        self.status_at(Utc::now())
    }

    /// Evaluate persisted consent as of `now`.
    ///
    /// Anything unreadable degrades to `NotRequested`.
    pub fn status_at(&self, now: DateTime<Utc>) -> ConsentState {
        let status = match self.store.get(STATUS_KEY) {
            Ok(Some(s)) => s,
            Ok(None) => return ConsentState::NotRequested,
            Err(e) => {
                warn!(error = %e, "failed to read consent status, treating as not requested");
                return ConsentState::NotRequested;
            }
        };

        match status.parse::<ConsentDecision>() {
            Ok(ConsentDecision::Denied) => ConsentState::Denied,
            Ok(ConsentDecision::Granted) => match self.granted_at() {
                Some(at) if expired(at, now) => ConsentState::Expired,
                Some(at) => ConsentState::Granted { at },
                None => ConsentState::NotRequested,
            },
            Err(_) => {
                warn!(value = %status, "unknown persisted consent status, treating as not requested");
                ConsentState::NotRequested
            }
        }
    }

    fn granted_at(&self) -> Option<DateTime<Utc>> {
        let raw = match self.store.get(DATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("consent granted without a date, treating as not requested");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "failed to read consent date, treating as not requested");
                return None;
            }
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(e) => {
                warn!(value = %raw, error = %e, "corrupt consent date, treating as not requested");
                None
            }
        }
    }

    /// Persist a decision stamped with the current time.
    pub fn set_status(&self, decision: ConsentDecision) -> Result<(), StoreError> {
        self.set_status_at(decision, Utc::now())
    }

    pub fn set_status_at(
        &self,
        decision: ConsentDecision,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Date first: a crash in between must not leave a dateless grant.
        self.store.set(DATE_KEY, &at.to_rfc3339())?;
        self.store.set(STATUS_KEY, decision.as_str())?;
        info!(decision = %decision, "consent decision stored");
        Ok(())
    }

    pub fn has_valid_consent(&self) -> bool {
        self.status().is_granted()
    }

    /// Forget any decision. The next read is `NotRequested`.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(STATUS_KEY)?;
        self.store.remove(DATE_KEY)?;
        info!("consent cleared");
        Ok(())
    }
}

fn expired(at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    at.checked_add_months(Months::new(VALIDITY_MONTHS))
        .is_some_and(|until| now > until)
}
