//! Request scheduling
//!
//! The [`RequestScheduler`] is asked for a request at every transmit opportunity and answers with at
//! most one. Requests are chosen by a fixed priority:
//!
//! 1. `LMP_features_req`
//! 2. `LMP_features_req_ext` for page one
//! 3. `LMP_features_req_ext` for the next page, once an extended features response was received and
//!    while there are pages left (pages are bounded by the maximum the peer declared, or by
//!    [`MAX_PAGE`] when over-reading is enabled)
//! 4. `LMP_name_req`, first at offset zero and then whenever the name reassembly needs more data
//! 5. `LMP_version_req`
//! 6. queued feature page re-queries, then the enabled probes in the order malformed features,
//!    malformed extended features, role switch, encryption key size, and ping
//! 7. `LMP_version_req` again after the backoff, until the fingerprint is complete
//!
//! Once the fingerprint is complete only queued feature page re-queries are sent.
//!
//! A category that the peer rejected with `LMP_not_accepted` is never requested again. Repeated
//! `LMP_version_req` and `LMP_name_req` are bounded by the [`RetryLimits`].

use crate::completion::CompletionTracker;
use crate::config::{Config, ProbeKind, ProbeSet, RetryLimits};
use crate::features::{FeaturePageWalker, MAX_PAGE};
use crate::name::NameReassembler;
use crate::pdu::request::{Request, RequestKind, VersionParameters, DEFAULT_SWITCH_INSTANT, WEAK_KEY_SIZE};
use core::fmt;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// The number of malformed `LMP_features_req_ext` sent by the malformed extended features probe
pub const MALFORMED_EXTENDED_FEATURES_SENDS: u32 = 255;

/// The sent and received count of a request category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Count {
    pub sent: u32,
    pub received: u32,
}

/// Counters of sent requests and received responses per request category
#[derive(Debug, Clone, Default)]
pub struct RequestCounter {
    counts: [Count; RequestKind::ALL.len()],
}

impl RequestCounter {
    pub fn get(&self, kind: RequestKind) -> Count {
        self.counts[kind as usize]
    }

    pub fn sent(&self, kind: RequestKind) -> u32 {
        self.get(kind).sent
    }

    pub fn received(&self, kind: RequestKind) -> u32 {
        self.get(kind).received
    }

    pub fn record_sent(&mut self, kind: RequestKind) {
        self.counts[kind as usize].sent += 1;
    }

    pub fn record_received(&mut self, kind: RequestKind) {
        self.counts[kind as usize].received += 1;
    }
}

/// Error returned when a bounded request would be sent once too often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub kind: RequestKind,
    pub limit: u32,
}

impl fmt::Display for RetriesExhausted {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "retries exhausted: {} was already sent {} times", self.kind, self.limit)
    }
}

impl std::error::Error for RetriesExhausted {}

/// The session state the scheduler reads (and partially updates) to pick a request
pub struct ScheduleState<'a> {
    pub name: &'a mut NameReassembler,
    pub walker: &'a mut FeaturePageWalker,
    pub completion: &'a CompletionTracker,
    pub now: Instant,
}

/// The request scheduler of a session
#[derive(Debug, Clone)]
pub struct RequestScheduler {
    counter: RequestCounter,
    rejected: BTreeSet<RequestKind>,
    probes: ProbeSet,
    retry: RetryLimits,
    version_backoff: Duration,
    version_parameters: VersionParameters,
    features_mask: [u8; 8],
    extended_features_mask: [u8; 8],
    max_features_page: u8,
    pages_walked: u8,
    last_version: Option<Instant>,
    stalled: bool,
}

impl RequestScheduler {
    pub fn new(config: &Config) -> Self {
        RequestScheduler {
            counter: RequestCounter::default(),
            rejected: BTreeSet::new(),
            probes: config.probes.clone(),
            retry: config.retry,
            version_backoff: config.version_backoff,
            version_parameters: config.version_parameters,
            features_mask: config.features_mask,
            extended_features_mask: config.extended_features_mask,
            max_features_page: config.max_features_page,
            pages_walked: 0,
            last_version: None,
            stalled: false,
        }
    }

    pub fn counter(&self) -> &RequestCounter {
        &self.counter
    }

    pub fn counter_mut(&mut self) -> &mut RequestCounter {
        &mut self.counter
    }

    /// Check if the session was stalled by an exhausted retry limit
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn is_rejected(&self, kind: RequestKind) -> bool {
        self.rejected.contains(&kind)
    }

    /// Mark a request category as rejected by the peer
    ///
    /// Returns false if the category was already rejected.
    pub fn reject(&mut self, kind: RequestKind) -> bool {
        self.rejected.insert(kind)
    }

    fn extended_features(&self, page: u8) -> Request {
        Request::FeaturesExt {
            page,
            max_page: self.max_features_page,
            mask: self.extended_features_mask,
        }
    }

    fn page_bound(&self, walker: &FeaturePageWalker) -> Option<u8> {
        if self.probes.contains(ProbeKind::ExtendedFeaturesOverRead) {
            Some(MAX_PAGE)
        } else {
            walker.max_page()
        }
    }

    fn probe_wanted(&self, probe: ProbeKind, kind: RequestKind) -> bool {
        self.probes.contains(probe) && self.counter.sent(kind) == 0 && !self.is_rejected(kind)
    }

    fn version_due(&self, now: Instant) -> bool {
        match self.last_version {
            Some(last) => now.saturating_duration_since(last) >= self.version_backoff,
            None => true,
        }
    }

    fn choose(&mut self, state: &mut ScheduleState<'_>) -> Result<Option<Request>, RetriesExhausted> {
        if self.counter.sent(RequestKind::Features) == 0 {
            return Ok(Some(Request::Features {
                mask: self.features_mask,
            }));
        }

        if self.counter.sent(RequestKind::FeaturesExt) == 0 {
            self.pages_walked = 1;

            return Ok(Some(self.extended_features(1)));
        }

        if self.counter.received(RequestKind::FeaturesExt) > 0 && !self.is_rejected(RequestKind::FeaturesExt) {
            if let Some(bound) = self.page_bound(state.walker) {
                if self.pages_walked < bound {
                    self.pages_walked += 1;

                    return Ok(Some(self.extended_features(self.pages_walked)));
                }
            }
        }

        let name_wanted = self.counter.sent(RequestKind::Name) == 0 || state.name.more_needed();

        if name_wanted && !self.is_rejected(RequestKind::Name) {
            if self.counter.sent(RequestKind::Name) >= self.retry.name_requests {
                return Err(RetriesExhausted {
                    kind: RequestKind::Name,
                    limit: self.retry.name_requests,
                });
            }

            let offset = if state.name.more_needed() {
                state.name.resume_offset()
            } else {
                0
            };

            state.name.clear_more_needed();

            return Ok(Some(Request::Name { offset }));
        }

        if self.counter.sent(RequestKind::Version) == 0 {
            return self.version();
        }

        if let Some(page) = state.walker.next_requery() {
            return Ok(Some(self.extended_features(page)));
        }

        if self.probe_wanted(ProbeKind::MalformedFeatures, RequestKind::MalformedFeatures) {
            return Ok(Some(Request::MalformedFeatures));
        }

        if self.probes.contains(ProbeKind::MalformedExtendedFeatures)
            && self.counter.sent(RequestKind::MalformedFeaturesExt) < MALFORMED_EXTENDED_FEATURES_SENDS
            && !self.is_rejected(RequestKind::MalformedFeaturesExt)
        {
            // the probe never sends more than 255 requests, so the page always fits
            let page = self.counter.sent(RequestKind::MalformedFeaturesExt) as u8 + 1;

            return Ok(Some(Request::MalformedFeaturesExt { page }));
        }

        if self.probe_wanted(ProbeKind::RoleSwitch, RequestKind::Switch) {
            return Ok(Some(Request::Switch {
                instant: DEFAULT_SWITCH_INSTANT,
            }));
        }

        if self.probe_wanted(ProbeKind::EncryptionKeySize, RequestKind::EncryptionKeySize) {
            return Ok(Some(Request::EncryptionKeySize { key_size: WEAK_KEY_SIZE }));
        }

        if self.probe_wanted(ProbeKind::Ping, RequestKind::Ping) {
            return Ok(Some(Request::Ping));
        }

        if !self.is_rejected(RequestKind::Version) && self.version_due(state.now) {
            return self.version();
        }

        Ok(None)
    }

    fn version(&self) -> Result<Option<Request>, RetriesExhausted> {
        if self.counter.sent(RequestKind::Version) >= self.retry.version_requests {
            Err(RetriesExhausted {
                kind: RequestKind::Version,
                limit: self.retry.version_requests,
            })
        } else {
            Ok(Some(Request::Version(self.version_parameters)))
        }
    }

    /// Pick the request for this transmit opportunity
    ///
    /// The sent count of the chosen category is incremented. A complete fingerprint only sends the
    /// queued re-queries of feature pages, and nothing is ever chosen once the scheduler stalled. A
    /// [`RetriesExhausted`] is returned by the call that stalls the scheduler, and every later call
    /// returns `Ok(None)`.
    pub fn next(&mut self, mut state: ScheduleState<'_>) -> Result<Option<Request>, RetriesExhausted> {
        if self.stalled {
            return Ok(None);
        }

        let request = if state.completion.is_complete() {
            state.walker.next_requery().map(|page| self.extended_features(page))
        } else {
            match self.choose(&mut state) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("(LMP) {}", e);

                    self.stalled = true;

                    return Err(e);
                }
            }
        };

        if let Some(request) = request {
            log::trace!("(LMP) scheduling {}", request);

            self.counter.record_sent(request.kind());

            if let Request::Version(_) = request {
                self.last_version = Some(state.now);
            }
        }

        Ok(request)
    }
}
