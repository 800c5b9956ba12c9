//! Per peer fingerprinting state
//!
//! A [`Session`] exists for every peer being fingerprinted. It owns the state of every component
//! (name reassembly, feature pages, the consistency auditor, completion tracking, and the request
//! scheduler) and turns classified responses into [`Finding`]s and [`Event`]s.

use crate::address::{BluetoothDeviceAddress, ClassOfDevice, ConnectionHandle};
use crate::auditor::{Consistency, ConsistencyAuditor};
use crate::classifier::Response;
use crate::completion::{CompletionMask, CompletionTracker};
use crate::config::{Config, ProbeSet};
use crate::errors::ErrorCode;
use crate::features::{page0_feature_names, FeaturePageWalker, LeakConfidence, PageOutcome};
use crate::name::{DeviceName, NameError, NameProgress, NameReassembler};
use crate::pdu::request::{Request, RequestKind, WEAK_KEY_SIZE};
use crate::pdu::{ExtendedOpcode, Opcode};
use crate::report::Finding;
use crate::scheduler::{RequestCounter, RequestScheduler, RetriesExhausted, ScheduleState};
use crate::version::{LmpVersion, UnknownVersion};
use std::collections::VecDeque;
use std::time::Instant;

/// Something the host may want to react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Every mandatory response was received
    Complete,
    /// The peer rejected a request
    ///
    /// `kind` is `None` when the echoed opcode is not one of a request of this crate.
    Rejected {
        kind: Option<RequestKind>,
        error: ErrorCode,
    },
    /// The peer accepted a one byte encryption key
    WeakKeyAccepted,
    /// The features response does not depend on the features of the requester
    RequestIndependent,
    /// The features response depends on the features of the requester
    RequestDependent,
    /// A candidate info leak was observed
    InfoLeak(LeakConfidence),
}

/// The version information of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: u8,
    pub company_id: u16,
    pub subversion: u16,
}

impl VersionInfo {
    pub fn lmp_version(&self) -> Result<LmpVersion, UnknownVersion> {
        LmpVersion::try_from_raw(self.version)
    }
}

/// The state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Requests are still being sent
    Active,
    /// Every mandatory response was received
    Complete,
    /// A retry limit was exhausted before the fingerprint was complete
    Stalled,
}

/// The result of asking a session for a request
#[derive(Debug, Default)]
pub struct Scheduled {
    pub request: Option<Request>,
    pub findings: Vec<Finding>,
}

/// The result of handing a response to a session
#[derive(Debug, Default)]
pub struct Update {
    pub findings: Vec<Finding>,
    pub events: Vec<Event>,
}

impl Update {
    fn finding(&mut self, finding: Finding) {
        self.findings.push(finding)
    }

    fn event(&mut self, event: Event) {
        self.events.push(event)
    }
}

/// Fingerprinting state of a single peer
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    address: Option<BluetoothDeviceAddress>,
    class: Option<ClassOfDevice>,
    name: NameReassembler,
    device_name: Option<DeviceName>,
    walker: FeaturePageWalker,
    features: Option<[u8; 8]>,
    version: Option<VersionInfo>,
    auditor: ConsistencyAuditor,
    completion: CompletionTracker,
    scheduler: RequestScheduler,
    probes: ProbeSet,
    pending_features: VecDeque<RequestKind>,
    pending_extended: VecDeque<RequestKind>,
    weak_key_proposed: bool,
    weak_key_accepted: bool,
    probing_announced: bool,
    state: SessionState,
}

impl Session {
    pub fn new(handle: ConnectionHandle, address: Option<BluetoothDeviceAddress>, config: &Config) -> Self {
        Session {
            handle,
            address,
            class: None,
            name: NameReassembler::new(),
            device_name: None,
            walker: FeaturePageWalker::new(config.probes.reads_beyond_max_page()),
            features: None,
            version: None,
            auditor: ConsistencyAuditor::new(),
            completion: CompletionTracker::new(),
            scheduler: RequestScheduler::new(config),
            probes: config.probes.clone(),
            pending_features: VecDeque::new(),
            pending_extended: VecDeque::new(),
            weak_key_proposed: false,
            weak_key_accepted: false,
            probing_announced: false,
            state: SessionState::Active,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn address(&self) -> Option<BluetoothDeviceAddress> {
        self.address
    }

    pub fn class_of_device(&self) -> Option<ClassOfDevice> {
        self.class
    }

    pub fn device_name(&self) -> Option<&DeviceName> {
        self.device_name.as_ref()
    }

    /// The basic features of the peer (the response to the well formed `LMP_features_req`)
    pub fn features(&self) -> Option<[u8; 8]> {
        self.features
    }

    pub fn feature_pages(&self) -> &FeaturePageWalker {
        &self.walker
    }

    pub fn version(&self) -> Option<VersionInfo> {
        self.version
    }

    pub fn completion(&self) -> CompletionMask {
        self.completion.mask()
    }

    pub fn counter(&self) -> &RequestCounter {
        self.scheduler.counter()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the peer accepted a one byte encryption key
    pub fn weak_key_accepted(&self) -> bool {
        self.weak_key_accepted
    }

    pub(crate) fn requery(&mut self, page: u8) {
        self.walker.requery(page)
    }

    /// Pick the request for this transmit opportunity
    pub(crate) fn next_request(&mut self, now: Instant) -> Result<Scheduled, RetriesExhausted> {
        let mut scheduled = Scheduled::default();

        let result = self.scheduler.next(ScheduleState {
            name: &mut self.name,
            walker: &mut self.walker,
            completion: &self.completion,
            now,
        });

        let request = match result {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(scheduled),
            Err(e) => {
                self.state = SessionState::Stalled;

                return Err(e);
            }
        };

        match request.kind() {
            kind @ (RequestKind::Features | RequestKind::MalformedFeatures) => self.pending_features.push_back(kind),
            kind @ (RequestKind::FeaturesExt | RequestKind::MalformedFeaturesExt) => {
                self.pending_extended.push_back(kind)
            }
            RequestKind::EncryptionKeySize => {
                self.weak_key_proposed = matches!(request, Request::EncryptionKeySize { key_size } if key_size == WEAK_KEY_SIZE)
            }
            _ => (),
        }

        let probing = matches!(
            request.kind(),
            RequestKind::MalformedFeatures
                | RequestKind::MalformedFeaturesExt
                | RequestKind::Switch
                | RequestKind::EncryptionKeySize
                | RequestKind::Ping
        );

        if probing && !self.probing_announced {
            self.probing_announced = true;

            log::info!("(LMP) beginning experimental checks of {}: {}", self.handle, self.probes);

            scheduled.findings.push(Finding::ExperimentalChecks(self.probes.clone()));
        }

        scheduled.request = Some(request);

        Ok(scheduled)
    }

    /// The request category a rejected opcode belongs to
    fn rejected_kind(&mut self, opcode: u8) -> Option<RequestKind> {
        match Opcode::try_from_code(opcode).ok()? {
            Opcode::FeaturesReq => Some(self.pending_features.pop_front().unwrap_or(RequestKind::Features)),
            Opcode::Escape => None,
            opcode => RequestKind::ALL.into_iter().find(|kind| kind.opcode() == opcode),
        }
    }

    /// The request category a rejected extended opcode belongs to
    fn rejected_extended_kind(&mut self, extended_opcode: u8) -> Option<RequestKind> {
        match ExtendedOpcode::try_from_code(extended_opcode).ok()? {
            ExtendedOpcode::FeaturesReqExt => Some(
                self.pending_extended
                    .pop_front()
                    .unwrap_or(RequestKind::FeaturesExt),
            ),
            ExtendedOpcode::PingReq => Some(RequestKind::Ping),
            _ => None,
        }
    }

    fn rejected(&mut self, update: &mut Update, kind: Option<RequestKind>, error: ErrorCode) {
        match kind {
            Some(kind) if self.scheduler.reject(kind) => {
                log::warn!("(LMP) {} rejected by {}: {}", kind, self.handle, error);
            }
            Some(kind) => log::debug!("(LMP) {} rejected again by {}: {}", kind, self.handle, error),
            None => log::debug!("(LMP) unknown request rejected by {}: {}", self.handle, error),
        }

        update.event(Event::Rejected { kind, error });
    }

    fn mark(&mut self, update: &mut Update, category: CompletionMask) {
        if self.completion.mark(category) {
            log::info!("(LMP) all responses received from {}", self.handle);

            self.state = SessionState::Complete;

            update.finding(Finding::Complete);

            update.event(Event::Complete);
        }
    }

    fn consistency(update: &mut Update, consistency: Option<Consistency>) {
        match consistency {
            Some(Consistency::Independent) => {
                update.finding(Finding::RequestIndependent);

                update.event(Event::RequestIndependent);
            }
            Some(Consistency::Dependent { baseline, probe }) => {
                log::warn!("(LMP) features response depends on the requester's features");

                update.finding(Finding::RequestDependent { baseline, probe });

                update.event(Event::RequestDependent);
            }
            None => (),
        }
    }

    /// Process a classified response
    ///
    /// Nothing about the session changes when an error is returned.
    pub(crate) fn process(&mut self, response: Response) -> Result<Update, NameError> {
        let mut update = Update::default();

        match response {
            Response::NotAccepted { opcode, error } => {
                update.finding(Finding::NotAccepted {
                    opcode,
                    error: error.into_code(),
                });

                let kind = self.rejected_kind(opcode);

                self.rejected(&mut update, kind, error);
            }
            Response::NotAcceptedExt { extended_opcode, error } => {
                update.finding(Finding::NotAcceptedExt {
                    extended_opcode,
                    error: error.into_code(),
                });

                let kind = self.rejected_extended_kind(extended_opcode);

                self.rejected(&mut update, kind, error);
            }
            Response::Accepted { opcode } => {
                log::debug!("(LMP) {} accepted opcode {}", self.handle, opcode);

                if opcode == Opcode::EncryptionKeySizeReq.into_code() && self.weak_key_proposed && !self.weak_key_accepted {
                    log::warn!("(LMP) {} accepted a one byte encryption key", self.handle);

                    self.weak_key_accepted = true;

                    update.finding(Finding::WeakKeyAccepted);

                    update.event(Event::WeakKeyAccepted);
                }
            }
            Response::FeaturesRes { features } => {
                let kind = self.pending_features.pop_front().unwrap_or(RequestKind::Features);

                self.scheduler.counter_mut().record_received(kind);

                log::debug!(
                    "(LMP) {} features of {}: {}",
                    kind,
                    self.handle,
                    page0_feature_names(&features).join(", ")
                );

                update.finding(Finding::Features { features });

                let consistency = match kind {
                    RequestKind::MalformedFeatures => self.auditor.probe(features),
                    _ => {
                        if self.features.is_none() {
                            self.features = Some(features);
                        }

                        self.auditor.legitimate(features)
                    }
                };

                Self::consistency(&mut update, consistency);

                self.mark(&mut update, CompletionMask::FEATURES);
            }
            Response::FeaturesResExt {
                page,
                max_page,
                features,
            } => {
                let kind = self.pending_extended.pop_front().unwrap_or(RequestKind::FeaturesExt);

                match self.walker.receive(page, max_page, features) {
                    PageOutcome::Discarded { .. } => (),
                    outcome => {
                        self.scheduler.counter_mut().record_received(kind);

                        update.finding(Finding::ExtendedFeatures {
                            page,
                            max_page,
                            features,
                        });

                        if let PageOutcome::Leak(confidence) = outcome {
                            update.finding(Finding::InfoLeak {
                                page: confidence.page,
                                value: confidence.value,
                                confirmations: confidence.confirmations,
                                mismatches: confidence.mismatches,
                            });

                            update.event(Event::InfoLeak(confidence));
                        }
                    }
                }

                self.mark(&mut update, CompletionMask::EXTENDED_FEATURES);
            }
            Response::NameRes {
                offset,
                total,
                acl_length,
                payload,
            } => {
                let progress = self.name.push(offset, total, acl_length, &payload)?;

                self.scheduler.counter_mut().record_received(RequestKind::Name);

                if let NameProgress::Complete(name) = progress {
                    log::info!("(LMP) name of {} is \"{}\"", self.handle, name);

                    update.finding(Finding::Name {
                        raw: name.as_bytes().to_vec(),
                    });

                    self.device_name = Some(name);

                    self.mark(&mut update, CompletionMask::NAME);
                }
            }
            Response::VersionRes {
                version,
                company_id,
                subversion,
            } => {
                let info = VersionInfo {
                    version,
                    company_id,
                    subversion,
                };

                match info.lmp_version() {
                    Ok(lmp_version) => log::info!(
                        "(LMP) {} runs {} (company 0x{:04X}, sub-version 0x{:04X})",
                        self.handle,
                        lmp_version,
                        company_id,
                        subversion
                    ),
                    Err(e) => log::info!("(LMP) {} sent {}", self.handle, e),
                }

                self.version = Some(info);

                self.scheduler.counter_mut().record_received(RequestKind::Version);

                update.finding(Finding::Version {
                    version,
                    company_id,
                    subversion,
                });

                self.mark(&mut update, CompletionMask::VERSION);
            }
            Response::PingRes => {
                self.scheduler.counter_mut().record_received(RequestKind::Ping);

                update.finding(Finding::PingResponse);
            }
            Response::EncryptionKeySizeReq { key_size } => {
                log::debug!("(LMP) {} requested a key size of {}", self.handle, key_size);

                update.finding(Finding::PeerKeySizeRequest { key_size });
            }
            Response::Fhs { class, address } => {
                self.class = Some(class);

                self.address = Some(address);

                update.finding(Finding::ClassOfDevice(class));

                update.finding(Finding::Address(address));
            }
            Response::Unclassified => (),
        }

        Ok(update)
    }

    /// The findings recorded when the session ends
    ///
    /// `disconnected` is set when the session ends because the connection went down.
    pub(crate) fn closing_findings(&self, disconnected: bool) -> Vec<Finding> {
        let mut findings = Vec::new();

        if disconnected && self.weak_key_accepted {
            findings.push(Finding::WeakKeyTeardown);
        }

        if self.state == SessionState::Active {
            findings.push(Finding::Incomplete);
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeKind;

    fn session(config: Config) -> Session {
        Session::new(ConnectionHandle::try_from(1).unwrap(), None, &config)
    }

    fn request(session: &mut Session) -> Option<Request> {
        session.next_request(Instant::now()).unwrap().request
    }

    #[test]
    fn weak_key_acceptance() {
        let config = Config {
            probes: ProbeSet::new().with(ProbeKind::EncryptionKeySize),
            ..Default::default()
        };

        let mut session = session(config);

        // accepted before the proposal was sent
        let update = session.process(Response::Accepted { opcode: 16 }).unwrap();

        assert!(update.findings.is_empty());

        for _ in 0..4 {
            request(&mut session);
        }

        let scheduled = session.next_request(Instant::now()).unwrap();

        assert_eq!(Some(Request::EncryptionKeySize { key_size: 1 }), scheduled.request);

        assert!(matches!(scheduled.findings[..], [Finding::ExperimentalChecks(_)]));

        let update = session.process(Response::Accepted { opcode: 16 }).unwrap();

        assert_eq!(vec![Finding::WeakKeyAccepted], update.findings);

        assert_eq!(vec![Event::WeakKeyAccepted], update.events);

        assert_eq!(vec![Finding::WeakKeyTeardown, Finding::Incomplete], session.closing_findings(true));

        assert!(session.weak_key_accepted());
    }

    #[test]
    fn rejection_is_terminal() {
        let mut session = session(Config::default());

        for _ in 0..3 {
            request(&mut session);
        }

        let update = session
            .process(Response::NotAccepted {
                opcode: Opcode::NameReq.into_code(),
                error: ErrorCode::UnknownLmpPdu,
            })
            .unwrap();

        assert_eq!(
            vec![Event::Rejected {
                kind: Some(RequestKind::Name),
                error: ErrorCode::UnknownLmpPdu
            }],
            update.events
        );

        session.process(Response::NameRes {
            offset: 0,
            total: 30,
            acl_length: 17,
            payload: vec![b'a'; 14],
        })
        .unwrap();

        // more name data is needed but the name request was rejected
        assert_eq!(Some(RequestKind::Version), request(&mut session).map(|r| r.kind()));

        let update = session
            .process(Response::NotAccepted {
                opcode: Opcode::SwitchReq.into_code(),
                error: ErrorCode::RoleChangeNotAllowed,
            })
            .unwrap();

        assert_eq!(
            vec![Event::Rejected {
                kind: Some(RequestKind::Switch),
                error: ErrorCode::RoleChangeNotAllowed
            }],
            update.events
        );

        // an opcode that is never requested has no category
        let update = session
            .process(Response::NotAccepted {
                opcode: Opcode::Accepted.into_code(),
                error: ErrorCode::UnknownLmpPdu,
            })
            .unwrap();

        assert_eq!(
            vec![Event::Rejected {
                kind: None,
                error: ErrorCode::UnknownLmpPdu
            }],
            update.events
        );
    }

    #[test]
    fn malformed_features_response_goes_to_the_auditor() {
        let config = Config {
            probes: ProbeSet::new().with(ProbeKind::MalformedFeatures),
            ..Default::default()
        };

        let mut session = session(config);

        let baseline = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];

        for _ in 0..5 {
            request(&mut session);
        }

        session.process(Response::FeaturesRes { features: baseline }).unwrap();

        let update = session.process(Response::FeaturesRes { features: [0xFF; 8] }).unwrap();

        assert_eq!(vec![Event::RequestDependent], update.events);

        assert_eq!(Some(baseline), session.features());

        assert_eq!(1, session.counter().received(RequestKind::MalformedFeatures));
    }

    #[test]
    fn completion() {
        let mut session = session(Config::default());

        let responses = vec![
            Response::FeaturesRes { features: [1; 8] },
            Response::FeaturesResExt {
                page: 1,
                max_page: 1,
                features: [2; 8],
            },
            Response::NameRes {
                offset: 0,
                total: 3,
                acl_length: 17,
                payload: b"abc".to_vec(),
            },
            Response::VersionRes {
                version: 9,
                company_id: 15,
                subversion: 1,
            },
        ];

        let mut events = Vec::new();

        for response in responses {
            events.extend(session.process(response).unwrap().events);
        }

        assert_eq!(vec![Event::Complete], events);

        assert_eq!(SessionState::Complete, session.state());

        assert_eq!(None, request(&mut session));

        assert!(session.closing_findings(true).is_empty());

        assert_eq!(Ok(LmpVersion::V5_0), session.version().unwrap().lmp_version());

        assert_eq!("abc", session.device_name().unwrap().to_text());
    }
}
