//! Extended feature pages
//!
//! Extended features are requested one page at a time with `LMP_features_req_ext`. The peer
//! declares the highest page it supports within every `LMP_features_res_ext`, and a well behaved
//! requester never asks beyond that page. The [`FeaturePageWalker`] keeps the table of received
//! pages and, when out of range probing is enabled, the values a peer returns for pages it claims
//! not to have.
//!
//! # Leaks
//! A non-zero value returned for a page beyond the declared maximum is a *candidate* information
//! leak. It becomes more interesting the more often the same value is returned for the same page, so
//! the walker keeps count of repeats ([`LeakConfidence`]) but never decides whether a candidate is a
//! real leak.

use std::collections::{BTreeMap, VecDeque};

/// The highest page number of an `LMP_features_req_ext`
pub const MAX_PAGE: u8 = 255;

/// Feature pages received from the peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeaturePageTable {
    pages: BTreeMap<u8, [u8; 8]>,
    max_page: Option<u8>,
}

impl FeaturePageTable {
    /// The maximum page declared by the first legitimate response
    pub fn max_page(&self) -> Option<u8> {
        self.max_page
    }

    pub fn get(&self, page: u8) -> Option<&[u8; 8]> {
        self.pages.get(&page)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8; 8])> + '_ {
        self.pages.iter().map(|(page, features)| (*page, features))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// The repeat observation counters of a candidate leak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakConfidence {
    /// The page the value was returned for
    pub page: u8,
    /// The first value returned for the page
    pub value: u64,
    /// Later responses that returned the same value
    pub confirmations: u32,
    /// Later responses that returned a different non-zero value
    pub mismatches: u32,
}

/// Candidate leaks keyed by page number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakRecord {
    entries: BTreeMap<u8, LeakConfidence>,
}

impl LeakRecord {
    pub fn get(&self, page: u8) -> Option<&LeakConfidence> {
        self.entries.get(&page)
    }

    pub fn contains(&self, page: u8) -> bool {
        self.entries.contains_key(&page)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LeakConfidence> + '_ {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a value returned for an out of range page
    ///
    /// The first observation of a page is stored, later ones are compared against it.
    fn observe(&mut self, page: u8, value: u64) -> LeakConfidence {
        match self.entries.get_mut(&page) {
            Some(entry) => {
                if entry.value == value {
                    entry.confirmations += 1;
                } else {
                    entry.mismatches += 1;
                }

                *entry
            }
            None => {
                let entry = LeakConfidence {
                    page,
                    value,
                    confirmations: 0,
                    mismatches: 0,
                };

                self.entries.insert(page, entry);

                entry
            }
        }
    }
}

/// What a received `LMP_features_res_ext` did to the walker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page was within the declared maximum and stored in the page table
    Recorded { page: u8 },
    /// The page was beyond the declared maximum and was discarded
    Discarded { page: u8, max_page: u8 },
    /// The page was beyond the declared maximum and carried only zeros
    OutOfRange { page: u8 },
    /// The page was beyond the declared maximum and carried a non-zero value
    Leak(LeakConfidence),
}

/// Walker of the extended feature pages of a peer
#[derive(Debug, Clone, Default)]
pub struct FeaturePageWalker {
    table: FeaturePageTable,
    leaks: LeakRecord,
    experimental: bool,
    requeries: VecDeque<u8>,
}

impl FeaturePageWalker {
    /// Create a new `FeaturePageWalker`
    ///
    /// With `experimental` set, pages beyond the declared maximum are accepted and searched for
    /// leaked values.
    pub fn new(experimental: bool) -> Self {
        FeaturePageWalker {
            experimental,
            ..Default::default()
        }
    }

    pub fn table(&self) -> &FeaturePageTable {
        &self.table
    }

    pub fn leaks(&self) -> &LeakRecord {
        &self.leaks
    }

    /// The maximum page declared by the peer
    pub fn max_page(&self) -> Option<u8> {
        self.table.max_page
    }

    /// Queue another request for `page`
    pub fn requery(&mut self, page: u8) {
        log::debug!("(LMP) queued re-query of extended features page {}", page);

        self.requeries.push_back(page);
    }

    /// Take the next queued re-query
    pub fn next_requery(&mut self) -> Option<u8> {
        self.requeries.pop_front()
    }

    /// Process the fields of an `LMP_features_res_ext`
    pub fn receive(&mut self, page: u8, max_page: u8, features: [u8; 8]) -> PageOutcome {
        let bound = self.table.max_page.unwrap_or(max_page);

        if page <= bound {
            match self.table.max_page {
                None => {
                    log::debug!("(LMP) peer declared {} as the maximum extended features page", max_page);

                    self.table.max_page = Some(max_page);
                }
                Some(declared) if declared != max_page => {
                    log::info!(
                        "(LMP) ignoring maximum page {} of page {}, the peer first declared {}",
                        max_page,
                        page,
                        declared
                    );
                }
                Some(_) => (),
            }

            self.table.pages.insert(page, features);

            return PageOutcome::Recorded { page };
        }

        if !self.experimental {
            log::debug!(
                "(LMP) discarding extended features page {} beyond the maximum page {}",
                page,
                bound
            );

            return PageOutcome::Discarded { page, max_page: bound };
        }

        match u64::from_le_bytes(features) {
            0 => PageOutcome::OutOfRange { page },
            value => {
                let confidence = self.leaks.observe(page, value);

                log::warn!(
                    "(LMP) possible info leak: extended features page {} = 0x{:016X}",
                    page,
                    value
                );

                PageOutcome::Leak(confidence)
            }
        }
    }
}

const PAGE0_FEATURE_NAMES: [&str; 64] = [
    "3 slot packets",
    "5 slot packets",
    "Encryption",
    "Slot offset",
    "Timing accuracy",
    "Role switch",
    "Hold mode",
    "Sniff mode",
    "Previously used",
    "Power control requests",
    "Channel quality driven data rate (CQDDR)",
    "SCO link",
    "HV2 packets",
    "HV3 packets",
    "μ-law log synchronous data",
    "A-law log synchronous data",
    "CVSD synchronous data",
    "Paging parameter negotiation",
    "Power control",
    "Transparent synchronous data",
    "Flow control lag (least significant bit)",
    "Flow control lag (middle bit)",
    "Flow control lag (most significant bit)",
    "Broadcast Encryption",
    "Reserved for future use",
    "Enhanced Data Rate ACL 2 Mb/s mode",
    "Enhanced Data Rate ACL 3 Mb/s mode",
    "Enhanced inquiry scan",
    "Interlaced inquiry scan",
    "Interlaced page scan",
    "RSSI with inquiry results",
    "Extended SCO link (EV3 packets)",
    "EV4 packets",
    "EV5 packets",
    "Reserved for future use",
    "AFH capable Peripheral",
    "AFH classification Peripheral",
    "BR/EDR Not Supported",
    "LE Supported (Controller)",
    "3-slot Enhanced Data Rate ACL packets",
    "5-slot Enhanced Data Rate ACL packets",
    "Sniff subrating",
    "Pause encryption",
    "AFH capable Central",
    "AFH classification Central",
    "Enhanced Data Rate eSCO 2 Mb/s mode",
    "Enhanced Data Rate eSCO 3 Mb/s mode",
    "3-slot Enhanced Data Rate eSCO packets",
    "Extended Inquiry Response",
    "Simultaneous LE and BR/EDR to Same Device Capable (Controller)",
    "Reserved for future use",
    "Secure Simple Pairing (Controller Support)",
    "Encapsulated PDU",
    "Erroneous Data Reporting",
    "Non-flushable Packet Boundary Flag",
    "Reserved for future use",
    "HCI_Link_Supervision_Timeout_Changed event",
    "Variable Inquiry TX Power Level",
    "Enhanced Power Control",
    "Reserved for future use",
    "Reserved for future use",
    "Reserved for future use",
    "Reserved for future use",
    "Extended features",
];

/// The names of the features set within a basic (page 0) feature mask
pub fn page0_feature_names(features: &[u8; 8]) -> Vec<&'static str> {
    let mask = u64::from_le_bytes(*features);

    PAGE0_FEATURE_NAMES
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1u64 << bit) != 0)
        .map(|(_, name)| *name)
        .collect()
}
