//! Descriptor cloning
//!
//! To re-present the attached controller to the DAW host unchanged, the
//! bridge walks the controller's USB descriptors (device, configuration,
//! language ids, and every referenced string) and keeps an exact mirror.
//! The host-facing role then replays that mirror, so the DAW's driver
//! enumerates the bridge exactly as if the controller were plugged in
//! directly.
//!
//! [`DescriptorCloner`] is a plain state-machine value: the owning loop
//! calls [`DescriptorCloner::start_next`] to learn which fetch to issue,
//! performs it through the transport, and feeds the outcome back through
//! [`DescriptorCloner::complete`]. Exactly one fetch is outstanding at a
//! time, and every buffer the mirror owns is dropped and rebuilt at the
//! start of each cloning cycle.

mod responder;

pub use responder::DescriptorResponder;

use tracing::{debug, warn};

use crate::transport::TransferResult;

/// Length of the standard USB device descriptor.
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

/// Bytes of the configuration descriptor needed to read `wTotalLength`.
pub const CONFIG_HEADER_LEN: u16 = 9;

/// String descriptor type byte.
pub const DESC_TYPE_STRING: u8 = 0x03;

/// The cloned 18-byte device descriptor, kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    bytes: [u8; DEVICE_DESCRIPTOR_LEN],
}

impl DeviceDescriptor {
    fn from_bytes(raw: &[u8]) -> Option<Self> {
        let bytes: [u8; DEVICE_DESCRIPTOR_LEN] = raw.try_into().ok()?;
        Some(Self { bytes })
    }

    /// The raw descriptor, byte for byte as the controller reported it.
    pub fn bytes(&self) -> &[u8; DEVICE_DESCRIPTOR_LEN] {
        &self.bytes
    }

    /// bMaxPacketSize0, needed to configure the device-facing endpoint 0.
    pub fn max_packet_size_0(&self) -> u8 {
        self.bytes[7]
    }

    /// iManufacturer string index (0 = none).
    pub fn i_manufacturer(&self) -> u8 {
        self.bytes[14]
    }

    /// iProduct string index (0 = none).
    pub fn i_product(&self) -> u8 {
        self.bytes[15]
    }

    /// iSerialNumber string index (0 = none).
    pub fn i_serial_number(&self) -> u8 {
        self.bytes[16]
    }

    /// bNumConfigurations. Anything but 1 aborts cloning.
    pub fn num_configurations(&self) -> u8 {
        self.bytes[17]
    }
}

/// All cloned string descriptors for one language id.
///
/// `strings` is ordered like the cloner's index list; each entry is the raw
/// length-prefixed UTF-16LE descriptor blob.
#[derive(Debug, Clone)]
pub struct LanguageStrings {
    pub langid: u16,
    pub strings: Vec<Vec<u8>>,
}

/// Where the cloning protocol stands. Single source of truth for whether a
/// mirror is ready to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneState {
    /// No mirror, no cycle in progress
    Uncloned,
    /// Attach seen; first fetch not yet issued
    StartCloning,
    /// A fetch is outstanding, or the machine is parked after a failure
    Cloning,
    /// Between string fetches; the next one is ready to issue
    CloneNextString,
    /// Mirror complete and safe to serve
    Cloned,
}

/// A control transfer the owning loop should issue next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    /// The 18-byte device descriptor
    DeviceDescriptor { addr: u8 },
    /// The first [`CONFIG_HEADER_LEN`] bytes of the configuration descriptor
    ConfigurationHeader { addr: u8 },
    /// The full configuration descriptor, `total_len` bytes
    ConfigurationFull { addr: u8, total_len: u16 },
    /// The class driver's string index list; answered locally by the
    /// transport rather than on the wire
    ClassStringIndices { addr: u8 },
    /// String index 0: the supported language id list
    LanguageIds { addr: u8 },
    /// One string descriptor
    StringDescriptor { addr: u8, index: u8, langid: u16 },
}

/// What a completed transfer did to the cloning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneEvent {
    /// The cycle moved forward; keep driving
    Advanced,
    /// The mirror is complete; emitted exactly once per cycle
    Completed,
    /// The device shape is unsupported; back to Uncloned
    Aborted,
    /// Transfer failed; the machine is parked until re-attach
    Stalled,
}

/// The cloning state machine and the mirror it assembles.
pub struct DescriptorCloner {
    state: CloneState,
    addr: u8,
    /// Fetch currently on the wire; at most one
    pending: Option<FetchRequest>,
    /// Next fetch to issue in the device/config/langid phase
    next: Option<FetchRequest>,
    device: Option<DeviceDescriptor>,
    configuration: Option<Vec<u8>>,
    /// String indices to clone, in the order they were collected:
    /// manufacturer, product, serial (each when nonzero), then the class
    /// driver's indices
    index_list: Vec<u8>,
    languages: Vec<LanguageStrings>,
    string_cursor: usize,
    langid_cursor: usize,
}

impl DescriptorCloner {
    pub fn new() -> Self {
        Self {
            state: CloneState::Uncloned,
            addr: 0,
            pending: None,
            next: None,
            device: None,
            configuration: None,
            index_list: Vec::new(),
            languages: Vec::new(),
            string_cursor: 0,
            langid_cursor: 0,
        }
    }

    pub fn state(&self) -> CloneState {
        self.state
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    pub fn configuration(&self) -> Option<&[u8]> {
        self.configuration.as_deref()
    }

    pub fn languages(&self) -> &[LanguageStrings] {
        &self.languages
    }

    pub fn index_list(&self) -> &[u8] {
        &self.index_list
    }

    /// Drop the previous mirror in full: configuration blob, every string
    /// buffer in every language entry, and the index list.
    fn reset_mirror(&mut self) {
        self.device = None;
        self.configuration = None;
        self.index_list = Vec::new();
        self.languages = Vec::new();
        self.string_cursor = 0;
        self.langid_cursor = 0;
    }

    /// Start a cloning cycle for the controller at `addr`.
    ///
    /// Any previous mirror is freed before anything else happens, whether
    /// the last cycle finished, stalled, or was cut short by a detach.
    pub fn attach(&mut self, addr: u8) {
        self.reset_mirror();
        self.addr = addr;
        self.pending = None;
        self.next = Some(FetchRequest::DeviceDescriptor { addr });
        self.state = CloneState::StartCloning;
        debug!(addr, "descriptor cloning scheduled");
    }

    /// The controller is gone; stop the cycle immediately.
    ///
    /// The stale mirror is kept until the next [`attach`](Self::attach)
    /// frees it, but `Uncloned` means nothing will serve it.
    pub fn detach(&mut self) {
        self.state = CloneState::Uncloned;
        self.pending = None;
        self.next = None;
        self.addr = 0;
    }

    /// Return the next fetch to put on the wire, if any.
    ///
    /// Returns `None` while a fetch is outstanding, when the machine is
    /// parked after a failure, and in `Uncloned`/`Cloned`.
    pub fn start_next(&mut self) -> Option<FetchRequest> {
        if self.pending.is_some() {
            return None;
        }
        let request = match self.state {
            CloneState::StartCloning | CloneState::Cloning => self.next.take()?,
            CloneState::CloneNextString => FetchRequest::StringDescriptor {
                addr: self.addr,
                index: *self.index_list.get(self.string_cursor)?,
                langid: self.languages.get(self.langid_cursor)?.langid,
            },
            CloneState::Uncloned | CloneState::Cloned => return None,
        };
        self.state = CloneState::Cloning;
        self.pending = Some(request.clone());
        Some(request)
    }

    /// Feed back the outcome of the fetch issued by
    /// [`start_next`](Self::start_next) and advance the machine.
    pub fn complete(&mut self, outcome: TransferResult) -> CloneEvent {
        let Some(request) = self.pending.take() else {
            warn!("transfer completion with no fetch outstanding");
            return CloneEvent::Stalled;
        };
        match outcome {
            Ok(bytes) => self.advance(request, bytes),
            Err(err) => {
                // Step-1 failures abort outright; anything later parks the
                // machine where it stands, no retry (host enumeration of
                // the bridge stalls rather than serving a partial mirror).
                if let FetchRequest::DeviceDescriptor { addr } = request {
                    warn!(addr, %err, "device descriptor fetch failed, cloning aborted");
                    self.state = CloneState::Uncloned;
                    CloneEvent::Aborted
                } else {
                    warn!(?request, %err, "transfer failed, cloning parked");
                    self.next = None;
                    CloneEvent::Stalled
                }
            }
        }
    }

    fn advance(&mut self, request: FetchRequest, bytes: Vec<u8>) -> CloneEvent {
        match request {
            FetchRequest::DeviceDescriptor { addr } => {
                let Some(device) = DeviceDescriptor::from_bytes(&bytes) else {
                    warn!(addr, len = bytes.len(), "short device descriptor, cloning aborted");
                    self.state = CloneState::Uncloned;
                    return CloneEvent::Aborted;
                };
                if device.num_configurations() != 1 {
                    warn!(
                        addr,
                        num_configurations = device.num_configurations(),
                        "unsupported device shape, cloning aborted"
                    );
                    self.state = CloneState::Uncloned;
                    return CloneEvent::Aborted;
                }
                self.device = Some(device);
                self.next = Some(FetchRequest::ConfigurationHeader { addr });
                CloneEvent::Advanced
            }
            FetchRequest::ConfigurationHeader { addr } => {
                if bytes.len() < 4 {
                    warn!(addr, len = bytes.len(), "short configuration header, cloning parked");
                    return CloneEvent::Stalled;
                }
                let total_len = u16::from_le_bytes([bytes[2], bytes[3]]);
                debug!(addr, total_len, "configuration descriptor length read");
                self.next = Some(FetchRequest::ConfigurationFull { addr, total_len });
                CloneEvent::Advanced
            }
            FetchRequest::ConfigurationFull { addr, total_len } => {
                if bytes.len() != total_len as usize {
                    warn!(
                        addr,
                        expected = total_len,
                        got = bytes.len(),
                        "configuration descriptor truncated, cloning parked"
                    );
                    return CloneEvent::Stalled;
                }
                self.configuration = Some(bytes);
                self.next = Some(FetchRequest::ClassStringIndices { addr });
                CloneEvent::Advanced
            }
            FetchRequest::ClassStringIndices { addr } => {
                self.build_index_list(&bytes);
                debug!(addr, indices = ?self.index_list, "string indices collected");
                self.next = Some(FetchRequest::LanguageIds { addr });
                CloneEvent::Advanced
            }
            FetchRequest::LanguageIds { addr } => {
                self.languages = parse_langid_list(&bytes);
                debug!(addr, langids = self.languages.len(), "language id list cloned");
                self.string_cursor = 0;
                self.langid_cursor = 0;
                if self.languages.is_empty() || self.index_list.is_empty() {
                    // nothing to fetch per language; the mirror is complete
                    self.state = CloneState::Cloned;
                    CloneEvent::Completed
                } else {
                    self.state = CloneState::CloneNextString;
                    CloneEvent::Advanced
                }
            }
            FetchRequest::StringDescriptor { index, langid, .. } => {
                self.store_string(index, langid, bytes)
            }
        }
    }

    /// Manufacturer, product and serial indices when nonzero, then the
    /// class driver's indices, in that order. The responder relies on this
    /// ordering to find a string by its original index.
    fn build_index_list(&mut self, class_indices: &[u8]) {
        self.index_list.clear();
        if let Some(device) = &self.device {
            for index in [
                device.i_manufacturer(),
                device.i_product(),
                device.i_serial_number(),
            ] {
                if index != 0 {
                    self.index_list.push(index);
                }
            }
        }
        self.index_list.extend_from_slice(class_indices);
    }

    fn store_string(&mut self, index: u8, langid: u16, bytes: Vec<u8>) -> CloneEvent {
        let declared = bytes.first().copied().unwrap_or(0) as usize;
        let mut blob = bytes;
        blob.truncate(declared.max(2).min(blob.len()));
        debug!(
            index,
            langid,
            text = %decode_string_descriptor(&blob),
            "string descriptor cloned"
        );
        self.languages[self.langid_cursor].strings.push(blob);

        self.string_cursor += 1;
        if self.string_cursor < self.index_list.len() {
            self.state = CloneState::CloneNextString;
            return CloneEvent::Advanced;
        }
        self.langid_cursor += 1;
        self.string_cursor = 0;
        if self.langid_cursor < self.languages.len() {
            self.state = CloneState::CloneNextString;
            CloneEvent::Advanced
        } else {
            debug!("all string descriptors cloned");
            self.state = CloneState::Cloned;
            CloneEvent::Completed
        }
    }
}

impl Default for DescriptorCloner {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the string-index-0 descriptor into empty per-language entries.
fn parse_langid_list(bytes: &[u8]) -> Vec<LanguageStrings> {
    let declared = bytes.first().copied().unwrap_or(0) as usize;
    let end = declared.min(bytes.len());
    let mut languages = Vec::new();
    let mut offset = 2;
    while offset + 1 < end {
        languages.push(LanguageStrings {
            langid: u16::from_le_bytes([bytes[offset], bytes[offset + 1]]),
            strings: Vec::new(),
        });
        offset += 2;
    }
    languages
}

/// Best-effort text of a UTF-16LE string descriptor, for logs only.
fn decode_string_descriptor(blob: &[u8]) -> String {
    let units: Vec<u16> = blob[2.min(blob.len())..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::TransferError;

    pub(crate) const ADDR: u8 = 5;

    /// 18-byte device descriptor: full-speed MIDI box, one configuration,
    /// manufacturer/product/serial at indices 1/2/3.
    pub(crate) fn device_bytes(num_configurations: u8) -> Vec<u8> {
        vec![
            18, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 64, 0x34, 0x12, 0x78, 0x56, 0x01, 0x01, 1,
            2, 3, num_configurations,
        ]
    }

    pub(crate) fn config_header(total_len: u16) -> Vec<u8> {
        let [lo, hi] = total_len.to_le_bytes();
        vec![9, 0x02, lo, hi, 2, 1, 0, 0x80, 50]
    }

    pub(crate) fn config_full(total_len: u16) -> Vec<u8> {
        let mut blob = config_header(total_len);
        blob.resize(total_len as usize, 0xAB);
        blob
    }

    pub(crate) fn langid_descriptor(langids: &[u16]) -> Vec<u8> {
        let mut blob = vec![(2 + 2 * langids.len()) as u8, DESC_TYPE_STRING];
        for langid in langids {
            blob.extend_from_slice(&langid.to_le_bytes());
        }
        blob
    }

    pub(crate) fn string_descriptor(text: &str) -> Vec<u8> {
        let mut blob = vec![0, DESC_TYPE_STRING];
        for unit in text.encode_utf16() {
            blob.extend_from_slice(&unit.to_le_bytes());
        }
        blob[0] = blob.len() as u8;
        blob
    }

    /// Drive a full cycle: 3 device strings + 1 class string, one langid.
    pub(crate) fn clone_to_completion(cloner: &mut DescriptorCloner) {
        cloner.attach(ADDR);
        assert_eq!(
            cloner.start_next(),
            Some(FetchRequest::DeviceDescriptor { addr: ADDR })
        );
        assert_eq!(cloner.complete(Ok(device_bytes(1))), CloneEvent::Advanced);
        assert_eq!(
            cloner.start_next(),
            Some(FetchRequest::ConfigurationHeader { addr: ADDR })
        );
        assert_eq!(cloner.complete(Ok(config_header(101))), CloneEvent::Advanced);
        assert_eq!(
            cloner.start_next(),
            Some(FetchRequest::ConfigurationFull {
                addr: ADDR,
                total_len: 101
            })
        );
        assert_eq!(cloner.complete(Ok(config_full(101))), CloneEvent::Advanced);
        assert_eq!(
            cloner.start_next(),
            Some(FetchRequest::ClassStringIndices { addr: ADDR })
        );
        assert_eq!(cloner.complete(Ok(vec![5])), CloneEvent::Advanced);
        assert_eq!(
            cloner.start_next(),
            Some(FetchRequest::LanguageIds { addr: ADDR })
        );
        assert_eq!(
            cloner.complete(Ok(langid_descriptor(&[0x0409]))),
            CloneEvent::Advanced
        );
        for (index, text) in [(1u8, "Arturia"), (2, "Keylab Essential"), (3, "KL0042"), (5, "MIDI")]
        {
            assert_eq!(
                cloner.start_next(),
                Some(FetchRequest::StringDescriptor {
                    addr: ADDR,
                    index,
                    langid: 0x0409
                })
            );
            let event = cloner.complete(Ok(string_descriptor(text)));
            if index == 5 {
                assert_eq!(event, CloneEvent::Completed);
            } else {
                assert_eq!(event, CloneEvent::Advanced);
            }
        }
        assert_eq!(cloner.state(), CloneState::Cloned);
    }

    #[test]
    fn test_full_cloning_cycle() {
        let mut cloner = DescriptorCloner::new();
        clone_to_completion(&mut cloner);

        assert_eq!(cloner.device().unwrap().bytes()[..], device_bytes(1)[..]);
        assert_eq!(cloner.device().unwrap().max_packet_size_0(), 64);
        assert_eq!(cloner.configuration().unwrap().len(), 101);
        assert_eq!(cloner.index_list(), &[1, 2, 3, 5]);
        assert_eq!(cloner.languages().len(), 1);
        assert_eq!(cloner.languages()[0].langid, 0x0409);
        assert_eq!(cloner.languages()[0].strings.len(), 4);
        // stored blobs keep the raw length-prefixed layout
        assert_eq!(cloner.languages()[0].strings[0], string_descriptor("Arturia"));

        // nothing more to issue once cloned
        assert_eq!(cloner.start_next(), None);
    }

    #[test]
    fn test_single_outstanding_request() {
        let mut cloner = DescriptorCloner::new();
        cloner.attach(ADDR);
        assert!(cloner.start_next().is_some());
        // a second drive step before completion issues nothing
        assert_eq!(cloner.start_next(), None);
        assert_eq!(cloner.state(), CloneState::Cloning);
    }

    #[test]
    fn test_abort_on_multiple_configurations() {
        let mut cloner = DescriptorCloner::new();
        cloner.attach(ADDR);
        cloner.start_next();
        assert_eq!(cloner.complete(Ok(device_bytes(2))), CloneEvent::Aborted);
        assert_eq!(cloner.state(), CloneState::Uncloned);
        assert_eq!(cloner.start_next(), None);
    }

    #[test]
    fn test_abort_on_device_fetch_failure() {
        let mut cloner = DescriptorCloner::new();
        cloner.attach(ADDR);
        cloner.start_next();
        assert_eq!(
            cloner.complete(Err(TransferError::Failed)),
            CloneEvent::Aborted
        );
        assert_eq!(cloner.state(), CloneState::Uncloned);
    }

    #[test]
    fn test_park_on_later_failure() {
        let mut cloner = DescriptorCloner::new();
        cloner.attach(ADDR);
        cloner.start_next();
        cloner.complete(Ok(device_bytes(1)));
        cloner.start_next();
        assert_eq!(
            cloner.complete(Err(TransferError::Stalled)),
            CloneEvent::Stalled
        );
        // parked: still mid-cycle, but no further requests come out
        assert_eq!(cloner.state(), CloneState::Cloning);
        assert_eq!(cloner.start_next(), None);

        // a fresh attach recovers
        cloner.attach(ADDR);
        assert_eq!(
            cloner.start_next(),
            Some(FetchRequest::DeviceDescriptor { addr: ADDR })
        );
    }

    #[test]
    fn test_no_strings_short_circuits_to_cloned() {
        let mut cloner = DescriptorCloner::new();
        cloner.attach(ADDR);
        cloner.start_next();
        // descriptor with no string indices at all
        let mut device = device_bytes(1);
        device[14] = 0;
        device[15] = 0;
        device[16] = 0;
        cloner.complete(Ok(device));
        cloner.start_next();
        cloner.complete(Ok(config_header(9)));
        cloner.start_next();
        cloner.complete(Ok(config_full(9)));
        cloner.start_next();
        cloner.complete(Ok(vec![])); // no class strings either
        cloner.start_next();
        assert_eq!(
            cloner.complete(Ok(langid_descriptor(&[0x0409]))),
            CloneEvent::Completed
        );
        assert_eq!(cloner.state(), CloneState::Cloned);
    }

    #[test]
    fn test_multiple_langids_walk_every_index() {
        let mut cloner = DescriptorCloner::new();
        cloner.attach(ADDR);
        cloner.start_next();
        cloner.complete(Ok(device_bytes(1)));
        cloner.start_next();
        cloner.complete(Ok(config_header(20)));
        cloner.start_next();
        cloner.complete(Ok(config_full(20)));
        cloner.start_next();
        cloner.complete(Ok(vec![]));
        cloner.start_next();
        cloner.complete(Ok(langid_descriptor(&[0x0409, 0x040C])));

        let mut fetched = Vec::new();
        loop {
            let Some(request) = cloner.start_next() else { break };
            let FetchRequest::StringDescriptor { index, langid, .. } = request else {
                panic!("unexpected request {request:?}");
            };
            fetched.push((langid, index));
            if cloner.complete(Ok(string_descriptor("x"))) == CloneEvent::Completed {
                break;
            }
        }
        assert_eq!(
            fetched,
            vec![
                (0x0409, 1),
                (0x0409, 2),
                (0x0409, 3),
                (0x040C, 1),
                (0x040C, 2),
                (0x040C, 3),
            ]
        );
        assert_eq!(cloner.state(), CloneState::Cloned);
    }

    #[test]
    fn test_reattach_frees_previous_mirror() {
        let mut cloner = DescriptorCloner::new();
        clone_to_completion(&mut cloner);
        assert!(cloner.configuration().is_some());
        assert!(!cloner.languages().is_empty());

        // new cycle for a different address: old mirror gone before any fetch
        cloner.attach(ADDR + 1);
        assert_eq!(cloner.state(), CloneState::StartCloning);
        assert!(cloner.device().is_none());
        assert!(cloner.configuration().is_none());
        assert!(cloner.languages().is_empty());
        assert!(cloner.index_list().is_empty());
        assert_eq!(
            cloner.start_next(),
            Some(FetchRequest::DeviceDescriptor { addr: ADDR + 1 })
        );
    }

    #[test]
    fn test_detach_mid_clone_resets() {
        let mut cloner = DescriptorCloner::new();
        cloner.attach(ADDR);
        cloner.start_next();
        cloner.complete(Ok(device_bytes(1)));
        cloner.detach();
        assert_eq!(cloner.state(), CloneState::Uncloned);
        assert_eq!(cloner.start_next(), None);
        // the straggling completion of an in-flight fetch is harmless
        assert_eq!(cloner.complete(Ok(config_header(20))), CloneEvent::Stalled);
        assert_eq!(cloner.state(), CloneState::Uncloned);
    }

    #[test]
    fn test_langid_list_parsing() {
        assert!(parse_langid_list(&[]).is_empty());
        assert!(parse_langid_list(&[2, DESC_TYPE_STRING]).is_empty());
        let parsed = parse_langid_list(&langid_descriptor(&[0x0409, 0x0407]));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].langid, 0x0409);
        assert_eq!(parsed[1].langid, 0x0407);
    }
}
