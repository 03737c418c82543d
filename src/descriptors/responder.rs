//! Host-facing descriptor read path
//!
//! Answers the DAW host's GET DESCRIPTOR requests out of the cloned
//! mirror. Every query checks the clone state first: until the mirror is
//! complete the answer is "not available", never stale or partially
//! written data.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::{CloneState, DescriptorCloner, DEVICE_DESCRIPTOR_LEN, DESC_TYPE_STRING};

/// Read-only view over a [`DescriptorCloner`]'s mirror.
///
/// Shares the cloner with the controller-facing loop; the cloner only
/// flips to `Cloned` after every buffer is in place, so a read guard plus
/// that state check is all the synchronization the read path needs.
#[derive(Clone)]
pub struct DescriptorResponder {
    cloner: Arc<RwLock<DescriptorCloner>>,
}

impl DescriptorResponder {
    pub fn new(cloner: Arc<RwLock<DescriptorCloner>>) -> Self {
        Self { cloner }
    }

    /// True once a complete mirror is available to serve.
    pub fn is_ready(&self) -> bool {
        self.cloner.read().state() == CloneState::Cloned
    }

    /// The cloned device descriptor, verbatim.
    pub fn device_descriptor(&self) -> Option<[u8; DEVICE_DESCRIPTOR_LEN]> {
        let cloner = self.cloner.read();
        if cloner.state() != CloneState::Cloned {
            return None;
        }
        cloner.device().map(|device| *device.bytes())
    }

    /// bMaxPacketSize0 of the cloned device, for endpoint 0 setup.
    pub fn endpoint0_size(&self) -> Option<u8> {
        let cloner = self.cloner.read();
        if cloner.state() != CloneState::Cloned {
            return None;
        }
        cloner.device().map(|device| device.max_packet_size_0())
    }

    /// The cloned configuration descriptor, all `wTotalLength` bytes.
    pub fn configuration_descriptor(&self) -> Option<Vec<u8>> {
        let cloner = self.cloner.read();
        if cloner.state() != CloneState::Cloned {
            trace!("configuration descriptor queried before mirror is ready");
            return None;
        }
        cloner.configuration().map(<[u8]>::to_vec)
    }

    /// A string descriptor by original index and language id.
    ///
    /// Index 0 synthesizes the language id list descriptor. Unknown langid
    /// or an index the mirror never cloned answers `None`.
    pub fn string_descriptor(&self, index: u8, langid: u16) -> Option<Vec<u8>> {
        let cloner = self.cloner.read();
        if cloner.state() != CloneState::Cloned {
            return None;
        }
        if index == 0 {
            let langids = cloner.languages();
            let mut blob = vec![(2 + 2 * langids.len()) as u8, DESC_TYPE_STRING];
            for language in langids {
                blob.extend_from_slice(&language.langid.to_le_bytes());
            }
            return Some(blob);
        }
        let language = cloner
            .languages()
            .iter()
            .find(|language| language.langid == langid)?;
        let position = cloner
            .index_list()
            .iter()
            .position(|&listed| listed == index)?;
        language.strings.get(position).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::tests::{clone_to_completion, device_bytes, string_descriptor, ADDR};
    use crate::descriptors::CloneEvent;

    fn cloned_responder() -> (Arc<RwLock<DescriptorCloner>>, DescriptorResponder) {
        let mut cloner = DescriptorCloner::new();
        clone_to_completion(&mut cloner);
        let shared = Arc::new(RwLock::new(cloner));
        let responder = DescriptorResponder::new(shared.clone());
        (shared, responder)
    }

    #[test]
    fn test_not_available_before_cloned() {
        let shared = Arc::new(RwLock::new(DescriptorCloner::new()));
        let responder = DescriptorResponder::new(shared.clone());

        assert!(!responder.is_ready());
        assert_eq!(responder.device_descriptor(), None);
        assert_eq!(responder.configuration_descriptor(), None);
        assert_eq!(responder.string_descriptor(0, 0x0409), None);
        assert_eq!(responder.endpoint0_size(), None);

        // even mid-cycle, with a device descriptor already stored
        {
            let mut cloner = shared.write();
            cloner.attach(ADDR);
            cloner.start_next();
            assert_eq!(cloner.complete(Ok(device_bytes(1))), CloneEvent::Advanced);
            assert!(cloner.device().is_some());
        }
        assert_eq!(responder.device_descriptor(), None);
    }

    #[test]
    fn test_serves_cloned_mirror() {
        let (_, responder) = cloned_responder();
        assert!(responder.is_ready());
        assert_eq!(responder.device_descriptor().unwrap()[..], device_bytes(1)[..]);
        assert_eq!(responder.endpoint0_size(), Some(64));
        assert_eq!(responder.configuration_descriptor().unwrap().len(), 101);
    }

    #[test]
    fn test_langid_list_synthesis() {
        let (_, responder) = cloned_responder();
        // one language, 0x0409
        assert_eq!(
            responder.string_descriptor(0, 0),
            Some(vec![4, DESC_TYPE_STRING, 0x09, 0x04])
        );
    }

    #[test]
    fn test_string_lookup_by_original_index() {
        let (_, responder) = cloned_responder();
        assert_eq!(
            responder.string_descriptor(2, 0x0409),
            Some(string_descriptor("Keylab Essential"))
        );
        assert_eq!(
            responder.string_descriptor(5, 0x0409),
            Some(string_descriptor("MIDI"))
        );
    }

    #[test]
    fn test_lookup_misses_answer_none() {
        let (_, responder) = cloned_responder();
        // unknown langid
        assert_eq!(responder.string_descriptor(1, 0x040C), None);
        // index never cloned
        assert_eq!(responder.string_descriptor(9, 0x0409), None);
    }

    #[test]
    fn test_reattach_resets_to_not_available() {
        let (shared, responder) = cloned_responder();
        shared.write().attach(ADDR + 1);
        assert!(!responder.is_ready());
        assert_eq!(responder.device_descriptor(), None);
        assert_eq!(responder.string_descriptor(0, 0), None);
    }
}
