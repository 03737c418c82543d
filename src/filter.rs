//! Per-direction MIDI packet filtering and remapping
//!
//! The Keylab Essential's Mackie Control dialect differs from what the DAW
//! expects in two ways: a handful of button note numbers are different, and
//! its faders are not motorized. This module rewrites the button notes in
//! both directions and gates fader moves through the pickup engine.
//!
//! Only virtual cable 1 carries the Mackie Control traffic; packets on any
//! other cable pass through untouched, as does anything the filter does not
//! explicitly recognize.

use tracing::debug;

use crate::midi::RawPacket;
use crate::pickup::{extract_fader_value, FaderPickupBank};

/// The virtual cable carrying Mackie Control traffic.
pub const FILTER_CABLE: u8 = 1;

/// Save button note number as the Keylab sends it
const NOTE_SAVE_KEYLAB: u8 = 0x50;
/// Save button note number in the Mackie Control protocol
const NOTE_SAVE_MC: u8 = 0x48;
/// Undo button note number as the Keylab sends it
const NOTE_UNDO_KEYLAB: u8 = 0x51;
/// Undo button note number in the Mackie Control protocol
const NOTE_UNDO_MC: u8 = 0x46;
/// Keylab button with no Mackie Control equivalent; never forwarded
const NOTE_DROPPED: u8 = 0x58;

/// Bidirectional packet filter sitting on the live traffic path.
///
/// Holds no state of its own beyond the pickup bank it drives; both
/// direction methods take `&self` so the two poll loops can share one
/// instance behind an `Arc`.
pub struct MidiFilter {
    pickups: FaderPickupBank,
}

impl MidiFilter {
    pub fn new(pickups: FaderPickupBank) -> Self {
        Self { pickups }
    }

    /// Filter a packet arriving from the controller, bound for the DAW.
    ///
    /// Returns true if the (possibly rewritten) packet should be forwarded.
    pub fn from_controller(&self, packet: &mut RawPacket) -> bool {
        if packet.cable() != FILTER_CABLE {
            return true;
        }
        if packet.is_note_message() {
            match packet.data1() {
                NOTE_SAVE_KEYLAB => packet.0[2] = NOTE_SAVE_MC,
                NOTE_UNDO_KEYLAB => packet.0[2] = NOTE_UNDO_MC,
                NOTE_DROPPED => return false,
                _ => {}
            }
            true
        } else if packet.is_fader_move() {
            let value = extract_fader_value(packet);
            let synced = self.pickups.set_hardware_value(packet.fader_channel(), value);
            debug!(
                channel = packet.fader_channel(),
                value,
                forward = synced,
                "hardware fader move"
            );
            synced
        } else {
            true
        }
    }

    /// Filter a packet arriving from the DAW, bound for the controller.
    ///
    /// Returns true if the (possibly rewritten) packet should be forwarded.
    /// Fader targets are absorbed into the pickup engine and never
    /// forwarded; the hardware faders cannot move to match them.
    pub fn from_host(&self, packet: &mut RawPacket) -> bool {
        if packet.cable() != FILTER_CABLE {
            return true;
        }
        if packet.is_note_message() {
            match packet.data1() {
                NOTE_SAVE_MC => packet.0[2] = NOTE_SAVE_KEYLAB,
                NOTE_UNDO_MC => packet.0[2] = NOTE_UNDO_KEYLAB,
                NOTE_DROPPED => return false,
                _ => {}
            }
            true
        } else if packet.is_fader_move() {
            let value = extract_fader_value(packet);
            self.pickups.set_daw_value(packet.fader_channel(), value);
            debug!(
                channel = packet.fader_channel(),
                value, "daw fader target absorbed"
            );
            false
        } else {
            true
        }
    }
}

impl Default for MidiFilter {
    fn default() -> Self {
        Self::new(FaderPickupBank::default())
    }
}
