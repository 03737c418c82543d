//! Fader pickup synchronization
//!
//! The DAW talks Mackie Control and assumes motorized faders: it sends the
//! position it wants each fader at, and expects the hardware to go there.
//! The Keylab Essential faders are not motorized, so instead we track both
//! sides per channel and only let hardware fader moves through once the
//! physical fader has reached (or swept past) the DAW's last target.
//!
//! Fader positions ride in pitch bend messages: channels 1-8 are the mixer
//! faders, channel 9 is the master fader, each a 14-bit unsigned value
//! packed LSB-first into the two data bytes.

use parking_lot::Mutex;

use crate::midi::RawPacket;

/// Number of independent fader channels (8 mixer + 1 master).
pub const NUM_FADERS: usize = 9;

/// Two fader values within this distance count as equal.
pub const DEFAULT_SYNC_DELTA: u16 = 0x7F;

/// Extract the 14-bit fader value from a pitch bend packet.
///
/// Bytes 0-1 of the packet are ignored.
pub fn extract_fader_value(packet: &RawPacket) -> u16 {
    (packet.0[2] as u16 & 0x7F) | ((packet.0[3] as u16 & 0x7F) << 7)
}

/// Encode a 14-bit fader value into a pitch bend packet.
///
/// Bytes 0-1 of the packet are left untouched.
pub fn encode_fader_value(value: u16, packet: &mut RawPacket) {
    packet.0[2] = (value & 0x7F) as u8;
    packet.0[3] = ((value >> 7) & 0x7F) as u8;
}

/// Pickup state for one fader channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupState {
    /// Neither the hardware nor the DAW value has been seen yet
    Reset,
    /// DAW value known, hardware value not seen yet
    HardwareUnknown,
    /// Hardware value known, DAW value not seen yet
    DawUnknown,
    /// Hardware fader sits above the DAW target; moves are suppressed
    TooHigh,
    /// Hardware fader sits below the DAW target; moves are suppressed
    TooLow,
    /// Hardware fader matches the DAW target; moves are forwarded
    Synced,
}

/// Pickup tracker for a single fader channel.
#[derive(Debug)]
pub struct FaderPickup {
    state: PickupState,
    /// Last fader target the DAW sent (14-bit)
    daw: u16,
    /// Last position the hardware fader reported (14-bit)
    hardware: u16,
    /// Values closer than this count as in sync (14-bit)
    sync_delta: u16,
}

impl FaderPickup {
    pub fn new(sync_delta: u16) -> Self {
        Self {
            state: PickupState::Reset,
            daw: 0,
            hardware: 0,
            sync_delta,
        }
    }

    pub fn state(&self) -> PickupState {
        self.state
    }

    /// True while hardware moves may be forwarded to the DAW.
    pub fn is_synced(&self) -> bool {
        self.state == PickupState::Synced
    }

    /// Three-way comparison of hardware position against DAW target.
    fn split(&self, delta: i32) -> PickupState {
        if delta.unsigned_abs() < self.sync_delta as u32 {
            PickupState::Synced
        } else if delta > 0 {
            PickupState::TooHigh
        } else {
            PickupState::TooLow
        }
    }

    /// Record a new fader target from the DAW.
    ///
    /// Returns true if both sides are now numerically aligned. Note the
    /// caller never forwards DAW fader moves downstream either way; the
    /// hardware cannot act on them.
    pub fn set_daw_value(&mut self, value: u16) -> bool {
        let delta = self.hardware as i32 - value as i32;
        self.daw = value;
        self.state = match self.state {
            PickupState::Reset | PickupState::HardwareUnknown => PickupState::HardwareUnknown,
            PickupState::DawUnknown
            | PickupState::TooHigh
            | PickupState::TooLow
            | PickupState::Synced => self.split(delta),
        };
        self.is_synced()
    }

    /// Record a new position from the hardware fader.
    ///
    /// Returns true if the move may be forwarded to the DAW. While the
    /// fader is on the wrong side of the target, it syncs either by landing
    /// within `sync_delta` of the target or by sweeping past it (the sign
    /// of the delta flips), so a fast hand motion that skips over the
    /// target band still picks up.
    pub fn set_hardware_value(&mut self, value: u16) -> bool {
        let delta = value as i32 - self.daw as i32;
        self.state = match self.state {
            PickupState::Reset | PickupState::DawUnknown => PickupState::DawUnknown,
            PickupState::TooHigh => {
                if delta.unsigned_abs() < self.sync_delta as u32 || delta < 0 {
                    PickupState::Synced
                } else {
                    PickupState::TooHigh
                }
            }
            PickupState::TooLow => {
                if delta.unsigned_abs() < self.sync_delta as u32 || delta > 0 {
                    PickupState::Synced
                } else {
                    PickupState::TooLow
                }
            }
            PickupState::Synced | PickupState::HardwareUnknown => self.split(delta),
        };
        self.hardware = value;
        self.is_synced()
    }
}

/// Pickup trackers for all 9 fader channels.
///
/// `set_daw_value` runs on the host-facing loop and `set_hardware_value` on
/// the controller-facing loop, possibly for the same channel, so each
/// record carries its own lock rather than relying on loop scheduling.
pub struct FaderPickupBank {
    channels: [Mutex<FaderPickup>; NUM_FADERS],
}

impl FaderPickupBank {
    pub fn new(sync_delta: u16) -> Self {
        Self {
            channels: std::array::from_fn(|_| Mutex::new(FaderPickup::new(sync_delta))),
        }
    }

    /// Record a DAW fader target for `channel` (0-8).
    pub fn set_daw_value(&self, channel: usize, value: u16) -> bool {
        self.channels[channel].lock().set_daw_value(value)
    }

    /// Record a hardware fader position for `channel` (0-8).
    pub fn set_hardware_value(&self, channel: usize, value: u16) -> bool {
        self.channels[channel].lock().set_hardware_value(value)
    }

    pub fn state(&self, channel: usize) -> PickupState {
        self.channels[channel].lock().state()
    }
}

impl Default for FaderPickupBank {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_DELTA)
    }
}
