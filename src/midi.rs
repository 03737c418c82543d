//! USB MIDI packet type and status helpers
//!
//! Everything on the wire is the standard 4-byte USB MIDI event packet:
//! byte 0 carries the virtual cable number (high nibble) and code index
//! number (low nibble), bytes 1-3 are the MIDI message itself.

use std::fmt;

/// Note Off status (channel 1)
pub const STATUS_NOTE_OFF: u8 = 0x80;
/// Note On status (channel 1)
pub const STATUS_NOTE_ON: u8 = 0x90;
/// First pitch bend status byte (channel 1)
pub const STATUS_PITCH_BEND_FIRST: u8 = 0xE0;
/// Last pitch bend status byte the Mackie Control protocol uses.
/// Channels 1-8 are the mixer faders, channel 9 is the master fader.
pub const STATUS_PITCH_BEND_LAST: u8 = 0xE8;

/// A single 4-byte USB MIDI event packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPacket(pub [u8; 4]);

impl RawPacket {
    /// Build a packet from cable number and a 3-byte channel message.
    ///
    /// The code index number is derived from the status high nibble, which
    /// is correct for all channel voice messages (the only kind we build).
    pub fn channel_message(cable: u8, status: u8, data1: u8, data2: u8) -> Self {
        RawPacket([
            ((cable & 0x0F) << 4) | (status >> 4),
            status,
            data1,
            data2,
        ])
    }

    /// Virtual cable number (0-15) from the byte-0 high nibble.
    pub fn cable(&self) -> u8 {
        (self.0[0] >> 4) & 0x0F
    }

    /// MIDI status byte.
    pub fn status(&self) -> u8 {
        self.0[1]
    }

    /// First data byte.
    pub fn data1(&self) -> u8 {
        self.0[2]
    }

    /// Second data byte.
    pub fn data2(&self) -> u8 {
        self.0[3]
    }

    /// True for Note On / Note Off status bytes on MIDI channel 1, the only
    /// channel the Keylab Essential uses for its Mackie Control buttons.
    pub fn is_note_message(&self) -> bool {
        self.status() == STATUS_NOTE_ON || self.status() == STATUS_NOTE_OFF
    }

    /// True for the 9 pitch bend status bytes carrying fader positions.
    pub fn is_fader_move(&self) -> bool {
        (STATUS_PITCH_BEND_FIRST..=STATUS_PITCH_BEND_LAST).contains(&self.status())
    }

    /// Fader channel (0-8) for a fader move packet.
    pub fn fader_channel(&self) -> usize {
        (self.status() & 0x0F) as usize
    }
}

impl fmt::Display for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cable {} | {:02X} {:02X} {:02X}",
            self.cable(),
            self.status(),
            self.data1(),
            self.data2()
        )
    }
}

/// Format MIDI bytes as a hex string for logging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cable_extraction() {
        let packet = RawPacket([0x19, 0x90, 0x50, 0x7F]);
        assert_eq!(packet.cable(), 1);

        let packet = RawPacket([0xF9, 0x90, 0x50, 0x7F]);
        assert_eq!(packet.cable(), 15);
    }

    #[test]
    fn test_channel_message_builder() {
        let packet = RawPacket::channel_message(1, 0xE3, 0x12, 0x34);
        assert_eq!(packet, RawPacket([0x1E, 0xE3, 0x12, 0x34]));
        assert_eq!(packet.cable(), 1);
        assert_eq!(packet.fader_channel(), 3);
    }

    #[test]
    fn test_note_message_detection() {
        assert!(RawPacket::channel_message(1, 0x90, 60, 100).is_note_message());
        assert!(RawPacket::channel_message(1, 0x80, 60, 0).is_note_message());
        assert!(!RawPacket::channel_message(1, 0xB0, 7, 100).is_note_message());
    }

    #[test]
    fn test_fader_move_detection() {
        for channel in 0..=8u8 {
            let packet = RawPacket::channel_message(1, 0xE0 | channel, 0, 0);
            assert!(packet.is_fader_move());
            assert_eq!(packet.fader_channel(), channel as usize);
        }
        // 0xE9-0xEF are pitch bend but not Mackie Control faders
        assert!(!RawPacket::channel_message(1, 0xE9, 0, 0).is_fader_move());
        assert!(!RawPacket::channel_message(1, 0x90, 0, 0).is_fader_move());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x1E, 0xE0, 0x7F, 0x00]), "1E E0 7F 00");
    }
}
