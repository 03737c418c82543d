//! midi-mc-bridge - transparent USB MIDI bridge core
//!
//! Sits between a DAW that speaks Mackie Control to a fixed control surface
//! and an attached Arturia Keylab Essential whose layout differs slightly
//! and whose faders are not motorized. The bridge clones the controller's
//! USB identity so the DAW's driver enumerates it unchanged, remaps the
//! handful of button notes that differ, and holds back fader moves until
//! the physical fader picks up the DAW's last target.

pub mod bridge;
pub mod descriptors;
pub mod filter;
pub mod midi;
pub mod pickup;
pub mod transport;

pub use bridge::Bridge;
pub use descriptors::{CloneState, DescriptorCloner, DescriptorResponder};
pub use filter::MidiFilter;
pub use midi::RawPacket;
pub use pickup::{FaderPickup, FaderPickupBank, PickupState};
pub use transport::{Role, TransferError, UsbTransport};
