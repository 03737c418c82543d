//! The bridge core: descriptor cloning plus the live traffic path
//!
//! Two non-blocking loops run as independent tokio tasks. The
//! controller-facing loop drives the descriptor cloner one fetch at a time
//! and, once the mirror is ready, drains controller MIDI through the
//! filter toward the DAW. The host-facing loop stays closed until the
//! clone-complete notification, then drains DAW MIDI through the filter
//! toward the controller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::descriptors::{
    CloneEvent, DescriptorCloner, DescriptorResponder, FetchRequest, CONFIG_HEADER_LEN,
};
use crate::filter::MidiFilter;
use crate::transport::{Role, TransferResult, UsbTransport};

/// Pacing for the poll loops.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The bridge core, shared between the two poll loops behind an `Arc`.
pub struct Bridge<T: UsbTransport> {
    transport: Arc<T>,
    filter: MidiFilter,
    cloner: Arc<RwLock<DescriptorCloner>>,
    responder: DescriptorResponder,
    clone_ready_tx: watch::Sender<bool>,
}

impl<T: UsbTransport> Bridge<T> {
    pub fn new(transport: Arc<T>, filter: MidiFilter) -> Self {
        let cloner = Arc::new(RwLock::new(DescriptorCloner::new()));
        let responder = DescriptorResponder::new(cloner.clone());
        let (clone_ready_tx, _) = watch::channel(false);
        Self {
            transport,
            filter,
            cloner,
            responder,
            clone_ready_tx,
        }
    }

    /// The host-facing descriptor read path.
    pub fn responder(&self) -> DescriptorResponder {
        self.responder.clone()
    }

    /// Clone-complete notification channel; flips to true exactly when a
    /// mirror becomes ready and back to false on detach or re-attach.
    pub fn clone_ready(&self) -> watch::Receiver<bool> {
        self.clone_ready_tx.subscribe()
    }

    /// The controller was attached (or re-attached): start a cloning cycle.
    pub fn handle_attach(&self, addr: u8) {
        info!(addr, "controller attached, cloning descriptors");
        self.clone_ready_tx.send_replace(false);
        self.cloner.write().attach(addr);
    }

    /// The controller was detached: stop serving its identity immediately.
    pub fn handle_detach(&self, addr: u8) {
        info!(addr, "controller detached");
        self.clone_ready_tx.send_replace(false);
        self.cloner.write().detach();
    }

    /// One iteration of the controller-facing loop: advance the cloning
    /// cycle if a fetch is due, otherwise pump controller MIDI.
    pub async fn controller_tick(&self) -> Result<()> {
        let request = self.cloner.write().start_next();
        if let Some(request) = request {
            let outcome = self.fetch(&request).await;
            match self.cloner.write().complete(outcome) {
                CloneEvent::Completed => {
                    info!("descriptor mirror complete, opening host-facing role");
                    self.clone_ready_tx.send_replace(true);
                }
                CloneEvent::Aborted => warn!("cloning aborted"),
                CloneEvent::Advanced | CloneEvent::Stalled => {}
            }
            return Ok(());
        }
        if self.responder.is_ready() {
            self.pump(Role::Controller, Role::Host)?;
        }
        Ok(())
    }

    /// One iteration of the host-facing loop. A no-op until the mirror is
    /// ready; the DAW cannot even enumerate the bridge before then.
    pub fn host_tick(&self) -> Result<()> {
        if self.responder.is_ready() {
            self.pump(Role::Host, Role::Controller)?;
        }
        Ok(())
    }

    /// Drain every waiting packet from one role through the filter to the
    /// other, then flush.
    fn pump(&self, from: Role, to: Role) -> Result<()> {
        let mut forwarded = false;
        while let Some(mut packet) = self.transport.try_read_packet(from) {
            let forward = match from {
                Role::Controller => self.filter.from_controller(&mut packet),
                Role::Host => self.filter.from_host(&mut packet),
            };
            if forward {
                self.transport.write_packet(to, packet)?;
                forwarded = true;
            } else {
                debug!(?from, %packet, "packet filtered out");
            }
        }
        if forwarded {
            self.transport.flush(to);
        }
        Ok(())
    }

    /// Perform one cloner-requested fetch through the transport.
    async fn fetch(&self, request: &FetchRequest) -> TransferResult {
        match *request {
            FetchRequest::DeviceDescriptor { addr } => {
                self.transport.fetch_device_descriptor(addr).await
            }
            FetchRequest::ConfigurationHeader { addr } => {
                self.transport
                    .fetch_configuration_descriptor(addr, CONFIG_HEADER_LEN)
                    .await
            }
            FetchRequest::ConfigurationFull { addr, total_len } => {
                self.transport
                    .fetch_configuration_descriptor(addr, total_len)
                    .await
            }
            // answered locally; the class driver parsed these out of the
            // configuration descriptor during its own enumeration
            FetchRequest::ClassStringIndices { addr } => {
                Ok(self.transport.class_string_indices(addr))
            }
            FetchRequest::LanguageIds { addr } => {
                self.transport.fetch_string_descriptor(addr, 0, 0).await
            }
            FetchRequest::StringDescriptor { addr, index, langid } => {
                self.transport
                    .fetch_string_descriptor(addr, index, langid)
                    .await
            }
        }
    }
}

impl<T: UsbTransport + 'static> Bridge<T> {
    /// Run both poll loops until the process ends.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let controller = {
            let bridge = self.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(err) = bridge.controller_tick().await {
                        warn!(%err, "controller loop error");
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            })
        };
        let host = {
            let bridge = self.clone();
            let mut ready = bridge.clone_ready();
            tokio::spawn(async move {
                loop {
                    if !*ready.borrow() {
                        // role closed; park until the mirror is ready
                        if ready.changed().await.is_err() {
                            return;
                        }
                        continue;
                    }
                    if let Err(err) = bridge.host_tick() {
                        warn!(%err, "host loop error");
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            })
        };
        let _ = tokio::try_join!(controller, host)?;
        Ok(())
    }
}
