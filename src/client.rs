//! The client side of the driver.
//!
//! [WifiClient] never touches the hardware. It queues frames into the TX ring, takes frames out
//! of the RX ring and posts requests, which the engine picks up on its next tick.
use crate::{
    ap_table::{ApRecord, WIFI_MAX_AP},
    control::{
        AuthLevel, ClientView, ConnectParams, PacketFlags, RequestFlags, Stat, WifiMode,
    },
    descriptor::{DataRate, RxDescriptor, TxDescriptor, DESCRIPTOR_HALFWORDS, DESCRIPTOR_SIZE},
    engine::MAX_CHANNEL,
    hardware::TX_MEMORY_LIMIT,
    sync::FrameNotifier,
    WiFiError, WiFiResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// How far the connection to the access point has progressed.
pub enum AssociationStatus {
    /// No connection was requested.
    Disconnected,
    /// The request was posted, but the engine hasn't acted on it yet.
    Searching,
    Authenticating,
    Associating,
    Associated,
    /// The access point rejected us, or didn't answer.
    CannotConnect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A frame taken out of the RX ring.
pub struct ReceivedFrame {
    /// The descriptor the hardware wrote in front of the frame.
    pub descriptor: RxDescriptor,
    /// Bytes copied into the buffer passed to [WifiClient::receive].
    ///
    /// This is less than the frame length, if the buffer was too small.
    pub copied: usize,
}
impl ReceivedFrame {
    pub fn rssi(&self) -> u8 {
        self.descriptor.rssi
    }
    pub fn length(&self) -> usize {
        self.descriptor.length as usize
    }
}

/// The client side of the link.
pub struct WifiClient<'a> {
    view: ClientView<'a>,
}
impl<'a> WifiClient<'a> {
    pub fn new(view: ClientView<'a>) -> Self {
        Self { view }
    }

    /// Queue a raw 802.11 frame for transmission.
    ///
    /// `frame` starts with the frame control field and excludes the FCS. With [DataRate::Auto],
    /// the engine uses the rate negotiated with the access point.
    pub fn enqueue_transmit(&self, frame: &[u8], rate: DataRate) -> WiFiResult<()> {
        let descriptor = TxDescriptor::for_body(frame.len(), rate.into_bits());
        let needed = descriptor.stored_halfwords() * 2;
        if needed > TX_MEMORY_LIMIT {
            return Err(WiFiError::FrameTooLarge);
        }
        let stats = &self.view.stats;
        let result = critical_section::with(|_| {
            self.view
                .tx
                .push_frame(self.view.side(), &descriptor.to_halfwords(), frame)
        });
        match result {
            Ok(()) => {
                stats.add(Stat::TxQueuedPackets, 1);
                stats.add(Stat::TxQueuedBytes, needed as u32);
            }
            Err(_) => {
                stats.add(Stat::TxQueuedRejected, 1);
                debug!("TX ring full, rejected {} bytes.", needed);
            }
        }
        result
    }
    /// Space left in the TX ring, including the descriptor of the next frame.
    pub fn bytes_available_for_transmit(&self) -> usize {
        self.view.tx.bytes_available()
    }

    /// Copy bytes starting `offset` bytes into the RX ring into `buffer`, without consuming them.
    pub fn read_received_frame(&self, offset: usize, buffer: &mut [u8]) {
        self.view.rx.read_bytes(offset, buffer);
    }
    /// Whether a frame is waiting in the RX ring.
    pub fn has_received_frame(&self) -> bool {
        !self.view.rx.is_empty()
    }
    /// Take the next frame out of the RX ring.
    ///
    /// The frame body, starting at the frame control field, is copied into `buffer`.
    pub fn receive(&self, buffer: &mut [u8]) -> Option<ReceivedFrame> {
        let rx = &self.view.rx;
        if rx.pending_halfwords() < DESCRIPTOR_HALFWORDS {
            return None;
        }
        let descriptor = RxDescriptor::from_halfwords(core::array::from_fn(|i| rx.read_halfword(i)));
        let stored_size = descriptor.stored_size();
        if rx.pending_halfwords() * 2 < stored_size {
            warn!("RX ring is out of sync, dropping its contents.");
            rx.discard_all(self.view.side());
            return None;
        }
        let copied = buffer.len().min(descriptor.length as usize);
        rx.read_bytes(DESCRIPTOR_SIZE, &mut buffer[..copied]);
        rx.advance(self.view.side(), stored_size / 2);
        Some(ReceivedFrame { descriptor, copied })
    }
    /// Wait for the next frame.
    ///
    /// `notifier` has to be fed by the sync handler of the engine.
    pub async fn receive_async(
        &self,
        notifier: &FrameNotifier,
        buffer: &mut [u8],
    ) -> ReceivedFrame {
        loop {
            if let Some(frame) = self.receive(buffer) {
                return frame;
            }
            notifier.next().await;
        }
    }

    /// Ask the engine to start the MAC.
    pub fn enable(&self) {
        self.view.set(&self.view.requested_mode, WifiMode::Normal);
    }
    /// Ask the engine to stop the MAC.
    ///
    /// Everything still queued for transmission is dropped.
    pub fn disable(&self) {
        self.view.set(&self.view.requested_mode, WifiMode::Disabled);
    }
    /// Drop any connection and hop through the channels, collecting access points.
    pub fn scan(&self) {
        self.view
            .update(&self.view.requests, |requests| requests.with_connect(false));
        self.view.set(&self.view.requested_mode, WifiMode::Scan);
    }
    /// Connect to the access point described by `params`.
    pub fn connect(&self, params: &ConnectParams, ad_hoc: bool) -> WiFiResult<()> {
        if !(1..=MAX_CHANNEL).contains(&params.channel) {
            return Err(WiFiError::InvalidChannel);
        }
        self.view.set(&self.view.connect_params, *params);
        self.view.update(&self.view.requests, |requests| {
            requests
                .with_copy_values(true)
                .with_ad_hoc(ad_hoc)
                .with_connect(true)
        });
        self.view.set(&self.view.requested_mode, WifiMode::Normal);
        Ok(())
    }
    pub fn disconnect(&self) {
        self.view
            .update(&self.view.requests, |requests| requests.with_connect(false));
        if self.view.requested_mode.get() != WifiMode::Disabled {
            self.view.set(&self.view.requested_mode, WifiMode::Normal);
        }
    }
    /// Select the channel used while neither scanning nor connected.
    pub fn set_channel(&self, channel: u8) -> WiFiResult<()> {
        if !(1..=MAX_CHANNEL).contains(&channel) {
            return Err(WiFiError::InvalidChannel);
        }
        self.view.set(&self.view.requested_channel, channel);
        Ok(())
    }
    /// Select the classes of frames, that end up in the RX ring.
    pub fn set_packet_filter(&self, filter: PacketFlags) {
        self.view.set(&self.view.packet_filter, filter);
    }
    /// Pass every received frame to the RX ring, regardless of the packet filter.
    pub fn set_promiscuous(&self, promiscuous: bool) {
        self.view.update(&self.view.requests, |requests| {
            requests.with_promiscuous(promiscuous)
        });
    }

    pub fn mode(&self) -> WifiMode {
        self.view.mode.get()
    }
    pub fn auth_level(&self) -> AuthLevel {
        self.view.auth_level.get()
    }
    pub fn association_status(&self) -> AssociationStatus {
        let requests: RequestFlags = self.view.requests.get();
        if !requests.connect() {
            return AssociationStatus::Disconnected;
        }
        match self.mode() {
            WifiMode::Associated => AssociationStatus::Associated,
            WifiMode::CannotAssociate => AssociationStatus::CannotConnect,
            WifiMode::Associate => match self.auth_level() {
                AuthLevel::Disconnected => AssociationStatus::Authenticating,
                AuthLevel::Authenticated | AuthLevel::Deassociated => {
                    AssociationStatus::Associating
                }
                AuthLevel::Associated => AssociationStatus::Associated,
            },
            _ => AssociationStatus::Searching,
        }
    }
    /// A copy of the record in slot `index` of the AP table.
    ///
    /// Returns [None] for inactive slots and while the engine is updating the record.
    pub fn access_point(&self, index: usize) -> Option<ApRecord> {
        self.view.ap_table.snapshot(index)
    }
    /// All access points, that could be read.
    pub fn access_points(&self) -> impl Iterator<Item = ApRecord> + '_ {
        (0..WIFI_MAX_AP).filter_map(|index| self.access_point(index))
    }
    pub fn mac_address(&self) -> [u8; 6] {
        self.view.hardware.get().mac_address
    }
    pub fn channel(&self) -> u8 {
        self.view.hardware.get().channel
    }
    pub fn stat(&self, stat: Stat) -> u32 {
        self.view.stats.get(stat)
    }
    /// See [Statistics::hardware_slot](crate::control::Statistics::hardware_slot).
    pub fn hardware_counter(&self, slot: usize) -> Option<u32> {
        self.view.stats.hardware_slot(slot)
    }
    /// The shared random pool, which the engine stirs every tick.
    pub fn random(&self) -> u32 {
        self.view.random.get()
    }
}
