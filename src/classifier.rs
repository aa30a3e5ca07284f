//! Classification of received frames.
//!
//! [classify] looks at a frame once, while it's still in frame memory, and tells the engine two
//! things: which class the packet filter should see, and whether the frame means anything to the
//! connection. It never changes any state itself.
use crate::{
    ap_table::ApObservation,
    control::{ConnectParams, HardwareSnapshot},
    descriptor::{RxDescriptor, DESCRIPTOR_SIZE},
    frame::{
        element_id, parse_beacon, read_address, read_u16, FrameClass, FrameControl, FrameKind,
        ADDRESS_1, ADDRESS_3, HEADER_LEN,
    },
    hardware::{rx_memory_offset, WifiHardware, RX_BUFFER_BEGIN, RX_BUFFER_END},
};

/// Bytes of a beacon, that are looked at.
const BEACON_COPY_LIMIT: usize = 512;
/// Bytes of an authentication frame, that are looked at.
const AUTHENTICATION_COPY_LIMIT: usize = 384;
/// Bytes of (re)association responses and deauthentications, that are looked at.
const SHORT_COPY_LIMIT: usize = 64;

/// Something, that a received frame can be copied out of.
///
/// Offsets are relative to the start of the descriptor.
pub trait FrameSource {
    fn copy_out(&mut self, offset: usize, buffer: &mut [u8]);
}
impl FrameSource for &[u8] {
    /// Everything past the end reads as zero.
    fn copy_out(&mut self, offset: usize, buffer: &mut [u8]) {
        let available = self.get(offset..).unwrap_or_default();
        let len = available.len().min(buffer.len());
        buffer[..len].copy_from_slice(&available[..len]);
        buffer[len..].fill(0);
    }
}

/// A received frame in the RX area of the frame memory.
///
/// Reads past the end of the RX area continue at its beginning.
/// Fold a frame memory offset past the RX area back into it.
///
/// A corrupt length may span the whole area several times.
pub(crate) const fn wrap_rx_address(address: usize) -> usize {
    const BEGIN: usize = rx_memory_offset(RX_BUFFER_BEGIN);
    const END: usize = rx_memory_offset(RX_BUFFER_END);
    BEGIN + address.saturating_sub(BEGIN) % (END - BEGIN)
}

pub struct RxMemory<'a, H> {
    hardware: &'a mut H,
    base: usize,
}
impl<'a, H: WifiHardware> RxMemory<'a, H> {
    /// `base` is the frame memory offset of the descriptor.
    pub fn new(hardware: &'a mut H, base: usize) -> Self {
        Self { hardware, base }
    }
    /// The frame memory offset `offset` bytes past the descriptor.
    pub fn address(&self, offset: usize) -> usize {
        wrap_rx_address(self.base + offset)
    }
    /// Read the halfword at the even `offset`.
    pub fn read_halfword(&mut self, offset: usize) -> u16 {
        let address = self.address(offset);
        self.hardware.read_mac_memory(address)
    }
    pub fn descriptor(&mut self) -> RxDescriptor {
        RxDescriptor::from_halfwords(core::array::from_fn(|i| self.read_halfword(i * 2)))
    }
}
impl<H: WifiHardware> FrameSource for RxMemory<'_, H> {
    fn copy_out(&mut self, offset: usize, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            let offset = offset + i;
            let [low, high] = self.read_halfword(offset & !1).to_le_bytes();
            *byte = if offset % 2 == 0 { low } else { high };
        }
    }
}

/// Longest challenge text an element can carry.
pub const MAX_CHALLENGE_LEN: usize = u8::MAX as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The challenge of shared key authentication.
pub struct ChallengeText {
    len: u8,
    bytes: [u8; MAX_CHALLENGE_LEN],
}
impl ChallengeText {
    pub fn new(text: &[u8]) -> Self {
        let len = text.len().min(MAX_CHALLENGE_LEN);
        let mut bytes = [0u8; MAX_CHALLENGE_LEN];
        bytes[..len].copy_from_slice(&text[..len]);
        Self {
            len: len as u8,
            bytes,
        }
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A received frame, that matters to the connection or the AP table.
pub enum ManagementEvent {
    /// A beacon or probe response.
    Beacon(ApObservation),
    AssociationAccepted { association_id: u16, max_rate: u16 },
    AssociationRejected { status: u16 },
    /// Open system authentication, or the final step of shared key authentication, succeeded.
    Authenticated,
    /// The access point refused open system authentication.
    OpenSystemRejected,
    /// The access point wants its challenge back.
    SharedKeyChallenge(ChallengeText),
    /// The access point refused shared key authentication.
    SharedKeyRejected,
    Deauthenticated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The result of [classify].
pub struct Classification {
    pub kind: FrameKind,
    pub class: FrameClass,
    pub event: Option<ManagementEvent>,
}

/// The received frame, with the relevant fields pulled out.
struct Received<const N: usize> {
    buffer: [u8; N],
    len: usize,
}
impl<const N: usize> Received<N> {
    fn copy(source: &mut impl FrameSource, len: usize) -> Self {
        let mut buffer = [0u8; N];
        let len = len.min(N);
        source.copy_out(DESCRIPTOR_SIZE, &mut buffer[..len]);
        Self { buffer, len }
    }
    fn frame(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
    fn u16_at(&self, offset: usize) -> u16 {
        read_u16(self.frame(), offset).unwrap_or_default()
    }
    /// Check, that the frame was sent to us by the access point we're connecting to.
    fn is_from_target(&self, hardware: &HardwareSnapshot, association: &ConnectParams) -> bool {
        read_address(self.frame(), ADDRESS_1) == Some(hardware.mac_address)
            && read_address(self.frame(), ADDRESS_3) == Some(association.bssid)
    }
}

fn association_response(received: &Received<SHORT_COPY_LIMIT>) -> ManagementEvent {
    let status = received.u16_at(HEADER_LEN + 2);
    if status != 0 {
        return ManagementEvent::AssociationRejected { status };
    }
    let rates_len = received.frame().get(HEADER_LEN + 7).copied().unwrap_or_default() as usize;
    let rates = received
        .frame()
        .get(HEADER_LEN + 8..)
        .unwrap_or_default()
        .iter()
        .take(rates_len);
    let mut max_rate = 0x0a;
    for rate in rates {
        if *rate == 0x84 || *rate == 0x04 {
            max_rate = 0x14;
        }
    }
    ManagementEvent::AssociationAccepted {
        association_id: received.u16_at(HEADER_LEN + 4),
        max_rate,
    }
}

fn authentication(received: &Received<AUTHENTICATION_COPY_LIMIT>) -> Option<ManagementEvent> {
    let algorithm = received.u16_at(HEADER_LEN);
    let sequence = received.u16_at(HEADER_LEN + 2);
    let success = received.u16_at(HEADER_LEN + 4) == 0;
    match (algorithm, sequence, success) {
        (0, 2, true) | (1, 4, true) => Some(ManagementEvent::Authenticated),
        (0, 2, false) => Some(ManagementEvent::OpenSystemRejected),
        (1, 2, true) => {
            let frame = received.frame();
            if frame.get(HEADER_LEN + 6) != Some(&element_id::CHALLENGE_TEXT) {
                return None;
            }
            let len = frame.get(HEADER_LEN + 7).copied().unwrap_or_default() as usize;
            let text = frame.get(HEADER_LEN + 8..).unwrap_or_default();
            Some(ManagementEvent::SharedKeyChallenge(ChallengeText::new(
                &text[..len.min(text.len())],
            )))
        }
        (1, 2, false) | (1, 4, false) => Some(ManagementEvent::SharedKeyRejected),
        _ => None,
    }
}

/// Classify the frame, which `source` holds.
///
/// `total_len` is the length the frame occupies in frame memory, including the descriptor.
pub fn classify(
    source: &mut impl FrameSource,
    total_len: usize,
    hardware: &HardwareSnapshot,
    association: &ConnectParams,
) -> Classification {
    let mut descriptor = [0u8; DESCRIPTOR_SIZE];
    source.copy_out(0, &mut descriptor);
    let descriptor = RxDescriptor::from_bytes(&descriptor);
    let len = (descriptor.length as usize).min(total_len.saturating_sub(DESCRIPTOR_SIZE));

    let mut frame_control = [0u8; 2];
    source.copy_out(DESCRIPTOR_SIZE, &mut frame_control);
    let kind = FrameKind::from_frame_control(FrameControl::from_bits(u16::from_le_bytes(
        frame_control,
    )));

    let (class, event) = match kind {
        FrameKind::Beacon | FrameKind::ProbeResponse => {
            let received = Received::<BEACON_COPY_LIMIT>::copy(source, len);
            let event = parse_beacon(received.frame(), descriptor.rssi, hardware.channel)
                .map(ManagementEvent::Beacon);
            let class = if kind == FrameKind::Beacon {
                FrameClass::Beacon
            } else {
                FrameClass::Management
            };
            (class, event)
        }
        FrameKind::AssociationResponse | FrameKind::ReassociationResponse => {
            let received = Received::<SHORT_COPY_LIMIT>::copy(source, len);
            let event = received
                .is_from_target(hardware, association)
                .then(|| association_response(&received));
            (FrameClass::Management, event)
        }
        FrameKind::Authentication => {
            let received = Received::<AUTHENTICATION_COPY_LIMIT>::copy(source, len);
            let event = if received.is_from_target(hardware, association) {
                authentication(&received)
            } else {
                None
            };
            (FrameClass::Management, event)
        }
        FrameKind::Deauthentication => {
            let received = Received::<SHORT_COPY_LIMIT>::copy(source, len);
            let event = received
                .is_from_target(hardware, association)
                .then_some(ManagementEvent::Deauthenticated);
            (FrameClass::Management, event)
        }
        FrameKind::OtherManagement => (FrameClass::Management, None),
        FrameKind::Control => (FrameClass::Control, None),
        FrameKind::Data => (FrameClass::Data, None),
        FrameKind::Unclassified => (FrameClass::Ignored, None),
    };
    Classification { kind, class, event }
}
