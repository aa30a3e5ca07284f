//! 802.11 frame layout, beacon parsing and the management frames the engine sends.
use bitfield_struct::bitfield;

use crate::{
    ap_table::{ApFlags, ApObservation},
    control::{ConnectParams, Ssid},
    descriptor::{TxDescriptor, DESCRIPTOR_SIZE, FCS_SIZE},
};

/// Offset of the receiver address.
pub const ADDRESS_1: usize = 4;
/// Offset of the transmitter address.
pub const ADDRESS_2: usize = 10;
/// Offset of the third address, which is the BSSID for management frames.
pub const ADDRESS_3: usize = 16;
/// Length of the header of management and most data frames.
pub const HEADER_LEN: usize = 24;
/// Length of the WEP initialization vector.
pub const IV_LEN: usize = 4;
/// Length of the WEP integrity check value.
pub const ICV_LEN: usize = 4;
/// Offset of the capability field in beacons and probe responses.
const CAPABILITY_OFFSET: usize = HEADER_LEN + 10;
/// Offset of the first element in beacons and probe responses.
const BEACON_ELEMENTS_OFFSET: usize = HEADER_LEN + 12;
/// Largest rate set we keep, not counting the terminator.
const MAX_RATES: usize = 15;

pub mod element_id {
    pub const SSID: u8 = 0;
    pub const SUPPORTED_RATES: u8 = 1;
    pub const DS_PARAMETER_SET: u8 = 3;
    pub const CHALLENGE_TEXT: u8 = 16;
    pub const RSN: u8 = 48;
    pub const VENDOR_SPECIFIC: u8 = 221;
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
/// The frame control field.
pub struct FrameControl {
    #[bits(2)]
    pub version: u8,
    #[bits(2)]
    pub frame_type: u8,
    #[bits(4)]
    pub subtype: u8,
    pub to_ds: bool,
    pub from_ds: bool,
    pub more_fragments: bool,
    pub retry: bool,
    pub power_management: bool,
    pub more_data: bool,
    pub protected: bool,
    pub order: bool,
}
impl FrameControl {
    /// Type and subtype, as one six bit value.
    pub const fn selector(&self) -> u8 {
        ((self.into_bits() >> 2) & 0x3f) as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The frame kinds the engine distinguishes.
pub enum FrameKind {
    Beacon,
    ProbeResponse,
    AssociationResponse,
    ReassociationResponse,
    Authentication,
    Deauthentication,
    /// Requests, ATIM and disassociation.
    OtherManagement,
    Control,
    Data,
    Unclassified,
}
impl FrameKind {
    pub const fn from_selector(selector: u8) -> Self {
        match selector {
            0x20 => Self::Beacon,
            0x14 => Self::ProbeResponse,
            0x04 => Self::AssociationResponse,
            0x0c => Self::ReassociationResponse,
            0x2c => Self::Authentication,
            0x30 => Self::Deauthentication,
            0x00 | 0x08 | 0x10 | 0x24 | 0x28 => Self::OtherManagement,
            0x29 | 0x2d | 0x31 | 0x35 | 0x39 | 0x3d => Self::Control,
            0x02 | 0x06 | 0x0a | 0x0e | 0x12 | 0x16 | 0x1a | 0x1e => Self::Data,
            _ => Self::Unclassified,
        }
    }
    pub const fn from_frame_control(frame_control: FrameControl) -> Self {
        Self::from_selector(frame_control.selector())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// What the packet filter sees of a frame.
pub enum FrameClass {
    Beacon,
    Management,
    Control,
    Data,
    Ignored,
}
impl FrameClass {
    pub const fn mask(&self) -> crate::control::PacketFlags {
        use crate::control::PacketFlags;
        match self {
            Self::Beacon => PacketFlags::new().with_beacon(true),
            Self::Management => PacketFlags::new().with_management(true),
            Self::Control => PacketFlags::new().with_control(true),
            Self::Data => PacketFlags::new().with_data(true),
            Self::Ignored => PacketFlags::new(),
        }
    }
}

pub(crate) fn read_address(frame: &[u8], offset: usize) -> Option<[u8; 6]> {
    frame.get(offset..offset + 6)?.try_into().ok()
}
pub(crate) fn read_u16(frame: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(
        frame.get(offset..offset + 2)?.try_into().ok()?,
    ))
}

/// An iterator over tagged elements.
///
/// It ends at the end of the buffer or at the first element, which would overrun it.
pub struct Elements<'a> {
    bytes: &'a [u8],
}
impl<'a> Elements<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}
impl<'a> Iterator for Elements<'a> {
    type Item = (u8, &'a [u8]);
    fn next(&mut self) -> Option<Self::Item> {
        let [tag, len, rest @ ..] = self.bytes else {
            return None;
        };
        let len = *len as usize;
        if len > rest.len() {
            self.bytes = &[];
            return None;
        }
        let (body, remainder) = rest.split_at(len);
        self.bytes = remainder;
        Some((*tag, body))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CipherSuites {
    wep: bool,
    wpa: bool,
}
impl CipherSuites {
    /// Walk a list of pairwise cipher suites starting at the count field.
    fn scan(list: &[u8], oui: [u8; 3]) -> Self {
        let mut suites = Self::default();
        let Some(count) = read_u16(list, 0) else {
            return suites;
        };
        for suite in list[2..].chunks_exact(4).take(count as usize) {
            if suite[..3] != oui {
                continue;
            }
            match suite[3] {
                2..=4 => suites.wpa = true,
                1 | 5 => suites.wep = true,
                _ => {}
            }
        }
        suites
    }
    /// Parse an RSN element.
    fn from_rsn(body: &[u8]) -> Self {
        if body.len() < 10 || body[..2] != [0x01, 0x00] {
            return Self::default();
        }
        // Version and group cipher.
        Self::scan(&body[6..], [0x00, 0x0f, 0xac])
    }
    /// Parse a vendor element, if it's a WPA element.
    fn from_vendor(body: &[u8]) -> Self {
        if body.len() < 14 || body[..6] != [0x00, 0x50, 0xf2, 0x01, 0x01, 0x00] {
            return Self::default();
        }
        // OUI, type, version and group cipher.
        Self::scan(&body[10..], [0x00, 0x50, 0xf2])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RateCompatibility {
    Incompatible,
    Compatible,
    Extended,
}

/// Parse a beacon or probe response.
///
/// `frame` starts at the frame control field. `tuned_channel` is assumed, if the frame has no DS
/// parameter set.
pub fn parse_beacon(frame: &[u8], rssi: u8, tuned_channel: u8) -> Option<ApObservation> {
    let bssid = read_address(frame, ADDRESS_3)?;
    let mac_address = read_address(frame, ADDRESS_2)?;
    let capability = read_u16(frame, CAPABILITY_OFFSET).unwrap_or_default();

    let mut wep = capability & 0x0010 != 0;
    let mut wpa = false;
    let mut compatibility = RateCompatibility::Compatible;
    let mut max_rate = 0;
    let mut base_rates = [0u8; 16];
    let mut ssid = None;
    let mut channel = tuned_channel;

    let elements = frame.get(BEACON_ELEMENTS_OFFSET..).unwrap_or_default();
    for (tag, body) in Elements::new(elements) {
        match tag {
            element_id::SSID => ssid = Some(Ssid::new(body)),
            element_id::SUPPORTED_RATES => {
                max_rate = body.iter().map(|rate| rate & 0x7f).max().unwrap_or_default();
                base_rates = [0u8; 16];
                for (slot, rate) in base_rates[..MAX_RATES]
                    .iter_mut()
                    .zip(body.iter().filter(|rate| *rate & 0x80 != 0))
                {
                    *slot = *rate;
                }
                compatibility = RateCompatibility::Incompatible;
                for rate in body {
                    match rate {
                        0x82 | 0x84 => compatibility = RateCompatibility::Compatible,
                        0x8b | 0x96 => compatibility = RateCompatibility::Extended,
                        rate if rate & 0x80 != 0 => {
                            compatibility = RateCompatibility::Incompatible;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            element_id::DS_PARAMETER_SET => {
                if let Some(ds_channel) = body.first() {
                    channel = *ds_channel;
                }
            }
            element_id::RSN | element_id::VENDOR_SPECIFIC => {
                let suites = if tag == element_id::RSN {
                    CipherSuites::from_rsn(body)
                } else {
                    CipherSuites::from_vendor(body)
                };
                wep |= suites.wep;
                wpa |= suites.wpa;
            }
            _ => {}
        }
    }
    if wpa {
        compatibility = RateCompatibility::Incompatible;
    }

    Some(ApObservation {
        bssid,
        mac_address,
        ssid,
        channel,
        flags: ApFlags::new()
            .with_wep(wep)
            .with_wpa(wpa)
            .with_ad_hoc(mac_address != bssid)
            .with_compatible(compatibility == RateCompatibility::Compatible)
            .with_extended_compatible(compatibility == RateCompatibility::Extended),
        max_rate,
        base_rates,
        rssi,
    })
}

/// Largest frame the engine generates, including the descriptor.
pub const TX_FRAME_CAPACITY: usize = 320;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A frame generated by the engine, prefixed with its descriptor.
pub struct TxFrame {
    buffer: [u8; TX_FRAME_CAPACITY],
    len: usize,
}
impl TxFrame {
    const fn empty() -> Self {
        Self {
            buffer: [0u8; TX_FRAME_CAPACITY],
            len: DESCRIPTOR_SIZE,
        }
    }
    /// Start a management frame to the access point.
    ///
    /// If `frame_control` has the protected bit set, `iv` is placed after the header.
    pub fn management(
        frame_control: FrameControl,
        association: &ConnectParams,
        mac_address: [u8; 6],
        iv: u32,
    ) -> Self {
        let mut frame = Self::empty();
        frame.push(&frame_control.into_bits().to_le_bytes());
        // Duration
        frame.push(&[0, 0]);
        frame.push(&association.ap_mac);
        frame.push(&mac_address);
        frame.push(&association.bssid);
        // Sequence control
        frame.push(&[0, 0]);
        if frame_control.protected() {
            frame.push(&iv.to_le_bytes());
        }
        frame
    }
    /// Append bytes, silently truncating at the capacity.
    pub fn push(&mut self, bytes: &[u8]) -> &mut Self {
        let len = bytes.len().min(TX_FRAME_CAPACITY - self.len);
        self.buffer[self.len..self.len + len].copy_from_slice(&bytes[..len]);
        self.len += len;
        self
    }
    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.push(&value.to_le_bytes())
    }
    /// Fill in the descriptor.
    ///
    /// The length includes the FCS and, for protected frames, the ICV.
    pub fn finish(&mut self, rate: u16) -> Self {
        let mut length = self.body().len() + FCS_SIZE;
        if self.frame_control().protected() {
            length += ICV_LEN;
        }
        let descriptor = TxDescriptor {
            status: 0,
            rate,
            length: length as u16,
        };
        for (chunk, halfword) in self.buffer[..DESCRIPTOR_SIZE]
            .chunks_exact_mut(2)
            .zip(descriptor.to_halfwords())
        {
            chunk.copy_from_slice(&halfword.to_le_bytes());
        }
        *self
    }
    pub fn descriptor(&self) -> TxDescriptor {
        TxDescriptor::from_halfwords(core::array::from_fn(|i| {
            u16::from_le_bytes([self.buffer[i * 2], self.buffer[i * 2 + 1]])
        }))
    }
    pub fn frame_control(&self) -> FrameControl {
        FrameControl::from_bits(read_u16(&self.buffer, DESCRIPTOR_SIZE).unwrap_or_default())
    }
    /// Descriptor and frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
    /// The frame without the descriptor.
    pub fn body(&self) -> &[u8] {
        &self.buffer[DESCRIPTOR_SIZE..self.len]
    }
    /// Descriptor and frame as halfwords, padded with zero.
    pub fn halfwords(&self) -> impl Iterator<Item = u16> + '_ {
        crate::ring::halfwords_of(self.as_bytes())
    }
}

const AUTHENTICATION: FrameControl = FrameControl::new().with_subtype(0b1011);
const ASSOCIATION_REQUEST: FrameControl = FrameControl::new();
const NULL_DATA: FrameControl = FrameControl::new()
    .with_frame_type(0b10)
    .with_subtype(0b0100)
    .with_to_ds(true);
/// The rate management frames are sent at.
pub const MANAGEMENT_RATE: u16 = 0x0a;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum AuthAlgorithm {
    OpenSystem = 0,
    SharedKey = 1,
}

/// Request authentication from the access point.
pub fn authentication_request(
    algorithm: AuthAlgorithm,
    association: &ConnectParams,
    mac_address: [u8; 6],
) -> TxFrame {
    TxFrame::management(AUTHENTICATION, association, mac_address, 0)
        .push_u16(algorithm as u16)
        .push_u16(1)
        .push_u16(0)
        .finish(MANAGEMENT_RATE)
}

/// Return the challenge text of shared key authentication, encrypted with the WEP key.
pub fn shared_key_response(
    challenge: &[u8],
    association: &ConnectParams,
    mac_address: [u8; 6],
    random: u32,
) -> TxFrame {
    let iv = (random & 0x0fff) | ((association.wep_key_id as u32) << 30);
    let challenge = &challenge[..challenge.len().min(u8::MAX as usize)];
    TxFrame::management(
        AUTHENTICATION.with_protected(true),
        association,
        mac_address,
        iv,
    )
    .push_u16(AuthAlgorithm::SharedKey as u16)
    .push_u16(3)
    .push_u16(0)
    .push(&[element_id::CHALLENGE_TEXT, challenge.len() as u8])
    .push(challenge)
    .finish(MANAGEMENT_RATE)
}

/// The rate set we advertise: 1 Mbps basic, 2 Mbps and whatever else the access point offers.
pub fn association_rates(base_rates: &[u8; 16]) -> ([u8; 16], usize) {
    let mut rates = [0u8; 16];
    rates[0] = 0x82;
    rates[1] = 0x04;
    let mut len = 2;
    for rate in base_rates.iter().take_while(|rate| **rate != 0) {
        if len == MAX_RATES {
            break;
        }
        let rate = rate & 0x7f;
        if rate == 0x02 || rate == 0x04 {
            continue;
        }
        rates[len] = rate;
        len += 1;
    }
    (rates, len)
}

/// Ask the access point to associate us.
pub fn association_request(
    association: &ConnectParams,
    mac_address: [u8; 6],
    listen_interval: u16,
) -> TxFrame {
    let capability = if association.wep_mode.is_enabled() {
        0x0031
    } else {
        0x0021
    };
    let ssid = association.ssid.as_bytes();
    let (rates, rate_count) = association_rates(&association.base_rates);
    TxFrame::management(ASSOCIATION_REQUEST, association, mac_address, 0)
        .push_u16(capability)
        .push_u16(listen_interval)
        .push(&[element_id::SSID, ssid.len() as u8])
        .push(ssid)
        .push(&[element_id::SUPPORTED_RATES, rate_count as u8])
        .push(&rates[..rate_count])
        .finish(MANAGEMENT_RATE)
}

/// A null data frame, which tells the access point we're still there.
pub fn null_data(association: &ConnectParams, mac_address: [u8; 6], rate: u16) -> TxFrame {
    TxFrame::management(NULL_DATA, association, mac_address, 0).finish(rate)
}
