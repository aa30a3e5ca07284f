//! The 12 byte header in front of every frame, both in the rings and in the MAC frame memory.
//!
//! The hardware uses different layouts for the two directions, so there is a type for each.
//! Halfword | TX | RX
//! -- | -- | --
//! 0 | status | status
//! 1 | - | -
//! 2 | - | -
//! 3 | beacon frequency | rate
//! 4 | rate | byte length
//! 5 | byte length incl. FCS | RSSI
use macro_bits::serializable_enum;

/// Size of a frame descriptor in bytes.
pub const DESCRIPTOR_SIZE: usize = 12;
/// Size of a frame descriptor in halfwords.
pub const DESCRIPTOR_HALFWORDS: usize = DESCRIPTOR_SIZE / 2;
/// Length of the frame check sequence, which the hardware appends.
pub const FCS_SIZE: usize = 4;

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// The rate codes understood by the MAC.
    pub enum DataRate: u16 {
        /// Let the engine fill in the negotiated rate.
        #[default]
        Auto => 0x00,
        Rate1M => 0x0a,
        Rate2M => 0x14
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Descriptor of a frame queued for transmission.
pub struct TxDescriptor {
    pub status: u16,
    pub rate: u16,
    /// Length of the 802.11 frame, including the FCS.
    pub length: u16,
}
impl TxDescriptor {
    /// Descriptor for a body of `body_len` bytes.
    pub const fn for_body(body_len: usize, rate: u16) -> Self {
        Self {
            status: 0,
            rate,
            length: (body_len + FCS_SIZE) as u16,
        }
    }
    /// Length of the frame body, as it's stored after the descriptor.
    pub const fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(FCS_SIZE)
    }
    /// The amount of halfwords descriptor and body occupy in a ring.
    pub const fn stored_halfwords(&self) -> usize {
        DESCRIPTOR_HALFWORDS + (self.body_len() + 1) / 2
    }
    pub const fn to_halfwords(&self) -> [u16; DESCRIPTOR_HALFWORDS] {
        [self.status, 0, 0, 0, self.rate, self.length]
    }
    pub const fn from_halfwords(halfwords: [u16; DESCRIPTOR_HALFWORDS]) -> Self {
        Self {
            status: halfwords[0],
            rate: halfwords[4],
            length: halfwords[5],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Descriptor the hardware writes in front of a received frame.
pub struct RxDescriptor {
    pub status: u16,
    pub rate: u16,
    /// Length of the 802.11 frame in bytes.
    pub length: u16,
    /// Signal strength sample taken while receiving.
    pub rssi: u8,
}
impl RxDescriptor {
    /// The amount of bytes the frame occupies in frame memory and in the RX ring.
    ///
    /// The hardware pads every frame to a multiple of four bytes.
    pub const fn stored_size(&self) -> usize {
        DESCRIPTOR_SIZE + ((self.length as usize + 3) & !3)
    }
    pub const fn to_halfwords(&self) -> [u16; DESCRIPTOR_HALFWORDS] {
        [self.status, 0, 0, self.rate, self.length, self.rssi as u16]
    }
    pub const fn from_halfwords(halfwords: [u16; DESCRIPTOR_HALFWORDS]) -> Self {
        Self {
            status: halfwords[0],
            rate: halfwords[3],
            length: halfwords[4],
            rssi: (halfwords[5] & 0xff) as u8,
        }
    }
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        for (chunk, halfword) in bytes.chunks_exact_mut(2).zip(self.to_halfwords()) {
            chunk.copy_from_slice(&halfword.to_le_bytes());
        }
        bytes
    }
    pub fn from_bytes(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let mut halfwords = [0u16; DESCRIPTOR_HALFWORDS];
        for (halfword, chunk) in halfwords.iter_mut().zip(bytes.chunks_exact(2)) {
            *halfword = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Self::from_halfwords(halfwords)
    }
}
