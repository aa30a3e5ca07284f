//! The control block shared by the engine and the client.
//!
//! Both processors see the same [ControlBlock], but every field in it has exactly one writer.
//! This is expressed through the owner parameter of [Field] and [Cursor]: writing requires a
//! reference to the owner marker, and only [EngineView] hands out [EngineSide], while only
//! [ClientView] hands out [ClientSide]. Reading is possible from both sides at any time.
//!
//! The layout of the block is the contract between the two sides. Any change to it must bump
//! [CONTROL_BLOCK_VERSION].
use core::{
    cell::UnsafeCell,
    fmt::{self, Debug},
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
};

use bitfield_struct::bitfield;
use portable_atomic::{AtomicU16, AtomicU32, Ordering};

use crate::{ap_table::ApTable, ring::RingBuffer, WiFiError, WiFiResult};

/// Version of the control block layout.
pub const CONTROL_BLOCK_VERSION: u32 = 1;
/// Capacity of the TX ring in halfwords.
pub const TX_RING_HALFWORDS: usize = 24 * 1024 / 2;
/// Capacity of the RX ring in halfwords.
pub const RX_RING_HALFWORDS: usize = 12 * 1024 / 2;
/// Maximum length of an SSID.
pub const MAX_SSID_LEN: usize = 32;

/// Marker for fields written by the engine.
pub struct EngineSide(());
/// Marker for fields written by the client.
pub struct ClientSide(());

#[repr(transparent)]
/// A field of the control block, which only the owner `O` may write.
pub struct Field<T, O> {
    value: UnsafeCell<T>,
    _owner: PhantomData<O>,
}
// SAFETY:
// There is only ever one writer, which is enforced through the owner marker. Reads and writes are
// volatile and `T` is `Copy`, so a reader at worst observes a stale value.
unsafe impl<T: Copy + Send, O> Sync for Field<T, O> {}
impl<T: Copy, O> Field<T, O> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            _owner: PhantomData,
        }
    }
    /// Read the current value.
    pub fn get(&self) -> T {
        unsafe { self.value.get().read_volatile() }
    }
    /// Write a new value.
    pub fn set(&self, _owner: &O, value: T) {
        unsafe { self.value.get().write_volatile(value) }
    }
    /// Read, modify and write back the value.
    pub fn update(&self, owner: &O, f: impl FnOnce(T) -> T) {
        self.set(owner, f(self.get()))
    }
}

/// A ring cursor, which only the owner `O` may advance.
pub struct Cursor<O> {
    value: AtomicU16,
    _owner: PhantomData<O>,
}
impl<O> Cursor<O> {
    pub const fn new() -> Self {
        Self {
            value: AtomicU16::new(0),
            _owner: PhantomData,
        }
    }
    /// Load the cursor.
    ///
    /// Everything the owner wrote before publishing this position is visible afterwards.
    pub fn load(&self) -> usize {
        self.value.load(Ordering::Acquire) as usize
    }
    /// Publish a new position.
    pub fn store(&self, _owner: &O, position: usize) {
        self.value.store(position as u16, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// The operating mode of the link.
pub enum WifiMode {
    #[default]
    Disabled,
    Normal,
    Scan,
    Associate,
    Associated,
    CannotAssociate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// How far the handshake with the access point got.
pub enum AuthLevel {
    #[default]
    Disconnected,
    Authenticated,
    Associated,
    Deassociated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// The WEP mode negotiated with the access point.
pub enum WepMode {
    #[default]
    None,
    Wep40,
    Wep104,
    Wep128,
}
impl WepMode {
    /// The value of the key length field in [Register::ModeWep](crate::hardware::Register).
    pub const fn key_length_code(&self) -> u16 {
        match self {
            // The hardware has no "off" code, encryption is disabled through the WEP control.
            Self::None | Self::Wep40 => 1,
            Self::Wep104 => 2,
            Self::Wep128 => 3,
        }
    }
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(C)]
/// A network name of up to 32 bytes.
pub struct Ssid {
    len: u8,
    bytes: [u8; MAX_SSID_LEN],
}
impl Ssid {
    pub const EMPTY: Self = Self {
        len: 0,
        bytes: [0u8; MAX_SSID_LEN],
    };
    /// Create an SSID, truncating anything past 32 bytes.
    pub fn new(ssid: &[u8]) -> Self {
        let len = ssid.len().min(MAX_SSID_LEN);
        let mut bytes = [0u8; MAX_SSID_LEN];
        bytes[..len].copy_from_slice(&ssid[..len]);
        Self {
            len: len as u8,
            bytes,
        }
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..(self.len as usize).min(MAX_SSID_LEN)]
    }
    /// The SSID as a string, if it's valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.as_bytes()).ok()
    }
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
impl Debug for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(ssid) => write!(f, "{ssid:?}"),
            None => write!(f, "{:x?}", self.as_bytes()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
/// Everything the engine needs to know, to connect to an access point.
///
/// The client fills this in and raises [RequestFlags::connect]. The engine copies it once, when
/// accepting the request.
pub struct ConnectParams {
    pub bssid: [u8; 6],
    /// Address the frames are sent to. This is usually the BSSID.
    pub ap_mac: [u8; 6],
    pub channel: u8,
    pub wep_mode: WepMode,
    pub wep_key_id: u8,
    pub wep_key: [u8; 20],
    pub ssid: Ssid,
    /// Zero terminated rate set, as advertised by the access point.
    pub base_rates: [u8; 16],
}
impl ConnectParams {
    pub const EMPTY: Self = Self {
        bssid: [0u8; 6],
        ap_mac: [0u8; 6],
        channel: 1,
        wep_mode: WepMode::None,
        wep_key_id: 0,
        wep_key: [0u8; 20],
        ssid: Ssid::EMPTY,
        base_rates: [0u8; 16],
    };
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
/// What the engine last programmed into the hardware.
pub struct HardwareSnapshot {
    pub mac_address: [u8; 6],
    /// The channel the RF is tuned to.
    pub channel: u8,
    /// The channel the engine wants to be on.
    pub target_channel: u8,
    /// Rate used for frames, which don't specify one.
    pub max_rate: u16,
    pub association_id: u16,
}
impl HardwareSnapshot {
    pub const INITIAL: Self = Self {
        mac_address: [0u8; 6],
        channel: 1,
        target_channel: 1,
        max_rate: 0x0a,
        association_id: 0,
    };
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// Requests raised by the client, and the subset the engine is currently acting on.
pub struct RequestFlags {
    /// Connect to the access point described by [ConnectParams].
    pub connect: bool,
    /// Copy [ConnectParams] again, before connecting.
    pub copy_values: bool,
    /// The network is an IBSS.
    pub ad_hoc: bool,
    /// Forward every received frame to the client.
    pub promiscuous: bool,
    #[bits(4)]
    pub __: u8,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// Classes of received frames.
pub struct PacketFlags {
    pub management: bool,
    pub control: bool,
    pub data: bool,
    pub beacon: bool,
    #[bits(4)]
    pub __: u8,
}
impl PacketFlags {
    pub const ALL: Self = Self::new()
        .with_management(true)
        .with_control(true)
        .with_data(true)
        .with_beacon(true);
    /// What the client receives, unless it asks for something else.
    pub const DEFAULT_FILTER: Self = Self::ALL.with_beacon(false);
    /// Check if any class is set in both.
    pub const fn intersects(&self, other: Self) -> bool {
        self.into_bits() & other.into_bits() != 0
    }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// State of the engine itself.
pub struct EngineFlags {
    /// The engine was initialized.
    pub active: bool,
    /// The MAC is running and interrupts are serviced.
    pub running: bool,
    #[bits(6)]
    pub __: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
/// The named statistics counters.
pub enum Stat {
    RxPackets,
    RxBytes,
    RxDataBytes,
    RxQueuedPackets,
    RxQueuedBytes,
    RxQueuedLost,
    TxPackets,
    TxBytes,
    TxDataBytes,
    TxQueuedPackets,
    TxQueuedBytes,
    TxQueuedRejected,
    TxBypassDropped,
    EngineUpdates,
    /// Raw TX location and busy state, as seen by the last TX complete interrupt.
    TxDebug,
}
impl Stat {
    pub const COUNT: usize = Self::TxDebug as usize + 1;
}
/// Number of statistics slots fed by the hardware counters.
pub const HARDWARE_COUNTER_SLOTS: usize = 36;

/// Counters kept by both sides.
///
/// The client only writes the `TxQueued*` counters, everything else belongs to the engine.
pub struct Statistics {
    counters: [AtomicU32; Stat::COUNT + HARDWARE_COUNTER_SLOTS],
}
impl Statistics {
    pub const fn new() -> Self {
        Self {
            counters: [const { AtomicU32::new(0) }; Stat::COUNT + HARDWARE_COUNTER_SLOTS],
        }
    }
    pub fn get(&self, stat: Stat) -> u32 {
        self.counters[stat as usize].load(Ordering::Relaxed)
    }
    /// The accumulated value of a hardware counter slot.
    ///
    /// Slot `2 * n` holds the low byte of counter `n`, `2 * n + 1` the high byte.
    pub fn hardware_slot(&self, slot: usize) -> Option<u32> {
        (slot < HARDWARE_COUNTER_SLOTS)
            .then(|| self.counters[Stat::COUNT + slot].load(Ordering::Relaxed))
    }
    pub(crate) fn add(&self, stat: Stat, amount: u32) {
        self.counters[stat as usize].fetch_add(amount, Ordering::Relaxed);
    }
    pub(crate) fn set(&self, stat: Stat, value: u32) {
        self.counters[stat as usize].store(value, Ordering::Relaxed);
    }
    pub(crate) fn add_hardware(&self, slot: usize, amount: u32) {
        if let Some(counter) = self.counters.get(Stat::COUNT + slot) {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }
}
impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames from the client to the engine.
pub type TxRing = RingBuffer<ClientSide, EngineSide, TX_RING_HALFWORDS>;
/// Frames from the engine to the client.
pub type RxRing = RingBuffer<EngineSide, ClientSide, RX_RING_HALFWORDS>;

#[repr(C)]
/// The state shared between engine and client.
pub struct ControlBlock {
    version: u32,

    // Engine owned.
    pub engine_flags: Field<EngineFlags, EngineSide>,
    pub mode: Field<WifiMode, EngineSide>,
    pub auth_level: Field<AuthLevel, EngineSide>,
    pub auth_retries: Field<u8, EngineSide>,
    /// The requests the engine accepted.
    pub active_requests: Field<RequestFlags, EngineSide>,
    pub hardware: Field<HardwareSnapshot, EngineSide>,
    /// Copy of [ControlBlock::connect_params] taken when connecting.
    pub association: Field<ConnectParams, EngineSide>,
    pub random: Field<u32, EngineSide>,
    /// Records are written by the engine, while holding their lock.
    pub ap_table: ApTable,
    pub stats: Statistics,

    // Client owned.
    pub requested_mode: Field<WifiMode, ClientSide>,
    pub requested_channel: Field<u8, ClientSide>,
    pub requests: Field<RequestFlags, ClientSide>,
    pub packet_filter: Field<PacketFlags, ClientSide>,
    pub connect_params: Field<ConnectParams, ClientSide>,

    pub tx: TxRing,
    pub rx: RxRing,
}
impl ControlBlock {
    pub const fn new() -> Self {
        Self {
            version: CONTROL_BLOCK_VERSION,
            engine_flags: Field::new(EngineFlags::new()),
            mode: Field::new(WifiMode::Disabled),
            auth_level: Field::new(AuthLevel::Disconnected),
            auth_retries: Field::new(0),
            active_requests: Field::new(RequestFlags::new()),
            hardware: Field::new(HardwareSnapshot::INITIAL),
            association: Field::new(ConnectParams::EMPTY),
            random: Field::new(0),
            ap_table: ApTable::new(),
            stats: Statistics::new(),
            requested_mode: Field::new(WifiMode::Disabled),
            requested_channel: Field::new(1),
            requests: Field::new(RequestFlags::new()),
            packet_filter: Field::new(PacketFlags::DEFAULT_FILTER),
            connect_params: Field::new(ConnectParams::EMPTY),
            tx: RingBuffer::new(),
            rx: RingBuffer::new(),
        }
    }
    /// Split the block into the views for both sides.
    ///
    /// This is for the case, that both sides run in the same address space.
    pub fn split(&mut self) -> (EngineView<'_>, ClientView<'_>) {
        let block = &*self;
        (
            EngineView {
                block,
                side: EngineSide(()),
            },
            ClientView {
                block,
                side: ClientSide(()),
            },
        )
    }
    /// Attach the engine to a control block allocated by the client.
    ///
    /// # Safety
    /// `block` must point to an initialized [ControlBlock], that is never moved or freed, and
    /// there must be no other [EngineView] for it.
    pub unsafe fn attach_engine(block: NonNull<ControlBlock>) -> WiFiResult<EngineView<'static>> {
        let block = unsafe { block.as_ref() };
        Self::check_version(block)?;
        Ok(EngineView {
            block,
            side: EngineSide(()),
        })
    }
    /// Attach the client to a control block.
    ///
    /// # Safety
    /// `block` must point to an initialized [ControlBlock], that is never moved or freed, and
    /// there must be no other [ClientView] for it.
    pub unsafe fn attach_client(block: NonNull<ControlBlock>) -> WiFiResult<ClientView<'static>> {
        let block = unsafe { block.as_ref() };
        Self::check_version(block)?;
        Ok(ClientView {
            block,
            side: ClientSide(()),
        })
    }
    fn check_version(block: &ControlBlock) -> WiFiResult<()> {
        if block.version == CONTROL_BLOCK_VERSION {
            Ok(())
        } else {
            Err(WiFiError::VersionMismatch)
        }
    }
}
impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// The engine's access to the control block.
pub struct EngineView<'a> {
    block: &'a ControlBlock,
    side: EngineSide,
}
impl EngineView<'_> {
    pub fn side(&self) -> &EngineSide {
        &self.side
    }
    /// Write an engine owned field.
    pub fn set<T: Copy>(&self, field: &Field<T, EngineSide>, value: T) {
        field.set(&self.side, value);
    }
    /// Modify an engine owned field.
    pub fn update<T: Copy>(&self, field: &Field<T, EngineSide>, f: impl FnOnce(T) -> T) {
        field.update(&self.side, f);
    }
}
impl Deref for EngineView<'_> {
    type Target = ControlBlock;
    fn deref(&self) -> &Self::Target {
        self.block
    }
}

/// The client's access to the control block.
pub struct ClientView<'a> {
    block: &'a ControlBlock,
    side: ClientSide,
}
impl ClientView<'_> {
    pub fn side(&self) -> &ClientSide {
        &self.side
    }
    /// Write a client owned field.
    pub fn set<T: Copy>(&self, field: &Field<T, ClientSide>, value: T) {
        field.set(&self.side, value);
    }
    /// Modify a client owned field.
    pub fn update<T: Copy>(&self, field: &Field<T, ClientSide>, f: impl FnOnce(T) -> T) {
        field.update(&self.side, f);
    }
}
impl Deref for ClientView<'_> {
    type Target = ControlBlock;
    fn deref(&self) -> &Self::Target {
        self.block
    }
}
