//! Access to the Wi-Fi MAC, baseband and RF.
//!
//! The register windows and the frame memory belong to the platform, so the engine only ever
//! talks to them through [WifiHardware]. Everything above register level, like the order in
//! which filters are switched when connecting, lives in the engine.
use bitfield_struct::bitfield;
use macro_bits::{bit, serializable_enum};

serializable_enum! {
    /// A register of the MAC.
    ///
    /// The value is the byte offset into the MAC register window.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum Register: u16 {
        ModeReset => 0x004,
        ModeWep => 0x006,
        TxStatControl => 0x008,
        Unknown00A => 0x00a,
        InterruptFlags => 0x010,
        InterruptEnable => 0x012,
        MacAddress0 => 0x018,
        MacAddress1 => 0x01a,
        MacAddress2 => 0x01c,
        Bssid0 => 0x020,
        Bssid1 => 0x022,
        Bssid2 => 0x024,
        AssociationIdLow => 0x028,
        AssociationIdFull => 0x02a,
        TxRetryLimit => 0x02c,
        RxControl => 0x030,
        WepControl => 0x032,
        PowerUs => 0x036,
        PowerTx => 0x038,
        PowerState => 0x03c,
        Random => 0x044,
        Power48 => 0x048,
        RxBufBegin => 0x050,
        RxBufEnd => 0x052,
        RxBufWriteCursor => 0x054,
        RxBufWriteAddress => 0x056,
        RxBufReadCursor => 0x05a,
        RxBufGap => 0x062,
        TxBufBeacon => 0x080,
        ListenInterval => 0x08e,
        TxBufLoc3 => 0x0a8,
        TxRequestReset => 0x0ac,
        TxRequestSet => 0x0ae,
        TxBufReset => 0x0b4,
        TxBusy => 0x0b6,
        RxFilter => 0x0d0,
        RxFilter2 => 0x0e0,
        UsCountControl => 0x0e8,
        UsCompareControl => 0x0ea,
        UsCount1 => 0x0fa,
        PostBeacon => 0x11c,
        RxStatIncrementIe => 0x1aa,
        RxStatOverflowIe => 0x1ac,
        RxStat1B0 => 0x1b0,
        RxStat1B2 => 0x1b2,
        RxStat1B4 => 0x1b4,
        RxStat1B6 => 0x1b6,
        RxStat1B8 => 0x1b8,
        RxStat1BA => 0x1ba,
        RxStat1BC => 0x1bc,
        RxStat1BE => 0x1be,
        TxErrorCount => 0x1c0,
        RxCount => 0x1c4,
        CmdStat1D0 => 0x1d0,
        CmdStat1D2 => 0x1d2,
        CmdStat1D4 => 0x1d4,
        CmdStat1D6 => 0x1d6,
        CmdStat1D8 => 0x1d8,
        CmdStat1DA => 0x1da,
        CmdStat1DC => 0x1dc,
        CmdStat1DE => 0x1de
    }
}

/// The hardware event counters, in the order they are accumulated into the statistics.
///
/// These are 8 bit counters packed in pairs, so each register feeds two statistics slots.
pub const COUNTER_REGISTERS: [Register; 18] = [
    Register::RxStat1B0,
    Register::RxStat1B2,
    Register::RxStat1B4,
    Register::RxStat1B6,
    Register::RxStat1B8,
    Register::RxStat1BA,
    Register::RxStat1BC,
    Register::RxStat1BE,
    Register::TxErrorCount,
    Register::RxCount,
    Register::CmdStat1D0,
    Register::CmdStat1D2,
    Register::CmdStat1D4,
    Register::CmdStat1D6,
    Register::CmdStat1D8,
    Register::CmdStat1DA,
    Register::CmdStat1DC,
    Register::CmdStat1DE,
];

/// Size of the MAC frame memory in bytes.
pub const MAC_MEMORY_SIZE: usize = 0x2000;
/// Frame memory below this offset is used for transmission, everything above for reception.
pub const TX_MEMORY_LIMIT: usize = 0x0c00;
/// Begin of the RX area, in the address space of the `RxBuf*` registers.
pub const RX_BUFFER_BEGIN: u16 = 0x4c00;
/// End of the RX area, in the address space of the `RxBuf*` registers.
pub const RX_BUFFER_END: u16 = 0x5f60;
/// The RX gap sits right below the end.
pub const RX_BUFFER_GAP: u16 = 0x5f5e;
/// Frame memory offsets of the four WEP key slots.
pub const WEP_KEY_SLOTS: [usize; 4] = [0x1f80, 0x1fa0, 0x1fc0, 0x1fe0];
/// Flash offset of the factory programmed MAC address.
pub const FACTORY_MAC_OFFSET: u32 = 0x36;
/// Set in [Register::TxBusy], while transmit location 3 is occupied.
pub const TX_BUSY_LOC3: u16 = bit!(3);

/// Converts a value of one of the `RxBuf*` address registers into a frame memory offset.
pub const fn rx_memory_offset(register_value: u16) -> usize {
    (register_value & 0x1ffe) as usize
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
/// The interrupt sources of the MAC, as found in [Register::InterruptFlags] and
/// [Register::InterruptEnable].
pub struct InterruptFlags {
    pub rx_complete: bool,
    pub tx_complete: bool,
    pub rx_event_increment: bool,
    pub tx_error_increment: bool,
    pub rx_event_half_overflow: bool,
    pub tx_error_half_overflow: bool,
    pub rx_start: bool,
    pub tx_start: bool,
    pub txbuf_count_end: bool,
    pub rxbuf_count_end: bool,
    pub __: bool,
    pub rf_wakeup: bool,
    pub multiplay_cmd_done: bool,
    pub post_beacon_timeslot: bool,
    pub beacon_timeslot: bool,
    pub pre_beacon_timeslot: bool,
}
impl InterruptFlags {
    /// The sources the engine enables once running.
    pub const ENGINE_DEFAULT: Self = Self::new()
        .with_rx_complete(true)
        .with_tx_complete(true)
        .with_rx_event_half_overflow(true)
        .with_tx_error_half_overflow(true)
        .with_tx_start(true)
        .with_beacon_timeslot(true);
    /// Every source.
    pub const ALL: Self = Self::from_bits(0xffff);
}

/// The platform side of the radio.
///
/// Implementations own the register window and the frame memory. The engine assumes, that
/// [Register::InterruptFlags] is write-one-to-clear and that [Register::TxRequestSet] starts the
/// transmission of the frame at frame memory offset zero, if [Register::TxBufLoc3] marks it as
/// valid.
pub trait WifiHardware {
    /// Read a MAC register.
    fn read_register(&mut self, register: Register) -> u16;
    /// Write a MAC register.
    fn write_register(&mut self, register: Register, value: u16);
    /// Read the halfword at the byte `offset` of the frame memory.
    fn read_mac_memory(&mut self, offset: usize) -> u16;
    /// Write the halfword at the byte `offset` of the frame memory.
    fn write_mac_memory(&mut self, offset: usize, value: u16);
    /// Wake up the baseband and the RF.
    fn power_on(&mut self);
    /// Power down the baseband and the RF.
    fn power_off(&mut self);
    /// Run the MAC, RF and baseband initialization sequences.
    fn init_radio(&mut self);
    /// Program the RF and baseband for `channel`.
    fn tune(&mut self, channel: u8);
    /// Read calibration or identity data from the factory flash.
    fn read_factory_bytes(&mut self, offset: u32, buffer: &mut [u8]);
    /// Acknowledge the Wi-Fi line at the top level interrupt controller.
    fn acknowledge_interrupt(&mut self) {}
    /// Read, modify and write back a register.
    fn modify_register(&mut self, register: Register, f: impl FnOnce(u16) -> u16) {
        let value = self.read_register(register);
        self.write_register(register, f(value));
    }
}
