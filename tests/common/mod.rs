#![allow(dead_code)]

use dswifi_link::{
    descriptor::{RxDescriptor, DESCRIPTOR_SIZE, FCS_SIZE},
    hardware::{
        rx_memory_offset, InterruptFlags, Register, COUNTER_REGISTERS, FACTORY_MAC_OFFSET,
        RX_BUFFER_BEGIN, RX_BUFFER_END, TX_BUSY_LOC3,
    },
    ClientView, ControlBlock, EngineConfig, EngineView, WifiClient, WifiEngine, WifiHardware,
};

#[macro_export]
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

pub const OWN_MAC: [u8; 6] = [0x00, 0x09, 0xbf, 0x12, 0x34, 0x56];
pub const AP_MAC: [u8; 6] = [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee];
pub const AP_CHANNEL: u8 = 6;

const REGISTER_COUNT: usize = 0x200 / 2;
const MAC_MEMORY_HALFWORDS: usize = 0x2000 / 2;

/// A frame, that the simulated MAC put on the air.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub rate: u16,
    /// The frame, starting at the frame control field, without the FCS.
    pub bytes: Vec<u8>,
}
impl SentFrame {
    pub fn frame_control(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }
    pub fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }
}

/// A MAC, that only exists in memory.
///
/// Interrupt flags are write-one-to-clear, the hardware counters clear on read and a write to
/// [Register::TxRequestSet] sends whatever is at TX location 3.
pub struct MockRadio {
    registers: [u16; REGISTER_COUNT],
    memory: Vec<u16>,
    random: u32,
    pub interrupt_flags: u16,
    pub tx_busy: bool,
    pub channel: u8,
    pub tune_count: usize,
    pub powered: bool,
    pub sent: Vec<SentFrame>,
    /// Runs while the radio is being tuned, i.e. in the middle of an engine call.
    pub on_tune: Option<Box<dyn FnMut(&mut MockRadio)>>,
}
impl MockRadio {
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            memory: vec![0; MAC_MEMORY_HALFWORDS],
            random: 0x1234_5678,
            interrupt_flags: 0,
            tx_busy: false,
            channel: 0,
            tune_count: 0,
            powered: false,
            sent: Vec::new(),
            on_tune: None,
        }
    }
    fn slot(register: Register) -> usize {
        register.into_bits() as usize / 2
    }
    pub fn register(&self, register: Register) -> u16 {
        self.registers[Self::slot(register)]
    }
    pub fn set_register(&mut self, register: Register, value: u16) {
        self.registers[Self::slot(register)] = value;
    }
    pub fn memory(&self, offset: usize) -> u16 {
        self.memory[(offset & 0x1fff) / 2]
    }
    /// Advance the upper half of the microsecond counter.
    pub fn advance_ticks(&mut self, ticks: u16) {
        let now = self.register(Register::UsCount1);
        self.set_register(Register::UsCount1, now.wrapping_add(ticks));
    }
    pub fn raise(&mut self, flags: InterruptFlags) {
        self.interrupt_flags |= flags.into_bits();
    }
    /// Place a received frame in the RX area and raise the RX interrupt.
    pub fn deliver(&mut self, frame: &[u8], rssi: u8) {
        let begin = rx_memory_offset(RX_BUFFER_BEGIN);
        let end = rx_memory_offset(RX_BUFFER_END);
        let descriptor = RxDescriptor {
            status: 0,
            rate: 0x14,
            length: frame.len() as u16,
            rssi,
        };
        let mut bytes = descriptor.to_bytes().to_vec();
        bytes.extend_from_slice(frame);
        bytes.resize(descriptor.stored_size(), 0);

        let mut address = (self.register(Register::RxBufWriteCursor) as usize) << 1;
        for chunk in bytes.chunks_exact(2) {
            self.memory[address / 2] = u16::from_le_bytes([chunk[0], chunk[1]]);
            address += 2;
            if address >= end {
                address = begin;
            }
        }
        self.set_register(Register::RxBufWriteCursor, (address >> 1) as u16);
        self.raise(InterruptFlags::new().with_rx_complete(true));
    }
    /// Frames sent so far with the given frame control field.
    pub fn sent_with(&self, frame_control: u16) -> Vec<&SentFrame> {
        self.sent
            .iter()
            .filter(|frame| frame.frame_control() == frame_control)
            .collect()
    }
    fn transmit(&mut self) {
        let rate = self.memory(0x08);
        let length = self.memory(0x0a) as usize;
        let bytes = (0..length.saturating_sub(FCS_SIZE))
            .map(|i| self.memory(DESCRIPTOR_SIZE + (i & !1)).to_le_bytes()[i % 2])
            .collect();
        self.sent.push(SentFrame { rate, bytes });
        let location = self.register(Register::TxBufLoc3);
        self.set_register(Register::TxBufLoc3, location & !0x8000);
        self.raise(InterruptFlags::new().with_tx_complete(true));
    }
}
impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}
impl WifiHardware for MockRadio {
    fn read_register(&mut self, register: Register) -> u16 {
        match register {
            Register::InterruptFlags => self.interrupt_flags,
            Register::TxBusy => {
                if self.tx_busy {
                    TX_BUSY_LOC3
                } else {
                    0
                }
            }
            Register::Random => {
                self.random = self.random.wrapping_mul(1_103_515_245).wrapping_add(12345);
                (self.random >> 16) as u16
            }
            register if COUNTER_REGISTERS.contains(&register) => {
                let value = self.register(register);
                self.set_register(register, 0);
                value
            }
            register => self.register(register),
        }
    }
    fn write_register(&mut self, register: Register, value: u16) {
        match register {
            Register::InterruptFlags => self.interrupt_flags &= !value,
            Register::RxBufWriteAddress => {
                self.set_register(register, value);
                self.set_register(Register::RxBufWriteCursor, value);
            }
            Register::TxRequestSet => {
                self.set_register(register, value);
                if self.register(Register::TxBufLoc3) & 0x8000 != 0 {
                    self.transmit();
                }
            }
            register => self.set_register(register, value),
        }
    }
    fn read_mac_memory(&mut self, offset: usize) -> u16 {
        self.memory(offset)
    }
    fn write_mac_memory(&mut self, offset: usize, value: u16) {
        self.memory[(offset & 0x1fff) / 2] = value;
    }
    fn power_on(&mut self) {
        self.powered = true;
    }
    fn power_off(&mut self) {
        self.powered = false;
    }
    fn init_radio(&mut self) {}
    fn tune(&mut self, channel: u8) {
        self.channel = channel;
        self.tune_count += 1;
        if let Some(mut on_tune) = self.on_tune.take() {
            on_tune(self);
            self.on_tune = Some(on_tune);
        }
    }
    fn read_factory_bytes(&mut self, offset: u32, buffer: &mut [u8]) {
        if offset == FACTORY_MAC_OFFSET {
            buffer.copy_from_slice(&OWN_MAC[..buffer.len()]);
        }
    }
}

/// Build a management frame from the access point to us.
pub fn management_frame(frame_control: u16, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&frame_control.to_le_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&OWN_MAC);
    frame.extend_from_slice(&AP_MAC);
    frame.extend_from_slice(&AP_MAC);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(body);
    frame
}
pub fn authentication_response(algorithm: u16, sequence: u16, status: u16) -> Vec<u8> {
    let mut body = Vec::new();
    for field in [algorithm, sequence, status] {
        body.extend_from_slice(&field.to_le_bytes());
    }
    management_frame(0x00b0, &body)
}
pub fn association_response(status: u16, association_id: u16) -> Vec<u8> {
    let mut body = Vec::new();
    for field in [0x0021, status, association_id] {
        body.extend_from_slice(&u16::to_le_bytes(field));
    }
    body.extend_from_slice(&[1, 2, 0x82, 0x84]);
    management_frame(0x0010, &body)
}
/// A beacon as broadcast by an access point.
pub fn beacon(bssid: [u8; 6], ssid: &[u8], channel: u8, privacy: bool) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&0x0080u16.to_le_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&bssid);
    frame.extend_from_slice(&bssid);
    frame.extend_from_slice(&[0, 0]);
    // Timestamp and beacon interval
    frame.extend_from_slice(&[0; 8]);
    frame.extend_from_slice(&100u16.to_le_bytes());
    let capability: u16 = if privacy { 0x0011 } else { 0x0001 };
    frame.extend_from_slice(&capability.to_le_bytes());
    frame.push(0);
    frame.push(ssid.len() as u8);
    frame.extend_from_slice(ssid);
    frame.extend_from_slice(&[1, 4, 0x82, 0x84, 0x0b, 0x16]);
    frame.extend_from_slice(&[3, 1, channel]);
    frame
}

/// Engine and client on a control block of their own.
pub struct Harness {
    pub engine: WifiEngine<'static, MockRadio>,
    pub client: WifiClient<'static>,
}
impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }
    pub fn with_config(config: EngineConfig) -> Self {
        let block: &'static mut ControlBlock = Box::leak(Box::new(ControlBlock::new()));
        let (engine_view, client_view) = block.split();
        Self::from_views(engine_view, client_view, config)
    }
    pub fn from_views(
        engine_view: EngineView<'static>,
        client_view: ClientView<'static>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine: WifiEngine::new(engine_view, MockRadio::new(), config),
            client: WifiClient::new(client_view),
        }
    }
    pub fn radio<R>(&self, f: impl FnOnce(&mut MockRadio) -> R) -> R {
        self.engine
            .with_hardware(f)
            .expect("the engine isn't borrowed")
    }
    /// Let one hardware tick pass and drive the engine.
    pub fn tick(&self) {
        self.radio(|radio| radio.advance_ticks(1));
        self.engine.tick();
    }
    pub fn ticks(&self, count: usize) {
        for _ in 0..count {
            self.tick();
        }
    }
    pub fn interrupt(&self) {
        self.engine.handle_interrupt();
    }
    /// Deliver a frame and service the resulting interrupt.
    pub fn receive(&self, frame: &[u8], rssi: u8) {
        self.radio(|radio| radio.deliver(frame, rssi));
        self.interrupt();
    }
    /// Enable the link and run the engine until it's up.
    pub fn enabled() -> Self {
        let harness = Self::new();
        harness.client.enable();
        harness.tick();
        harness
    }
}
