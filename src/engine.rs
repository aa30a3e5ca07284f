//! The radio engine.
//!
//! [WifiEngine] owns the hardware and the engine side of the control block. Its state lives in a
//! [blocking_mutex::Mutex], which is only entered inside a critical section, so that the periodic
//! driver ([WifiEngine::tick]) and the interrupt handler ([WifiEngine::handle_interrupt]) never
//! run at the same time. The state machine lives in [connection](crate::connection), the
//! interrupt handlers in [pump](crate::pump).
use core::cell::RefCell;

use embassy_sync::blocking_mutex;
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    config::EngineConfig,
    control::{
        AuthLevel, ConnectParams, EngineFlags, EngineView, HardwareSnapshot, RequestFlags, Stat,
        WepMode, WifiMode,
    },
    descriptor::DESCRIPTOR_SIZE,
    frame::{self, AuthAlgorithm, TxFrame},
    hardware::{
        InterruptFlags, Register, WifiHardware, FACTORY_MAC_OFFSET, MAC_MEMORY_SIZE,
        RX_BUFFER_BEGIN, RX_BUFFER_END, RX_BUFFER_GAP, TX_BUSY_LOC3, WEP_KEY_SLOTS,
    },
    DefaultRawMutex, WiFiError, WiFiResult,
};

/// Set in [Register::WepControl] to enable the WEP engine.
const WEP_CONTROL_ENABLE: u16 = 0x8000;
/// Key length field in [Register::ModeWep].
const MODE_WEP_KEY_LENGTH_MASK: u16 = 0x0038;
const MODE_WEP_KEY_LENGTH_SHIFT: u16 = 3;
/// Sleep mode field in [Register::ModeWep].
const MODE_WEP_SLEEP_MASK: u16 = 0x0007;
/// Accept frames from our BSSID only.
const RX_FILTER_BSSID: u16 = 0x0400;
/// Accept frames addressed to the distribution system.
const RX_FILTER_TO_DS: u16 = 0x0800;
const RX_FILTER2_BSSID: u16 = 0x0002;
/// Transmit location 3 contains a valid frame.
pub(crate) const TX_LOC3_VALID: u16 = 0x8000;
/// Highest valid channel.
pub const MAX_CHANNEL: u8 = 14;

/// Convert a MAC address into the three halfwords, that are written to the address registers.
pub(crate) fn address_halfwords(address: [u8; 6]) -> [u16; 3] {
    core::array::from_fn(|i| u16::from_le_bytes([address[i * 2], address[i * 2 + 1]]))
}

/// The state of the engine.
pub(crate) struct EngineCore<'a, H> {
    pub(crate) view: EngineView<'a>,
    pub(crate) hardware: H,
    pub(crate) config: EngineConfig,
    /// Ticks since the last frame was sent or received.
    pub(crate) keepalive: u32,
    pub(crate) scan_index: usize,
    /// Hardware tick, at which the current scan dwell or authentication attempt started.
    pub(crate) timestamp: u16,
    /// A frame generated by the engine, that's waiting for the hardware.
    pub(crate) bypass: Option<TxFrame>,
}
impl<'a, H: WifiHardware> EngineCore<'a, H> {
    fn new(view: EngineView<'a>, hardware: H, config: EngineConfig) -> Self {
        Self {
            view,
            hardware,
            config,
            keepalive: 0,
            scan_index: 0,
            timestamp: 0,
            bypass: None,
        }
    }

    pub(crate) fn snapshot(&self) -> HardwareSnapshot {
        self.view.hardware.get()
    }
    pub(crate) fn update_snapshot(&self, f: impl FnOnce(HardwareSnapshot) -> HardwareSnapshot) {
        self.view.update(&self.view.hardware, f);
    }
    pub(crate) fn association(&self) -> ConnectParams {
        self.view.association.get()
    }
    pub(crate) fn mode(&self) -> WifiMode {
        self.view.mode.get()
    }
    pub(crate) fn set_mode(&self, mode: WifiMode) {
        if self.mode() != mode {
            debug!("Mode {:?} -> {:?}", self.mode(), mode);
        }
        self.view.set(&self.view.mode, mode);
    }
    pub(crate) fn auth_level(&self) -> AuthLevel {
        self.view.auth_level.get()
    }
    pub(crate) fn set_auth_level(&self, auth_level: AuthLevel) {
        self.view.set(&self.view.auth_level, auth_level);
    }
    fn set_engine_flags(&self, f: impl FnOnce(EngineFlags) -> EngineFlags) {
        self.view.update(&self.view.engine_flags, f);
    }
    pub(crate) fn is_running(&self) -> bool {
        self.view.engine_flags.get().running()
    }
    /// The upper half of the microsecond counter, which ticks roughly every 65 ms.
    pub(crate) fn hardware_ticks(&mut self) -> u16 {
        self.hardware.read_register(Register::UsCount1)
    }
    /// Take a value from the hardware random number generator.
    pub(crate) fn hardware_random(&mut self, shifts: [u32; 2]) -> u32 {
        let mut random = || self.hardware.read_register(Register::Random) as u32;
        random() ^ (random() << shifts[0]) ^ (random() << shifts[1])
    }
    /// Stir the hardware RNG into the shared random pool.
    pub(crate) fn mix_random(&mut self) {
        let random = self.hardware_random([11, 22]);
        self.view.update(&self.view.random, |pool| pool ^ random);
    }

    fn write_address(&mut self, registers: [Register; 3], address: [u8; 6]) {
        for (register, halfword) in registers.into_iter().zip(address_halfwords(address)) {
            self.hardware.write_register(register, halfword);
        }
    }
    pub(crate) fn write_bssid(&mut self, bssid: [u8; 6]) {
        self.write_address([Register::Bssid0, Register::Bssid1, Register::Bssid2], bssid);
    }

    /// Reset the MAC and bring up the radio.
    pub(crate) fn initialize(&mut self) {
        self.hardware.write_register(Register::ModeReset, 0xffff);
        self.halt();
        self.hardware.power_off();

        self.view.set(
            &self.view.hardware,
            HardwareSnapshot {
                max_rate: self.config.default_max_rate,
                ..HardwareSnapshot::INITIAL
            },
        );
        self.set_mode(WifiMode::Disabled);
        self.set_auth_level(AuthLevel::Disconnected);
        self.view
            .set(&self.view.active_requests, RequestFlags::new());

        for offset in (0..MAC_MEMORY_SIZE).step_by(2) {
            self.hardware.write_mac_memory(offset, 0);
        }
        let mut mac_address = [0u8; 6];
        self.hardware
            .read_factory_bytes(FACTORY_MAC_OFFSET, &mut mac_address);
        self.update_snapshot(|snapshot| HardwareSnapshot {
            mac_address,
            ..snapshot
        });

        self.hardware.write_register(Register::InterruptEnable, 0);
        self.hardware.power_on();
        self.hardware.init_radio();
        self.write_address(
            [
                Register::MacAddress0,
                Register::MacAddress1,
                Register::MacAddress2,
            ],
            mac_address,
        );

        self.hardware.write_register(Register::TxRetryLimit, 7);
        self.hardware
            .modify_register(Register::ModeWep, |mode| mode & !MODE_WEP_SLEEP_MASK);
        self.set_wep_mode(WepMode::None);
        if let Err(err) = self.set_channel(1) {
            error!("Failed to tune to the initial channel: {:?}", err);
        }
        self.mix_random();
        self.set_engine_flags(|flags| flags.with_active(true));
        info!("Engine initialized, MAC address {:?}.", mac_address);
    }
    /// Stop the MAC, without touching any queues.
    pub(crate) fn halt(&mut self) {
        self.set_engine_flags(|flags| flags.with_running(false));
        for (register, value) in [
            (Register::InterruptEnable, 0),
            (Register::ModeReset, 0),
            (Register::UsCompareControl, 0),
            (Register::UsCountControl, 0),
            (Register::TxStatControl, 0),
            (Register::Unknown00A, 0),
            (Register::TxBufBeacon, 0),
            (Register::TxRequestReset, 0xffff),
            (Register::TxBufReset, 0xffff),
        ] {
            self.hardware.write_register(register, value);
        }
    }
    fn setup_rx(&mut self) {
        self.hardware.write_register(Register::RxControl, 0x8000);
        self.hardware
            .write_register(Register::RxBufBegin, RX_BUFFER_BEGIN);
        self.hardware
            .write_register(Register::RxBufWriteAddress, (RX_BUFFER_BEGIN & 0x3fff) >> 1);
        self.hardware.write_register(Register::RxBufEnd, RX_BUFFER_END);
        self.hardware
            .write_register(Register::RxBufReadCursor, (RX_BUFFER_BEGIN & 0x3fff) >> 1);
        self.hardware.write_register(Register::RxBufGap, RX_BUFFER_GAP);
        self.hardware.write_register(Register::RxControl, 0x8001);
    }
    /// Start the MAC in station mode.
    pub(crate) fn start(&mut self) {
        self.halt();

        for (register, value) in [
            (Register::WepControl, WEP_CONTROL_ENABLE),
            (Register::PostBeacon, 0xffff),
            (Register::AssociationIdFull, 0),
            (Register::AssociationIdLow, 0),
            (Register::UsCountControl, 1),
            (Register::PowerTx, 0),
        ] {
            self.hardware.write_register(register, value);
        }
        self.write_bssid([0u8; 6]);

        self.hardware.write_register(Register::TxRequestSet, 0x000d);
        self.setup_rx();
        self.hardware.write_register(Register::RxControl, 0x8000);

        self.hardware
            .write_register(Register::InterruptFlags, InterruptFlags::ALL.into_bits());
        self.hardware.write_register(
            Register::InterruptEnable,
            InterruptFlags::ENGINE_DEFAULT.into_bits(),
        );
        self.hardware
            .write_register(Register::RxStatOverflowIe, 0x1fff);
        self.hardware.write_register(Register::RxStatIncrementIe, 0);
        let mac_address = self.snapshot().mac_address;
        self.write_bssid(mac_address);
        for (register, value) in [
            (Register::RxFilter, 0x0981),
            (Register::RxFilter2, 0x0009),
            (Register::TxStatControl, 0),
            (Register::Unknown00A, 0),
            (Register::ModeReset, 1),
            (Register::UsCountControl, 1),
            (Register::UsCompareControl, 1),
            (Register::Power48, 0),
        ] {
            self.hardware.write_register(register, value);
        }
        self.hardware
            .modify_register(Register::PowerTx, |power| power & !0x0002);
        self.hardware
            .modify_register(Register::PowerState, |power| power | 0x0002);
        self.hardware.write_register(Register::TxRequestReset, 0xffff);

        self.set_engine_flags(|flags| flags.with_running(true));
        info!("Engine started.");
    }
    /// Stop the MAC and drop everything, that was queued.
    ///
    /// This can be called any number of times.
    pub(crate) fn stop(&mut self) {
        self.halt();
        self.view.tx.discard_all(self.view.side());
        self.bypass = None;
        self.keepalive = 0;
        self.view
            .update(&self.view.active_requests, |requests| requests.with_connect(false));
        self.set_auth_level(AuthLevel::Disconnected);
        self.set_mode(WifiMode::Disabled);
    }

    /// Tune the radio to `channel`.
    pub(crate) fn set_channel(&mut self, channel: u8) -> WiFiResult<()> {
        if !(1..=MAX_CHANNEL).contains(&channel) {
            return Err(WiFiError::InvalidChannel);
        }
        self.hardware.tune(channel);
        self.update_snapshot(|snapshot| HardwareSnapshot {
            channel,
            target_channel: channel,
            ..snapshot
        });
        trace!("Tuned to channel {}.", channel);
        Ok(())
    }
    /// Program `key` into every key slot.
    pub(crate) fn set_wep_key(&mut self, key: &[u8; 20]) {
        for slot in WEP_KEY_SLOTS {
            for (i, chunk) in key.chunks_exact(2).enumerate() {
                self.hardware
                    .write_mac_memory(slot + i * 2, u16::from_le_bytes([chunk[0], chunk[1]]));
            }
            for offset in (key.len()..0x20).step_by(2) {
                self.hardware.write_mac_memory(slot + offset, 0);
            }
        }
    }
    pub(crate) fn set_wep_mode(&mut self, wep_mode: WepMode) {
        self.hardware.write_register(
            Register::WepControl,
            if wep_mode.is_enabled() {
                WEP_CONTROL_ENABLE
            } else {
                0
            },
        );
        self.hardware.modify_register(Register::ModeWep, |mode| {
            (mode & !MODE_WEP_KEY_LENGTH_MASK)
                | (wep_mode.key_length_code() << MODE_WEP_KEY_LENGTH_SHIFT)
        });
    }
    /// Point the RX filters at the access point.
    pub(crate) fn filter_for_bssid(&mut self, bssid: [u8; 6]) {
        self.write_bssid(bssid);
        self.hardware.modify_register(Register::RxFilter, |filter| {
            (filter | RX_FILTER_BSSID) & !RX_FILTER_TO_DS
        });
        self.hardware
            .modify_register(Register::RxFilter2, |filter| filter | RX_FILTER2_BSSID);
    }
    /// Open the RX filters again.
    pub(crate) fn clear_bssid_filter(&mut self) {
        let mac_address = self.snapshot().mac_address;
        self.write_bssid(mac_address);
        self.hardware.modify_register(Register::RxFilter, |filter| {
            (filter & !RX_FILTER_BSSID) | RX_FILTER_TO_DS
        });
        self.hardware
            .modify_register(Register::RxFilter2, |filter| filter & !RX_FILTER2_BSSID);
    }

    pub(crate) fn tx_busy(&mut self) -> bool {
        self.hardware.read_register(Register::TxBusy) & TX_BUSY_LOC3 != 0
    }
    /// Copy a frame into transmit location 3 and start the transmission.
    pub(crate) fn tx_raw(&mut self, frame: &TxFrame) {
        let len = (frame.as_bytes().len() + 3) & !3;
        let halfwords = frame.halfwords().chain(core::iter::repeat(0));
        for (offset, halfword) in (0..len).step_by(2).zip(halfwords) {
            self.hardware.write_mac_memory(offset, halfword);
        }
        self.trigger_tx();

        let stats = &self.view.stats;
        stats.add(Stat::TxPackets, 1);
        stats.add(Stat::TxBytes, len as u32);
        stats.add(Stat::TxDataBytes, (len - DESCRIPTOR_SIZE) as u32);
        self.keepalive = 0;
    }
    pub(crate) fn trigger_tx(&mut self) {
        self.hardware.write_register(Register::TxRetryLimit, 0x0707);
        self.hardware.write_register(Register::TxBufLoc3, TX_LOC3_VALID);
        self.hardware.write_register(Register::TxRequestSet, 0x000d);
    }
    /// Send a frame generated by the engine.
    ///
    /// If the hardware is busy, the frame waits in the bypass queue, which holds one frame. It's
    /// flushed, before anything from the TX ring is sent.
    pub(crate) fn send_management(&mut self, frame: TxFrame) -> WiFiResult<()> {
        let result = match self.bypass.take() {
            Some(queued) if !self.tx_busy() => {
                self.tx_raw(&queued);
                self.bypass = Some(frame);
                Ok(())
            }
            Some(queued) => {
                self.bypass = Some(queued);
                Err(WiFiError::BypassQueueFull)
            }
            None if !self.tx_busy() => {
                self.tx_raw(&frame);
                Ok(())
            }
            None => {
                self.bypass = Some(frame);
                Ok(())
            }
        };
        if result.is_err() {
            self.view.stats.add(Stat::TxBypassDropped, 1);
            warn!("Bypass queue full, dropped management frame.");
        }
        result
    }
    pub(crate) fn send_authentication(&mut self, algorithm: AuthAlgorithm) {
        let frame = frame::authentication_request(
            algorithm,
            &self.association(),
            self.snapshot().mac_address,
        );
        trace!("Sending authentication request.");
        let _ = self.send_management(frame);
    }
    pub(crate) fn send_association_request(&mut self) {
        let listen_interval = self.hardware.read_register(Register::ListenInterval);
        let frame = frame::association_request(
            &self.association(),
            self.snapshot().mac_address,
            listen_interval,
        );
        trace!("Sending association request.");
        let _ = self.send_management(frame);
    }
    pub(crate) fn send_challenge_response(&mut self, challenge: &[u8]) {
        let random = self.hardware_random([7, 15]);
        let frame = frame::shared_key_response(
            challenge,
            &self.association(),
            self.snapshot().mac_address,
            random,
        );
        trace!("Sending challenge response.");
        let _ = self.send_management(frame);
    }
    pub(crate) fn send_null_data(&mut self) {
        let snapshot = self.snapshot();
        let frame = frame::null_data(&self.association(), snapshot.mac_address, snapshot.max_rate);
        trace!("Sending keepalive.");
        let _ = self.send_management(frame);
    }
}

/// The engine side of the driver.
pub struct WifiEngine<'a, H: WifiHardware> {
    core: blocking_mutex::Mutex<DefaultRawMutex, RefCell<EngineCore<'a, H>>>,
    /// An interrupt arrived, while the engine was borrowed.
    interrupt_deferred: AtomicBool,
}
impl<'a, H: WifiHardware> WifiEngine<'a, H> {
    /// Take over the hardware and initialize it.
    ///
    /// The MAC isn't started yet. That happens once the client enables the link, or [Self::start]
    /// is called.
    pub fn new(view: EngineView<'a>, hardware: H, config: EngineConfig) -> Self {
        let mut core = EngineCore::new(view, hardware, config);
        core.initialize();
        Self {
            core: blocking_mutex::Mutex::new(RefCell::new(core)),
            interrupt_deferred: AtomicBool::new(false),
        }
    }
    /// Run `f` with exclusive access to the engine, with interrupts masked.
    ///
    /// Returns [None], if the engine is already borrowed, i.e. we were called reentrantly. The
    /// interrupt is then serviced by the outer call, before it releases the engine.
    fn with_core<R>(&self, f: impl FnOnce(&mut EngineCore<'a, H>) -> R) -> Option<R> {
        critical_section::with(|_| {
            self.core.lock(|core| {
                let Ok(mut core) = core.try_borrow_mut() else {
                    trace!("Engine is busy, deferring the interrupt.");
                    self.interrupt_deferred.store(true, Ordering::Release);
                    return None;
                };
                let result = f(&mut core);
                if self.interrupt_deferred.swap(false, Ordering::AcqRel) {
                    core.handle_interrupt();
                }
                Some(result)
            })
        })
    }
    /// Start the MAC.
    pub fn start(&self) {
        self.with_core(|core| {
            core.start();
            core.set_mode(WifiMode::Normal);
        });
    }
    /// Stop the MAC and drop everything queued for transmission.
    pub fn stop(&self) {
        self.with_core(EngineCore::stop);
    }
    /// Drive the state machine.
    ///
    /// This should be called at a steady interval of a few tens of milliseconds.
    pub fn tick(&self) {
        self.with_core(EngineCore::tick);
    }
    /// Service the Wi-Fi interrupt.
    pub fn handle_interrupt(&self) {
        self.with_core(EngineCore::handle_interrupt);
    }
    /// Access the hardware, e.g. to inspect or reconfigure it.
    pub fn with_hardware<R>(&self, f: impl FnOnce(&mut H) -> R) -> Option<R> {
        self.with_core(|core| f(&mut core.hardware))
    }
}
