//! Moving frames between the frame memory and the rings.
//!
//! Everything in here runs from [EngineCore::handle_interrupt], or at the end of a tick to pick up
//! frames, that arrived while the tick ran.
use crate::{
    classifier::{classify, wrap_rx_address, RxMemory},
    control::Stat,
    descriptor::{TxDescriptor, DESCRIPTOR_HALFWORDS, DESCRIPTOR_SIZE},
    engine::{EngineCore, TX_LOC3_VALID},
    hardware::{
        rx_memory_offset, InterruptFlags, Register, WifiHardware, COUNTER_REGISTERS,
        TX_MEMORY_LIMIT,
    },
};

/// Frame memory offset of the rate in the TX descriptor.
const TX_RATE_OFFSET: usize = 0x08;
/// Frame memory offset of the frame control field of the frame at TX location 3.
const TX_FRAME_CONTROL_OFFSET: usize = 0x0c;
/// Frame memory offsets of the WEP IV.
const TX_IV_OFFSETS: [usize; 2] = [0x24, 0x26];
/// The protected bit of the frame control field.
const FRAME_CONTROL_PROTECTED: u16 = 0x4000;
/// The low byte of the frame control field of a beacon.
const BEACON_FRAME_CONTROL: u16 = 0x0080;
/// Marks the beacon location as valid.
const TX_BEACON_VALID: u16 = 0x8000;

impl<H: WifiHardware> EngineCore<'_, H> {
    /// Service all pending interrupt sources.
    pub(crate) fn handle_interrupt(&mut self) {
        if !self.is_running() {
            let pending = self.hardware.read_register(Register::InterruptFlags);
            self.hardware
                .write_register(Register::InterruptFlags, pending);
            return;
        }
        loop {
            self.hardware.acknowledge_interrupt();
            let pending = InterruptFlags::from_bits(
                self.hardware.read_register(Register::InterruptEnable)
                    & self.hardware.read_register(Register::InterruptFlags),
            );
            if pending.into_bits() == 0 {
                break;
            }
            // Writing a one clears the flag.
            self.hardware
                .write_register(Register::InterruptFlags, pending.into_bits());

            if pending.rx_complete() {
                self.rx_end();
            }
            if pending.tx_complete() {
                self.tx_end();
            }
            if pending.rx_event_half_overflow() {
                self.counter_overflow();
            }
            if pending.tx_error_half_overflow() {
                self.counter_overflow();
            }
        }
        self.settle();
    }

    /// Drain received frames from the frame memory.
    pub(crate) fn rx_end(&mut self) {
        for _ in 0..self.config.rx_burst_limit {
            let read_cursor = self.hardware.read_register(Register::RxBufReadCursor);
            if self.hardware.read_register(Register::RxBufWriteCursor) == read_cursor {
                break;
            }
            let base = rx_memory_offset(read_cursor << 1);
            let mut memory = RxMemory::new(&mut self.hardware, base);
            let stored_size = memory.descriptor().stored_size();

            let stats = &self.view.stats;
            stats.add(Stat::RxPackets, 1);
            stats.add(Stat::RxBytes, stored_size as u32);
            stats.add(Stat::RxDataBytes, (stored_size - DESCRIPTOR_SIZE) as u32);

            let classification = classify(
                &mut memory,
                stored_size,
                &self.view.hardware.get(),
                &self.view.association.get(),
            );
            if let Some(event) = classification.event {
                self.handle_event(event);
            }

            let wanted = classification
                .class
                .mask()
                .intersects(self.view.packet_filter.get());
            if wanted || self.view.requests.get().promiscuous() {
                self.keepalive = 0;
                self.queue_received(base, stored_size);
            }

            let next = wrap_rx_address(base + stored_size);
            self.hardware
                .write_register(Register::RxBufReadCursor, (next >> 1) as u16);
        }
    }
    /// Copy a received frame into the RX ring.
    fn queue_received(&mut self, base: usize, stored_size: usize) {
        let mut memory = RxMemory::new(&mut self.hardware, base);
        let mut offset = 0;
        let result = self
            .view
            .rx
            .push_with(self.view.side(), stored_size / 2, || {
                let halfword = memory.read_halfword(offset);
                offset += 2;
                halfword
            });
        let stats = &self.view.stats;
        match result {
            Ok(()) => {
                stats.add(Stat::RxQueuedPackets, 1);
                stats.add(Stat::RxQueuedBytes, stored_size as u32);
                if let Some(sync_handler) = self.config.sync_handler {
                    sync_handler();
                }
            }
            Err(_) => {
                stats.add(Stat::RxQueuedLost, 1);
                trace!("RX ring full, dropped {} bytes.", stored_size);
            }
        }
    }

    /// Feed the next frame to the hardware, once it's idle.
    ///
    /// The bypass queue always goes first.
    pub(crate) fn tx_end(&mut self) {
        let location = self.hardware.read_register(Register::TxBufLoc3);
        let busy = self.hardware.read_register(Register::TxBusy);
        self.view.stats.set(
            Stat::TxDebug,
            ((location & TX_LOC3_VALID) | (busy & 0x7fff)) as u32,
        );
        if self.tx_busy() {
            return;
        }
        if let Some(frame) = self.bypass.take() {
            self.tx_raw(&frame);
            return;
        }
        self.transmit_queued();
    }
    /// Move the first frame of the TX ring to TX location 3 and send it.
    fn transmit_queued(&mut self) {
        if self.view.tx.pending_halfwords() < DESCRIPTOR_HALFWORDS {
            return;
        }
        let descriptor =
            TxDescriptor::from_halfwords(core::array::from_fn(|i| self.view.tx.read_halfword(i)));
        let halfwords = descriptor.stored_halfwords();
        if self.view.tx.pending_halfwords() < halfwords {
            return;
        }
        if halfwords * 2 > TX_MEMORY_LIMIT {
            warn!(
                "Dropping a {} byte frame, which doesn't fit into TX memory.",
                descriptor.length
            );
            self.view.tx.advance(self.view.side(), halfwords);
            return;
        }

        for i in 0..halfwords {
            self.hardware
                .write_mac_memory(i * 2, self.view.tx.read_halfword(i));
        }
        self.view.tx.advance(self.view.side(), halfwords);

        let stats = &self.view.stats;
        let length = descriptor.length as u32;
        stats.add(Stat::TxPackets, 1);
        stats.add(Stat::TxBytes, length + (DESCRIPTOR_SIZE as u32 - 4));
        stats.add(Stat::TxDataBytes, length.saturating_sub(4));
        self.keepalive = 0;

        if self.hardware.read_mac_memory(TX_RATE_OFFSET) == 0 {
            let max_rate = self.snapshot().max_rate;
            self.hardware.write_mac_memory(TX_RATE_OFFSET, max_rate);
        }
        let frame_control = self.hardware.read_mac_memory(TX_FRAME_CONTROL_OFFSET);
        if frame_control & FRAME_CONTROL_PROTECTED != 0 {
            self.write_iv();
        }
        if frame_control & 0x00ff == BEACON_FRAME_CONTROL {
            self.hardware
                .write_register(Register::TxBufBeacon, TX_BEACON_VALID);
            return;
        }
        self.trigger_tx();
    }
    /// Fill in a fresh WEP IV for the frame at TX location 3.
    fn write_iv(&mut self) {
        let key_id = self.association().wep_key_id as u16;
        let mut random = || self.hardware.read_register(Register::Random);
        let low = random() ^ (random() << 7) ^ (random() << 15);
        let high = ((random() ^ (random() >> 7)) & 0xff) | (key_id << 14);
        self.hardware.write_mac_memory(TX_IV_OFFSETS[0], low);
        self.hardware.write_mac_memory(TX_IV_OFFSETS[1], high);
    }

    /// Accumulate the hardware event counters.
    ///
    /// Each counter register holds two 8 bit counters.
    pub(crate) fn counter_overflow(&mut self) {
        for (i, register) in COUNTER_REGISTERS.into_iter().enumerate() {
            let [low, high] = self.hardware.read_register(register).to_le_bytes();
            self.view.stats.add_hardware(i * 2, low as u32);
            self.view.stats.add_hardware(i * 2 + 1, high as u32);
        }
    }
}
