//! The table of access points seen in beacons and probe responses.
//!
//! Only the engine writes records, but the client reads them at any time. Every record has its
//! own [RecordLock], which both sides only ever try once. If it's busy, the update or the
//! snapshot is skipped. Another beacon will come along.
use core::cell::UnsafeCell;

use bitfield_struct::bitfield;

use crate::{
    control::Ssid,
    sync::{LockBusy, RecordLock},
};

/// Number of records in the table.
pub const WIFI_MAX_AP: usize = 32;
/// Number of RSSI samples kept per record.
pub const RSSI_HISTORY_LEN: usize = 8;

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
/// Properties of an access point.
pub struct ApFlags {
    /// The record is in use.
    pub active: bool,
    /// The privacy bit is set, or a WEP cipher was advertised.
    pub wep: bool,
    /// The network is an IBSS.
    pub ad_hoc: bool,
    /// Every basic rate is 1 or 2 Mbps.
    pub compatible: bool,
    /// The basic rates include 5.5 or 11 Mbps.
    pub extended_compatible: bool,
    /// A WPA cipher was advertised.
    pub wpa: bool,
    #[bits(2)]
    pub __: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A discovered access point.
pub struct ApRecord {
    pub bssid: [u8; 6],
    /// Transmitter address of the last beacon.
    pub mac_address: [u8; 6],
    pub ssid: Ssid,
    pub channel: u8,
    pub flags: ApFlags,
    /// Highest advertised rate in units of 500 kbps.
    pub max_rate: u8,
    /// Zero terminated basic rate set.
    pub base_rates: [u8; 16],
    /// The oldest sample comes first.
    pub rssi_history: [u8; RSSI_HISTORY_LEN],
    /// Scan rounds since the last beacon.
    pub inactivity: u32,
}
impl ApRecord {
    pub const EMPTY: Self = Self {
        bssid: [0u8; 6],
        mac_address: [0u8; 6],
        ssid: Ssid::EMPTY,
        channel: 0,
        flags: ApFlags::new(),
        max_rate: 0,
        base_rates: [0u8; 16],
        rssi_history: [0u8; RSSI_HISTORY_LEN],
        inactivity: 0,
    };
    /// The mean of the RSSI history.
    pub fn average_rssi(&self) -> u8 {
        (self.rssi_history.iter().map(|rssi| *rssi as u16).sum::<u16>()
            / RSSI_HISTORY_LEN as u16) as u8
    }
    fn seed_rssi(&mut self, rssi: u8) {
        self.rssi_history = [rssi; RSSI_HISTORY_LEN];
    }
    fn push_rssi(&mut self, rssi: u8) {
        if self.rssi_history[0] == 0 {
            self.seed_rssi(rssi);
        } else {
            self.rssi_history.copy_within(1.., 0);
            self.rssi_history[RSSI_HISTORY_LEN - 1] = rssi;
        }
    }
    fn apply(&mut self, observation: &ApObservation) {
        self.inactivity = 0;
        self.flags = observation.flags.with_active(true);
        self.max_rate = observation.max_rate;
        self.mac_address = observation.mac_address;
        self.channel = observation.channel;
        self.base_rates = observation.base_rates;
    }
}
impl Default for ApRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// What a single beacon or probe response told us about an access point.
pub struct ApObservation {
    pub bssid: [u8; 6],
    pub mac_address: [u8; 6],
    /// [None], if the frame had no SSID element.
    pub ssid: Option<Ssid>,
    pub channel: u8,
    /// Everything except [ApFlags::active].
    pub flags: ApFlags,
    pub max_rate: u8,
    pub base_rates: [u8; 16],
    pub rssi: u8,
}

/// A record and its lock.
pub struct ApSlot {
    lock: RecordLock,
    record: UnsafeCell<ApRecord>,
}
// SAFETY:
// The record is only accessed through an ApSlotGuard, which can only exist while the lock is held.
unsafe impl Sync for ApSlot {}
impl ApSlot {
    const fn new() -> Self {
        Self {
            lock: RecordLock::new(),
            record: UnsafeCell::new(ApRecord::EMPTY),
        }
    }
    /// Attempt to lock the record.
    pub fn try_lock(&self) -> Result<ApSlotGuard<'_>, LockBusy> {
        self.lock.try_lock()?;
        Ok(ApSlotGuard { slot: self })
    }
}

/// Access to a locked record, which is unlocked once this is dropped.
pub struct ApSlotGuard<'a> {
    slot: &'a ApSlot,
}
impl ApSlotGuard<'_> {
    pub fn record(&self) -> &ApRecord {
        unsafe { &*self.slot.record.get() }
    }
    pub(crate) fn record_mut(&mut self) -> &mut ApRecord {
        unsafe { &mut *self.slot.record.get() }
    }
}
impl Drop for ApSlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock.unlock();
    }
}

/// The access point table.
pub struct ApTable {
    slots: [ApSlot; WIFI_MAX_AP],
}
impl ApTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { ApSlot::new() }; WIFI_MAX_AP],
        }
    }
    pub fn slot(&self, index: usize) -> Option<&ApSlot> {
        self.slots.get(index)
    }
    /// Copy out the record at `index`.
    ///
    /// Returns [None], if the index is out of range, the record is locked or not active.
    pub fn snapshot(&self, index: usize) -> Option<ApRecord> {
        let guard = self.slot(index)?.try_lock().ok()?;
        let record = *guard.record();
        record.flags.active().then_some(record)
    }
    /// The number of active records.
    pub fn active_count(&self) -> usize {
        (0..WIFI_MAX_AP)
            .filter(|index| self.snapshot(*index).is_some())
            .count()
    }

    /// Merge an observation into the table.
    ///
    /// RSSI is only recorded, if the observation was made on the channel we're tuned to.
    pub(crate) fn observe(&self, observation: &ApObservation, tuned_channel: u8) {
        let on_channel = observation.channel == tuned_channel;
        let mut matched = false;
        let mut first_inactive = None;

        for (index, slot) in self.slots.iter().enumerate() {
            // Unlocked peek, the bssid of a record only changes while the engine holds the lock.
            let record = unsafe { &*slot.record.get() };
            if record.bssid == observation.bssid {
                matched = true;
                let Ok(mut guard) = slot.try_lock() else {
                    trace!("AP record {} busy, skipping update.", index);
                    continue;
                };
                let record = guard.record_mut();
                record.apply(observation);
                if let Some(ssid) = observation.ssid {
                    record.ssid = ssid;
                }
                if on_channel {
                    record.push_rssi(observation.rssi);
                }
            } else if first_inactive.is_none() && !record.flags.active() {
                first_inactive = Some(index);
            }
        }
        if matched {
            return;
        }

        let target = first_inactive.unwrap_or_else(|| self.least_recently_seen());
        let Ok(mut guard) = self.slots[target].try_lock() else {
            trace!("AP record {} busy, dropping new AP.", target);
            return;
        };
        let record = guard.record_mut();
        record.bssid = observation.bssid;
        record.apply(observation);
        record.ssid = observation.ssid.unwrap_or(Ssid::EMPTY);
        if on_channel {
            record.seed_rssi(observation.rssi);
        } else {
            record.seed_rssi(0);
        }
        debug!(
            "New AP {:?} in slot {} on channel {}.",
            observation.bssid, target, observation.channel
        );
    }
    fn least_recently_seen(&self) -> usize {
        let mut target = 0;
        let mut max_inactivity = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            let inactivity = unsafe { &*slot.record.get() }.inactivity;
            if inactivity > max_inactivity {
                max_inactivity = inactivity;
                target = index;
            }
        }
        target
    }
    /// Age every active record by one scan round.
    ///
    /// Records, which weren't seen for more than `timeout` rounds, are evicted.
    pub(crate) fn age(&self, timeout: u32) {
        for slot in self.slots.iter() {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let record = guard.record_mut();
            if !record.flags.active() {
                continue;
            }
            record.inactivity += 1;
            if record.inactivity > timeout {
                record.rssi_history = [0u8; RSSI_HISTORY_LEN];
                record.flags = ApFlags::new();
            }
        }
    }
}
impl Default for ApTable {
    fn default() -> Self {
        Self::new()
    }
}
