//! # `dswifi-link`
//! This is the link layer of a Wi-Fi driver for a MAC, that is driven by one processor (the
//! engine), while another one (the client) only sends and receives frames.
//! ## Overview
//! Both sides share a single [ControlBlock]. Every field of it has exactly one writer, which is
//! enforced through the [EngineView] and [ClientView] handed out by [ControlBlock::split]. There
//! is no lock between the two sides.
//!
//! ### Transmit (TX)
//! The client writes frames, each preceded by a 12 byte descriptor, into the TX ring. Once the
//! hardware is idle, the engine copies the first frame into the frame memory of the MAC, fills in
//! the rate and WEP IV if required, and starts the transmission. Frames generated by the engine
//! itself, like authentication and association requests, bypass the ring through a queue, that
//! holds a single frame and always goes first.
//!
//! ### Receive (RX)
//! The MAC places received frames into a ring in its own frame memory. When the RX interrupt
//! fires, the engine classifies each frame there, updates the AP table or the connection state
//! if the frame is meant for it, and copies the frames the client asked for into the RX ring.
//!
//! ### Connection
//! The client posts requests (enable, scan, connect) into the control block. The engine picks
//! them up in [WifiEngine::tick] and runs through authentication and association with the access
//! point. Progress is published through the mode and the authentication level.

#![cfg_attr(not(test), no_std)]
pub(crate) mod fmt;

pub mod ap_table;
pub mod classifier;
mod client;
mod config;
mod connection;
pub mod control;
pub mod descriptor;
mod engine;
pub mod frame;
pub mod hardware;
mod pump;
pub mod ring;
pub mod sync;

pub use client::{AssociationStatus, ReceivedFrame, WifiClient};
pub use config::EngineConfig;
pub use connection::SCAN_LIST;
pub use control::{
    AuthLevel, ClientView, ConnectParams, ControlBlock, EngineView, PacketFlags, Ssid, Stat,
    WepMode, WifiMode,
};
pub use descriptor::DataRate;
pub use engine::{WifiEngine, MAX_CHANNEL};
pub use hardware::{Register, WifiHardware};

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An error returned by the driver.
pub enum WiFiError {
    /// The channel is outside of 1 to 14.
    InvalidChannel,
    /// There isn't enough space in the ring.
    QueueFull,
    /// A frame generated by the engine is already waiting for the hardware.
    BypassQueueFull,
    /// The frame doesn't fit into the TX area of the frame memory.
    FrameTooLarge,
    /// The control block was created by an incompatible version of this crate.
    VersionMismatch,
}
pub type WiFiResult<T> = Result<T, WiFiError>;
