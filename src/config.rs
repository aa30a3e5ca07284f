/// Tunables of the engine.
///
/// All durations are in ticks of whatever drives [WifiEngine::tick](crate::WifiEngine::tick),
/// unless they are marked as hardware ticks. Hardware ticks are taken from the upper half of the
/// microsecond counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Scan rounds an access point may go unseen, before its record is evicted.
    pub ap_timeout: u32,
    /// Authentication attempts before giving up on an access point.
    pub max_association_retries: u8,
    /// Ticks without traffic, after which a null frame is sent to the access point.
    pub keepalive_ticks: u32,
    /// Hardware ticks spent on each channel while scanning.
    pub scan_dwell: u16,
    /// Hardware ticks between authentication attempts.
    pub retry_interval: u16,
    /// Frames drained from frame memory per RX interrupt.
    pub rx_burst_limit: usize,
    /// Rate used until the access point tells us otherwise.
    pub default_max_rate: u16,
    /// Called after a frame was placed in the RX ring.
    ///
    /// This usually raises an interrupt on the client side.
    pub sync_handler: Option<fn()>,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ap_timeout: 40,
            max_association_retries: 30,
            keepalive_ticks: 1200,
            scan_dwell: 6,
            retry_interval: 20,
            rx_burst_limit: 7,
            default_max_rate: 0x0a,
            sync_handler: None,
        }
    }
}
