//! The connection state machine.
//!
//! [EngineCore::tick] runs once per period. It looks at the requests of the client, decides what
//! to do next and applies the channel, that the current mode wants. Responses from the access
//! point arrive through [EngineCore::handle_event] in between.
use crate::{
    classifier::ManagementEvent,
    control::{AuthLevel, HardwareSnapshot, Stat, WifiMode},
    engine::EngineCore,
    frame::AuthAlgorithm,
    hardware::{Register, WifiHardware},
};

/// The channels visited while scanning.
///
/// 1, 6 and 11 are the most common channels, so they show up more often.
pub const SCAN_LIST: [u8; 19] = [1, 6, 11, 2, 3, 7, 8, 1, 6, 11, 4, 5, 9, 10, 1, 6, 11, 12, 13];

impl<H: WifiHardware> EngineCore<'_, H> {
    /// Hardware ticks since [Self::timestamp].
    ///
    /// The counter wraps every 65536 ticks, which wrapping subtraction handles, as long as less
    /// than that elapsed.
    fn ticks_elapsed(&mut self) -> u16 {
        self.hardware_ticks().wrapping_sub(self.timestamp)
    }
    fn reset_timestamp(&mut self) {
        self.timestamp = self.hardware_ticks();
    }

    /// Drive the state machine once.
    pub(crate) fn tick(&mut self) {
        self.mix_random();
        self.view.stats.add(Stat::EngineUpdates, 1);

        self.step();
        self.apply_channel();

        if self.is_running() {
            self.rx_end();
            self.tx_end();
        }
    }
    fn step(&mut self) {
        let requested_mode = self.view.requested_mode.get();
        let requests = self.view.requests.get();
        if requested_mode == WifiMode::Disabled && self.mode() != WifiMode::Disabled {
            self.stop();
            info!("Link disabled.");
            return;
        }

        match self.mode() {
            WifiMode::Disabled => {
                if requested_mode != WifiMode::Disabled {
                    self.start();
                    self.set_mode(WifiMode::Normal);
                }
            }
            WifiMode::Normal => {
                if requested_mode == WifiMode::Scan {
                    self.reset_timestamp();
                    self.set_mode(WifiMode::Scan);
                    return;
                }
                if self.view.active_requests.get().connect() {
                    self.disconnect();
                }
                if requests.connect() {
                    self.connect();
                }
            }
            WifiMode::Scan => {
                if requested_mode != WifiMode::Scan {
                    self.set_mode(WifiMode::Normal);
                    return;
                }
                if self.ticks_elapsed() > self.config.scan_dwell {
                    self.reset_timestamp();
                    let channel = SCAN_LIST[self.scan_index];
                    self.update_snapshot(|snapshot| HardwareSnapshot {
                        target_channel: channel,
                        ..snapshot
                    });
                    self.view.ap_table.age(self.config.ap_timeout);
                    self.scan_index = (self.scan_index + 1) % SCAN_LIST.len();
                }
            }
            WifiMode::Associate => {
                if self.auth_level() == AuthLevel::Associated {
                    self.set_mode(WifiMode::Associated);
                    return;
                }
                if self.ticks_elapsed() > self.config.retry_interval {
                    self.reset_timestamp();
                    let retries = u16::from(self.view.auth_retries.get()) + 1;
                    self.view.set(
                        &self.view.auth_retries,
                        u8::try_from(retries).unwrap_or(u8::MAX),
                    );
                    if retries > u16::from(self.config.max_association_retries) {
                        warn!("Giving up on the access point after {} attempts.", retries);
                        self.set_mode(WifiMode::CannotAssociate);
                        return;
                    }
                    debug!("Authentication attempt {}.", retries);
                    match self.auth_level() {
                        AuthLevel::Disconnected => {
                            if self.view.active_requests.get().ad_hoc() {
                                self.set_auth_level(AuthLevel::Associated);
                            } else {
                                self.send_authentication(AuthAlgorithm::OpenSystem);
                            }
                        }
                        AuthLevel::Authenticated | AuthLevel::Deassociated => {
                            self.send_association_request()
                        }
                        AuthLevel::Associated => self.set_mode(WifiMode::Associated),
                    }
                }
                if !requests.connect() {
                    self.set_mode(WifiMode::Normal);
                }
            }
            WifiMode::Associated => {
                self.keepalive += 1;
                if self.keepalive > self.config.keepalive_ticks {
                    self.keepalive = 0;
                    self.send_null_data();
                }
                if !requests.connect() {
                    self.set_mode(WifiMode::Normal);
                    return;
                }
                if self.auth_level() != AuthLevel::Associated {
                    self.set_mode(WifiMode::Associate);
                }
            }
            WifiMode::CannotAssociate => {
                if !requests.connect() {
                    self.set_mode(WifiMode::Normal);
                }
            }
        }
    }
    /// The channel the current mode wants to be on.
    fn target_channel(&self) -> u8 {
        match self.mode() {
            WifiMode::Disabled | WifiMode::Normal => self.view.requested_channel.get(),
            WifiMode::Scan => self.snapshot().target_channel,
            WifiMode::Associate | WifiMode::Associated | WifiMode::CannotAssociate => {
                self.association().channel
            }
        }
    }
    fn apply_channel(&mut self) {
        let target = self.target_channel();
        if target != self.snapshot().channel {
            if let Err(err) = self.set_channel(target) {
                warn!("Can't switch to channel {}: {:?}", target, err);
            }
        }
    }
    /// Accept the connect request of the client.
    fn connect(&mut self) {
        let requests = self.view.requests.get();
        if requests.copy_values() {
            self.view
                .set(&self.view.association, self.view.connect_params.get());
            self.view.update(&self.view.active_requests, |active| {
                active.with_ad_hoc(requests.ad_hoc())
            });
        }
        let association = self.association();
        self.set_wep_key(&association.wep_key);
        self.set_wep_mode(association.wep_mode);
        self.filter_for_bssid(association.bssid);
        if let Err(err) = self.set_channel(association.channel) {
            warn!("Access point is on an invalid channel: {:?}", err);
        }

        if self.view.active_requests.get().ad_hoc() {
            self.set_auth_level(AuthLevel::Associated);
        } else {
            self.set_auth_level(AuthLevel::Disconnected);
            self.send_authentication(AuthAlgorithm::OpenSystem);
        }
        // Anything queued belongs to the previous connection.
        self.view.tx.discard_all(self.view.side());
        self.view
            .update(&self.view.active_requests, |active| active.with_connect(true));
        self.view.set(&self.view.auth_retries, 0);
        self.keepalive = 0;
        self.reset_timestamp();
        self.set_mode(WifiMode::Associate);
        info!(
            "Connecting to {:?} on channel {}.",
            association.bssid, association.channel
        );
    }
    /// Tear down the connection the engine is acting on.
    fn disconnect(&mut self) {
        self.clear_bssid_filter();
        self.set_auth_level(AuthLevel::Disconnected);
        self.view
            .update(&self.view.active_requests, |active| active.with_connect(false));
        info!("Disconnected.");
    }
    /// Follow up on frames, that were received or sent since the last tick.
    ///
    /// This only moves between [WifiMode::Associate] and [WifiMode::Associated]. Everything else
    /// waits for the next tick.
    pub(crate) fn settle(&mut self) {
        match (self.mode(), self.auth_level()) {
            (WifiMode::Associate, AuthLevel::Associated) => self.set_mode(WifiMode::Associated),
            (WifiMode::Associated, level) if level != AuthLevel::Associated => {
                self.set_mode(WifiMode::Associate)
            }
            _ => {}
        }
    }

    /// Act on a classified management frame.
    pub(crate) fn handle_event(&mut self, event: ManagementEvent) {
        if let ManagementEvent::Beacon(observation) = event {
            self.view
                .ap_table
                .observe(&observation, self.snapshot().channel);
            return;
        }
        if !self.view.active_requests.get().connect() {
            return;
        }
        match event {
            ManagementEvent::Beacon(_) => {}
            ManagementEvent::AssociationAccepted {
                association_id,
                max_rate,
            } => {
                self.hardware
                    .write_register(Register::AssociationIdLow, association_id);
                self.hardware
                    .write_register(Register::AssociationIdFull, association_id);
                self.update_snapshot(|snapshot| HardwareSnapshot {
                    association_id,
                    max_rate,
                    ..snapshot
                });
                if matches!(
                    self.auth_level(),
                    AuthLevel::Authenticated | AuthLevel::Deassociated
                ) {
                    self.set_auth_level(AuthLevel::Associated);
                    self.view.set(&self.view.auth_retries, 0);
                    info!("Associated, AID {}.", association_id & 0x3fff);
                }
            }
            ManagementEvent::AssociationRejected { status } => {
                warn!("Association rejected with status {}.", status);
                self.set_mode(WifiMode::CannotAssociate);
            }
            ManagementEvent::Authenticated => {
                if self.auth_level() == AuthLevel::Disconnected {
                    self.set_auth_level(AuthLevel::Authenticated);
                    self.view.set(&self.view.auth_retries, 0);
                    self.send_association_request();
                }
            }
            ManagementEvent::OpenSystemRejected => {
                debug!("Open system authentication rejected, trying shared key.");
                self.send_authentication(AuthAlgorithm::SharedKey);
            }
            ManagementEvent::SharedKeyChallenge(challenge) => {
                self.send_challenge_response(challenge.as_bytes());
            }
            ManagementEvent::SharedKeyRejected => {
                warn!("Shared key authentication rejected.");
                self.set_mode(WifiMode::CannotAssociate);
            }
            ManagementEvent::Deauthenticated => {
                warn!("Deauthenticated by the access point.");
                if self.view.active_requests.get().ad_hoc() {
                    self.set_auth_level(AuthLevel::Authenticated);
                    self.send_association_request();
                } else {
                    self.set_auth_level(AuthLevel::Disconnected);
                    self.send_authentication(AuthAlgorithm::OpenSystem);
                }
            }
        }
    }
}
