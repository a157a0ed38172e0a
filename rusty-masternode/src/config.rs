use rusty_shared_types::ChainParams;

/// Masternode layer configuration parameters
#[derive(Debug, Clone)]
pub struct MasternodeConfig {
    /// Network constants (ports, confirmations, payment start)
    pub chain_params: ChainParams,
    /// Lowest protocol version accepted in a broadcast
    pub min_protocol_version: u32,
    /// Lowest protocol version eligible for payment
    pub min_payments_protocol_version: u32,
    /// Peers below this version are ignored for verification messages
    pub min_pose_protocol_version: u32,
    /// Minimum spacing between two pings of the same masternode (seconds)
    pub min_ping_interval_secs: u64,
    /// No ping for this long marks the record `Expired` (seconds)
    pub expiration_secs: u64,
    /// No ping for this long marks the record `NewStartRequired` (seconds)
    pub new_start_required_secs: u64,
    /// Watchdog votes older than this expire the record while the watchdog is active (seconds)
    pub watchdog_max_secs: u64,
    /// Largest accepted clock skew for signed timestamps (seconds)
    pub max_future_drift_secs: u64,
    /// A ping must reference one of this many most recent blocks
    pub ping_max_block_age: u64,
    /// Penalty count at which a masternode is banned
    pub pose_ban_max_score: u32,
    /// Penalties older than this many blocks no longer count
    pub pose_ban_window_blocks: u64,
    /// Deadline for a verification reply (seconds)
    pub verification_timeout_secs: u64,
    /// We answer a given peer's verification request at most once per this interval (seconds)
    pub verify_reply_interval_secs: u64,
    /// Verification broadcasts older than this many blocks are ignored
    pub max_pose_blocks: u64,
    /// Only masternodes ranked this high may start verifications
    pub max_pose_rank: usize,
    /// Maximum verification requests sent per step
    pub max_pose_connections: usize,
    /// Full-list sync is honoured once per peer per this interval (seconds)
    pub dseg_update_secs: u64,
    /// How long terminal records are kept before removal (seconds)
    pub retention_grace_secs: u64,
    /// How long seen broadcasts and pings are remembered (seconds)
    pub seen_message_expiry_secs: u64,
    /// Payment window = eligible count * this factor (blocks)
    pub payment_window_factor: u64,
    /// Scores for height h are seeded by the block at h - offset
    pub score_block_offset: u64,
}

impl MasternodeConfig {
    pub fn for_network(chain_params: ChainParams) -> Self {
        let verify_reply_interval_secs = chain_params.fulfilled_request_expire_secs;
        Self {
            chain_params,
            min_protocol_version: 70206,
            min_payments_protocol_version: 70206,
            min_pose_protocol_version: 70203,
            min_ping_interval_secs: 10 * 60,
            expiration_secs: 65 * 60,
            new_start_required_secs: 180 * 60,
            watchdog_max_secs: 120 * 60,
            max_future_drift_secs: 60 * 60,
            ping_max_block_age: 24,
            pose_ban_max_score: 3,
            pose_ban_window_blocks: 100,
            verification_timeout_secs: 60,
            verify_reply_interval_secs,
            max_pose_blocks: 10,
            max_pose_rank: 10,
            max_pose_connections: 10,
            dseg_update_secs: 3 * 60 * 60,
            retention_grace_secs: 30 * 60,
            seen_message_expiry_secs: 180 * 60,
            payment_window_factor: 1,
            score_block_offset: 101,
        }
    }

    pub fn min_confirmations(&self) -> u32 {
        self.chain_params.masternode_minimum_confirmations
    }
}

impl Default for MasternodeConfig {
    fn default() -> Self {
        Self::for_network(ChainParams::mainnet())
    }
}
