// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration: protocol constants and runtime settings.
//!
//! # Architecture
//!
//! - **Static**: compile-time constants (protocol version, vendor id,
//!   default periods and sizes). Never hardcode these elsewhere.
//! - **Dynamic**: [`EngineConfig`], handed to the participant at
//!   construction, optionally loaded from YAML (`config-loaders` feature).
//!
//! # Example YAML
//!
//! ```yaml
//! max_message_size: 1400
//! pool:
//!   policy: PREALLOCATED
//!   payload_size: 1024
//!   initial_count: 64
//! flow_controllers:
//!   - name: slow
//!     publish_mode: ASYNCHRONOUS
//!     scheduler: ROUND_ROBIN
//!     max_bytes_per_period: 4096
//!     period_ms: 100
//! ```

use std::time::Duration;

use crate::core::Locator;
use crate::flow::FlowControllerDescriptor;
use crate::messages::ProtocolVersion;
use crate::pool::PoolConfig;

// =======================================================================
// Protocol identity
// =======================================================================

/// Protocol version written in every message header.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 2, minor: 4 };

/// Vendor id written in every message header.
pub const VENDOR_ID: [u8; 2] = [0x01, 0xAA];

// =======================================================================
// Sizes
// =======================================================================

/// Default upper bound for one datagram (UDP payload minus headroom).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_000;

/// Bytes reserved in every datagram for the header, INFO_DST, INFO_TS,
/// DATA_FRAG framing and a full inline QoS list when computing the
/// fragment size.
pub const FRAGMENT_OVERHEAD: usize = 192;

/// Largest fragment size representable on the wire.
pub const MAX_FRAGMENT_SIZE: usize = u16::MAX as usize;

/// Samples one reader reassembles at the same time; the oldest partial
/// sample is dropped beyond this.
pub const MAX_PARTIAL_SAMPLES: usize = 64;

/// Largest sample a reader accepts for reassembly.
pub const MAX_REASSEMBLED_SAMPLE_SIZE: usize = 64 * 1024 * 1024;

/// Writers a stateless reader tracks without a `matched_writer_add`; the
/// one heard from least recently is forgotten beyond this.
pub const MAX_UNMATCHED_WRITERS: usize = 256;

/// Sequence numbers of a detached GAP range (one not starting at the
/// contiguous mark) a reader records one by one; the rest is left to a
/// later GAP or HEARTBEAT.
pub const MAX_GAP_RANGE: i64 = 65_536;

// =======================================================================
// Reliability timing
// =======================================================================

/// Period of the stateful writer's HEARTBEAT.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);

/// Delay before a reader answers a HEARTBEAT (coalesces bursts).
pub const DEFAULT_HEARTBEAT_RESPONSE_DELAY: Duration = Duration::from_millis(5);

/// Delay before a writer answers an ACKNACK (coalesces requests).
pub const DEFAULT_NACK_RESPONSE_DELAY: Duration = Duration::from_millis(5);

/// Window during which NACKs for a freshly sent change are ignored.
pub const DEFAULT_NACK_SUPPRESSION_DURATION: Duration = Duration::ZERO;

/// Default bound for a blocking write.
pub const DEFAULT_MAX_BLOCKING_TIME: Duration = Duration::from_millis(100);

/// Interval at which writers re-announce liveliness when their lease is finite.
pub const LIVELINESS_ASSERT_FRACTION: u32 = 3;

// =======================================================================
// Runtime configuration
// =======================================================================

/// Participant-wide engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest datagram handed to the transport.
    pub max_message_size: usize,
    /// Pool used for writer payloads unless an endpoint brings its own.
    pub pool: PoolConfig,
    /// Named flow controllers available to writers.
    pub flow_controllers: Vec<FlowControllerDescriptor>,
    /// Locators announced for endpoints without their own.
    pub default_unicast_locators: Vec<Locator>,
    pub default_multicast_locators: Vec<Locator>,
    /// Name of the participant event thread.
    pub event_thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            pool: PoolConfig::default(),
            flow_controllers: Vec::new(),
            default_unicast_locators: Vec::new(),
            default_multicast_locators: Vec::new(),
            event_thread_name: "hdds-rtps-events".to_string(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_flow_controller(mut self, descriptor: FlowControllerDescriptor) -> Self {
        self.flow_controllers.push(descriptor);
        self
    }

    #[must_use]
    pub fn with_unicast_locator(mut self, locator: Locator) -> Self {
        self.default_unicast_locators.push(locator);
        self
    }

    /// Fragment size derived from the message size.
    #[must_use]
    pub fn fragment_size(&self) -> usize {
        self.max_message_size
            .saturating_sub(FRAGMENT_OVERHEAD)
            .clamp(1, MAX_FRAGMENT_SIZE)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_message_size <= FRAGMENT_OVERHEAD {
            return Err(crate::Error::InvalidQos(format!(
                "max_message_size {} leaves no room for payload",
                self.max_message_size
            )));
        }
        for (idx, fc) in self.flow_controllers.iter().enumerate() {
            fc.validate()?;
            if self.flow_controllers[..idx].iter().any(|o| o.name == fc.name) {
                return Err(crate::Error::InvalidQos(format!(
                    "duplicate flow controller '{}'",
                    fc.name
                )));
            }
        }
        for locator in self
            .default_unicast_locators
            .iter()
            .chain(&self.default_multicast_locators)
        {
            locator.validate()?;
        }
        Ok(())
    }
}

#[cfg(feature = "config-loaders")]
pub use yaml::YamlLoader;

#[cfg(feature = "config-loaders")]
mod yaml {
    //! YAML engine configuration loader.

    use super::EngineConfig;
    use crate::flow::{FlowControllerDescriptor, PublishMode, SchedulerPolicy};
    use crate::pool::{MemoryPolicy, PoolConfig};
    use crate::{Error, Result};
    use serde::Deserialize;
    use std::fs;
    use std::path::Path;

    /// YAML engine configuration loader.
    pub struct YamlLoader;

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct YamlEngineDocument {
        max_message_size: Option<usize>,
        pool: Option<YamlPool>,
        flow_controllers: Vec<YamlFlowController>,
        event_thread_name: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct YamlPool {
        #[serde(default)]
        policy: MemoryPolicy,
        #[serde(default)]
        payload_size: usize,
        #[serde(default)]
        initial_count: usize,
        #[serde(default)]
        max_allocations: usize,
    }

    #[derive(Debug, Deserialize)]
    struct YamlFlowController {
        name: String,
        /// SYNCHRONOUS, ASYNCHRONOUS or PURE_SYNC
        #[serde(default)]
        publish_mode: Option<String>,
        /// FIFO, ROUND_ROBIN, HIGH_PRIORITY or PRIORITY_WITH_RESERVATION
        #[serde(default)]
        scheduler: Option<String>,
        #[serde(default)]
        max_bytes_per_period: Option<usize>,
        #[serde(default)]
        period_ms: Option<u64>,
    }

    fn publish_mode(s: &str) -> Result<PublishMode> {
        match s.to_uppercase().as_str() {
            "SYNCHRONOUS" | "SYNC" => Ok(PublishMode::Synchronous),
            "ASYNCHRONOUS" | "ASYNC" => Ok(PublishMode::Asynchronous),
            "PURE_SYNC" | "PURE_SYNCHRONOUS" => Ok(PublishMode::PureSync),
            other => Err(Error::ConfigLoad(format!("unknown publish_mode '{}'", other))),
        }
    }

    fn scheduler(s: &str) -> Result<SchedulerPolicy> {
        match s.to_uppercase().as_str() {
            "FIFO" => Ok(SchedulerPolicy::Fifo),
            "ROUND_ROBIN" => Ok(SchedulerPolicy::RoundRobin),
            "HIGH_PRIORITY" => Ok(SchedulerPolicy::HighPriority),
            "PRIORITY_WITH_RESERVATION" => Ok(SchedulerPolicy::PriorityWithReservation),
            other => Err(Error::ConfigLoad(format!("unknown scheduler '{}'", other))),
        }
    }

    impl YamlLoader {
        /// Parse an engine configuration from a YAML string.
        pub fn load_str(yaml: &str) -> Result<EngineConfig> {
            let doc: YamlEngineDocument = serde_yaml::from_str(yaml)
                .map_err(|e| Error::ConfigLoad(format!("YAML parse error: {}", e)))?;

            let mut config = EngineConfig::default();
            if let Some(size) = doc.max_message_size {
                config.max_message_size = size;
            }
            if let Some(pool) = doc.pool {
                config.pool = PoolConfig {
                    policy: pool.policy,
                    payload_size: pool.payload_size,
                    initial_count: pool.initial_count,
                    max_allocations: pool.max_allocations,
                };
            }
            if let Some(name) = doc.event_thread_name {
                config.event_thread_name = name;
            }
            for fc in doc.flow_controllers {
                let mut descriptor = FlowControllerDescriptor::new(&fc.name);
                if let Some(mode) = fc.publish_mode.as_deref() {
                    descriptor.publish_mode = publish_mode(mode)?;
                }
                if let Some(policy) = fc.scheduler.as_deref() {
                    descriptor.scheduler = scheduler(policy)?;
                }
                if let Some(bytes) = fc.max_bytes_per_period {
                    descriptor.max_bytes_per_period = bytes;
                }
                if let Some(ms) = fc.period_ms {
                    descriptor.period = std::time::Duration::from_millis(ms);
                }
                config.flow_controllers.push(descriptor);
            }
            config.validate()?;
            log::debug!(
                "[YamlLoader::load_str] max_message_size={} flow_controllers={}",
                config.max_message_size,
                config.flow_controllers.len()
            );
            Ok(config)
        }

        /// Load an engine configuration from a YAML file.
        pub fn load_file<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
            let content = fs::read_to_string(path.as_ref()).map_err(|e| {
                Error::ConfigLoad(format!(
                    "failed to read {}: {}",
                    path.as_ref().display(),
                    e
                ))
            })?;
            Self::load_str(&content)
        }
    }
}
