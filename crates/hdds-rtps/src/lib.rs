// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-rtps - RTPS protocol engine
//!
//! The wire-level half of a DDS implementation: histories, stateless and
//! stateful writers and readers, the reliability protocol
//! (HEARTBEAT / ACKNACK / GAP / NACK_FRAG), fragmentation, flow control and
//! the message codec. Discovery, sockets, type systems and security plugins
//! stay outside and meet the engine at small traits.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  Participant: GUID allocation, event thread, flow controllers, pool  |
//! +---------------------------------------------------------------------+
//! |  StatelessWriter / StatefulWriter      StatelessReader / StatefulReader
//! |    WriterHistory + ReaderProxy           ReaderHistory + WriterProxy  |
//! +---------------------------------------------------------------------+
//! |  FlowController (FIFO, round robin, priority, reservation)          |
//! +---------------------------------------------------------------------+
//! |  MessageSender -> SecurityTransform -> Transport::send               |
//! |  Transport -> MessageReceiver::on_receive -> endpoints              |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::net::Ipv4Addr;
//! use hdds_rtps::core::{ChangeKind, GuidPrefix, InstanceHandle, Locator};
//! use hdds_rtps::transport::LoopbackHub;
//! use hdds_rtps::writer::{RtpsWriter, WriterAttributes};
//! use hdds_rtps::Participant;
//!
//! fn main() -> hdds_rtps::Result<()> {
//!     let hub = LoopbackHub::with_delivery_thread()?;
//!     let local = Locator::udpv4(Ipv4Addr::LOCALHOST, 7411);
//!     let participant = Participant::builder(GuidPrefix([1; 12]), hub.transport(local)).build()?;
//!     hub.attach(local, participant.receiver());
//!
//!     let writer = participant.create_stateful_writer(WriterAttributes::reliable(), None)?;
//!     let change = writer.new_change(ChangeKind::Alive, &[0, 1, 0, 0, 42], InstanceHandle::NIL)?;
//!     writer.write(change)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`core`] | GUIDs, sequence numbers, locators, time, cache changes, CDR cursors |
//! | [`messages`] | RTPS header, submessages, parameter lists, message builder and parser |
//! | [`history`] | Writer and reader histories |
//! | [`reliability`] | Reader and writer proxies |
//! | [`writer`] / [`reader`] | RTPS endpoints |
//! | [`flow`] | Flow controllers and schedulers |
//! | [`pool`] | Payload pools and the data-sharing arena |
//! | [`persistence`] | Storage trait for TRANSIENT / PERSISTENT writer histories |

pub mod config;
pub mod core;
pub mod deadline;
mod error;
pub mod events;
pub mod flow;
pub mod history;
pub mod messages;
pub mod participant;
pub mod persistence;
pub mod pool;
pub mod qos;
pub mod reader;
pub mod receiver;
pub mod reliability;
pub mod security;
pub mod sender;
pub mod transport;
pub mod type_support;
pub mod writer;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use participant::{EndpointInfo, EndpointKind, EndpointListener, Participant, ParticipantBuilder};
pub use reader::{ReaderAttributes, RemoteWriterInfo, RtpsReader, StatefulReader, StatelessReader};
pub use receiver::MessageReceiver;
pub use security::{PassThrough, SecurityTransform};
pub use transport::{LoopbackHub, Transport};
pub use type_support::TypeSupport;
pub use writer::{RemoteReaderInfo, RtpsWriter, StatefulWriter, StatelessWriter, WriterAttributes};
