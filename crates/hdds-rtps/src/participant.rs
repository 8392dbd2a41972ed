// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant: the owner of everything endpoints share.
//!
//! One participant holds the transport handle, the [`MessageReceiver`], the
//! event thread, the flow controllers and the payload pool, and allocates
//! endpoint GUIDs under its prefix. Discovery sits outside the engine: it is
//! told about new local endpoints through [`EndpointListener`] and feeds
//! remote ones back through `matched_writer_add` / `matched_reader_add`.
//!
//! ```text
//! ParticipantBuilder::new(prefix, transport)
//!     .with_config(EngineConfig)      flow controllers, pool, locators
//!     .with_security(transform)
//!     .with_persistence(store)        TRANSIENT / PERSISTENT writers
//!     .build()
//! ```
//!
//! Entity keys are handed out in creation order starting at 1, so a
//! participant restarted with the same prefix that creates its endpoints in
//! the same order gets the same GUIDs back (needed to restore persistent
//! histories).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::EngineConfig;
use crate::core::{EntityId, Guid, GuidPrefix, Locator};
use crate::events::EventService;
use crate::flow::{FlowController, FlowControllerDescriptor, DEFAULT_FLOW_CONTROLLER};
use crate::persistence::PersistenceStore;
use crate::pool::{DataSharingPool, HeapPayloadPool, PayloadPool};
use crate::qos::{Durability, Reliability};
use crate::reader::{
    ContentFilter, ReaderAttributes, ReaderContext, ReaderListener, StatefulReader, StatelessReader,
};
use crate::receiver::MessageReceiver;
use crate::security::{PassThrough, SecurityTransform};
use crate::sender::MessageSender;
use crate::transport::Transport;
use crate::writer::{StatefulWriter, StatelessWriter, WriterAttributes, WriterContext, WriterListener};
use crate::{Error, Result};

/// Entity kind octets.
mod entity_kind {
    pub const WRITER_WITH_KEY: u8 = 0x02;
    pub const WRITER_NO_KEY: u8 = 0x03;
    pub const READER_NO_KEY: u8 = 0x04;
    pub const READER_WITH_KEY: u8 = 0x07;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Writer,
    Reader,
}

/// A local endpoint as discovery announces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub guid: Guid,
    pub kind: EndpointKind,
    /// Stateful endpoint (one proxy per matched remote endpoint).
    pub stateful: bool,
    pub reliability: Reliability,
    pub durability: Durability,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
}

/// Discovery hook: told about local endpoints as they come and go.
pub trait EndpointListener: Send + Sync {
    fn on_endpoint_created(&self, endpoint: &EndpointInfo);

    fn on_endpoint_deleted(&self, guid: Guid) {
        let _ = guid;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Locators {
    unicast: Vec<Locator>,
    multicast: Vec<Locator>,
}

/// Builder for [`Participant`].
pub struct ParticipantBuilder {
    guid_prefix: GuidPrefix,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    security: Arc<dyn SecurityTransform>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    endpoint_listener: Option<Arc<dyn EndpointListener>>,
}

impl ParticipantBuilder {
    pub fn new(guid_prefix: GuidPrefix, transport: Arc<dyn Transport>) -> Self {
        Self {
            guid_prefix,
            transport,
            config: EngineConfig::default(),
            security: Arc::new(PassThrough),
            persistence: None,
            endpoint_listener: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: Arc<dyn SecurityTransform>) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    #[must_use]
    pub fn with_endpoint_listener(mut self, listener: Arc<dyn EndpointListener>) -> Self {
        self.endpoint_listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<Arc<Participant>> {
        if self.guid_prefix.is_unknown() {
            return Err(Error::InvalidState("participant needs a GUID prefix".into()));
        }
        self.config.validate()?;

        let mut flows = HashMap::new();
        for descriptor in &self.config.flow_controllers {
            flows.insert(descriptor.name.clone(), FlowController::new(descriptor.clone())?);
        }
        if !flows.contains_key(DEFAULT_FLOW_CONTROLLER) {
            flows.insert(
                DEFAULT_FLOW_CONTROLLER.to_string(),
                FlowController::new(FlowControllerDescriptor::new(DEFAULT_FLOW_CONTROLLER))?,
            );
        }

        let events = EventService::new(&self.config.event_thread_name)?;
        let sender = Arc::new(MessageSender::new(
            self.guid_prefix,
            self.transport,
            Arc::clone(&self.security),
            self.config.max_message_size,
        ));
        let receiver = Arc::new(MessageReceiver::new(self.guid_prefix, self.security));
        let locators = Locators {
            unicast: self.config.default_unicast_locators.clone(),
            multicast: self.config.default_multicast_locators.clone(),
        };
        log::info!(
            "[ParticipantBuilder::build] {} flow_controllers={} max_message_size={}",
            self.guid_prefix,
            flows.len(),
            sender.max_message_size()
        );
        Ok(Arc::new(Participant {
            guid_prefix: self.guid_prefix,
            pool: Arc::new(HeapPayloadPool::new(self.config.pool)),
            config: self.config,
            events,
            sender,
            receiver,
            flows,
            persistence: self.persistence,
            endpoint_listener: self.endpoint_listener,
            locators: ArcSwap::from_pointee(locators),
            next_entity_key: AtomicU32::new(1),
        }))
    }
}

pub struct Participant {
    guid_prefix: GuidPrefix,
    config: EngineConfig,
    events: EventService,
    sender: Arc<MessageSender>,
    receiver: Arc<MessageReceiver>,
    flows: HashMap<String, Arc<FlowController>>,
    pool: Arc<dyn PayloadPool>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    endpoint_listener: Option<Arc<dyn EndpointListener>>,
    locators: ArcSwap<Locators>,
    next_entity_key: AtomicU32,
}

impl Participant {
    pub fn builder(guid_prefix: GuidPrefix, transport: Arc<dyn Transport>) -> ParticipantBuilder {
        ParticipantBuilder::new(guid_prefix, transport)
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid_prefix
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Entry point for the transport's receive threads.
    #[must_use]
    pub fn receiver(&self) -> &Arc<MessageReceiver> {
        &self.receiver
    }

    #[must_use]
    pub fn sender(&self) -> &Arc<MessageSender> {
        &self.sender
    }

    #[must_use]
    pub fn flow_controller(&self, name: &str) -> Option<&Arc<FlowController>> {
        self.flows.get(name)
    }

    /// Default locators announced for endpoints without their own.
    #[must_use]
    pub fn unicast_locators(&self) -> Vec<Locator> {
        self.locators.load().unicast.clone()
    }

    #[must_use]
    pub fn multicast_locators(&self) -> Vec<Locator> {
        self.locators.load().multicast.clone()
    }

    /// Replace the default locators (e.g. after an interface change).
    /// Endpoints created afterwards announce the new ones.
    pub fn set_locators(&self, unicast: Vec<Locator>, multicast: Vec<Locator>) -> Result<()> {
        for locator in unicast.iter().chain(&multicast) {
            locator.validate()?;
        }
        self.locators.store(Arc::new(Locators { unicast, multicast }));
        Ok(())
    }

    fn next_entity_id(&self, kind: u8) -> Result<EntityId> {
        let key = self.next_entity_key.fetch_add(1, Ordering::Relaxed);
        // Entity keys are 24 bits on the wire.
        if key >= 1 << 24 {
            return Err(Error::OutOfResources("entity keys exhausted".into()));
        }
        Ok(EntityId::new(key, kind))
    }

    fn writer_guid(&self, attrs: &WriterAttributes) -> Result<Guid> {
        let kind = if attrs.with_key {
            entity_kind::WRITER_WITH_KEY
        } else {
            entity_kind::WRITER_NO_KEY
        };
        Ok(Guid::new(self.guid_prefix, self.next_entity_id(kind)?))
    }

    fn reader_guid(&self, attrs: &ReaderAttributes) -> Result<Guid> {
        let kind = if attrs.with_key {
            entity_kind::READER_WITH_KEY
        } else {
            entity_kind::READER_NO_KEY
        };
        Ok(Guid::new(self.guid_prefix, self.next_entity_id(kind)?))
    }

    fn writer_context(
        &self,
        guid: Guid,
        attrs: &WriterAttributes,
        listener: Option<Arc<dyn WriterListener>>,
    ) -> Result<WriterContext<'_>> {
        let flow = self
            .flows
            .get(&attrs.flow_controller)
            .cloned()
            .ok_or_else(|| Error::UnknownFlowController(attrs.flow_controller.clone()))?;
        let datasharing = attrs
            .data_sharing
            .map(|ds| Arc::new(DataSharingPool::new_in_memory(guid, ds.slot_count, ds.slot_size)));
        Ok(WriterContext {
            sender: Arc::clone(&self.sender),
            flow,
            events: &self.events,
            pool: Arc::clone(&self.pool),
            datasharing,
            persistence: self.persistence.clone(),
            listener,
        })
    }

    fn reader_context(
        &self,
        listener: Option<Arc<dyn ReaderListener>>,
        filter: Option<Arc<dyn ContentFilter>>,
    ) -> ReaderContext<'_> {
        ReaderContext {
            sender: Arc::clone(&self.sender),
            events: &self.events,
            listener,
            filter,
        }
    }

    fn announce(&self, endpoint: EndpointInfo) {
        log::debug!(
            "[Participant::announce] {:?} {} reliability={:?} durability={:?}",
            endpoint.kind,
            endpoint.guid,
            endpoint.reliability,
            endpoint.durability
        );
        if let Some(listener) = &self.endpoint_listener {
            listener.on_endpoint_created(&endpoint);
        }
    }

    fn with_default_locators(&self, own: &[Locator]) -> (Vec<Locator>, Vec<Locator>) {
        let defaults = self.locators.load();
        if own.is_empty() {
            (defaults.unicast.clone(), defaults.multicast.clone())
        } else {
            (own.to_vec(), defaults.multicast.clone())
        }
    }

    fn writer_info(&self, guid: Guid, attrs: &WriterAttributes, stateful: bool) -> EndpointInfo {
        let (unicast_locators, multicast_locators) = self.with_default_locators(&attrs.unicast_locators);
        EndpointInfo {
            guid,
            kind: EndpointKind::Writer,
            stateful,
            reliability: attrs.reliability,
            durability: attrs.durability,
            unicast_locators,
            multicast_locators,
        }
    }

    fn reader_info(&self, guid: Guid, attrs: &ReaderAttributes, stateful: bool) -> EndpointInfo {
        let (unicast_locators, mut multicast_locators) = self.with_default_locators(&attrs.unicast_locators);
        if !attrs.multicast_locators.is_empty() {
            multicast_locators.clone_from(&attrs.multicast_locators);
        }
        EndpointInfo {
            guid,
            kind: EndpointKind::Reader,
            stateful,
            reliability: attrs.reliability,
            durability: attrs.durability,
            unicast_locators,
            multicast_locators,
        }
    }

    /// Writer with one proxy per matched reader (reliable or best-effort).
    pub fn create_stateful_writer(
        &self,
        attrs: WriterAttributes,
        listener: Option<Arc<dyn WriterListener>>,
    ) -> Result<Arc<StatefulWriter>> {
        let guid = self.writer_guid(&attrs)?;
        let info = self.writer_info(guid, &attrs, true);
        let ctx = self.writer_context(guid, &attrs, listener)?;
        let writer = StatefulWriter::new(guid, attrs, &ctx)?;
        self.receiver.register_writer(writer.clone());
        self.announce(info);
        Ok(writer)
    }

    /// Best-effort writer sending to a locator list.
    pub fn create_stateless_writer(
        &self,
        attrs: WriterAttributes,
        listener: Option<Arc<dyn WriterListener>>,
    ) -> Result<Arc<StatelessWriter>> {
        if attrs.reliability == Reliability::Reliable {
            return Err(Error::InvalidQos("stateless writers are best-effort".into()));
        }
        let guid = self.writer_guid(&attrs)?;
        let info = self.writer_info(guid, &attrs, false);
        let ctx = self.writer_context(guid, &attrs, listener)?;
        let writer = StatelessWriter::new(guid, attrs, &ctx)?;
        self.receiver.register_writer(writer.clone());
        self.announce(info);
        Ok(writer)
    }

    pub fn create_stateful_reader(
        &self,
        attrs: ReaderAttributes,
        listener: Option<Arc<dyn ReaderListener>>,
        filter: Option<Arc<dyn ContentFilter>>,
    ) -> Result<Arc<StatefulReader>> {
        let guid = self.reader_guid(&attrs)?;
        let info = self.reader_info(guid, &attrs, true);
        let reader = StatefulReader::new(guid, attrs, &self.reader_context(listener, filter))?;
        self.receiver.register_reader(reader.clone());
        self.announce(info);
        Ok(reader)
    }

    pub fn create_stateless_reader(
        &self,
        attrs: ReaderAttributes,
        listener: Option<Arc<dyn ReaderListener>>,
        filter: Option<Arc<dyn ContentFilter>>,
    ) -> Result<Arc<StatelessReader>> {
        let guid = self.reader_guid(&attrs)?;
        let info = self.reader_info(guid, &attrs, false);
        let reader = StatelessReader::new(guid, attrs, &self.reader_context(listener, filter))?;
        self.receiver.register_reader(reader.clone());
        self.announce(info);
        Ok(reader)
    }

    /// Stop routing to `guid`. The endpoint itself lives until the last
    /// handle to it is dropped.
    pub fn delete_writer(&self, guid: &Guid) -> bool {
        self.delete_endpoint(guid, |id| self.receiver.unregister_writer(id))
    }

    pub fn delete_reader(&self, guid: &Guid) -> bool {
        self.delete_endpoint(guid, |id| self.receiver.unregister_reader(id))
    }

    fn delete_endpoint(&self, guid: &Guid, unregister: impl FnOnce(&EntityId) -> bool) -> bool {
        if guid.prefix != self.guid_prefix || !unregister(&guid.entity_id) {
            return false;
        }
        log::debug!("[Participant::delete_endpoint] {}", guid);
        if let Some(listener) = &self.endpoint_listener {
            listener.on_endpoint_deleted(*guid);
        }
        true
    }

    /// Writers and readers currently routed to.
    #[must_use]
    pub fn endpoint_count(&self) -> (usize, usize) {
        (self.receiver.writer_count(), self.receiver.reader_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::PublishMode;
    use crate::reader::RtpsReader;
    use crate::sender::testing::Capture;
    use crate::writer::RtpsWriter;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    #[derive(Default)]
    struct Announced(Mutex<Vec<EndpointInfo>>, Mutex<Vec<Guid>>);

    impl EndpointListener for Announced {
        fn on_endpoint_created(&self, endpoint: &EndpointInfo) {
            self.0.lock().push(endpoint.clone());
        }

        fn on_endpoint_deleted(&self, guid: Guid) {
            self.1.lock().push(guid);
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_flow_controller(FlowControllerDescriptor::new("default").publish_mode(PublishMode::PureSync))
            .with_unicast_locator(Locator::udpv4(Ipv4Addr::LOCALHOST, 7411))
    }

    #[test]
    fn test_endpoints_get_kinded_ids_and_are_announced() {
        let announced = Arc::new(Announced::default());
        let participant = Participant::builder(GuidPrefix([1; 12]), Arc::new(Capture::default()))
            .with_config(config())
            .with_endpoint_listener(announced.clone())
            .build()
            .expect("participant");

        let writer = participant
            .create_stateful_writer(WriterAttributes::reliable().with_key(true), None)
            .expect("writer");
        let reader = participant
            .create_stateful_reader(ReaderAttributes::reliable(), None, None)
            .expect("reader");
        assert_eq!(writer.guid().entity_id, EntityId::new(1, 0x02));
        assert_eq!(reader.guid().entity_id, EntityId::new(2, 0x04));
        assert_eq!(participant.endpoint_count(), (1, 1));

        let infos = announced.0.lock().clone();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].kind, EndpointKind::Writer);
        assert_eq!(infos[0].unicast_locators, vec![Locator::udpv4(Ipv4Addr::LOCALHOST, 7411)]);

        assert!(participant.delete_writer(&writer.guid()));
        assert!(!participant.delete_writer(&writer.guid()));
        assert_eq!(*announced.1.lock(), vec![writer.guid()]);
        assert_eq!(participant.endpoint_count(), (0, 1));
    }

    #[test]
    fn test_unknown_flow_controller_rejected() {
        let participant = Participant::builder(GuidPrefix([1; 12]), Arc::new(Capture::default()))
            .with_config(config())
            .build()
            .expect("participant");
        let mut attrs = WriterAttributes::reliable();
        attrs.flow_controller = "missing".into();
        assert!(matches!(
            participant.create_stateful_writer(attrs, None),
            Err(Error::UnknownFlowController(_))
        ));
        assert!(matches!(
            participant.create_stateless_writer(WriterAttributes::reliable(), None),
            Err(Error::InvalidQos(_))
        ));
    }

    #[test]
    fn test_locators_swap() {
        let participant = Participant::builder(GuidPrefix([1; 12]), Arc::new(Capture::default()))
            .build()
            .expect("participant");
        assert!(participant.unicast_locators().is_empty());
        let locator = Locator::udpv4(Ipv4Addr::LOCALHOST, 7500);
        participant.set_locators(vec![locator], Vec::new()).expect("valid");
        assert_eq!(participant.unicast_locators(), vec![locator]);
        assert!(participant.flow_controller(DEFAULT_FLOW_CONTROLLER).is_some());
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        assert!(Participant::builder(GuidPrefix::UNKNOWN, Arc::new(Capture::default()))
            .build()
            .is_err());
    }
}
