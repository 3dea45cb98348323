// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Aggregated runtime
//!
//! [`Runtime`] owns the heavy singletons (brokers, event bus, protocol
//! block, scheduler, monitor, watchdog, reporter) in one statically sized
//! value, placed by the application wherever its platform keeps long-lived
//! state. Compile-time assertions prove each singleton fits the region the
//! budget planner reserved for it; there are no ambient globals - all
//! access goes through the owning `Runtime`.

use core::mem::size_of;

use crate::config;
use crate::error::Result;
use crate::event::EventBus;
use crate::memory::LAYOUT;
use crate::message::broker::MessageBroker;
use crate::message::qos::{QosPublisher, QosSubscriber};
use crate::message::types::MediumMessage;
use crate::platform::Platform;
use crate::protocol::codec::{FieldDecoder, FieldEncoder};
use crate::protocol::pipeline::PacketPipeline;
use crate::report::ErrorReporter;
use crate::task::monitor::ExecMonitor;
use crate::task::scheduler::{Scheduler, TaskConfig};
use crate::task::watchdog::TaskWatchdog;
use crate::types::{TaskId, TimeoutMs, TopicId};

#[cfg(feature = "event-log")]
use crate::message::event_log::EventLog;
#[cfg(any(feature = "small-broker", feature = "event-log"))]
use crate::message::types::SmallMessage;
#[cfg(feature = "zero-copy")]
use crate::message::zero_copy::ZeroCopyPool;

/// Broker over medium messages sized by the configured caps
pub type MediumBroker = MessageBroker<MediumMessage, { config::MAX_TASKS }>;

/// Broker over small messages sized by the configured caps
#[cfg(feature = "small-broker")]
pub type SmallBroker = MessageBroker<SmallMessage, { config::MAX_TASKS }>;

/// Packet pipeline sized by the configured caps
pub type ProtocolPipeline =
    PacketPipeline<{ config::RING_SIZE }, { config::PACKET_MAX_PAYLOAD }, { config::MAX_HANDLERS }>;

/// Field encoder sized by the configured caps
pub type ProtocolEncoder = FieldEncoder<{ config::MAX_FIELDS }, { config::OPCODE_SPACE }>;

/// Field decoder sized by the configured caps
pub type ProtocolDecoder = FieldDecoder<{ config::MAX_FIELDS }, { config::OPCODE_SPACE }>;

/// Zero-copy pool sized by the configured caps
#[cfg(feature = "zero-copy")]
pub type ZcPool = ZeroCopyPool<{ config::ZC_BLOCK_SIZE }, { config::ZC_BLOCK_COUNT }>;

// Region-fit proofs: each heavy singleton must fit the region the budget
// planner reserved for it. A failure here means a knob moved without its
// byte estimate following.
const _: () = assert!(
    !config::ENABLE_MESSAGING || size_of::<MediumBroker>() <= LAYOUT.messaging.size,
    "medium broker does not fit the messaging region: raise MSG_OVERHEAD_BYTES \
     or lower QUEUE_CAPACITY / QUEUES_PER_MAILBOX"
);
const _: () = assert!(
    !config::ENABLE_EVENTS || size_of::<EventBus>() <= LAYOUT.events.size,
    "event bus does not fit the events region: lower MAX_EVENTS or \
     MAX_EVENT_HANDLERS"
);
const _: () = assert!(
    !config::ENABLE_TASKS_REGION
        || size_of::<Scheduler>() + size_of::<TaskWatchdog>() + size_of::<ExecMonitor>()
            <= LAYOUT.tasks.size,
    "task singletons do not fit the tasks region: raise TASK_PER_TCB_BYTES \
     or TASK_FIXED_OVERHEAD_BYTES"
);
const _: () = assert!(
    !config::ENABLE_PROTOCOL
        || size_of::<ProtocolPipeline>()
            + size_of::<ProtocolEncoder>()
            + size_of::<ProtocolDecoder>()
            <= LAYOUT.protocol.size,
    "protocol block does not fit the protocol region: raise \
     PROTOCOL_MEM_BYTES or lower RING_SIZE / MAX_FIELDS / OPCODE_SPACE"
);

/// The runtime singleton aggregate
pub struct Runtime<P: Platform> {
    platform: P,
    scheduler: Scheduler,
    monitor: ExecMonitor,
    watchdog: TaskWatchdog,
    broker: MediumBroker,
    #[cfg(feature = "small-broker")]
    small_broker: SmallBroker,
    event_bus: EventBus,
    pipeline: ProtocolPipeline,
    encoder: ProtocolEncoder,
    decoder: ProtocolDecoder,
    reporter: ErrorReporter,
    #[cfg(feature = "zero-copy")]
    zc_pool: ZcPool,
    #[cfg(feature = "event-log")]
    medium_log: EventLog<MediumMessage, { config::EVENT_LOG_MEDIUM_CAP }, true>,
    #[cfg(feature = "event-log")]
    small_log: EventLog<SmallMessage, { config::EVENT_LOG_SMALL_CAP }, true>,
}

impl<P: Platform> Runtime<P> {
    /// Construct every subsystem around the given platform
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            scheduler: Scheduler::new(),
            monitor: ExecMonitor::new(),
            watchdog: TaskWatchdog::new(),
            broker: MediumBroker::new(),
            #[cfg(feature = "small-broker")]
            small_broker: SmallBroker::new(),
            event_bus: EventBus::new(),
            pipeline: ProtocolPipeline::new(&config::SYNC_PATTERN, config::LENGTH_16BIT),
            encoder: ProtocolEncoder::new(&config::SYNC_PATTERN, config::LENGTH_16BIT),
            decoder: ProtocolDecoder::new(),
            reporter: ErrorReporter::new(),
            #[cfg(feature = "zero-copy")]
            zc_pool: ZcPool::new(),
            #[cfg(feature = "event-log")]
            medium_log: EventLog::new(),
            #[cfg(feature = "event-log")]
            small_log: EventLog::new(),
        }
    }

    /// Initialize the scheduler and event bus
    pub fn initialize(&mut self) -> Result<()> {
        self.scheduler.initialize(&self.platform)?;
        self.event_bus.initialize();
        Ok(())
    }

    /// Create every enabled task from a config table and register each
    /// with the broker (and the small broker when enabled)
    pub fn create_all_tasks(&mut self, configs: &[TaskConfig]) -> Result<()> {
        for cfg in configs.iter().filter(|c| c.enabled) {
            let id = if cfg.native {
                self.scheduler.create_native_task(&self.platform, cfg)?
            } else {
                self.scheduler.create_task(&self.platform, cfg)?
            };
            let handle = self.scheduler.task(id)?.native_handle;
            self.broker.register_task(id, handle)?;
            #[cfg(feature = "small-broker")]
            self.small_broker.register_task(id, handle)?;
        }
        Ok(())
    }

    /// Release native trampolines to start running user code
    pub fn start_all_tasks(&mut self) {
        self.scheduler.start_all_tasks();
    }

    /// One cooperative scheduling step followed by a watchdog sweep
    pub fn run_once(&mut self) {
        self.scheduler.run(&self.platform);
        self.watchdog.check_all(&self.platform, &mut self.reporter);
    }

    /// Subscribe a task to a medium-message topic
    pub fn subscribe(&mut self, topic: TopicId, task: TaskId) -> Result<()> {
        self.broker.subscribe(topic, task)
    }

    /// Publish a medium message
    pub fn publish(&mut self, topic: u16, msg: &mut MediumMessage, from: TaskId) -> Result<()> {
        self.broker.publish(&self.platform, topic, msg, from)
    }

    /// Blocking receive for a task
    pub fn receive(&mut self, task: TaskId, timeout: TimeoutMs) -> Result<MediumMessage> {
        self.broker.receive(&self.platform, task, timeout)
    }

    /// Non-blocking receive for a task
    pub fn try_receive(&mut self, task: TaskId) -> Result<MediumMessage> {
        self.broker.try_receive(&self.platform, task)
    }

    /// Broadcast to every registered mailbox
    pub fn broadcast(&mut self, msg: &MediumMessage) -> Result<()> {
        self.broker.broadcast(&self.platform, msg)
    }

    /// QoS publisher over the medium broker
    pub fn make_qos_publisher(&self, from: TaskId, ack_topic: u16) -> QosPublisher<MediumMessage> {
        QosPublisher::new(from, ack_topic)
    }

    /// QoS subscriber over the medium broker
    pub fn make_qos_subscriber(
        &self,
        self_task: TaskId,
        ack_topic: u16,
    ) -> QosSubscriber<MediumMessage> {
        QosSubscriber::new(self_task, ack_topic)
    }

    /// Platform handle
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Cooperative scheduler
    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Execution monitor
    pub fn monitor(&mut self) -> &mut ExecMonitor {
        &mut self.monitor
    }

    /// Task watchdog
    pub fn watchdog(&mut self) -> &mut TaskWatchdog {
        &mut self.watchdog
    }

    /// Medium-message broker
    pub fn broker(&mut self) -> &mut MediumBroker {
        &mut self.broker
    }

    /// Small-message broker
    #[cfg(feature = "small-broker")]
    pub fn small_broker(&mut self) -> &mut SmallBroker {
        &mut self.small_broker
    }

    /// Event bus
    pub fn event_bus(&mut self) -> &mut EventBus {
        &mut self.event_bus
    }

    /// Packet pipeline
    pub fn pipeline(&mut self) -> &mut ProtocolPipeline {
        &mut self.pipeline
    }

    /// Field encoder
    pub fn encoder(&mut self) -> &mut ProtocolEncoder {
        &mut self.encoder
    }

    /// Field decoder
    pub fn decoder(&mut self) -> &mut ProtocolDecoder {
        &mut self.decoder
    }

    /// Error reporter
    pub fn reporter(&mut self) -> &mut ErrorReporter {
        &mut self.reporter
    }

    /// Zero-copy block pool
    ///
    /// Zero-copy brokers are created at the use site borrowing this pool,
    /// so handles can never outlive it.
    #[cfg(feature = "zero-copy")]
    pub fn zc_pool(&self) -> &ZcPool {
        &self.zc_pool
    }

    /// Medium-message log
    #[cfg(feature = "event-log")]
    pub fn medium_log(
        &mut self,
    ) -> &mut EventLog<MediumMessage, { config::EVENT_LOG_MEDIUM_CAP }, true> {
        &mut self.medium_log
    }

    /// Small-message log
    #[cfg(feature = "event-log")]
    pub fn small_log(
        &mut self,
    ) -> &mut EventLog<SmallMessage, { config::EVENT_LOG_SMALL_CAP }, true> {
        &mut self.small_log
    }

    /// Scheduler trampoline helpers need the scheduler, monitor, and
    /// watchdog together; split the borrows here
    pub fn trampoline_parts(
        &mut self,
    ) -> (&mut Scheduler, &mut ExecMonitor, &mut TaskWatchdog, &P) {
        (
            &mut self.scheduler,
            &mut self.monitor,
            &mut self.watchdog,
            &self.platform,
        )
    }
}
