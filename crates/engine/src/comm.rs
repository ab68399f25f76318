//! Transport between the producer and its consumers
//!
//! One process hosts the whole run: rank 0 is the producer, ranks 1..N are
//! consumer threads. Each consumer has its own inbound channel (so
//! per-channel ordering holds) and all consumers share one reply channel
//! back to the producer (replies arrive in any order and are re-indexed by
//! grid position). Channel sends are non-blocking and the channel owns the
//! buffer, so outbound jobs are all in flight before the first reply is
//! awaited.

use crate::messages::{ToConsumer, ToProducer};
use crossbeam_channel::{unbounded, Receiver, Sender};
use terrafill_core::{Error, Result};

/// The producer's end of the transport.
pub struct ProducerComm<T> {
    links: Vec<Sender<ToConsumer<T>>>,
    inbox: Receiver<ToProducer<T>>,
    bytes_sent: u64,
    bytes_recv: u64,
}

/// One consumer's end of the transport.
pub struct ConsumerComm<T> {
    pub rank: usize,
    inbox: Receiver<ToConsumer<T>>,
    outbox: Sender<ToProducer<T>>,
}

/// Wire up a producer and `consumers` consumer endpoints.
pub fn channel_mesh<T>(consumers: usize) -> (ProducerComm<T>, Vec<ConsumerComm<T>>) {
    let (reply_tx, reply_rx) = unbounded();

    let mut links = Vec::with_capacity(consumers);
    let mut endpoints = Vec::with_capacity(consumers);
    for rank in 1..=consumers {
        let (tx, rx) = unbounded();
        links.push(tx);
        endpoints.push(ConsumerComm {
            rank,
            inbox: rx,
            outbox: reply_tx.clone(),
        });
    }
    // The producer must not hold a reply sender: recv() has to disconnect
    // once every consumer is gone.
    drop(reply_tx);

    (
        ProducerComm {
            links,
            inbox: reply_rx,
            bytes_sent: 0,
            bytes_recv: 0,
        },
        endpoints,
    )
}

impl<T> ProducerComm<T> {
    /// Number of consumers.
    pub fn consumers(&self) -> usize {
        self.links.len()
    }

    /// Total participant count, producer included.
    pub fn size(&self) -> usize {
        self.links.len() + 1
    }

    /// Send a message to the consumer with the given 1-based rank.
    pub fn send(&mut self, rank: usize, msg: ToConsumer<T>) -> Result<()> {
        self.bytes_sent += msg.approx_size();
        self.links[rank - 1]
            .send(msg)
            .map_err(|_| Error::Comm(format!("consumer {} is gone", rank)))
    }

    /// Receive the next reply from any consumer.
    pub fn recv(&mut self) -> Result<ToProducer<T>> {
        let msg = self
            .inbox
            .recv()
            .map_err(|_| Error::Comm("all consumers disconnected".into()))?;
        self.bytes_recv += msg.approx_size();
        Ok(msg)
    }

    /// Tell every consumer to shut down. Consumers that already exited are
    /// ignored.
    pub fn kill_all(&mut self) {
        for link in &self.links {
            let _ = link.send(ToConsumer::Kill);
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv
    }

    /// Reset the byte counters between stages.
    pub fn reset_bytes(&mut self) {
        self.bytes_sent = 0;
        self.bytes_recv = 0;
    }
}

impl<T> ConsumerComm<T> {
    /// Block until the next job arrives.
    pub fn recv(&self) -> Result<ToConsumer<T>> {
        self.inbox
            .recv()
            .map_err(|_| Error::Comm("producer disconnected".into()))
    }

    /// Send a reply to the producer.
    pub fn send(&self, msg: ToProducer<T>) -> Result<()> {
        self.outbox
            .send(msg)
            .map_err(|_| Error::Comm("producer disconnected".into()))
    }
}
