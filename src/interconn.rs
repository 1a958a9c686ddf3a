use crate::{config, module::ModuleId};
use console::style;
use std::collections::HashMap;

pub type NetworkId = usize;

/// Header size of every protocol message in bytes.
pub const HEADER_SIZE: u32 = 8;

/// Message in flight between two modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub network: NetworkId,
    pub src: ModuleId,
    pub dest: ModuleId,
    pub size: u32,
    pub send_cycle: u64,
    /// Cycle the message is delivered.
    pub arrival_cycle: u64,
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Message[{}]({} -> {}, {} bytes)",
            self.id, self.src, self.dest, self.size
        )
    }
}

/// Interconnect between the levels of the hierarchy.
///
/// Only message sizes are modeled. A rejected send is retried by the caller.
pub trait Interconnect: std::fmt::Debug {
    fn try_send(
        &mut self,
        network: NetworkId,
        src: ModuleId,
        dest: ModuleId,
        size: u32,
        cycle: u64,
    ) -> Option<Message>;

    /// Consume a delivered message, freeing its buffer space.
    fn receive(&mut self, message: &Message);

    #[must_use]
    fn network_name(&self, network: NetworkId) -> &str;
}

#[derive(Debug)]
struct Link {
    name: String,
    latency: u64,
    bandwidth: u32,
    buffer_size: u32,
}

/// Networks with a bounded input buffer per destination.
#[derive(Debug)]
pub struct Network {
    links: Vec<Link>,
    /// Occupied input buffer bytes per (network, destination)
    occupied: HashMap<(NetworkId, ModuleId), u32>,
    next_id: u64,
}

impl Network {
    #[must_use]
    pub fn new(config: &[config::Network]) -> Self {
        Self {
            links: config
                .iter()
                .map(|network| Link {
                    name: network.name.clone(),
                    latency: network.latency,
                    bandwidth: network.bandwidth,
                    buffer_size: network.buffer_size,
                })
                .collect(),
            occupied: HashMap::new(),
            next_id: 0,
        }
    }

    #[must_use]
    pub fn occupied(&self, network: NetworkId, dest: ModuleId) -> u32 {
        self.occupied.get(&(network, dest)).copied().unwrap_or(0)
    }
}

impl Interconnect for Network {
    fn try_send(
        &mut self,
        network: NetworkId,
        src: ModuleId,
        dest: ModuleId,
        size: u32,
        cycle: u64,
    ) -> Option<Message> {
        let link = self.links.get(network)?;
        let occupied = self.occupied.entry((network, dest)).or_insert(0);
        if link.buffer_size > 0 && *occupied + size > link.buffer_size {
            log::debug!(
                "{}: {size} bytes from {src} to {dest} ({} of {} bytes used)",
                style(format!("{} FULL", link.name)).red(),
                occupied,
                link.buffer_size,
            );
            return None;
        }
        *occupied += size;

        let transfer = if link.bandwidth == 0 {
            0
        } else {
            u64::from(size.div_ceil(link.bandwidth))
        };
        self.next_id += 1;
        let message = Message {
            id: self.next_id,
            network,
            src,
            dest,
            size,
            send_cycle: cycle,
            arrival_cycle: cycle + link.latency + transfer,
        };
        log::debug!(
            "{}: {message} arrives at cycle {}",
            style(format!("{} SEND", link.name)).bold(),
            message.arrival_cycle,
        );
        Some(message)
    }

    fn receive(&mut self, message: &Message) {
        if let Some(occupied) = self.occupied.get_mut(&(message.network, message.dest)) {
            *occupied = occupied.saturating_sub(message.size);
        }
    }

    fn network_name(&self, network: NetworkId) -> &str {
        self.links
            .get(network)
            .map_or("unknown", |link| link.name.as_str())
    }
}
