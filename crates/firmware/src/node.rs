//! The application side of this node: a small block of memory other nodes can read and write.

use defmt::*;
use mbnet::{Error, NodeInfo, Reply, Request, RequestHandler, frame::PAYLOAD_CAPACITY};

const MEMORY_SIZE: usize = 256;

/// Answers memory requests from a 256-byte window, with `control` as the offset.
pub struct NodeMemory {
    memory: [u8; MEMORY_SIZE],
    info: NodeInfo,
}

impl NodeMemory {
    pub fn new(info: NodeInfo) -> Self {
        Self {
            memory: [0; MEMORY_SIZE],
            info,
        }
    }
}

impl RequestHandler for NodeMemory {
    /// Reads as many bytes as the first payload byte asks for (a full frame by default).
    fn memory_read(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        let start = usize::from(request.control);
        let len = request
            .payload
            .first()
            .map_or(PAYLOAD_CAPACITY, |&len| usize::from(len).min(PAYLOAD_CAPACITY));
        match self.memory.get(start..start + len) {
            Some(data) => reply.read(data),
            None => {
                warn!("Read of {} bytes at {=u16:#x} is out of range", len, request.control);
                reply.error()
            }
        }
    }

    fn memory_write(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        let start = usize::from(request.control);
        let data = request.payload.as_slice();
        match self.memory.get_mut(start..start + data.len()) {
            Some(target) => {
                target.copy_from_slice(data);
                reply.ok()
            }
            None => {
                warn!("Write of {} bytes at {=u16:#x} is out of range", data.len(), request.control);
                reply.error()
            }
        }
    }

    fn ping(&mut self, request: &Request, reply: Reply<'_>) -> Result<(), Error> {
        debug!("Pinged by {}", request.master_address());
        reply.send(mbnet::AckService::Ok, &self.info.to_bytes())
    }
}
