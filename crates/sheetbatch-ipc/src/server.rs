use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, info, warn};

use crate::codec::{decode, encode};
use crate::envelope::{Envelope, MessageType};
use crate::error::TransportError;
use crate::transport::{ControlBlock, Segment, TransportConfig};

/// Answers one request envelope.
pub trait MessageHandler {
    fn handle(&mut self, request: Envelope) -> Envelope;
}

impl<F> MessageHandler for F
where
    F: FnMut(Envelope) -> Envelope,
{
    fn handle(&mut self, request: Envelope) -> Envelope {
        self(request)
    }
}

/// Owner of a segment: creates it, answers requests, removes it on drop.
pub struct Server {
    config: TransportConfig,
    segment: Segment,
    control: ControlBlock,
    handled: u32,
}

impl Server {
    pub fn bind(config: TransportConfig) -> Result<Self, TransportError> {
        fs::create_dir_all(&config.dir)?;
        // the segment must exist before the control block announces us
        let segment = Segment::create(&config.segment_path(), config.initial_capacity)?;
        let control = ControlBlock::create(&config.control_path())?;
        info!(
            segment = %config.segment_path().display(),
            capacity = config.initial_capacity,
            "listening"
        );
        Ok(Self {
            config,
            segment,
            control,
            handled: 0,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Answer requests until `shutdown` is set.
    pub fn serve<H: MessageHandler>(
        &mut self,
        handler: &mut H,
        shutdown: &AtomicBool,
    ) -> Result<(), TransportError> {
        while !shutdown.load(Ordering::Acquire) {
            if !self.serve_one(handler)? {
                thread::sleep(self.config.poll_interval);
            }
        }
        info!(handled = self.handled, "server stopped");
        Ok(())
    }

    /// Answer the pending request, if any. Returns whether one was handled.
    pub fn serve_one<H: MessageHandler>(&mut self, handler: &mut H) -> Result<bool, TransportError> {
        let seq = self.control.request_seq().load(Ordering::Acquire);
        if seq == self.handled {
            return Ok(false);
        }

        let request = match self.segment.read_message() {
            Ok(bytes) => decode(bytes).map_err(TransportError::from),
            Err(err) => Err(err),
        };
        let response = match request {
            Ok(request) => {
                debug!(seq, kind = ?request.message_type, op = request.value(), "request");
                handler.handle(request)
            }
            Err(err) => {
                warn!(seq, error = %err, "undecodable request");
                failure(&err)
            }
        };

        let bytes = match encode(&response) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(seq, error = %err, "unencodable response");
                encode(&failure(&err))?
            }
        };
        self.segment.write_message(&bytes)?;
        self.control.handled_seq().store(seq, Ordering::Release);
        self.handled = seq;
        Ok(true)
    }
}

/// A results envelope carrying only a failure reason.
fn failure(reason: &dyn std::fmt::Display) -> Envelope {
    Envelope::new(MessageType::Results).with_value(reason.to_string())
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.config.control_path());
        let _ = fs::remove_file(self.config.segment_path());
    }
}
