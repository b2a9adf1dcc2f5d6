use sheetbatch_common::TaggedValue;
use sheetbatch_eval::{ComputeBackend, Engine};
use sheetbatch_ipc::{Envelope, MessageHandler, MessageType};
use tracing::warn;

use crate::job;

/// Instance cap for requests that carry no parameter columns.
pub const MAX_BARE_INSTANCES: usize = 1 << 20;

/// Answers compute-server requests with an engine.
pub struct ComputeHandler<B: ComputeBackend> {
    engine: Engine<B>,
}

impl<B: ComputeBackend> ComputeHandler<B> {
    pub fn new(engine: Engine<B>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    fn compute(&self, request: Envelope) -> Envelope {
        let parameters = request.parameters.unwrap_or_default();
        let instances = instance_count(request.instances, &parameters);
        if instances < usize::try_from(request.instances).unwrap_or(0) {
            warn!(requested = request.instances, instances, "instance count clamped");
        }
        let op = request.message_value.unwrap_or_default();
        Envelope::results(self.engine.compute_named(&op, &parameters, instances))
    }

    fn compute_file(&mut self, value: &str) -> Envelope {
        let reason = match value.split_once('|') {
            Some((src, dst)) => match job::run_file(&mut self.engine, src, dst) {
                Ok(_) => "ok".to_string(),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "file job failed");
                    format!("{err:#}")
                }
            },
            None => format!("expected `src|dst`, got {value:?}"),
        };
        Envelope::new(MessageType::Results).with_value(reason)
    }
}

/// Instances a request may ask for: never more than its longest parameter
/// column, or [`MAX_BARE_INSTANCES`] when it has none.
fn instance_count(requested: i32, parameters: &[Vec<TaggedValue>]) -> usize {
    let requested = usize::try_from(requested).unwrap_or(0);
    let limit = parameters
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(MAX_BARE_INSTANCES);
    requested.min(limit)
}

impl<B: ComputeBackend> MessageHandler for ComputeHandler<B> {
    fn handle(&mut self, request: Envelope) -> Envelope {
        match request.message_type {
            MessageType::ComputeRequest => self.compute(request),
            // nothing is kept resident on the CPU backend
            MessageType::DeviceStore | MessageType::DeviceRetrieve => {
                Envelope::new(MessageType::Results)
            }
            MessageType::ComputeFile => self.compute_file(request.value()),
            other => {
                warn!(kind = ?other, "unsupported request");
                Envelope::new(MessageType::Results).with_value(format!("unsupported message type {other:?}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetbatch_common::ErrorKind;
    use sheetbatch_eval::{CpuBackend, EngineConfig};

    fn handler() -> ComputeHandler<CpuBackend> {
        let config = EngineConfig {
            enable_parallel: false,
            rng_seed: Some(3),
            ..EngineConfig::default()
        };
        ComputeHandler::new(Engine::new(CpuBackend::from_config(&config), config))
    }

    #[test]
    fn random_request_answers_every_instance() {
        let mut h = handler();
        let response = h.handle(Envelope::compute("RANDOM", 4, Vec::new()));
        assert_eq!(response.message_type, MessageType::Results);
        let results = response.results.unwrap();
        assert_eq!(results.len(), 4);
        for v in results {
            let n = v.as_number().unwrap();
            assert!((0.0..1.0).contains(&n));
        }
    }

    #[test]
    fn named_operation_over_parameter_columns() {
        let mut h = handler();
        let col = |n: f64| vec![TaggedValue::number(n)];
        let request = Envelope::compute(
            "BLACK-SCHOLES-CALL",
            1,
            vec![col(100.0), col(1.0), col(100.0), col(0.05), col(0.2)],
        );
        let results = h.handle(request).results.unwrap();
        let price = results[0].as_number().unwrap();
        assert!((price - 10.4506).abs() < 1e-3);
    }

    #[test]
    fn unknown_operation_is_flagged_per_instance() {
        let mut h = handler();
        let results = h
            .handle(Envelope::compute("NO-SUCH-OP", 2, Vec::new()))
            .results
            .unwrap();
        assert_eq!(results, vec![TaggedValue::error(ErrorKind::UnknownNamedOp); 2]);
    }

    #[test]
    fn instance_count_is_bounded_by_the_request() {
        let mut h = handler();
        let col = |n: f64| vec![TaggedValue::number(n); 2];
        let request = Envelope::compute(
            "BLACK-SCHOLES-CALL",
            i32::MAX as usize,
            vec![col(100.0), col(1.0), col(100.0), col(0.05), col(0.2)],
        );
        assert_eq!(h.handle(request).results.unwrap().len(), 2);

        let bare = h.handle(Envelope::compute("RANDOM", i32::MAX as usize, Vec::new()));
        assert_eq!(bare.results.unwrap().len(), MAX_BARE_INSTANCES);

        let negative = h.handle(Envelope {
            instances: -5,
            ..Envelope::compute("RANDOM", 0, Vec::new())
        });
        assert_eq!(negative.results, None);
    }

    #[test]
    fn oversized_sample_count_is_an_error_value() {
        let mut h = handler();
        let col = |n: f64| vec![TaggedValue::number(n)];
        let request = Envelope::compute("RANDN", 1, vec![col(0.0), col(1.0), col(1e13)]);
        let results = h.handle(request).results.unwrap();
        assert_eq!(results, vec![TaggedValue::error(ErrorKind::Num)]);
    }

    #[test]
    fn device_messages_are_acknowledged() {
        let mut h = handler();
        for ty in [MessageType::DeviceStore, MessageType::DeviceRetrieve] {
            let response = h.handle(Envelope::new(ty));
            assert_eq!(response, Envelope::new(MessageType::Results));
        }
    }

    #[test]
    fn malformed_file_job_reports_reason() {
        let mut h = handler();
        let response = h.handle(Envelope::new(MessageType::ComputeFile).with_value("nopipe"));
        assert!(response.value().contains("src|dst"));

        let response = h.handle(Envelope::compute_file("/definitely/missing.json", "/tmp/x.json"));
        assert!(response.value().starts_with("loading /definitely/missing.json"));
    }
}
