//! Generation worker thread
//!
//! A single dedicated OS thread consumes the request channel in FIFO order and
//! emits exactly one response per request. Only one generation runs at a time
//! in the whole process. A failed decode is fatal to the worker: the thread
//! returns the error and every queued request is lost.

use crate::generation::Generator;
use crate::model::LanguageModel;
use quill_common::{QuillError, Result, METRICS};
use quill_proto::{GenerationRequest, GenerationResponse, ServerMessage};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

/// Handle to the running worker thread
pub struct WorkerService {
    handle: JoinHandle<Result<()>>,
}

impl WorkerService {
    /// Start the worker on its own thread
    pub fn spawn<M>(
        generator: Generator<M>,
        requests: UnboundedReceiver<GenerationRequest>,
        responses: UnboundedSender<GenerationResponse>,
    ) -> Result<Self>
    where
        M: LanguageModel + 'static,
    {
        let handle = thread::Builder::new()
            .name("quill-worker".to_string())
            .spawn(move || run_worker_loop(generator, requests, responses))?;

        Ok(Self { handle })
    }

    /// Block until the worker exits and return how it ended
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| QuillError::internal("generation worker panicked"))?
    }
}

/// Main worker processing loop
fn run_worker_loop<M: LanguageModel>(
    mut generator: Generator<M>,
    mut requests: UnboundedReceiver<GenerationRequest>,
    responses: UnboundedSender<GenerationResponse>,
) -> Result<()> {
    info!("Generation worker started");

    while let Some(request) = requests.blocking_recv() {
        METRICS.worker.queue_depth.dec();
        METRICS
            .worker
            .queue_time
            .observe(request.enqueued_at.elapsed().as_secs_f64());

        let outcome = generator.generate(&request.text).map_err(|e| {
            error!("Generation failed for {}: {}", request.connection_id, e);
            e
        })?;

        debug!(
            "Generated {} tokens for {} from {} context tokens",
            outcome.tokens.len(),
            request.connection_id,
            outcome.context_tokens
        );

        let payload = ServerMessage::text(outcome.text).to_json()?;
        METRICS.worker.requests_completed.inc();

        let response = GenerationResponse {
            connection_id: request.connection_id,
            payload,
        };
        if responses.send(response).is_err() {
            info!("Result channel closed, generation worker stopping");
            return Ok(());
        }
    }

    info!("Request channel closed, generation worker stopping");
    Ok(())
}
