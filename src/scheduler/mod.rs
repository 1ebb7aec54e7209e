//! Single-flight synthesis scheduling.
//!
//! [`LocalTts`] lives on the caller's (foreground) thread. It owns a worker
//! thread that performs every load and synthesis under one engine lock, so
//! at most one inference runs at a time. Jobs submitted while another job
//! is active wait in a FIFO queue.
//!
//! Completion callbacks run on the foreground thread, inside
//! [`LocalTts::poll`] or one of the blocking waits. They do not need to be
//! `Send`. Every accepted job gets exactly one callback, in submission
//! order. Requests rejected up front (unknown model, empty text, a load
//! already in flight) return an error instead and never call back.
//!
//! ```text
//!  foreground                        worker
//!  ──────────                        ──────
//!  synthesize() ─┬─ idle ──Task──▶   lock → phonemize → tokenize → run
//!                └─ busy → queue           │
//!  poll() ◀────────────Event───────────────┘
//!    ├─ callback(result)
//!    └─ dispatch next queued job
//! ```

mod pipeline;
mod worker;

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::{GenerateSettings, TtsSettings};
use crate::dictionary::DictionaryStore;
use crate::error::{Result, TtsError};
use crate::model::{ModelId, ModelInfo, ModelRef};
use crate::phonemizer::Phonemizer;
use crate::tokenizer::Tokenizer;
use crate::SynthesisResult;
use worker::{EngineState, Event, Task};

/// Identifier of an accepted synthesis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the scheduler is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Working,
}

type LoadCallback = Box<dyn FnOnce(Result<ModelId>)>;
type SynthesisCallback = Box<dyn FnOnce(Result<SynthesisResult>)>;
type ResultListener = Box<dyn FnMut(&SynthesisResult)>;

/// A result that becomes available once the scheduler delivers it.
pub struct Pending<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Pending<T> {
    fn new() -> (Self, Rc<RefCell<Option<T>>>) {
        let slot = Rc::new(RefCell::new(None));
        (Self { slot: slot.clone() }, slot)
    }

    fn ready(value: T) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(value))),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Take the value if it has been delivered.
    pub fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }
}

struct PendingLoad {
    id: ModelId,
    name: String,
    callback: LoadCallback,
}

struct SynthesisJob {
    id: JobId,
    model_id: ModelId,
    text: String,
    settings: GenerateSettings,
    callback: SynthesisCallback,
}

struct ActiveJob {
    id: JobId,
    callback: SynthesisCallback,
}

/// Foreground bookkeeping. Only touched on the caller's thread.
#[derive(Default)]
struct SchedulerState {
    next_model_id: u32,
    next_job_id: u64,
    loading: Option<PendingLoad>,
    active: Option<ActiveJob>,
    queue: VecDeque<SynthesisJob>,
    models: BTreeMap<ModelId, ModelInfo>,
}

/// Local text-to-speech service.
///
/// Dropping it stops the worker after the task in flight; callbacks that
/// were not delivered by then are discarded.
pub struct LocalTts {
    settings: TtsSettings,
    state: SchedulerState,
    listeners: Vec<ResultListener>,
    tasks: Sender<Task>,
    events: Receiver<Event>,
    worker: Option<JoinHandle<()>>,
}

impl LocalTts {
    /// Start the worker thread. `phonemizer` carries the dictionaries and
    /// the optional G2P model shared by all voices.
    pub fn new(settings: TtsSettings, mut phonemizer: Phonemizer) -> Self {
        phonemizer.set_max_decode_steps(settings.g2p_max_steps);
        let engine = Arc::new(Mutex::new(EngineState {
            models: Default::default(),
            phonemizer,
        }));

        let (tasks, task_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();
        let worker_settings = settings.clone();
        let worker = std::thread::Builder::new()
            .name("local-tts-worker".to_string())
            .spawn(move || worker::run(engine, worker_settings, task_rx, event_tx));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn TTS worker thread: {e}");
                None
            }
        };

        Self {
            settings,
            state: SchedulerState::default(),
            listeners: Vec::new(),
            tasks,
            events,
            worker,
        }
    }

    pub fn settings(&self) -> &TtsSettings {
        &self.settings
    }

    /// Load a model and its tokenizer. The callback receives the model id.
    ///
    /// Fails immediately with [`TtsError::ResourceUnavailable`] while another
    /// load is in flight. A model whose name is already loaded resolves to
    /// its existing id without loading again.
    pub fn load_model_with<F>(
        &mut self,
        model: ModelRef,
        tokenizer: impl Into<Tokenizer>,
        on_loaded: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<ModelId>) + 'static,
    {
        if let Some(pending) = &self.state.loading {
            log::warn!(
                "Rejected load of '{}' while '{}' is loading",
                model.name(),
                pending.name
            );
            return Err(TtsError::ResourceUnavailable(format!(
                "model '{}' is still loading",
                pending.name
            )));
        }

        if let Some(existing) = self
            .state
            .models
            .values()
            .find(|info| info.name == model.name())
        {
            log::info!("Model '{}' already loaded as {}", existing.name, existing.id);
            on_loaded(Ok(existing.id));
            return Ok(());
        }

        self.state.next_model_id += 1;
        let id = ModelId::new(self.state.next_model_id);
        let name = model.name().to_string();
        self.send(Task::Load {
            id,
            model,
            tokenizer: tokenizer.into(),
        })?;
        self.state.loading = Some(PendingLoad {
            id,
            name,
            callback: Box::new(on_loaded),
        });
        Ok(())
    }

    /// Load a model, returning a handle that resolves when the load is done.
    pub fn load_model(
        &mut self,
        model: ModelRef,
        tokenizer: impl Into<Tokenizer>,
    ) -> Pending<Result<ModelId>> {
        let (pending, slot) = Pending::new();
        let callback = move |outcome: Result<ModelId>| {
            *slot.borrow_mut() = Some(outcome);
        };
        match self.load_model_with(model, tokenizer, callback) {
            Ok(()) => pending,
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Submit a synthesis job. It runs right away when the scheduler is
    /// free, otherwise after every job submitted before it.
    pub fn synthesize_with<F>(
        &mut self,
        model_id: ModelId,
        text: impl Into<String>,
        settings: GenerateSettings,
        on_result: F,
    ) -> Result<JobId>
    where
        F: FnOnce(Result<SynthesisResult>) + 'static,
    {
        let text = text.into();
        self.validate(model_id, &text)?;

        self.state.next_job_id += 1;
        let job = SynthesisJob {
            id: JobId(self.state.next_job_id),
            model_id,
            text,
            settings,
            callback: Box::new(on_result),
        };
        let id = job.id;

        if self.state.active.is_none() && self.state.queue.is_empty() {
            self.dispatch(job);
        } else {
            log::debug!("Queued job {id} ({} waiting)", self.state.queue.len() + 1);
            self.state.queue.push_back(job);
        }
        Ok(id)
    }

    /// Submit a synthesis job, returning a handle to its result.
    pub fn synthesize(
        &mut self,
        model_id: ModelId,
        text: impl Into<String>,
        settings: GenerateSettings,
    ) -> Result<Pending<Result<SynthesisResult>>> {
        let (pending, slot) = Pending::new();
        self.synthesize_with(model_id, text, settings, move |outcome| {
            *slot.borrow_mut() = Some(outcome);
        })?;
        Ok(pending)
    }

    /// Register a listener called with every successful result, before the
    /// job's own callback.
    pub fn on_generation_result<F>(&mut self, listener: F)
    where
        F: FnMut(&SynthesisResult) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Release a loaded model. Jobs still queued for it fail when their turn
    /// comes.
    pub fn release_model(&mut self, model_id: ModelId) -> bool {
        if self.state.models.remove(&model_id).is_none() {
            return false;
        }
        if let Err(e) = self.send(Task::Release(model_id)) {
            log::warn!("Could not release model {model_id}: {e}");
        }
        true
    }

    /// Register a phonemization dictionary for a G2P language code.
    pub fn add_dictionary(
        &mut self,
        language: impl Into<String>,
        store: Arc<DictionaryStore>,
    ) -> Result<()> {
        self.send(Task::AddDictionary(language.into(), store))
    }

    pub fn is_model_loaded(&self, model_id: ModelId) -> bool {
        self.state.models.contains_key(&model_id)
    }

    pub fn model_info(&self, model_id: ModelId) -> Option<&ModelInfo> {
        self.state.models.get(&model_id)
    }

    pub fn loaded_models(&self) -> impl Iterator<Item = &ModelInfo> {
        self.state.models.values()
    }

    /// Speaker names of a model, ordered by speaker id.
    pub fn list_speakers(&self, model_id: ModelId) -> Vec<String> {
        let Some(info) = self.state.models.get(&model_id) else {
            return Vec::new();
        };
        let mut speakers: Vec<(&String, &i64)> = info.speakers.iter().collect();
        speakers.sort_by_key(|&(_, id)| *id);
        speakers.into_iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn get_speaker_id(&self, model_id: ModelId, speaker: &str) -> Option<i64> {
        self.state.models.get(&model_id)?.speakers.get(speaker).copied()
    }

    pub fn phase(&self) -> Phase {
        if self.state.active.is_some() {
            Phase::Working
        } else if self.state.loading.is_some() {
            Phase::Loading
        } else {
            Phase::Idle
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state.loading.is_some()
    }

    pub fn is_working(&self) -> bool {
        self.state.active.is_some()
    }

    pub fn queued_jobs(&self) -> usize {
        self.state.queue.len()
    }

    /// Handle every finished task without blocking. Returns the number of
    /// events processed.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Block until no load or job is outstanding.
    pub fn wait_idle(&mut self) {
        while self.phase() != Phase::Idle {
            if !self.wait_event() {
                break;
            }
        }
    }

    /// Block until `pending` is delivered and take it. Returns `None` if the
    /// scheduler went idle without delivering it.
    pub fn wait_for<T>(&mut self, pending: &Pending<T>) -> Option<T> {
        loop {
            if let Some(value) = pending.take() {
                return Some(value);
            }
            if self.phase() == Phase::Idle || !self.wait_event() {
                return pending.take();
            }
        }
    }

    fn wait_event(&mut self) -> bool {
        match self.events.recv() {
            Ok(event) => {
                self.handle(event);
                true
            }
            Err(_) => {
                self.fail_outstanding();
                false
            }
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Loaded { id, outcome } => self.finish_load(id, outcome),
            Event::Synthesized { job, outcome } => self.finish_job(job, outcome),
        }
    }

    fn finish_load(&mut self, id: ModelId, outcome: Result<ModelInfo>) {
        let Some(pending) = self.state.loading.take_if(|p| p.id == id) else {
            log::warn!("Load result for unknown request {id}");
            return;
        };

        match outcome {
            Ok(info) => {
                log::info!("Model '{}' loaded as {}", info.name, id);
                let espeak = info.espeak_voice.clone();
                self.state.models.insert(id, info);
                if !espeak.is_empty() {
                    if let Err(e) = self.send(Task::PrepareDictionary(espeak)) {
                        log::warn!("Dictionary warm-up not scheduled: {e}");
                    }
                }
                (pending.callback)(Ok(id));
            }
            Err(e) => {
                log::error!("Failed to load model '{}': {e}", pending.name);
                (pending.callback)(Err(e));
            }
        }
    }

    fn finish_job(&mut self, job: JobId, outcome: Result<SynthesisResult>) {
        let Some(active) = self.state.active.take_if(|a| a.id == job) else {
            log::warn!("Result for unknown job {job}");
            return;
        };

        if let Ok(result) = &outcome {
            for listener in &mut self.listeners {
                listener(result);
            }
            if self.settings.save_cached_wav {
                self.save_cached_wav(result);
            }
        }
        (active.callback)(outcome);
        self.dispatch_next();
    }

    /// Start queued jobs until one is running. Jobs whose model was released
    /// while they waited fail here.
    fn dispatch_next(&mut self) {
        while self.state.active.is_none() {
            let Some(job) = self.state.queue.pop_front() else {
                return;
            };
            if let Err(e) = self.validate(job.model_id, &job.text) {
                (job.callback)(Err(e));
                continue;
            }
            self.dispatch(job);
        }
    }

    fn dispatch(&mut self, job: SynthesisJob) {
        let SynthesisJob {
            id,
            model_id,
            text,
            settings,
            callback,
        } = job;

        match self.send(Task::Synthesize {
            job: id,
            model_id,
            text,
            settings,
        }) {
            Ok(()) => self.state.active = Some(ActiveJob { id, callback }),
            Err(e) => callback(Err(e)),
        }
    }

    fn validate(&self, model_id: ModelId, text: &str) -> Result<()> {
        if !self.state.models.contains_key(&model_id) {
            return Err(TtsError::ModelNotLoaded(model_id));
        }
        if text.trim().is_empty() {
            return Err(TtsError::Configuration("text is empty".to_string()));
        }
        Ok(())
    }

    fn send(&self, task: Task) -> Result<()> {
        self.tasks
            .send(task)
            .map_err(|_| TtsError::Inference("TTS worker has stopped".to_string()))
    }

    /// The worker is gone: fail everything still waiting on it.
    fn fail_outstanding(&mut self) {
        if let Some(pending) = self.state.loading.take() {
            (pending.callback)(Err(TtsError::Inference("TTS worker has stopped".to_string())));
        }
        if let Some(active) = self.state.active.take() {
            (active.callback)(Err(TtsError::Inference("TTS worker has stopped".to_string())));
        }
        while let Some(job) = self.state.queue.pop_front() {
            (job.callback)(Err(TtsError::Inference("TTS worker has stopped".to_string())));
        }
    }

    fn save_cached_wav(&self, result: &SynthesisResult) {
        let file_name = chrono::Local::now()
            .format("tts-%Y-%m-%d-%H-%M-%S.wav")
            .to_string();
        let path = self.settings.cache_dir.join(file_name);
        let written = std::fs::create_dir_all(&self.settings.cache_dir)
            .map_err(TtsError::from)
            .and_then(|()| result.write_wav(&path));
        match written {
            Ok(()) => log::info!("Saved synthesized audio to {}", path.display()),
            Err(e) => log::warn!("Failed to save {}: {e}", path.display()),
        }
    }
}

impl Drop for LocalTts {
    fn drop(&mut self) {
        let _ = self.tasks.send(Task::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("TTS worker thread panicked");
            }
        }
    }
}
