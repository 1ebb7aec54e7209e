use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

use super::pipeline;
use super::JobId;
use crate::config::{GenerateSettings, TtsSettings};
use crate::dictionary::DictionaryStore;
use crate::error::{Result, TtsError};
use crate::model::{ModelId, ModelInfo, ModelRef, VoiceModel};
use crate::phonemizer::Phonemizer;
use crate::tokenizer::Tokenizer;
use crate::SynthesisResult;

/// Everything inference touches. Guarded by one lock, held for the whole
/// of a load or a synthesis.
pub(crate) struct EngineState {
    pub models: HashMap<ModelId, VoiceModel>,
    pub phonemizer: Phonemizer,
}

pub(crate) enum Task {
    Load {
        id: ModelId,
        model: ModelRef,
        tokenizer: Tokenizer,
    },
    Synthesize {
        job: JobId,
        model_id: ModelId,
        text: String,
        settings: GenerateSettings,
    },
    Release(ModelId),
    PrepareDictionary(String),
    AddDictionary(String, Arc<DictionaryStore>),
    Shutdown,
}

pub(crate) enum Event {
    Loaded {
        id: ModelId,
        outcome: Result<ModelInfo>,
    },
    Synthesized {
        job: JobId,
        outcome: Result<SynthesisResult>,
    },
}

/// Worker loop. Runs tasks in arrival order until shutdown or until the
/// foreground side goes away.
pub(crate) fn run(
    state: Arc<Mutex<EngineState>>,
    settings: TtsSettings,
    tasks: Receiver<Task>,
    events: Sender<Event>,
) {
    log::debug!("TTS worker started");
    while let Ok(task) = tasks.recv() {
        let event = match task {
            Task::Load {
                id,
                model,
                tokenizer,
            } => Some(Event::Loaded {
                id,
                outcome: load(&state, id, model, tokenizer),
            }),
            Task::Synthesize {
                job,
                model_id,
                text,
                settings: generate,
            } => {
                let mut guard = state.lock();
                let EngineState { models, phonemizer } = &mut *guard;
                let outcome = match models.get_mut(&model_id) {
                    Some(voice) => pipeline::synthesize(
                        model_id, voice, phonemizer, &settings, &text, &generate,
                    ),
                    None => Err(TtsError::ModelNotLoaded(model_id)),
                };
                if let Err(e) = &outcome {
                    log::warn!("Synthesis job {job} failed: {e}");
                }
                Some(Event::Synthesized { job, outcome })
            }
            Task::Release(id) => {
                if state.lock().models.remove(&id).is_some() {
                    log::info!("Released model {id}");
                }
                None
            }
            Task::PrepareDictionary(espeak) => {
                if state.lock().phonemizer.prepare_dictionary(&espeak) {
                    log::info!("Dictionary for '{espeak}' is ready");
                }
                None
            }
            Task::AddDictionary(language, store) => {
                state.lock().phonemizer.add_dictionary(language, store);
                None
            }
            Task::Shutdown => break,
        };

        if let Some(event) = event {
            if events.send(event).is_err() {
                break;
            }
        }
    }
    log::debug!("TTS worker stopped");
}

fn load(
    state: &Mutex<EngineState>,
    id: ModelId,
    model: ModelRef,
    tokenizer: Tokenizer,
) -> Result<ModelInfo> {
    let name = model.name().to_string();
    log::info!("Loading model {id} from {name}");

    let mut guard = state.lock();
    let engine = model.instantiate()?;
    let voice = VoiceModel::new(name, tokenizer, engine);
    let info = voice.info(id);
    guard.models.insert(id, voice);
    Ok(info)
}
