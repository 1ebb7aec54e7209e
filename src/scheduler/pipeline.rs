use crate::audio;
use crate::config::{GenerateSettings, TtsSettings};
use crate::error::{Result, TtsError};
use crate::model::{ModelId, VoiceModel};
use crate::phonemizer::{PhonemizeOptions, Phonemizer};
use crate::tokenizer::{PhonemeSource, TokenizerStrategy};
use crate::SynthesisResult;

/// Synthesize `text` with one model: phonemize, tokenize and run every
/// sentence, then assemble the audio.
pub(crate) fn synthesize(
    model_id: ModelId,
    voice: &mut VoiceModel,
    phonemizer: &mut Phonemizer,
    settings: &TtsSettings,
    text: &str,
    generate: &GenerateSettings,
) -> Result<SynthesisResult> {
    if text.trim().is_empty() {
        return Err(TtsError::Configuration("text is empty".to_string()));
    }

    let result = run_sentences(model_id, voice, phonemizer, settings, text, generate);
    voice.model.arena_mut().release_outputs();
    result
}

fn run_sentences(
    model_id: ModelId,
    voice: &mut VoiceModel,
    phonemizer: &mut Phonemizer,
    settings: &TtsSettings,
    text: &str,
    generate: &GenerateSettings,
) -> Result<SynthesisResult> {
    let tokenizer = &voice.tokenizer;
    let descriptor = tokenizer.descriptor();
    let speaker_id = generate.speaker_id;
    let speed = generate.speed.unwrap_or(descriptor.speed);
    tokenizer.check_speaker(speaker_id)?;

    let options = PhonemizeOptions {
        espeak_voice: tokenizer.espeak_code(speaker_id).to_string(),
        use_dictionary: descriptor.phoneme_source == PhonemeSource::Dictionary,
        characters_as_words: descriptor.characters_as_words,
    };
    let phonemized = phonemizer.phonemize(text, &options)?;
    let sentences = tokenizer.group_sentences(phonemized.sentences);

    let total_phonemes: usize = sentences.iter().map(Vec::len).sum();
    log::info!(
        "Synthesizing {} sentences ({} phonemes) with model {}",
        sentences.len(),
        total_phonemes,
        model_id
    );

    let mut result = SynthesisResult::new(model_id, descriptor.sample_rate);
    let silence = audio::silence_samples(descriptor.sentence_silence_seconds, descriptor.sample_rate);
    let predict = |tokens: usize| {
        audio::predict_output_len(
            tokens,
            descriptor.sample_rate,
            descriptor.base_speed_multiplier,
            speed,
            settings.output_buffer_size,
        )
    };
    result.pcm_f32.reserve(predict(total_phonemes));

    let last = sentences.len().saturating_sub(1);
    for (index, sentence) in sentences.iter().enumerate() {
        let tokenized = tokenizer.tokenize(sentence, index == 0, index == last)?;
        if !tokenized.missed.is_empty() {
            log::warn!(
                "Missing {} phonemes in vocabulary: {:?}",
                tokenized.missed.values().sum::<usize>(),
                tokenized.missed
            );
        }

        let arena = voice.model.arena_mut();
        tokenizer.build_model_inputs(arena, &tokenized.tokens, speaker_id, speed)?;
        let expected = predict(tokenized.tokens.len());
        if arena.ensure_output(0, expected) {
            log::debug!("Output buffer grown to {expected} samples");
        }

        let output = voice.model.run()?;
        let samples = output.values();
        if samples.is_empty() {
            log::warn!("Sentence {index} generated 0 samples");
            continue;
        }
        audio::append_sentence(&mut result.pcm_f32, samples, silence, index == last);
    }

    result.audio_seconds = result.pcm_f32.len() as f32 / descriptor.sample_rate as f32;

    if settings.resample_synthesized_audio && settings.target_sample_rate != result.sample_rate {
        result.pcm_f32 =
            audio::resample_linear(&result.pcm_f32, result.sample_rate, settings.target_sample_rate);
        result.sample_rate = settings.target_sample_rate;
    }

    finish_pcm16(tokenizer, &mut result);
    result.sentences = sentences;

    log::info!(
        "Generated {:.2}s of audio ({} samples at {} Hz)",
        result.audio_seconds,
        result.pcm_i16.len(),
        result.sample_rate
    );
    Ok(result)
}

/// Run the family post-process hook. If it left no matching 16-bit audio,
/// quantize the float samples directly.
fn finish_pcm16<T: TokenizerStrategy + ?Sized>(tokenizer: &T, result: &mut SynthesisResult) {
    tokenizer.post_process(result);
    if result.pcm_i16.len() != result.pcm_f32.len() {
        log::debug!("Post-process left no 16-bit audio, quantizing directly");
        result.pcm_i16 = audio::quantize_to_i16(&result.pcm_f32);
    }
}
