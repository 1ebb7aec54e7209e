use std::path::{Path, PathBuf};
use std::time::Instant;

use local_tts::inference::onnx::{OrtEngine, OrtOptions};
use local_tts::{
    GenerateSettings, G2pDecoder, KokoroTokenizer, LocalTts, ModelRef, Phonemizer, TtsSettings,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let model_dir = PathBuf::from("models/kokoro");
    let mut phonemizer = Phonemizer::new();

    // Dictionaries are optional; words they miss go to the G2P model.
    let dictionary = model_dir.join("dictionaries/eng-us.zip");
    if dictionary.exists() {
        phonemizer.load_dictionary_archive("eng-us", std::fs::read(&dictionary)?);
    }
    let g2p_dir = model_dir.join("g2p");
    if g2p_dir.exists() {
        let options = OrtOptions::default();
        let encoder = OrtEngine::load(&g2p_dir.join("encoder.onnx"), &options)?;
        let decoder = OrtEngine::load(&g2p_dir.join("decoder.onnx"), &options)?;
        phonemizer.set_g2p(Some(G2pDecoder::new(Box::new(encoder), Box::new(decoder))));
    }

    let mut tts = LocalTts::new(TtsSettings::default(), phonemizer);

    let mut tokenizer = KokoroTokenizer::from_tokenizer_file(&model_dir.join("tokenizer.json"))?;
    tokenizer.import_voice_archive(&model_dir.join("voices.npz"))?;
    println!("Available voices: {:?}", tokenizer.list_voices());

    let load_start = Instant::now();
    let loading = tts.load_model(ModelRef::onnx(model_dir.join("model.onnx")), tokenizer);
    let model_id = tts.wait_for(&loading).ok_or("load was dropped")??;
    println!("Model loaded in {:.2?}", load_start.elapsed());

    let voice = "af_heart";
    let speaker_id = tts
        .get_speaker_id(model_id, voice)
        .ok_or_else(|| format!("voice '{voice}' not found"))?;

    let text = "Hello! This is Kokoro, a text to speech model running on this machine. \
                Sentences are batched before they reach the model.";

    let synth_start = Instant::now();
    let settings = GenerateSettings {
        speaker_id,
        speed: Some(1.0),
    };
    let pending = tts.synthesize(model_id, text, settings)?;
    let result = tts.wait_for(&pending).ok_or("job was dropped")??;
    let synth_dur = synth_start.elapsed();

    let audio_duration = result.duration_secs();
    let speedup = audio_duration / synth_dur.as_secs_f64();
    println!(
        "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
        audio_duration, synth_dur, speedup
    );

    result.write_wav(Path::new("output.wav"))?;
    println!("Saved to output.wav");

    tts.release_model(model_id);
    Ok(())
}
