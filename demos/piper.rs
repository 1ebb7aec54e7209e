use std::path::{Path, PathBuf};

use local_tts::{LocalTts, ModelRef, Phonemizer, PiperTokenizer, TtsSettings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let voice_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models/piper/en_US-lessac-medium.onnx"));
    let dictionary_path = PathBuf::from("models/dictionaries/eng-us.zip");

    let mut phonemizer = Phonemizer::new();
    phonemizer.load_dictionary_archive("eng-us", std::fs::read(&dictionary_path)?);

    let settings = TtsSettings::from_json_file(Path::new("tts.json")).unwrap_or_default();
    let mut tts = LocalTts::new(settings, phonemizer);

    let config = PiperTokenizer::from_config_file(&voice_path.with_extension("onnx.json"))?;
    let loading = tts.load_model(ModelRef::onnx(&voice_path), config);
    let model_id = tts.wait_for(&loading).ok_or("load was dropped")??;
    println!("Speakers: {:?}", tts.list_speakers(model_id));

    let texts = [
        "The first request starts right away.",
        "The second one waits for it to finish.",
    ];
    for (n, text) in texts.into_iter().enumerate() {
        tts.synthesize_with(model_id, text, Default::default(), move |outcome| {
            match outcome {
                Ok(result) => {
                    let path = format!("piper-{n}.wav");
                    match result.write_wav(Path::new(&path)) {
                        Ok(()) => println!("{path}: {:.2}s", result.duration_secs()),
                        Err(e) => eprintln!("{path}: {e}"),
                    }
                }
                Err(e) => eprintln!("request {n} failed: {e}"),
            }
        })?;
    }

    tts.wait_idle();
    Ok(())
}
