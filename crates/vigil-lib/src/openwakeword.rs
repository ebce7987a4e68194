//! openWakeWord classifier on ONNX Runtime.
//!
//! Three networks run in sequence on every 80 ms window:
//!
//! 1. `melspectrogram.onnx`: raw 16 kHz audio (i16 scale, as f32) → 32-bin
//!    mel frames, 8 per window.
//! 2. `embedding_model.onnx`: the last 76 mel frames → one 96-dim embedding.
//! 3. the wake-word classifier (e.g. `alexa_v0.1.onnx`): the last 16
//!    embeddings → a single confidence.
//!
//! The streaming buffers live in [`OpenWakeWordModel`]; the networks sit
//! behind [`FeatureBackend`] so the buffering can be tested without models.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use vigil_core::gate::WINDOW_SAMPLES;

use crate::error::{Error, Result};
use crate::wake::WakeWordModel;

pub const MEL_BINS: usize = 32;
/// Mel frames per embedding.
pub const EMBEDDING_WINDOW: usize = 76;
pub const EMBEDDING_DIM: usize = 96;
/// Embeddings per classifier input.
pub const CLASSIFIER_FRAMES: usize = 16;
/// Trailing audio from the previous window prepended to each mel input
/// (three 10 ms hops), so frames line up across windows.
pub const MEL_CONTEXT: usize = 480;

pub const MELSPECTROGRAM_FILE: &str = "melspectrogram.onnx";
pub const EMBEDDING_FILE: &str = "embedding_model.onnx";

/// The three networks of the pipeline.
pub trait FeatureBackend: Send {
    /// Audio samples → flattened `frames × MEL_BINS` raw mel values.
    fn melspectrogram(&mut self, samples: &[f32]) -> Result<Vec<f32>>;

    /// `EMBEDDING_WINDOW × MEL_BINS` mel values → `EMBEDDING_DIM` features.
    fn embed(&mut self, mel: &[f32]) -> Result<Vec<f32>>;

    /// `CLASSIFIER_FRAMES × EMBEDDING_DIM` features → confidence.
    fn classify(&mut self, features: &[f32]) -> Result<f32>;
}

// ─── Streaming model ───────────────────────────────────────────────────────

/// Wake-word model reporting one label's confidence per window.
///
/// Scores 0 until [`CLASSIFIER_FRAMES`] embeddings have accumulated, which
/// is 1.28 s of audio after start-up or a [`reset`](WakeWordModel::reset).
pub struct OpenWakeWordModel<B> {
    backend: B,
    label: String,
    /// Samples not yet forming a whole window.
    pending: Vec<i16>,
    /// Tail of the previous window, fed in front of the next one.
    context: Vec<f32>,
    mel: VecDeque<[f32; MEL_BINS]>,
    features: VecDeque<Vec<f32>>,
}

impl<B: FeatureBackend> OpenWakeWordModel<B> {
    pub fn new(backend: B, label: impl Into<String>) -> Self {
        let mut model = Self {
            backend,
            label: label.into(),
            pending: Vec::with_capacity(WINDOW_SAMPLES),
            context: Vec::new(),
            mel: VecDeque::with_capacity(EMBEDDING_WINDOW + 8),
            features: VecDeque::with_capacity(CLASSIFIER_FRAMES + 1),
        };
        model.clear();
        model
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.context = vec![0.0; MEL_CONTEXT];
        // Mel history starts as ones, matching openWakeWord's stream start.
        self.mel.clear();
        self.mel.extend(std::iter::repeat_n([1.0; MEL_BINS], EMBEDDING_WINDOW));
        self.features.clear();
    }

    /// Push one whole window through mel → embedding and return the
    /// classifier's confidence, or 0 while warming up.
    fn process_window(&mut self, window: &[i16]) -> Result<f32> {
        let mut input = Vec::with_capacity(MEL_CONTEXT + window.len());
        input.extend_from_slice(&self.context);
        input.extend(window.iter().map(|&s| s as f32));
        self.context = input[input.len() - MEL_CONTEXT..].to_vec();

        let raw = self.backend.melspectrogram(&input)?;
        if raw.len() % MEL_BINS != 0 {
            return Err(Error::WakeWord(format!(
                "melspectrogram returned {} values, not a multiple of {MEL_BINS}",
                raw.len()
            )));
        }
        for chunk in raw.chunks_exact(MEL_BINS) {
            let mut frame = [0.0; MEL_BINS];
            for (dst, &v) in frame.iter_mut().zip(chunk) {
                *dst = v / 10.0 + 2.0;
            }
            self.mel.push_back(frame);
        }
        while self.mel.len() > EMBEDDING_WINDOW {
            self.mel.pop_front();
        }

        let flat: Vec<f32> = self.mel.iter().flatten().copied().collect();
        let embedding = self.backend.embed(&flat)?;
        if embedding.len() != EMBEDDING_DIM {
            return Err(Error::WakeWord(format!(
                "embedding has {} values, expected {EMBEDDING_DIM}",
                embedding.len()
            )));
        }
        self.features.push_back(embedding);
        if self.features.len() > CLASSIFIER_FRAMES {
            self.features.pop_front();
        }
        if self.features.len() < CLASSIFIER_FRAMES {
            return Ok(0.0);
        }

        let features: Vec<f32> = self.features.iter().flatten().copied().collect();
        let score = self.backend.classify(&features)?;
        Ok(score.clamp(0.0, 1.0))
    }
}

impl<B: FeatureBackend> WakeWordModel for OpenWakeWordModel<B> {
    fn predict(&mut self, window: &[i16]) -> Result<HashMap<String, f32>> {
        self.pending.extend_from_slice(window);
        let mut score = 0.0;
        let mut consumed = 0;
        while self.pending.len() - consumed >= WINDOW_SAMPLES {
            let chunk = self.pending[consumed..consumed + WINDOW_SAMPLES].to_vec();
            consumed += WINDOW_SAMPLES;
            score = self.process_window(&chunk)?;
        }
        self.pending.drain(..consumed);
        Ok(HashMap::from([(self.label.clone(), score)]))
    }

    fn reset(&mut self) {
        self.clear();
    }
}

impl<B> fmt::Debug for OpenWakeWordModel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenWakeWordModel")
            .field("label", &self.label)
            .field("embeddings", &self.features.len())
            .finish_non_exhaustive()
    }
}

// ─── ONNX Runtime backend ──────────────────────────────────────────────────

/// Locations of the three ONNX files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub melspectrogram: PathBuf,
    pub embedding: PathBuf,
    pub classifier: PathBuf,
}

impl ModelPaths {
    /// Classifier at `classifier`, shared feature models in `feature_dir`
    /// (defaults to the classifier's directory).
    pub fn new(classifier: impl Into<PathBuf>, feature_dir: Option<&Path>) -> Self {
        let classifier = classifier.into();
        let dir = feature_dir
            .map(Path::to_path_buf)
            .or_else(|| classifier.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        Self {
            melspectrogram: dir.join(MELSPECTROGRAM_FILE),
            embedding: dir.join(EMBEDDING_FILE),
            classifier,
        }
    }
}

pub struct OnnxBackend {
    melspectrogram: Session,
    embedding: Session,
    classifier: Session,
}

impl OnnxBackend {
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let backend = Self {
            melspectrogram: open_session(&paths.melspectrogram)?,
            embedding: open_session(&paths.embedding)?,
            classifier: open_session(&paths.classifier)?,
        };
        info!(classifier = %paths.classifier.display(), "openWakeWord models loaded");
        Ok(backend)
    }
}

impl OpenWakeWordModel<OnnxBackend> {
    /// Load the ONNX models and report the classifier's score as `label`.
    pub fn load(paths: &ModelPaths, label: impl Into<String>) -> Result<Self> {
        Ok(Self::new(OnnxBackend::load(paths)?, label))
    }
}

fn open_session(path: &Path) -> Result<Session> {
    if !path.is_file() {
        return Err(Error::WakeWord(format!("model not found: {}", path.display())));
    }
    let load_err = |e: &dyn fmt::Display| Error::WakeWord(format!("failed to load {}: {e}", path.display()));
    let session = Session::builder()
        .map_err(|e| load_err(&e))?
        .with_intra_threads(1)
        .map_err(|e| load_err(&e))?
        .commit_from_file(path)
        .map_err(|e| load_err(&e))?;
    debug!(model = %path.display(), "onnx session ready");
    Ok(session)
}

/// Run `session` on one f32 tensor and return its first output, flattened.
fn infer<const N: usize>(session: &mut Session, shape: [usize; N], data: Vec<f32>) -> Result<Vec<f32>> {
    let infer_err = |e: &dyn fmt::Display| Error::WakeWord(format!("inference failed: {e}"));
    let input = Tensor::from_array((shape, data)).map_err(|e| infer_err(&e))?;
    let outputs = session.run(ort::inputs![input]).map_err(|e| infer_err(&e))?;
    let (_, values) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| infer_err(&e))?;
    Ok(values.to_vec())
}

impl FeatureBackend for OnnxBackend {
    fn melspectrogram(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        infer(&mut self.melspectrogram, [1, samples.len()], samples.to_vec())
    }

    fn embed(&mut self, mel: &[f32]) -> Result<Vec<f32>> {
        infer(&mut self.embedding, [1, EMBEDDING_WINDOW, MEL_BINS, 1], mel.to_vec())
    }

    fn classify(&mut self, features: &[f32]) -> Result<f32> {
        let out = infer(
            &mut self.classifier,
            [1, CLASSIFIER_FRAMES, EMBEDDING_DIM],
            features.to_vec(),
        )?;
        out.first()
            .copied()
            .ok_or_else(|| Error::WakeWord("classifier returned no score".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::score_for;
    use std::sync::{Arc, Mutex};

    /// Deterministic stand-in for the three networks.
    ///
    /// Emits 8 mel frames per call whose raw value is the mean input sample,
    /// embeds to the mean mel value, and classifies as the mean feature
    /// clamped to [0, 1]. Records the input lengths it saw.
    #[derive(Default, Clone)]
    struct Fixture {
        calls: Arc<Mutex<Vec<(&'static str, usize)>>>,
        fail_mel: bool,
    }

    fn mean(v: &[f32]) -> f32 {
        v.iter().sum::<f32>() / v.len().max(1) as f32
    }

    impl FeatureBackend for Fixture {
        fn melspectrogram(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
            self.calls.lock().unwrap().push(("mel", samples.len()));
            if self.fail_mel {
                return Err(Error::WakeWord("boom".into()));
            }
            Ok(vec![mean(samples); 8 * MEL_BINS])
        }

        fn embed(&mut self, mel: &[f32]) -> Result<Vec<f32>> {
            self.calls.lock().unwrap().push(("embed", mel.len()));
            Ok(vec![mean(mel); EMBEDDING_DIM])
        }

        fn classify(&mut self, features: &[f32]) -> Result<f32> {
            self.calls.lock().unwrap().push(("classify", features.len()));
            Ok(mean(features) / 10.0)
        }
    }

    fn window(level: i16) -> Vec<i16> {
        vec![level; WINDOW_SAMPLES]
    }

    fn score(model: &mut OpenWakeWordModel<Fixture>, level: i16) -> f32 {
        score_for(&model.predict(&window(level)).unwrap(), "alexa")
    }

    #[test]
    fn silent_until_classifier_window_fills() {
        let mut model = OpenWakeWordModel::new(Fixture::default(), "alexa");
        for _ in 0..CLASSIFIER_FRAMES - 1 {
            assert_eq!(score(&mut model, 0), 0.0);
        }
        assert!(score(&mut model, 0) > 0.0);

        // Once the initial mel history of ones has rolled out, silence maps
        // to raw 0 → 0/10 + 2 = 2 everywhere → score 0.2.
        for _ in 0..CLASSIFIER_FRAMES {
            score(&mut model, 0);
        }
        let s = score(&mut model, 0);
        assert!((s - 0.2).abs() < 1e-6, "{s}");
    }

    #[test]
    fn tensor_sizes_match_openwakeword() {
        let fixture = Fixture::default();
        let mut model = OpenWakeWordModel::new(fixture.clone(), "alexa");
        for _ in 0..CLASSIFIER_FRAMES {
            model.predict(&window(0)).unwrap();
        }
        let calls = fixture.calls.lock().unwrap();
        assert!(calls.contains(&("mel", MEL_CONTEXT + WINDOW_SAMPLES)));
        assert!(calls.contains(&("embed", EMBEDDING_WINDOW * MEL_BINS)));
        assert_eq!(
            calls.iter().filter(|c| c.0 == "classify").collect::<Vec<_>>(),
            vec![&("classify", CLASSIFIER_FRAMES * EMBEDDING_DIM)]
        );
    }

    #[test]
    fn loud_audio_raises_score() {
        let mut model = OpenWakeWordModel::new(Fixture::default(), "alexa");
        for _ in 0..CLASSIFIER_FRAMES {
            score(&mut model, 0);
        }
        let quiet = score(&mut model, 0);
        for _ in 0..CLASSIFIER_FRAMES * 2 {
            score(&mut model, 50);
        }
        // raw mel 50 → 50/10 + 2 = 7 → score 0.7
        let loud = score(&mut model, 50);
        assert!(loud > quiet);
        assert!((loud - 0.7).abs() < 1e-5, "{loud}");
    }

    #[test]
    fn score_is_clamped() {
        let mut model = OpenWakeWordModel::new(Fixture::default(), "alexa");
        for _ in 0..CLASSIFIER_FRAMES * 2 {
            score(&mut model, 1_000);
        }
        assert_eq!(score(&mut model, 1_000), 1.0);
    }

    #[test]
    fn reset_restarts_warm_up() {
        let mut model = OpenWakeWordModel::new(Fixture::default(), "alexa");
        for _ in 0..CLASSIFIER_FRAMES {
            score(&mut model, 0);
        }
        assert!(score(&mut model, 0) > 0.0);
        model.reset();
        assert_eq!(score(&mut model, 0), 0.0);
    }

    #[test]
    fn partial_windows_are_carried_over() {
        let fixture = Fixture::default();
        let mut model = OpenWakeWordModel::new(fixture.clone(), "alexa");
        model.predict(&vec![0; 1_000]).unwrap();
        assert!(fixture.calls.lock().unwrap().is_empty());
        model.predict(&vec![0; 280]).unwrap();
        assert_eq!(fixture.calls.lock().unwrap().first(), Some(&("mel", 1_760)));
    }

    #[test]
    fn only_configured_label_is_reported() {
        let mut model = OpenWakeWordModel::new(Fixture::default(), "alexa");
        let predictions = model.predict(&window(0)).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(score_for(&predictions, "hey_jarvis"), 0.0);
        assert_eq!(model.label(), "alexa");
    }

    #[test]
    fn backend_error_propagates() {
        let fixture = Fixture {
            fail_mel: true,
            ..Fixture::default()
        };
        let mut model = OpenWakeWordModel::new(fixture, "alexa");
        assert!(matches!(model.predict(&window(0)), Err(Error::WakeWord(_))));
    }

    #[test]
    fn model_paths_default_to_classifier_dir() {
        let paths = ModelPaths::new("models/alexa_v0.1.onnx", None);
        assert_eq!(paths.melspectrogram, Path::new("models/melspectrogram.onnx"));
        assert_eq!(paths.embedding, Path::new("models/embedding_model.onnx"));

        let paths = ModelPaths::new("alexa.onnx", Some(Path::new("/opt/oww")));
        assert_eq!(paths.melspectrogram, Path::new("/opt/oww/melspectrogram.onnx"));
    }

    #[test]
    fn missing_model_file_is_wake_word_error() {
        let paths = ModelPaths::new("/nonexistent/alexa.onnx", None);
        match OpenWakeWordModel::<OnnxBackend>::load(&paths, "alexa") {
            Err(Error::WakeWord(msg)) => assert!(msg.contains("model not found"), "{msg}"),
            other => panic!("expected wake word error, got {:?}", other.map(|_| ())),
        }
    }

    /// Runs the real networks when `VIGIL_OWW_MODELS` points at a directory
    /// holding the feature models and `alexa_v0.1.onnx`.
    #[test]
    #[ignore = "needs openWakeWord ONNX models"]
    fn onnx_silence_does_not_trigger() {
        let dir = PathBuf::from(std::env::var("VIGIL_OWW_MODELS").unwrap());
        let paths = ModelPaths::new(dir.join("alexa_v0.1.onnx"), None);
        let mut model = OpenWakeWordModel::<OnnxBackend>::load(&paths, "alexa").unwrap();
        for _ in 0..CLASSIFIER_FRAMES * 2 {
            let p = model.predict(&window(0)).unwrap();
            assert!(score_for(&p, "alexa") < 0.5);
        }
    }
}
