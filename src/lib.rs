pub mod audio;
pub mod config;
pub mod effects;
pub mod error;
pub mod gate;
mod lock;
pub mod logging;
pub mod state;
pub mod stt;
mod telemetry;
pub mod tts;
#[cfg(feature = "vad_earshot")]
pub mod vad_earshot;
pub mod voice;

pub(crate) use lock::lock_or_recover;
pub use error::{ProviderError, TimeoutPhase, VoiceError};
pub use gate::{GateDecision, RejectReason, TranscriptionGate, TranscriptionResult};
pub use logging::{init_logging, log_debug, log_debug_content, log_file_path};
pub use tts::{PlaybackReport, SpeechPlayer, SynthesisProvider};
pub use voice::SpeechListener;
