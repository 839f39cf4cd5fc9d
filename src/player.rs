use crate::effects::{EffectsChain, EnvironmentPreset};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Runtime audio player wrapping rodio. Not serializable — created fresh per
/// session, on the announcer thread.
pub struct Player {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
}

/// Transport settings applied to a sink when a clip starts.
#[derive(Debug, Clone, Copy)]
pub struct ClipSettings {
    pub speed: f32,
    pub volume: f32,
}

impl ClipSettings {
    pub fn apply(&self, sink: &Sink) {
        sink.set_speed(self.speed);
        sink.set_volume(self.volume);
    }
}

impl Player {
    /// Initialize audio output.
    pub fn new() -> Result<Self, String> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| format!("Failed to open audio output: {}", e))?;
        Ok(Player {
            _stream: stream,
            stream_handle: handle,
        })
    }

    /// Create a new independent sink on the audio output.
    pub fn create_sink(&self) -> Result<Sink, String> {
        Sink::try_new(&self.stream_handle).map_err(|e| format!("Failed to create sink: {}", e))
    }

    /// Decode a clip onto a fresh sink and start it, optionally rendered
    /// through an environment effects chain. Returns ownership of the sink;
    /// the caller must stop any previous sink first so only one clip sounds.
    pub fn play_clip(
        &self,
        path: &Path,
        settings: ClipSettings,
        preset: Option<&EnvironmentPreset>,
    ) -> Result<Sink, String> {
        let sink = self.create_sink()?;
        let file = File::open(path)
            .map_err(|e| format!("Cannot open '{}': {}", path.display(), e))?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| format!("Cannot decode '{}': {}", path.display(), e))?;
        match preset {
            Some(p) => sink.append(EffectsChain::new(source.convert_samples::<f32>(), p)),
            None => sink.append(source),
        }
        settings.apply(&sink);
        sink.play();
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_creation_succeeds_or_fails_gracefully() {
        match Player::new() {
            Ok(p) => assert!(p.create_sink().is_ok()),
            Err(e) => assert!(e.contains("Failed to open audio output")),
        }
    }

    #[test]
    fn play_clip_rejects_missing_file() {
        if let Ok(player) = Player::new() {
            let settings = ClipSettings {
                speed: 1.0,
                volume: 1.0,
            };
            let result = player.play_clip(Path::new("nonexistent_audio.mp3"), settings, None);
            assert!(result.is_err());
        }
    }
}
