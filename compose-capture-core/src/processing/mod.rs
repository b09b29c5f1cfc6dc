pub mod audio_mixer;
pub mod compositor;
pub mod resampler;
