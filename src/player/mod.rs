// 播放同步核心模块

pub mod audio_output;
pub mod control;
pub mod decode_loop;
pub mod decoder;
pub mod demuxer_source;
pub mod demuxer_thread; // Demuxer 线程 + 包分发
pub mod display;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod manager;
pub mod memory; // 内存源和合成解码器（测试、演示）
pub mod packet_queue;
pub mod picture_queue;
pub mod sync;

pub use audio_output::{AudioOutput, AudioSpec, ManualAudioOutput, PacedAudioOutput};
pub use decoder::{AudioDecoder, MediaBackend, SubtitleDecoder, VideoDecoder};
pub use demuxer_source::{DemuxerSource, SeekDirection};
pub use demuxer_thread::{DemuxerEvent, DemuxerThread, Dispatcher};
pub use display::{NullSink, PresentationSink};
pub use manager::PlaybackManager;
pub use memory::{MemorySource, SyntheticBackend};
pub use packet_queue::PacketQueue;
pub use picture_queue::{PictureQueue, SubtitleQueue};
pub use sync::ClockModel;
