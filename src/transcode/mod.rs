//! Transcoding of recorded fragments into a shareable MP4
//!
//! - `TranscodeEngine`: contract of the external engine (`FfmpegEngine` implements it)
//! - `Transcoder`: payload assembly and copy-vs-re-encode selection
//! - `ObjectUrlStore`: revocable references to the resulting media

mod adapter;
mod engine;
mod object_url;

pub use adapter::{fetch_file, is_mp4_compatible, read_as_data_url, TranscodeSettings, Transcoder};
pub use engine::{FfmpegEngine, TranscodeEngine, TranscodeError};
pub use object_url::{download_file_name, DeliverableMedia, ObjectUrlStore, StoredObject};
