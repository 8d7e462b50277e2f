pub use linkgrab_core::platforms::Platform;

pub mod direct;
pub mod generic_ytdlp;
pub mod instagram;
pub mod traits;
