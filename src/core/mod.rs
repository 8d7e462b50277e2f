pub mod cache;
pub mod direct_downloader;
pub mod disk;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod filename;
pub mod http_client;
pub mod process;
pub mod progress;
pub mod queue;
pub mod redirect;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod url_parser;
pub mod ytdlp;
