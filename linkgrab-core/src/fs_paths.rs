use std::path::PathBuf;

pub trait AppPaths: Send + Sync {
    fn data_dir(&self) -> PathBuf;
    fn cache_dir(&self) -> PathBuf;
    fn work_dir(&self) -> PathBuf;
}

pub struct DefaultPaths;

impl AppPaths for DefaultPaths {
    fn data_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("LINKGRAB_DATA_DIR") {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .map(|d| d.join("linkgrab"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn cache_dir(&self) -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("linkgrab"))
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    fn work_dir(&self) -> PathBuf {
        std::env::temp_dir().join("linkgrab")
    }
}
