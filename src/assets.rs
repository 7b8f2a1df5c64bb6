use std::fs;
use std::io;
use std::path::Path;
use tempfile::TempDir;
use tracing::info;

/// Front-end files compiled into the binary. Written out once at startup
/// so the external static server can serve them from disk.
const ASSETS: &[(&str, &[u8])] = &[
    ("index.html", include_bytes!("../static/index.html")),
    ("app.js", include_bytes!("../static/app.js")),
];

/// Extracted copy of the embedded assets. The temporary directory lives
/// for the process lifetime and is removed when this handle drops.
pub struct ExtractedAssets {
    dir: TempDir,
}

impl ExtractedAssets {
    pub fn extract() -> io::Result<Self> {
        let dir = TempDir::new()?;
        for (name, bytes) in ASSETS {
            fs::write(dir.path().join(name), bytes)?;
        }
        info!(dir = %dir.path().display(), files = ASSETS.len(), "static assets extracted");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_writes_all_embedded_files() {
        let assets = ExtractedAssets::extract().expect("extract");
        for (name, bytes) in ASSETS {
            let on_disk = fs::read(assets.path().join(name)).expect("file present");
            assert_eq!(&on_disk, bytes);
        }
    }

    #[test]
    fn drop_removes_the_directory() {
        let assets = ExtractedAssets::extract().expect("extract");
        let path = assets.path().to_path_buf();
        assert!(path.exists());
        drop(assets);
        assert!(!path.exists());
    }
}
